// mock_hub: A mock hub for testing the subscriber, dispatcher and
// reconciler without a real hub.
//
// Serves the subscription WebSocket at `/ws` and the paged inventory API at
// `/v1/messages/{fid}/{message_type}` from scripted state. Binds to port 0
// (random) so each test can spin up its own isolated instance.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use hub_protocol::{
    error_codes, HubError, HubEvent, HubWsMessage, Message, MessageType, MessagesPage,
    SubscribeRequest,
};
use serde::Deserialize;

/// Scripted hub state.
///
/// # Protocol behavior
///
/// - First frame from a subscriber must be `subscribe`; anything else draws
///   an `error` frame with code `PROTOCOL_ERROR` and the connection closes.
/// - Scripted events are replayed in order, filtered by the request's
///   event-type set and `from_id` (inclusive lower bound on the event id).
/// - After replay the stream stays open until the client closes it, unless
///   `close_after_replay` is set, in which case the hub closes first.
/// - Inventory pages use a decimal offset as the page token.
#[derive(Default)]
pub struct MockHub {
    /// Events replayed to each subscription, in order.
    pub events: Vec<HubEvent>,
    /// Per-(fid, type) live inventory served by the paged API.
    pub inventory: HashMap<(u64, MessageType), Vec<Message>>,
    /// Close the socket from the hub side once the script is drained.
    pub close_after_replay: bool,
    /// Answer every inventory request with a 500.
    pub fail_inventory: bool,
}

impl MockHub {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MockHubServer {
    addr: SocketAddr,
    /// Handle to the background server; dropped when the server is dropped.
    _task: tokio::task::JoinHandle<()>,
}

impl MockHubServer {
    /// Start the mock hub, binding to a random available port.
    pub async fn start(hub: MockHub) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(hub);

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/v1/messages/{fid}/{message_type}", get(messages_handler))
            .with_state(state);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { addr, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL of the subscription endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Base URL of the inventory API.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<MockHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscription(socket, hub))
}

async fn handle_subscription(mut socket: WebSocket, hub: Arc<MockHub>) {
    let request = match recv_subscribe(&mut socket).await {
        Some(request) => request,
        None => return,
    };

    for event in &hub.events {
        if !request.event_types.contains(&event.body.event_type()) {
            continue;
        }
        if let Some(from) = request.from_id {
            if event.id < from {
                continue;
            }
        }
        let frame = HubWsMessage::Event(event.clone());
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(_) => return,
        };
        if socket.send(WsFrame::Text(json.into())).await.is_err() {
            return;
        }
    }

    if hub.close_after_replay {
        let _ = socket.send(WsFrame::Close(None)).await;
        return;
    }

    // Hold the stream open until the client goes away.
    while let Some(Ok(frame)) = socket.recv().await {
        if matches!(frame, WsFrame::Close(_)) {
            break;
        }
    }
}

/// Read frames until the opening `subscribe` arrives. Any other first frame
/// is a protocol error.
async fn recv_subscribe(socket: &mut WebSocket) -> Option<SubscribeRequest> {
    loop {
        match socket.recv().await? {
            Ok(WsFrame::Text(t)) => match serde_json::from_str::<HubWsMessage>(&t) {
                Ok(HubWsMessage::Subscribe(request)) => return Some(request),
                _ => {
                    let error = HubWsMessage::Error(HubError {
                        code: error_codes::PROTOCOL_ERROR.to_owned(),
                        message: "first frame must be subscribe".to_owned(),
                        retryable: false,
                    });
                    if let Ok(json) = serde_json::to_string(&error) {
                        let _ = socket.send(WsFrame::Text(json.into())).await;
                    }
                    return None;
                }
            },
            Ok(WsFrame::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page_size: Option<u32>,
    page_token: Option<String>,
}

async fn messages_handler(
    Path((fid, message_type)): Path<(u64, String)>,
    Query(params): Query<PageParams>,
    State(hub): State<Arc<MockHub>>,
) -> impl IntoResponse {
    if hub.fail_inventory {
        return (StatusCode::INTERNAL_SERVER_ERROR, "inventory unavailable").into_response();
    }
    let Some(ty) = MessageType::parse(&message_type) else {
        return (StatusCode::BAD_REQUEST, "unknown message type").into_response();
    };

    let all: &[Message] = hub
        .inventory
        .get(&(fid, ty))
        .map(|v| v.as_slice())
        .unwrap_or(&[]);
    let offset: usize = params
        .page_token
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let page_size = params.page_size.unwrap_or(1000) as usize;
    let start = offset.min(all.len());
    let end = (start + page_size).min(all.len());

    axum::Json(MessagesPage {
        messages: all[start..end].to_vec(),
        next_page_token: (end < all.len()).then(|| end.to_string()),
    })
    .into_response()
}
