// hub-test-utils: Shared test utilities for the replication shuttle.
//
// Provides a mock hub (WebSocket subscription stream + paged inventory API)
// and deterministic signed-message builders for integration testing.

pub mod builders;
pub mod mock_hub;

pub use mock_hub::{MockHub, MockHubServer};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{cast_add, merge_event};
    use futures_util::{SinkExt, StreamExt};
    use hub_protocol::*;
    use tokio_tungstenite::tungstenite::protocol::Message as Frame;

    type WsStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect(url: &str) -> WsStream {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn send_frame(ws: &mut WsStream, frame: &HubWsMessage) {
        let json = serde_json::to_string(frame).unwrap();
        ws.send(Frame::Text(json.into())).await.unwrap();
    }

    /// Test: subscription replays scripted events at or after from_id, then
    /// closes when configured to.
    #[tokio::test]
    async fn replays_events_from_id() {
        let mut hub = MockHub::new();
        hub.events = vec![
            merge_event(1, cast_add(1, 10, "a")),
            merge_event(2, cast_add(1, 11, "b")),
            merge_event(3, cast_add(1, 12, "c")),
        ];
        hub.close_after_replay = true;
        let server = MockHubServer::start(hub).await.unwrap();

        let mut ws = connect(&server.ws_url()).await;
        send_frame(
            &mut ws,
            &HubWsMessage::Subscribe(SubscribeRequest {
                event_types: default_event_types(),
                from_id: Some(2),
            }),
        )
        .await;

        let mut ids = Vec::new();
        while let Some(Ok(frame)) = ws.next().await {
            match frame {
                Frame::Text(t) => match serde_json::from_str::<HubWsMessage>(&t).unwrap() {
                    HubWsMessage::Event(event) => ids.push(event.id),
                    other => panic!("unexpected frame: {other:?}"),
                },
                Frame::Close(_) => break,
                _ => {}
            }
        }
        assert_eq!(ids, vec![2, 3]);
    }

    /// Test: anything but subscribe as the first frame draws PROTOCOL_ERROR.
    #[tokio::test]
    async fn first_frame_must_be_subscribe() {
        let server = MockHubServer::start(MockHub::new()).await.unwrap();
        let mut ws = connect(&server.ws_url()).await;

        send_frame(
            &mut ws,
            &HubWsMessage::Event(merge_event(1, cast_add(1, 10, "early"))),
        )
        .await;

        let frame = ws.next().await.unwrap().unwrap();
        let Frame::Text(t) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        match serde_json::from_str::<HubWsMessage>(&t).unwrap() {
            HubWsMessage::Error(e) => assert_eq!(e.code, error_codes::PROTOCOL_ERROR),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    /// Test: inventory pages use decimal offset tokens and honor page_size.
    #[tokio::test]
    async fn inventory_pages_with_offset_tokens() {
        let messages: Vec<Message> = (0..5u32)
            .map(|i| cast_add(9, i, &format!("m{i}")))
            .collect();
        let mut hub = MockHub::new();
        hub.inventory
            .insert((9, MessageType::CastAdd), messages.clone());
        let server = MockHubServer::start(hub).await.unwrap();

        let client = reqwest::Client::new();
        let base = format!("{}/v1/messages/9/cast_add", server.http_url());

        let mut collected = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;
        loop {
            let mut request = client.get(&base).query(&[("page_size", "2")]);
            if let Some(t) = &token {
                request = request.query(&[("page_token", t.as_str())]);
            }
            let page: MessagesPage = request.send().await.unwrap().json().await.unwrap();
            pages += 1;
            collected.extend(page.messages);
            match page.next_page_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(collected, messages);
    }

    /// Test: unknown fids page as empty, unknown types as 400.
    #[tokio::test]
    async fn inventory_edge_responses() {
        let server = MockHubServer::start(MockHub::new()).await.unwrap();
        let client = reqwest::Client::new();

        let page: MessagesPage = client
            .get(format!("{}/v1/messages/123/cast_add", server.http_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(page.messages.is_empty());
        assert!(page.next_page_token.is_none());

        let status = client
            .get(format!("{}/v1/messages/123/casts", server.http_url()))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    }
}
