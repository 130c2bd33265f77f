//! Resumable server-streaming subscription to the hub.
//!
//! One subscriber owns one open WebSocket stream. Events are forwarded into
//! a bounded channel; the awaited send is the backpressure point, so a slow
//! consumer slows the socket reads rather than buffering without bound.
//! The subscriber never deduplicates; duplicates after a reconnect are
//! absorbed by the store's conflict policy.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use hub_protocol::{HubEvent, HubEventType, HubWsMessage, SubscribeRequest, default_event_types};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

/// Budget for the transport to become ready before `start` gives up.
pub const READY_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Connecting,
    Streaming,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("hub transport not ready within {}ms", READY_TIMEOUT.as_millis())]
    TransportUnavailable,
    #[error("WS: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hub closed the stream")]
    StreamClosed,
    #[error("hub error {code}: {message}")]
    Hub {
        code: String,
        message: String,
        retryable: bool,
    },
    #[error("event channel closed")]
    ChannelClosed,
}

impl SubscriberError {
    /// Whether the caller should restart the subscriber from the last
    /// durable checkpoint.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransportUnavailable | Self::Ws(_) | Self::StreamClosed => true,
            Self::Hub { retryable, .. } => *retryable,
            Self::Json(_) | Self::ChannelClosed => false,
        }
    }
}

/// A resumable subscription over a caller-chosen set of event types.
///
/// State machine: Idle -> Connecting -> Streaming -> Stopped, with Stopped
/// terminal. Restarting means constructing a new subscriber.
pub struct Subscriber {
    url: String,
    event_types: Vec<HubEventType>,
    state_tx: watch::Sender<SubscriberState>,
}

impl Subscriber {
    /// `event_types` of `None` selects the default filter (all five kinds).
    pub fn new(url: impl Into<String>, event_types: Option<Vec<HubEventType>>) -> Self {
        let (state_tx, _) = watch::channel(SubscriberState::Idle);
        Self {
            url: url.into(),
            event_types: event_types.unwrap_or_else(default_event_types),
            state_tx,
        }
    }

    /// Observe state transitions (used by supervisors and tests).
    pub fn state(&self) -> watch::Receiver<SubscriberState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SubscriberState) {
        let _ = self.state_tx.send(state);
    }

    /// Open the subscription and pump frames until the stream ends.
    ///
    /// `from_id` of `Some(id)` asks the hub to replay retained events with
    /// id >= `id` before going live. Flipping `shutdown` to true cancels
    /// the stream; frames in flight after that are discarded.
    ///
    /// `Ok(())` means the caller stopped the subscriber; any other stream
    /// end is reported as an error so the caller can decide restart policy.
    pub async fn start(
        &self,
        from_id: Option<u64>,
        events_tx: mpsc::Sender<HubEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SubscriberError> {
        self.set_state(SubscriberState::Connecting);
        let connect = tokio_tungstenite::connect_async(&self.url);
        let mut ws = match tokio::time::timeout(READY_TIMEOUT, connect).await {
            Err(_) => {
                self.set_state(SubscriberState::Stopped);
                return Err(SubscriberError::TransportUnavailable);
            }
            Ok(Err(e)) => {
                self.set_state(SubscriberState::Stopped);
                return Err(e.into());
            }
            Ok(Ok((ws, _response))) => ws,
        };

        let subscribe = HubWsMessage::Subscribe(SubscribeRequest {
            event_types: self.event_types.clone(),
            from_id,
        });
        if let Err(e) = ws
            .send(Message::Text(serde_json::to_string(&subscribe)?.into()))
            .await
        {
            self.set_state(SubscriberState::Stopped);
            return Err(e.into());
        }

        self.set_state(SubscriberState::Streaming);
        let result = stream_events(&mut ws, &events_tx, &mut shutdown).await;
        let _ = ws.close(None).await;
        self.set_state(SubscriberState::Stopped);
        result
    }
}

/// Pump one open socket. Generic over the stream so tests can drive it
/// without a real transport.
async fn stream_events<S>(
    ws: &mut S,
    events_tx: &mpsc::Sender<HubEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SubscriberError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    if *shutdown.borrow() {
        return Ok(());
    }
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            frame = ws.next() => {
                match frame {
                    None => return Err(SubscriberError::StreamClosed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(t))) => match serde_json::from_str::<HubWsMessage>(&t) {
                        Ok(HubWsMessage::Event(event)) => {
                            debug!(event_id = event.id, "event");
                            if events_tx.send(event).await.is_err() {
                                return Err(SubscriberError::ChannelClosed);
                            }
                        }
                        Ok(HubWsMessage::Error(e)) => {
                            return Err(SubscriberError::Hub {
                                code: e.code,
                                message: e.message,
                                retryable: e.retryable,
                            });
                        }
                        Ok(other) => debug!(?other, "ignoring frame"),
                        Err(e) => warn!(error = %e, "undecodable frame, skipping"),
                    },
                    Some(Ok(Message::Close(_))) => {
                        return if *shutdown.borrow() {
                            Ok(())
                        } else {
                            Err(SubscriberError::StreamClosed)
                        };
                    }
                    Some(Ok(Message::Ping(d))) => {
                        let _ = ws.send(Message::Pong(d)).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
