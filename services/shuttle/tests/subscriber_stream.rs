//! Integration tests for the hub subscription stream: resume offsets,
//! event-type filtering, cancellation and transport readiness.

use std::time::Duration;

use hub_protocol::{
    HubEvent, HubEventBody, HubEventType, MergeOnChainEventBody, MergeUsernameProofBody,
    OnChainEvent, UserNameType, UsernameProofBody,
};
use hub_test_utils::builders::{cast_add, merge_event, prune_event, revoke_event};
use hub_test_utils::{MockHub, MockHubServer};
use shuttle::subscriber::{Subscriber, SubscriberError, SubscriberState};
use tokio::sync::{mpsc, watch};

fn username_proof_event(id: u64) -> HubEvent {
    HubEvent {
        id,
        body: HubEventBody::MergeUsernameProof(MergeUsernameProofBody {
            username_proof: UsernameProofBody {
                timestamp: 1_700_000_000,
                name: b"alice".to_vec(),
                owner: vec![0x0a; 20],
                signature: vec![0x0b; 65],
                fid: 1,
                proof_type: UserNameType::Fname,
            },
        }),
    }
}

fn on_chain_event(id: u64) -> HubEvent {
    HubEvent {
        id,
        body: HubEventBody::MergeOnChainEvent(MergeOnChainEventBody {
            on_chain_event: OnChainEvent {
                fid: 1,
                block_number: 99,
                transaction_hash: vec![0xcc; 32],
                log_index: 0,
            },
        }),
    }
}

/// from_id is an inclusive lower bound on replayed event ids.
#[tokio::test]
async fn resumes_from_requested_event_id() {
    let mut hub = MockHub::new();
    hub.events = vec![
        merge_event(100, cast_add(1, 10, "a")),
        merge_event(101, cast_add(1, 11, "b")),
        merge_event(102, cast_add(1, 12, "c")),
    ];
    hub.close_after_replay = true;
    let server = MockHubServer::start(hub).await.unwrap();

    let subscriber = Subscriber::new(server.ws_url(), None);
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task =
        tokio::spawn(async move { subscriber.start(Some(101), events_tx, shutdown_rx).await });

    let mut ids = Vec::new();
    while let Some(event) = events_rx.recv().await {
        ids.push(event.id);
    }
    assert_eq!(ids, vec![101, 102]);

    // The hub closed the stream without the caller stopping: that is an
    // error so the caller can decide restart policy.
    assert!(matches!(
        task.await.unwrap(),
        Err(SubscriberError::StreamClosed)
    ));
}

/// The default filter covers all five event kinds; an explicit set narrows
/// the stream.
#[tokio::test]
async fn event_type_filter_is_honored() {
    let events = vec![
        merge_event(1, cast_add(1, 10, "m")),
        prune_event(2, cast_add(1, 11, "p")),
        revoke_event(3, cast_add(1, 12, "r")),
        username_proof_event(4),
        on_chain_event(5),
    ];

    let mut hub = MockHub::new();
    hub.events = events.clone();
    hub.close_after_replay = true;
    let server = MockHubServer::start(hub).await.unwrap();

    let subscriber = Subscriber::new(server.ws_url(), None);
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { subscriber.start(None, events_tx, shutdown_rx).await });
    let mut ids = Vec::new();
    while let Some(event) = events_rx.recv().await {
        ids.push(event.id);
    }
    let _ = task.await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let mut hub = MockHub::new();
    hub.events = events;
    hub.close_after_replay = true;
    let server = MockHubServer::start(hub).await.unwrap();

    let subscriber = Subscriber::new(server.ws_url(), Some(vec![HubEventType::MergeMessage]));
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { subscriber.start(None, events_tx, shutdown_rx).await });
    let mut ids = Vec::new();
    while let Some(event) = events_rx.recv().await {
        ids.push(event.id);
    }
    let _ = task.await.unwrap();
    assert_eq!(ids, vec![1]);
}

/// stop() (the shutdown flag) cancels an open stream and reports a clean
/// caller stop, not an error.
#[tokio::test]
async fn caller_stop_is_a_clean_shutdown() {
    let mut hub = MockHub::new();
    hub.events = vec![merge_event(7, cast_add(1, 10, "only"))];
    // Stream stays open after replay.
    let server = MockHubServer::start(hub).await.unwrap();

    let subscriber = Subscriber::new(server.ws_url(), None);
    let state = subscriber.state();
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { subscriber.start(None, events_tx, shutdown_rx).await });

    let first = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, 7);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*state.borrow(), SubscriberState::Stopped);
}

/// A transport that accepts TCP but never completes the handshake trips the
/// 500 ms readiness budget.
#[tokio::test]
async fn unready_transport_fails_within_budget() {
    // Bound but never accepted: the WS handshake can never complete.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());

    let subscriber = Subscriber::new(url, None);
    let state = subscriber.state();
    let (events_tx, _events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = tokio::time::Instant::now();
    let result = subscriber.start(None, events_tx, shutdown_rx).await;
    assert!(matches!(result, Err(SubscriberError::TransportUnavailable)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(*state.borrow(), SubscriberState::Stopped);
}

/// A refused connection is a transient transport error.
#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let subscriber = Subscriber::new(url, None);
    let (events_tx, _events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = subscriber
        .start(None, events_tx, shutdown_rx)
        .await
        .unwrap_err();
    assert!(err.is_transient(), "got non-transient error: {err}");
}
