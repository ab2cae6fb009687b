//! Streaming Consumer Integration Tests
//!
//! Runs the consumer against a local WebSocket server and checks the
//! subscription handshake, dispatch into handlers and reconnection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;

use market_ingest::infrastructure::stream::{ConnectionState, ReconnectConfig};
use market_ingest::{
    FanoutPublisher, FeedKind, HandlerRegistry, ImmediateHandler, InMemoryRepository,
    SharedHandler, SharedPublisher, SharedRepository, StreamConfig, StreamConsumer,
};

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    consumer: Arc<StreamConsumer>,
    repository: Arc<InMemoryRepository>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

async fn start_consumer(listener: &TcpListener, inactivity_timeout: Duration) -> Harness {
    let addr = listener.local_addr().unwrap();
    let repository = Arc::new(InMemoryRepository::new());
    let repo: SharedRepository = repository.clone();
    let publisher: SharedPublisher = Arc::new(FanoutPublisher::with_defaults());

    let handlers: [SharedHandler; 2] = [
        Arc::new(ImmediateHandler::flow_alerts(
            Arc::clone(&repo),
            Arc::clone(&publisher),
        )),
        Arc::new(ImmediateHandler::news(repo, publisher)),
    ];

    let mut config = StreamConfig::new(format!("ws://{addr}/socket"), "secret");
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter_factor: 0.0,
        max_attempts: 5,
    };
    config.inactivity_timeout = inactivity_timeout;
    config.ping_interval = Duration::ZERO;

    let consumer = Arc::new(StreamConsumer::new(
        config,
        HandlerRegistry::new(handlers.into()),
    ));
    let cancel = CancellationToken::new();
    let task = {
        let consumer = Arc::clone(&consumer);
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    };

    Harness {
        consumer,
        repository,
        cancel,
        task,
    }
}

/// Accept one connection and return it with the requested URI.
async fn accept(listener: &TcpListener) -> (ServerSocket, String) {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut uri = String::new();
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        uri = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();
    (ws, uri)
}

/// Read `count` subscription messages.
async fn read_subscriptions(ws: &mut ServerSocket, count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            out.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    out
}

async fn send(ws: &mut ServerSocket, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn flow_alert(id: &str) -> Value {
    json!({
        "channel": "flow-alerts",
        "data": {"id": id, "ticker": "SPY", "created_at": "2024-03-15T14:30:00Z"}
    })
}

#[tokio::test]
async fn subscribes_then_dispatches_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let harness = start_consumer(&listener, Duration::ZERO).await;

    let (mut ws, uri) = accept(&listener).await;
    assert_eq!(uri, "/socket?token=secret");

    let subscriptions = read_subscriptions(&mut ws, 2).await;
    assert_eq!(
        subscriptions,
        vec![
            json!({"action": "subscribe", "channel": "flow-alerts"}),
            json!({"action": "subscribe", "channel": "news"}),
        ]
    );

    send(&mut ws, flow_alert("fa-1")).await;
    send(
        &mut ws,
        json!({
            "channel": "news",
            "data": [
                {"id": "n-1", "headline": "Fed holds rates", "timestamp": "2024-03-15T18:00:00Z"},
                {"id": "n-2", "headline": "CPI cools", "timestamp": "2024-03-15T18:05:00Z"}
            ]
        }),
    )
    .await;
    send(&mut ws, json!({"channel": "unknown", "data": {"x": 1}})).await;
    ws.send(Message::text("not json")).await.unwrap();

    let repository = Arc::clone(&harness.repository);
    wait_until(|| repository.event_count() == 3).await;
    assert!(repository.get(FeedKind::FlowAlert, "fa-1").is_some());
    assert_eq!(repository.count_of(FeedKind::News), 2);

    let status = harness.consumer.status();
    wait_until(|| status.snapshot().frames_dropped == 2).await;
    assert_eq!(status.state(), ConnectionState::Streaming);
    assert_eq!(status.snapshot().frames_received, 4);

    harness.cancel.cancel();
    timeout(WAIT, harness.task).await.unwrap().unwrap();
    assert_eq!(status.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnects_and_resubscribes_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let harness = start_consumer(&listener, Duration::ZERO).await;

    let (mut first, _) = accept(&listener).await;
    read_subscriptions(&mut first, 2).await;
    send(&mut first, flow_alert("fa-1")).await;

    let repository = Arc::clone(&harness.repository);
    wait_until(|| repository.event_count() == 1).await;
    first.close(None).await.unwrap();

    let (mut second, _) = accept(&listener).await;
    read_subscriptions(&mut second, 2).await;
    send(&mut second, flow_alert("fa-2")).await;
    // Replayed frame collapses onto the existing row.
    send(&mut second, flow_alert("fa-1")).await;

    let status = harness.consumer.status();
    wait_until(|| status.snapshot().frames_received == 3).await;
    wait_until(|| repository.event_count() == 2).await;

    let snapshot = status.snapshot();
    assert_eq!(snapshot.sessions, 2);
    assert!(snapshot.reconnect_attempts >= 1);

    harness.cancel.cancel();
    timeout(WAIT, harness.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn silent_connection_is_replaced_after_inactivity_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let harness = start_consumer(&listener, Duration::from_millis(200)).await;

    // First server never sends data.
    let (mut silent, _) = accept(&listener).await;
    read_subscriptions(&mut silent, 2).await;

    let (mut second, _) = accept(&listener).await;
    read_subscriptions(&mut second, 2).await;
    send(&mut second, flow_alert("fa-1")).await;

    let repository = Arc::clone(&harness.repository);
    wait_until(|| repository.event_count() == 1).await;
    assert_eq!(harness.consumer.status().snapshot().sessions, 2);

    harness.cancel.cancel();
    timeout(WAIT, harness.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_while_disconnected_stops_promptly() {
    // Nothing listens here, so every connect fails and the consumer backs off.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let repository: SharedRepository = Arc::new(InMemoryRepository::new());
    let publisher: SharedPublisher = Arc::new(FanoutPublisher::with_defaults());
    let handlers: [SharedHandler; 1] = [Arc::new(ImmediateHandler::news(repository, publisher))];

    let mut config = StreamConfig::new(format!("ws://{addr}/socket"), "secret");
    config.reconnect.initial_delay = Duration::from_secs(30);
    let consumer = Arc::new(StreamConsumer::new(
        config,
        HandlerRegistry::new(handlers.into()),
    ));
    let status = consumer.status();
    let cancel = CancellationToken::new();
    let task = {
        let consumer = Arc::clone(&consumer);
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    };

    wait_until(|| status.state() == ConnectionState::Reconnecting).await;
    cancel.cancel();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(status.state(), ConnectionState::Disconnected);
}
