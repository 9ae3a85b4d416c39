use super::*;
use crate::protocol::Frame;
use crate::transport::{MockConnector, OpenOutcome};

fn config() -> TerminalConfig {
    TerminalConfig::new(
        "dev-1",
        "speaker",
        "wss://mock.local/ws",
        "tenant",
        "product",
        "key",
    )
}

struct Harness {
    engine: ConnectionEngine,
    connector: MockConnector,
    events: mpsc::UnboundedReceiver<Dispatch>,
}

impl Harness {
    fn new(config: TerminalConfig) -> Self {
        let connector = MockConnector::new();
        let (tx, events) = mpsc::unbounded_channel();
        let engine = ConnectionEngine::spawn(
            "t1",
            Arc::new(config),
            Arc::new(connector.clone()),
            tx,
        );
        Self {
            engine,
            connector,
            events,
        }
    }

    async fn connected(config: TerminalConfig) -> Self {
        let mut harness = Self::new(config);
        harness.engine.connect(None).await.unwrap();
        harness.drain();
        harness
    }

    fn link(&self) -> crate::transport::MockLink {
        self.connector.last_link().unwrap()
    }

    fn drain(&mut self) -> Vec<InboundEvent> {
        let mut out = Vec::new();
        while let Ok(item) = self.events.try_recv() {
            out.push(routed(item).event);
        }
        out
    }
}

fn routed(item: Dispatch) -> RoutedEvent {
    match item {
        Dispatch::Event(routed) => {
            assert_eq!(&*routed.terminal_id, "t1");
            routed
        }
        other => panic!("engine queued {:?}", other),
    }
}

/// Let the engine task process whatever is ready
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_and_rejects_second_connect() {
    let mut h = Harness::new(config());
    assert_eq!(h.engine.state(), ConnectionState::Idle);

    h.engine.connect(Some("trace-1")).await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Open);
    assert!(h.engine.is_connected());
    assert!(h.engine.statistics().connected);
    assert_eq!(h.drain(), vec![InboundEvent::connection(true, "")]);

    let url = h.connector.opened_urls()[0].clone();
    assert_eq!(
        url.query(),
        Some("tenantId=tenant&productId=product&productKey=key&traceId=trace-1")
    );

    let err = h.engine.connect(None).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyConnected));
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let mut h = Harness::new(config());

    // never connected: silent success
    h.engine.disconnect().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert!(h.drain().is_empty());

    h.engine.connect(None).await.unwrap();
    h.drain();
    let link = h.link();

    h.engine.disconnect().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(link.close_frame(), Some((1000, "Normal disconnection".to_string())));
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::closed(1000, "Normal disconnection"),
            InboundEvent::connection(false, "User disconnected"),
        ]
    );

    h.engine.disconnect().await.unwrap();
    assert!(h.drain().is_empty());

    // auto-reconnect stays off
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.open_count(), 1);
    assert_eq!(h.engine.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_is_not_retried() {
    let mut h = Harness::new(config());
    h.connector.push_outcome(OpenOutcome::Refuse("refused".into()));

    let err = h.engine.connect(None).await.unwrap_err();
    assert!(matches!(err, CoreError::ConnectionFailed(ref reason) if reason == "refused"));
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::error(ErrorCode::ConnectionFailed, "refused"),
            InboundEvent::connection(false, "refused"),
        ]
    );
    assert_eq!(h.engine.statistics().errors, 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let mut h = Harness::new(config().with_connection_timeout(Duration::from_secs(2)));
    h.connector.push_outcome(OpenOutcome::Hang);

    let started = Instant::now();
    let err = h.engine.connect(None).await.unwrap_err();
    assert!(matches!(err, CoreError::ConnectionTimeout(2000)));
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::error(ErrorCode::ConnectionTimeout, "Connection timeout"),
            InboundEvent::connection(false, "Connection timeout"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_within_first_backoff_after_drop() {
    let mut h = Harness::connected(
        config().with_reconnect_intervals(Duration::from_millis(1000), Duration::from_secs(60)),
    )
    .await;

    let dropped_at = Instant::now();
    assert!(h.link().drop_connection());
    settle().await;

    assert_eq!(h.engine.state(), ConnectionState::Reconnecting);
    assert!(!h.engine.statistics().connected);
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::closed(1006, "Connection reset"),
            InboundEvent::connection(false, "Connection lost"),
        ]
    );

    let mut state = h.engine.watch_state();
    state
        .wait_for(|s| *s == ConnectionState::Open)
        .await
        .unwrap();

    // delay(0) is at most base * (1 + jitter)
    assert!(dropped_at.elapsed() <= Duration::from_millis(1100));
    assert_eq!(h.connector.open_count(), 2);
    assert_eq!(h.drain(), vec![InboundEvent::connection(true, "")]);

    // reconnect never carries a trace id
    assert!(!h.connector.opened_urls()[1].as_str().contains("traceId"));
    assert_eq!(h.engine.statistics().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_max_reconnect_attempts_then_stays_closed() {
    let mut h = Harness::connected(
        config()
            .with_max_reconnect_attempts(2)
            .with_jitter_factor(0.0)
            .with_reconnect_intervals(Duration::from_millis(100), Duration::from_secs(10)),
    )
    .await;
    h.connector.set_fallback(OpenOutcome::Refuse("down".into()));

    h.link().drop_connection();

    // first retry at +100ms
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.engine.statistics().reconnect_attempts, 1);
    assert_eq!(h.connector.open_count(), 2);
    assert_eq!(h.engine.state(), ConnectionState::Reconnecting);

    // second retry at +300ms, then give up
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.engine.statistics().reconnect_attempts, 2);
    assert_eq!(h.connector.open_count(), 3);
    assert_eq!(h.engine.state(), ConnectionState::Closed);

    let gave_up = h
        .drain()
        .into_iter()
        .filter(|e| *e == InboundEvent::error(ErrorCode::ConnectionFailed, "Max reconnect attempts reached"))
        .count();
    assert_eq!(gave_up, 1);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.connector.open_count(), 3);
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let mut h = Harness::connected(config()).await;

    h.link().drop_connection();
    settle().await;
    assert_eq!(h.engine.state(), ConnectionState::Reconnecting);
    h.drain();

    h.engine.disconnect().await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::closed(1000, "Normal disconnection"),
            InboundEvent::connection(false, "User disconnected"),
        ]
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_text_is_rejected_locally() {
    let h = Harness::connected(config().with_max_message_size(16)).await;
    let link = h.link();

    let err = h.engine.send_text("x".repeat(17)).await.unwrap_err();
    assert!(matches!(err, CoreError::PayloadTooLarge { size: 17, max: 16 }));
    assert!(link.sent_texts().is_empty());
    let stats = h.engine.statistics();
    assert_eq!(stats.signals_sent, 0);
    assert_eq!(stats.errors, 0);

    h.engine.send_text(r#"{"a":1}"#.to_string()).await.unwrap();
    assert_eq!(link.sent_texts(), vec![r#"{"a":1}"#.to_string()]);
    assert_eq!(h.engine.statistics().signals_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_connection() {
    let h = Harness::new(config());
    assert!(matches!(
        h.engine.send_text("{}".into()).await,
        Err(CoreError::NotConnected)
    ));
    assert!(matches!(
        h.engine.send_binary(Bytes::from_static(b"pcm"), "opus").await,
        Err(CoreError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_counts_and_reports() {
    let mut h = Harness::connected(config()).await;
    h.link().set_fail_sends(true);

    let err = h.engine.send_text("{}".into()).await.unwrap_err();
    assert!(matches!(err, CoreError::SendFailed(_)));
    assert_eq!(h.engine.statistics().errors, 1);
    assert_eq!(h.engine.statistics().signals_sent, 0);
    assert_eq!(h.engine.state(), ConnectionState::Open);

    let events = h.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        InboundEvent::Error {
            code: ErrorCode::SendFailed,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_send_binary_wraps_frame() {
    let h = Harness::connected(config()).await;
    let link = h.link();

    h.engine
        .send_binary(Bytes::from_static(b"\x01\x02\x03"), "opus")
        .await
        .unwrap();

    let sent = link.sent_binaries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 14 + 3);
    let frame = FrameCodec::decode(&sent[0]).unwrap();
    assert_eq!(
        frame,
        Frame {
            type_tag: "OPUS".to_string(),
            payload: Bytes::from_static(b"\x01\x02\x03"),
        }
    );
    assert_eq!(h.engine.statistics().binary_sent, 1);

    let too_big = Bytes::from(vec![0u8; 65536]);
    let err = h.engine.send_binary(too_big, "opus").await.unwrap_err();
    assert!(matches!(err, CoreError::PayloadTooLarge { size: 65536, .. }));
    assert_eq!(link.sent_binaries().len(), 1);
    assert_eq!(h.engine.statistics().errors, 1);
    assert_eq!(h.engine.statistics().binary_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_binary_reports_error() {
    let mut h = Harness::connected(config()).await;

    let too_big = Bytes::from(vec![0u8; 70_000]);
    let err = h.engine.send_binary(too_big, "pcm").await.unwrap_err();
    assert!(matches!(err, CoreError::PayloadTooLarge { size: 70_000, max: 65535 }));
    settle().await;

    let events = h.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        InboundEvent::Error {
            code: ErrorCode::SignalTooLarge,
            ..
        }
    ));
    assert!(h.link().sent_binaries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_only_when_idle() {
    let h = Harness::connected(config().with_heartbeat_interval(Duration::from_secs(5))).await;
    let link = h.link();

    // activity at 3s keeps the 5s tick quiet
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.engine.send_text(r#"{"n":1}"#.into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(link.sent_texts(), vec![r#"{"n":1}"#.to_string()]);

    // idle through the 10s tick
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        link.sent_texts(),
        vec![r#"{"n":1}"#.to_string(), HEARTBEAT_PAYLOAD.to_string()]
    );
    // pings are not signals
    assert_eq!(h.engine.statistics().signals_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_drops_connection() {
    let mut h = Harness::connected(
        config()
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_max_reconnect_attempts(0),
    )
    .await;
    h.link().set_fail_sends(true);

    tokio::time::sleep(Duration::from_millis(5100)).await;
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::closed(1006, "Heartbeat failed"),
            InboundEvent::connection(false, "Connection lost"),
            InboundEvent::error(ErrorCode::ConnectionFailed, "Max reconnect attempts reached"),
        ]
    );
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_directive_dispatch() {
    let mut h = Harness::connected(config()).await;

    h.link()
        .inject_text(r#"{"id":"d-1","name":"volume.set","parameters":{"level":4}}"#);
    let item = h.events.recv().await.unwrap();
    match routed(item).event {
        InboundEvent::Directive(directive) => {
            assert_eq!(directive.name, "volume.set");
            assert_eq!(directive.int_parameter("level", 0), 4);
        }
        other => panic!("expected directive, got {:?}", other),
    }

    // non-directive JSON is dropped quietly
    h.link().inject_text(r#"{"type":"pong"}"#);
    settle().await;
    assert!(h.drain().is_empty());

    let stats = h.engine.statistics();
    assert_eq!(stats.directives_received, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_directives_counted_but_not_routed_when_disabled() {
    let mut h = Harness::connected(config().with_directive_receiving(false)).await;

    h.link().inject_text(r#"{"id":"d-1","name":"reboot"}"#);
    settle().await;

    assert!(h.drain().is_empty());
    assert_eq!(h.engine.statistics().directives_received, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_json_reports_error() {
    let mut h = Harness::connected(config()).await;

    h.link().inject_text("{not json");
    settle().await;

    assert_eq!(
        h.drain(),
        vec![InboundEvent::error(ErrorCode::InternalError, "Invalid JSON message")]
    );
    assert_eq!(h.engine.statistics().errors, 1);
    assert_eq!(h.engine.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_binary_delivered_as_is() {
    let mut h = Harness::connected(config()).await;

    h.link().inject_binary(vec![0x82, 0x00, 0x01]);
    settle().await;

    assert_eq!(
        h.drain(),
        vec![InboundEvent::Binary(Bytes::from_static(&[0x82, 0x00, 0x01]))]
    );
    assert_eq!(h.engine.statistics().binary_received, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_reports_and_drops() {
    let mut h = Harness::connected(config().with_max_reconnect_attempts(0)).await;

    h.link().inject(TransportEvent::Error("boom".into()));
    settle().await;

    let events = h.drain();
    assert_eq!(
        &events[..3],
        &[
            InboundEvent::error(ErrorCode::ConnectionFailed, "boom"),
            InboundEvent::closed(1006, "boom"),
            InboundEvent::connection(false, "Connection lost"),
        ]
    );
    assert_eq!(h.engine.statistics().errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_statistics() {
    let h = Harness::connected(config()).await;
    h.engine.send_text("{}".into()).await.unwrap();
    h.link().inject_binary(vec![1u8]);
    settle().await;

    h.engine.reset_statistics().await.unwrap();
    let stats = h.engine.statistics();
    assert_eq!(stats.signals_sent, 0);
    assert_eq!(stats.binary_received, 0);
    assert!(stats.connected);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_engine() {
    let mut h = Harness::connected(config()).await;
    let link = h.link();

    h.engine.shutdown(Duration::from_secs(5)).await;
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(link.close_frame(), Some((1000, "Normal disconnection".to_string())));
    assert_eq!(h.drain().len(), 2);

    let err = h.engine.connect(None).await.unwrap_err();
    assert!(matches!(err, CoreError::Internal(_)));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_hanging_reconnect() {
    let mut h = Harness::connected(
        config()
            .with_connection_timeout(Duration::from_secs(10))
            .with_jitter_factor(0.0)
            .with_reconnect_intervals(Duration::from_millis(100), Duration::from_secs(10)),
    )
    .await;
    h.connector.set_fallback(OpenOutcome::Hang);

    h.link().drop_connection();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.engine.state(), ConnectionState::Connecting);
    assert_eq!(h.connector.open_count(), 2);
    h.drain();

    let started = Instant::now();
    h.engine.disconnect().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(10));
    assert_eq!(h.engine.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain(),
        vec![
            InboundEvent::closed(1000, "Normal disconnection"),
            InboundEvent::connection(false, "User disconnected"),
        ]
    );

    // the cancelled handshake never times out or retries
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.drain().is_empty());
    assert_eq!(h.connector.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_commands_served_while_connecting() {
    let h = Harness::new(config().with_connection_timeout(Duration::from_secs(30)));
    h.connector.push_outcome(OpenOutcome::Hang);

    let engine = Arc::new(h.engine);
    let connecting = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.connect(None).await })
    };
    settle().await;
    assert_eq!(engine.state(), ConnectionState::Connecting);

    assert!(matches!(
        engine.send_text("{}".to_string()).await,
        Err(CoreError::NotConnected)
    ));
    engine.reset_statistics().await.unwrap();

    let started = Instant::now();
    engine.shutdown(Duration::from_secs(1)).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.state(), ConnectionState::Closed);

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(CoreError::ConnectionFailed(_))));
}
