//! End-to-end session behavior against the simulated broker.
//!
//! Every test runs on paused tokio time: reconnect delays, heart-beat
//! timeouts and tick intervals elapse instantly but in order.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parley_client::{
    ChatClient, ClientConfig, ClientError, ConnectRequest, SessionHandle, StaticCredential,
    Transport, TransportError, TransportEvent, TransportLink,
};
use parley_core::{ConnectionState, SessionError};
use parley_harness::{SIM_TOKEN, SimBroker, SimHistory, SimWorld};
use tokio::sync::mpsc;
use parley_proto::{ChatMessage, ClientFrame, HeartBeat};

fn ids(messages: &[ChatMessage]) -> Vec<i64> {
    messages.iter().map(|m| m.id).collect()
}

fn is_subscribe(frame: &ClientFrame) -> bool {
    matches!(frame, ClientFrame::Subscribe { .. })
}

fn is_send(frame: &ClientFrame) -> bool {
    matches!(frame, ClientFrame::Send { .. })
}

async fn connected(world: &SimWorld, room_id: i64) -> SessionHandle {
    let handle = world.open(room_id).unwrap();
    handle.wait_for_state(ConnectionState::Connected).await.unwrap();
    SimWorld::settle().await;
    handle
}

#[tokio::test(start_paused = true)]
async fn live_frame_before_history_merges_in_order() {
    let world = SimWorld::new();
    world.broker.persist(42, "one");
    world.broker.persist(42, "two");
    world.history.hold();

    let handle = connected(&world, 42).await;
    world.broker.publish(42, "three");
    let feed = handle.wait_for_messages(|m| m.len() == 1).await.unwrap();
    assert_eq!(ids(&feed), vec![3]);

    world.history.release();
    let feed = handle.wait_for_messages(|m| m.len() == 3).await.unwrap();
    assert_eq!(ids(&feed), vec![1, 2, 3]);
    world.check(&handle, "after history merge").await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_exactly_once() {
    let world = SimWorld::new();
    let handle = connected(&world, 7).await;
    assert_eq!(world.broker.subscriptions(7), 1);

    world.broker.drop_connections();
    handle.wait_for_state(ConnectionState::Reconnecting).await.unwrap();
    assert_eq!(world.broker.subscriptions(7), 0);

    let status = handle.wait_for_state(ConnectionState::Connected).await.unwrap();
    SimWorld::settle().await;
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(world.broker.subscriptions(7), 1);
    assert_eq!(world.broker.count_received(is_subscribe), 2);

    world.broker.publish(7, "after reconnect");
    let feed = handle.wait_for_messages(|m| !m.is_empty()).await.unwrap();
    assert_eq!(feed[0].content, "after reconnect");
    world.check(&handle, "after reconnect").await;
}

#[tokio::test(start_paused = true)]
async fn repeated_reconnects_keep_a_single_subscription() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    for round in 0..10 {
        world.broker.drop_connections();
        handle.wait_for_state(ConnectionState::Reconnecting).await.unwrap();
        handle.wait_for_state(ConnectionState::Connected).await.unwrap();
        world.check(&handle, &format!("after reconnect {round}")).await;
        assert_eq!(world.broker.subscriptions(42), 1);
    }

    assert_eq!(world.broker.count_received(is_subscribe), 11);
    assert_eq!(world.broker.live_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_fails_without_network_call() {
    let world = SimWorld::new();
    world.broker.refuse_connections(true);
    let handle = world.open(42).unwrap();

    handle.wait_for_state(ConnectionState::Reconnecting).await.unwrap();
    let err = handle.send("hello").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Session(SessionError::SendWhileDisconnected {
            state: ConnectionState::Reconnecting
        })
    );
    assert_eq!(world.broker.count_received(is_send), 0);
    assert!(handle.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_publishes_without_local_echo() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    handle.send("hello").await.unwrap();
    SimWorld::settle().await;

    assert_eq!(world.broker.count_received(is_send), 1);
    let feed = handle.messages();
    assert_eq!(feed.len(), 1, "only the broker's rebroadcast lands in the feed");
    assert_eq!(feed[0].content, "hello");
    assert_eq!(feed[0].id, world.broker.history(42)[0].id);
}

#[tokio::test(start_paused = true)]
async fn blank_message_is_rejected() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    let err = handle.send("  \n ").await.unwrap_err();
    assert_eq!(err, ClientError::Session(SessionError::InvalidContent));
    assert_eq!(world.broker.count_received(is_send), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_fails_without_retry() {
    let world = SimWorld::new();
    world.broker.accept_token("someone-else");
    let handle = world.open(42).unwrap();

    let status = handle.wait_for_state(ConnectionState::Failed).await.unwrap();
    assert!(matches!(status.error, Some(SessionError::Auth { .. })));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(world.broker.connect_attempts(), 1);
    assert_eq!(handle.status().state, ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn error_during_handshake_is_an_auth_failure() {
    let world = SimWorld::new();
    world.broker.reject_stomp_connect(Some("token expired".to_string()));
    let handle = world.open(42).unwrap();

    let status = handle.wait_for_state(ConnectionState::Failed).await.unwrap();
    assert!(matches!(status.error, Some(SessionError::Auth { .. })));
    assert!(!status.error.unwrap().is_transient());
}

#[tokio::test(start_paused = true)]
async fn broker_error_after_connect_is_fatal() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    world.broker.inject_error("broker restarting");
    let status = handle.wait_for_state(ConnectionState::Failed).await.unwrap();
    assert!(matches!(status.error, Some(SessionError::Broker { .. })));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(world.broker.connect_attempts(), 1);
    world.check(&handle, "after broker error").await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts() {
    let mut config = ClientConfig::default();
    config.session.connection.max_reconnect_attempts = Some(2);
    let world = SimWorld::with_config(config);
    world.broker.refuse_connections(true);

    let handle = world.open(42).unwrap();
    let status = handle.wait_for_state(ConnectionState::Failed).await.unwrap();

    assert!(matches!(status.error, Some(SessionError::Connection(_))));
    assert_eq!(world.broker.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_silence_triggers_reconnect() {
    let world = SimWorld::new();
    // Broker promises a heart-beat every second, then never sends one.
    world.broker.set_heart_beat(HeartBeat { outgoing_ms: 1_000, incoming_ms: 0 });
    let handle = connected(&world, 42).await;
    let since = tokio::time::Instant::now();

    handle.wait_for_state(ConnectionState::Reconnecting).await.unwrap();
    // Incoming interval is max(10 s offered, 1 s promised), timeout twice that.
    assert!(since.elapsed() >= Duration::from_secs(20));

    handle.wait_for_state(ConnectionState::Connected).await.unwrap();
    world.check(&handle, "after heart-beat timeout").await;
}

#[tokio::test(start_paused = true)]
async fn broker_heartbeats_keep_the_session_up() {
    let world = SimWorld::new();
    world.broker.set_heart_beat(HeartBeat { outgoing_ms: 1_000, incoming_ms: 0 });
    let handle = connected(&world, 42).await;

    for _ in 0..60 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        world.broker.send_heartbeats();
    }

    assert_eq!(handle.status().state, ConnectionState::Connected);
    assert_eq!(world.broker.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_deliveries_are_collapsed() {
    let world = SimWorld::new();
    world.broker.duplicate_deliveries(true);
    let handle = connected(&world, 42).await;

    for n in 0..3 {
        world.broker.publish(42, format!("m{n}"));
    }
    let feed = handle.wait_for_messages(|m| m.len() == 3).await.unwrap();
    SimWorld::settle().await;

    assert_eq!(ids(&feed), vec![1, 2, 3]);
    assert_eq!(handle.messages().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn messages_missed_while_disconnected_are_repaired() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    world.broker.refuse_connections(true);
    world.broker.drop_connections();
    handle.wait_for_state(ConnectionState::Reconnecting).await.unwrap();
    world.broker.persist(42, "missed one");
    world.broker.persist(42, "missed two");
    world.broker.refuse_connections(false);

    handle.wait_for_state(ConnectionState::Connected).await.unwrap();
    let feed = handle.wait_for_messages(|m| m.len() == 2).await.unwrap();
    assert_eq!(ids(&feed), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn switch_room_scopes_the_feed_to_the_new_room() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;
    world.broker.publish(42, "in 42");
    handle.wait_for_messages(|m| m.len() == 1).await.unwrap();

    handle.switch_room(7).await.unwrap();
    handle
        .wait_for_status(|s| s.room_id == Some(7) && s.state == ConnectionState::Connected)
        .await
        .unwrap();
    SimWorld::settle().await;

    assert!(handle.messages().is_empty());
    assert_eq!(world.broker.subscriptions(42), 0);
    assert_eq!(world.broker.subscriptions(7), 1);

    world.broker.publish(42, "still in 42");
    world.broker.publish(7, "in 7");
    let feed = handle.wait_for_messages(|m| !m.is_empty()).await.unwrap();
    SimWorld::settle().await;
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].room_id, 7);
    world.check(&handle, "after room switch").await;
}

#[tokio::test(start_paused = true)]
async fn history_for_a_previous_room_is_discarded() {
    let world = SimWorld::new();
    world.broker.persist(42, "old room");
    world.broker.persist(7, "new room");
    world.history.hold();

    let handle = connected(&world, 42).await;
    handle.switch_room(7).await.unwrap();
    handle.wait_for_state(ConnectionState::Connected).await.unwrap();
    world.history.release();

    let feed = handle.wait_for_messages(|m| !m.is_empty()).await.unwrap();
    SimWorld::settle().await;
    assert_eq!(feed.len(), 1);
    assert_eq!(handle.messages()[0].content, "new room");
    assert_eq!(world.history.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn history_failure_is_reported_and_feed_kept() {
    let world = SimWorld::new();
    world.history.hold();
    let handle = connected(&world, 42).await;
    world.history.fail_next(1);
    world.history.release();

    let status = handle.wait_for_status(|s| s.error.is_some()).await.unwrap();
    assert!(matches!(status.error, Some(SessionError::History(_))));
    assert_eq!(status.state, ConnectionState::Connected);

    world.broker.publish(42, "live");
    handle.wait_for_messages(|m| m.len() == 1).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_unsubscribes_and_disconnects() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    handle.close().await;
    SimWorld::settle().await;

    let received = world.broker.received();
    let tail: Vec<_> = received.iter().rev().take(2).rev().collect();
    assert!(matches!(tail[0], ClientFrame::Unsubscribe { id } if id == "sub-0"));
    assert!(matches!(tail[1], ClientFrame::Disconnect { .. }));
    assert_eq!(world.broker.live_connections(), 0);
    assert_eq!(world.broker.total_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_tears_the_session_down() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    drop(handle);
    SimWorld::settle().await;

    assert_eq!(world.broker.live_connections(), 0);
    assert_eq!(world.broker.count_received(|f| matches!(f, ClientFrame::Disconnect { .. })), 1);

    // No reconnect follows.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(world.broker.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn sessions_can_be_reopened_after_close() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;
    handle.close().await;

    let again = connected(&world, 42).await;
    again.close().await;
    SimWorld::settle().await;
    assert_eq!(world.broker.count_received(|f| matches!(f, ClientFrame::Disconnect { .. })), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_credential_is_refused_up_front() {
    let broker = SimBroker::new();
    let client = ChatClient::new(
        broker.transport(),
        SimHistory::new(broker.clone()),
        StaticCredential::anonymous(),
    );

    assert_eq!(client.open(42).unwrap_err(), ClientError::MissingCredential);
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_and_the_session_survives() {
    let world = SimWorld::new();
    let handle = connected(&world, 42).await;

    world.broker.inject_raw("NOT-A-COMMAND\n\n\0");
    let status = handle.wait_for_status(|s| s.error.is_some()).await.unwrap();
    assert!(matches!(status.error, Some(SessionError::Protocol(_))));
    assert_eq!(status.state, ConnectionState::Connected);

    world.broker.publish(42, "still flowing");
    handle.wait_for_messages(|m| m.len() == 1).await.unwrap();
}

/// Connects that never complete, counting how many are still pending.
#[derive(Clone, Default)]
struct HangingTransport {
    started: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for HangingTransport {
    fn connect(
        &self,
        _request: ConnectRequest,
    ) -> impl Future<Output = Result<TransportLink, TransportError>> + Send {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(Arc::clone(&self.pending));
        async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(120)).await;
            Err(TransportError::Connection("timed out".to_string()))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn superseded_connects_are_cancelled() {
    let transport = HangingTransport::default();
    let broker = SimBroker::new();
    let client = ChatClient::new(
        transport.clone(),
        SimHistory::new(broker),
        StaticCredential::new(SIM_TOKEN),
    );

    let handle = client.open(42).unwrap();
    tokio::time::sleep(Duration::from_secs(90)).await;

    // Handshake timeouts retried several times, one connect alive at most.
    assert!(transport.started.load(Ordering::SeqCst) > 1);
    assert!(transport.pending.load(Ordering::SeqCst) <= 1);

    handle.close().await;
    SimWorld::settle().await;
    assert_eq!(transport.pending.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn switching_room_cancels_the_pending_connect() {
    let transport = HangingTransport::default();
    let client = ChatClient::new(
        transport.clone(),
        SimHistory::new(SimBroker::new()),
        StaticCredential::new(SIM_TOKEN),
    );

    let handle = client.open(42).unwrap();
    SimWorld::settle().await;
    handle.switch_room(7).await.unwrap();
    SimWorld::settle().await;

    assert_eq!(transport.started.load(Ordering::SeqCst), 2);
    assert_eq!(transport.pending.load(Ordering::SeqCst), 1);
    handle.close().await;
}

type LinkEnds = (mpsc::Receiver<String>, mpsc::Sender<TransportEvent>);

/// Links whose writer never drains; the far ends go to the test.
#[derive(Clone)]
struct StalledTransport {
    ends: mpsc::UnboundedSender<LinkEnds>,
}

impl Transport for StalledTransport {
    fn connect(
        &self,
        _request: ConnectRequest,
    ) -> impl Future<Output = Result<TransportLink, TransportError>> + Send {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (in_tx, in_rx) = mpsc::channel(8);
        let _ = self.ends.send((out_rx, in_tx));
        async move { Ok(TransportLink::detached(out_tx, in_rx)) }
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_writer_is_treated_as_transport_loss() {
    let (ends_tx, mut ends_rx) = mpsc::unbounded_channel();
    let client = ChatClient::new(
        StalledTransport { ends: ends_tx },
        SimHistory::new(SimBroker::new()),
        StaticCredential::new(SIM_TOKEN),
    );

    let handle = client.open(42).unwrap();
    let (_writer, server) = ends_rx.recv().await.unwrap();
    SimWorld::settle().await;

    // CONNECT fills the one-slot queue; SUBSCRIBE finds it full.
    server
        .send(TransportEvent::Text("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0".to_string()))
        .await
        .unwrap();

    let status = handle.wait_for_state(ConnectionState::Reconnecting).await.unwrap();
    assert!(matches!(&status.error, Some(SessionError::Connection(reason)) if reason.contains("outbound queue full")));

    // The loop keeps running: close completes.
    handle.close().await;
}
