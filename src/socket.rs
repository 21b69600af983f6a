//! Resilient client for the live statistics channel.
//!
//! The backend pushes JSON-encoded statistics snapshots over a WebSocket
//! and also answers an explicit request token with the current snapshot.
//! This module maintains a best-effort connection with bounded exponential
//! backoff: `connecting → open → closed → connecting → …`, with a hard stop
//! once the retry budget is spent. Statistics failures degrade silently to
//! "no live data"; they never block chat traffic.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::observability::{
    SOCKET_CONNECTS, SOCKET_DISCONNECTS, SOCKET_RETRIES_EXHAUSTED, SOCKET_SNAPSHOT_ERRORS,
    SOCKET_SNAPSHOTS,
};
use crate::types::StatsSnapshot;
use crate::{Error, Result};

/// The literal request token that means "send current snapshot".
pub const SNAPSHOT_REQUEST: &str = "get_stats";

/// Size of the outgoing event buffer shared with the host.
const EVENT_BUFFER: usize = 64;

/// Lifecycle state of the statistics connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The channel is live; snapshots may arrive at any time.
    Open,
    /// No connection. Either a reconnect is pending or the retry budget
    /// is exhausted and the client is permanently closed.
    Closed,
}

/// Events emitted to the host over the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// The channel opened; a snapshot request was sent immediately.
    Connected,
    /// A snapshot arrived and replaced the held one wholesale.
    SnapshotReceived(StatsSnapshot),
    /// The channel closed or a connection attempt failed.
    Disconnected,
}

/// Reconnection backoff policy: `base * 2^attempt`, capped, with a bounded
/// number of scheduled retries.
///
/// The policy is pure so backoff timing is testable without a socket or a
/// wall clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Number of retries scheduled before giving up for good.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            cap: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry following failure number `attempt` (0-based),
    /// or `None` once the budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}

/// One live connection to the statistics channel.
#[async_trait]
pub trait SnapshotChannel: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Receive the next text frame. `Ok(None)` signals a clean close.
    async fn next_text(&mut self) -> Result<Option<String>>;
}

/// Opens connections to the statistics channel.
///
/// Abstracting the transport keeps the reconnection state machine testable
/// in isolation from any real socket.
#[async_trait]
pub trait SnapshotTransport: Send {
    /// Attempt to open one connection.
    async fn connect(&mut self) -> Result<Box<dyn SnapshotChannel>>;
}

/// The production transport: a WebSocket via tokio-tungstenite.
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    /// Create a transport that dials the given `ws://` or `wss://` URL.
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl SnapshotTransport for WsTransport {
    async fn connect(&mut self) -> Result<Box<dyn SnapshotChannel>> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| {
                Error::web_socket(format!("connect to {} failed: {e}", self.url), Some(Box::new(e)))
            })?;
        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl SnapshotChannel for WsChannel {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| Error::web_socket(format!("send failed: {e}"), Some(Box::new(e))))
    }

    async fn next_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                // Control and binary frames carry no snapshots.
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(Error::web_socket(
                        format!("receive failed: {e}"),
                        Some(Box::new(e)),
                    ));
                }
                None => return Ok(None),
            }
        }
    }
}

/// Maintains a best-effort connection to the statistics channel.
///
/// The client connects immediately on construction, requests the current
/// snapshot on every successful open, and reconnects with bounded backoff.
/// Once the retry budget is spent it stays `Closed` until torn down and
/// rebuilt. The latest snapshot is exposed read-only; only this client
/// replaces it, and always wholesale.
pub struct ResilientSocketClient {
    state: Arc<RwLock<ConnectionState>>,
    snapshot: Arc<RwLock<Option<StatsSnapshot>>>,
    request_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ResilientSocketClient {
    /// Connect to the statistics channel at `url` with the default policy.
    ///
    /// Returns the client and the receiving end of its event channel.
    pub fn connect(url: Url) -> (Self, mpsc::Receiver<SocketEvent>) {
        Self::with_transport(WsTransport::new(url), ReconnectPolicy::default())
    }

    /// Connect through a custom transport and policy.
    pub fn with_transport<T>(
        transport: T,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<SocketEvent>)
    where
        T: SnapshotTransport + 'static,
    {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let snapshot = Arc::new(RwLock::new(None));
        let (request_tx, request_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_loop(
            Box::new(transport),
            policy,
            Arc::clone(&state),
            Arc::clone(&snapshot),
            request_rx,
            event_tx,
            shutdown.clone(),
        ));

        let client = Self {
            state,
            snapshot,
            request_tx,
            shutdown,
            task,
        };
        (client, event_rx)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    /// The most recent snapshot, if any has arrived.
    pub fn snapshot(&self) -> Option<StatsSnapshot> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    /// Ask the backend for the current snapshot.
    ///
    /// A silent no-op unless the channel is open; callers must tolerate the
    /// absence of a live connection.
    pub fn request_snapshot(&self) {
        if self.state() == ConnectionState::Open {
            let _ = self.request_tx.try_send(());
        }
    }

    /// Stop reconnecting and close the connection if open.
    ///
    /// Any pending reconnect timer is cancelled; no events fire afterward.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ResilientSocketClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

fn set_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    *state.write().expect("state lock poisoned") = next;
}

/// Connection driver: connect, serve, back off, repeat until the budget is
/// spent or the client is torn down.
async fn run_loop(
    mut transport: Box<dyn SnapshotTransport>,
    policy: ReconnectPolicy,
    state: Arc<RwLock<ConnectionState>>,
    snapshot: Arc<RwLock<Option<StatsSnapshot>>>,
    mut request_rx: mpsc::Receiver<()>,
    events: mpsc::Sender<SocketEvent>,
    shutdown: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        set_state(&state, ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = transport.connect() => result,
        };

        match connected {
            Ok(mut channel) => {
                SOCKET_CONNECTS.click();
                set_state(&state, ConnectionState::Open);
                attempt = 0;
                info!("statistics channel open");
                let _ = events.send(SocketEvent::Connected).await;

                // Pull the latest data instead of waiting for the next push.
                if channel.send_text(SNAPSHOT_REQUEST).await.is_ok() {
                    serve(
                        channel.as_mut(),
                        &snapshot,
                        &mut request_rx,
                        &events,
                        &shutdown,
                    )
                    .await;
                }

                if shutdown.is_cancelled() {
                    break;
                }
                SOCKET_DISCONNECTS.click();
                set_state(&state, ConnectionState::Closed);
                let _ = events.send(SocketEvent::Disconnected).await;
            }
            Err(e) => {
                warn!(error = %e, "statistics channel connect failed");
                SOCKET_DISCONNECTS.click();
                set_state(&state, ConnectionState::Closed);
                let _ = events.send(SocketEvent::Disconnected).await;
            }
        }

        let Some(delay) = policy.delay(attempt) else {
            SOCKET_RETRIES_EXHAUSTED.click();
            warn!("retry budget exhausted; statistics channel stays closed");
            break;
        };
        attempt += 1;
        debug!(attempt, delay_secs = delay.as_secs(), "reconnect scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    set_state(&state, ConnectionState::Closed);
}

/// Serve one open connection until it drops or the client shuts down.
async fn serve(
    channel: &mut dyn SnapshotChannel,
    snapshot: &RwLock<Option<StatsSnapshot>>,
    request_rx: &mut mpsc::Receiver<()>,
    events: &mpsc::Sender<SocketEvent>,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            Some(()) = request_rx.recv() => {
                if channel.send_text(SNAPSHOT_REQUEST).await.is_err() {
                    return;
                }
            }
            incoming = channel.next_text() => match incoming {
                Ok(Some(text)) => match StatsSnapshot::parse(&text) {
                    Ok(parsed) => {
                        SOCKET_SNAPSHOTS.click();
                        // Full replace; readers never see a partial update.
                        *snapshot.write().expect("snapshot lock poisoned") = Some(parsed.clone());
                        let _ = events.send(SocketEvent::SnapshotReceived(parsed)).await;
                    }
                    // A bad payload neither clears the held snapshot nor
                    // closes the connection.
                    Err(e) => {
                        SOCKET_SNAPSHOT_ERRORS.click();
                        warn!(error = %e, "dropping unparseable snapshot");
                    }
                },
                Ok(None) => {
                    debug!("statistics channel closed by peer");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "statistics channel receive error");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn policy_delays_double_from_base() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs(6)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs(12)));
        assert_eq!(policy.delay(3), None);
        assert_eq!(policy.delay(17), None);
    }

    #[test]
    fn policy_caps_the_delay() {
        let policy = ReconnectPolicy {
            base: Duration::from_secs(3),
            cap: Duration::from_secs(30),
            max_retries: 8,
        };
        assert_eq!(policy.delay(4), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay(7), Some(Duration::from_secs(30)));
    }

    /// Scripted behavior for one connection.
    enum ChannelStep {
        Text(&'static str),
        Close,
    }

    struct ScriptChannel {
        steps: VecDeque<ChannelStep>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SnapshotChannel for ScriptChannel {
        async fn send_text(&mut self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn next_text(&mut self) -> Result<Option<String>> {
            match self.steps.pop_front() {
                Some(ChannelStep::Text(text)) => Ok(Some(text.to_string())),
                Some(ChannelStep::Close) => Ok(None),
                // Stay open with nothing to deliver.
                None => futures::future::pending().await,
            }
        }
    }

    enum ConnectOutcome {
        Refuse,
        Accept(Vec<ChannelStep>),
    }

    struct ScriptTransport {
        outcomes: VecDeque<ConnectOutcome>,
        connect_times: Arc<Mutex<Vec<Instant>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptTransport {
        fn new(outcomes: Vec<ConnectOutcome>) -> Self {
            Self {
                outcomes: outcomes.into(),
                connect_times: Arc::new(Mutex::new(Vec::new())),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl SnapshotTransport for ScriptTransport {
        async fn connect(&mut self) -> Result<Box<dyn SnapshotChannel>> {
            self.connect_times.lock().unwrap().push(Instant::now());
            match self.outcomes.pop_front() {
                Some(ConnectOutcome::Accept(steps)) => Ok(Box::new(ScriptChannel {
                    steps: steps.into(),
                    sent: Arc::clone(&self.sent),
                })),
                Some(ConnectOutcome::Refuse) | None => {
                    Err(Error::web_socket("connection refused", None))
                }
            }
        }
    }

    async fn drain(mut rx: mpsc::Receiver<SocketEvent>) -> Vec<SocketEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_is_3_6_12_then_stop() {
        let transport = ScriptTransport::new(vec![]);
        let times = Arc::clone(&transport.connect_times);

        let (client, rx) = ResilientSocketClient::with_transport(
            transport,
            ReconnectPolicy::default(),
        );
        let events = drain(rx).await;

        // Initial attempt plus three scheduled retries, each one refused.
        assert_eq!(
            events,
            vec![
                SocketEvent::Disconnected,
                SocketEvent::Disconnected,
                SocketEvent::Disconnected,
                SocketEvent::Disconnected,
            ]
        );
        assert_eq!(client.state(), ConnectionState::Closed);

        let times = times.lock().unwrap();
        assert_eq!(times.len(), 4);
        assert_eq!(times[1] - times[0], Duration::from_secs(3));
        assert_eq!(times[2] - times[1], Duration::from_secs(6));
        assert_eq!(times[3] - times[2], Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn open_requests_snapshot_and_resets_attempts() {
        // Fail once, connect, lose the connection, then fail out.
        let transport = ScriptTransport::new(vec![
            ConnectOutcome::Refuse,
            ConnectOutcome::Accept(vec![ChannelStep::Close]),
            ConnectOutcome::Refuse,
            ConnectOutcome::Refuse,
            ConnectOutcome::Refuse,
        ]);
        let times = Arc::clone(&transport.connect_times);
        let sent = Arc::clone(&transport.sent);

        let (_client, rx) = ResilientSocketClient::with_transport(
            transport,
            ReconnectPolicy::default(),
        );
        let events = drain(rx).await;

        assert_eq!(
            events,
            vec![
                SocketEvent::Disconnected,
                SocketEvent::Connected,
                SocketEvent::Disconnected,
                SocketEvent::Disconnected,
                SocketEvent::Disconnected,
                SocketEvent::Disconnected,
            ]
        );

        // The snapshot request goes out on every successful open.
        assert_eq!(sent.lock().unwrap().as_slice(), [SNAPSHOT_REQUEST]);

        // After the successful open the counter resets, so the delays
        // following the drop start over at the base.
        let times = times.lock().unwrap();
        assert_eq!(times.len(), 5);
        assert_eq!(times[1] - times[0], Duration::from_secs(3));
        assert_eq!(times[2] - times[1], Duration::from_secs(3));
        assert_eq!(times[3] - times[2], Duration::from_secs(6));
        assert_eq!(times[4] - times[3], Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_replace_and_bad_payloads_are_ignored() {
        let transport = ScriptTransport::new(vec![ConnectOutcome::Accept(vec![
            ChannelStep::Text(r#"{"total_chats":1}"#),
            ChannelStep::Text("{garbage"),
            ChannelStep::Text(r#"{"total_chats":2}"#),
        ])]);

        let (client, mut rx) = ResilientSocketClient::with_transport(
            transport,
            ReconnectPolicy::default(),
        );

        assert_eq!(rx.recv().await, Some(SocketEvent::Connected));
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        let SocketEvent::SnapshotReceived(first) = first else {
            panic!("expected a snapshot, got {first:?}");
        };
        assert_eq!(first.as_value()["total_chats"], 1);

        // The malformed frame produced no event and did not disturb the
        // connection; the next valid snapshot replaced the first wholesale.
        let SocketEvent::SnapshotReceived(second) = second else {
            panic!("expected a snapshot, got {second:?}");
        };
        assert_eq!(second.as_value()["total_chats"], 2);

        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(
            client.snapshot().unwrap().as_value()["total_chats"],
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_snapshot_while_closed_is_a_no_op() {
        let transport = ScriptTransport::new(vec![]);
        let sent = Arc::clone(&transport.sent);

        let (client, rx) = ResilientSocketClient::with_transport(
            transport,
            ReconnectPolicy::default(),
        );
        let _ = drain(rx).await;

        assert_eq!(client.state(), ConnectionState::Closed);
        client.request_snapshot();
        tokio::task::yield_now().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_snapshot_while_open_sends_the_token() {
        let transport = ScriptTransport::new(vec![ConnectOutcome::Accept(vec![])]);
        let sent = Arc::clone(&transport.sent);

        let (client, mut rx) = ResilientSocketClient::with_transport(
            transport,
            ReconnectPolicy::default(),
        );
        assert_eq!(rx.recv().await, Some(SocketEvent::Connected));

        client.request_snapshot();
        // Let the driver process the queued request.
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            sent.lock().unwrap().as_slice(),
            [SNAPSHOT_REQUEST, SNAPSHOT_REQUEST]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_reconnect() {
        let transport = ScriptTransport::new(vec![]);
        let times = Arc::clone(&transport.connect_times);

        let (client, mut rx) = ResilientSocketClient::with_transport(
            transport,
            ReconnectPolicy::default(),
        );

        // First attempt fails; a 3s reconnect is now pending.
        assert_eq!(rx.recv().await, Some(SocketEvent::Disconnected));
        client.close();

        // The event channel closes without another attempt firing.
        assert_eq!(rx.recv().await, None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(times.lock().unwrap().len(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
