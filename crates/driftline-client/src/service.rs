//! Socket lifecycle state machine.
//!
//! One service owns at most one live transport. Every state transition
//! fans out to listeners through a single delivery queue, so listener
//! code never runs on an I/O task, never concurrently with itself, and
//! sees events in transport arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use driftline_core::{event_types, ChatError, ChatEvent, User};

use crate::health::HealthMonitor;
use crate::listener::SocketListener;
use crate::parser::{EventsParser, ParsedFrame};

/// User id sent in the connection payload when no user is provided.
const ANONYMOUS_USER_ID: &str = "anonymous";

/// Everything needed to open (and re-open) a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConf {
    /// Base endpoint ending in `/`, e.g. `wss://chat.example.com/`.
    pub endpoint: String,
    pub api_key: String,
    pub auth: AuthMode,
}

#[derive(Debug, Clone)]
pub enum AuthMode {
    Anonymous,
    Jwt { user: User, token: String },
}

impl ConnectionConf {
    pub fn anonymous(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            auth: AuthMode::Anonymous,
        }
    }

    pub fn jwt(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        user: User,
        token: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            auth: AuthMode::Jwt {
                user,
                token: token.into(),
            },
        }
    }
}

/// Build the signed connection URL:
/// `{endpoint}connect?json={payload}&api_key={key}` plus either
/// `stream-auth-type=anonymous` or `authorization={token}&stream-auth-type=jwt`.
pub fn build_connection_url(conf: &ConnectionConf) -> Result<Url, ChatError> {
    let user = match &conf.auth {
        AuthMode::Anonymous => User::new(ANONYMOUS_USER_ID),
        AuthMode::Jwt { user, .. } => user.clone(),
    };
    let user_details =
        serde_json::to_value(&user).map_err(|e| ChatError::Serialization(e.to_string()))?;
    let payload = serde_json::json!({
        "user_details": user_details,
        "user_id": user.id,
        "server_determines_connection_id": true,
    });

    let mut url = Url::parse(&format!("{}connect", conf.endpoint))
        .map_err(|e| ChatError::InvalidUrl(e.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("json", &payload.to_string());
        query.append_pair("api_key", &conf.api_key);
        match &conf.auth {
            AuthMode::Anonymous => {
                query.append_pair("stream-auth-type", "anonymous");
            }
            AuthMode::Jwt { token, .. } => {
                query.append_pair("authorization", token);
                query.append_pair("stream-auth-type", "jwt");
            }
        }
    }
    Ok(url)
}

/// Connection lifecycle state. `Error` is transient: it always settles
/// into `Disconnected` within the same transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(ChatEvent),
    Error(ChatError),
}

/// One queued listener notification.
pub(crate) enum Delivery {
    Connecting,
    Connected(ChatEvent),
    Disconnected,
    Error(ChatError),
    Event(ChatEvent),
}

struct TransportHandle {
    write_tx: mpsc::UnboundedSender<WsMessage>,
}

struct ServiceInner {
    state: Mutex<ConnectionState>,
    listeners: Mutex<Vec<Arc<dyn SocketListener>>>,
    conf: Mutex<Option<ConnectionConf>>,
    transport: Mutex<Option<TransportHandle>>,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    monitor: HealthMonitor,
    // bumped on every open and teardown so callbacks from a replaced
    // transport are ignored
    generation: AtomicU64,
    #[cfg(test)]
    monitor_failures: std::sync::atomic::AtomicUsize,
}

/// Cheap-to-clone handle to the connection service.
#[derive(Clone)]
pub struct ChatSocketService {
    inner: Arc<ServiceInner>,
}

impl Default for ChatSocketService {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSocketService {
    /// Create the service and spawn its delivery and monitor tasks.
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let inner = Arc::new_cyclic(|weak: &Weak<ServiceInner>| {
            let probe_target = weak.clone();
            let retry_target = weak.clone();
            let monitor = HealthMonitor::new(
                move || {
                    if let Some(inner) = probe_target.upgrade() {
                        inner.send_health_check();
                    }
                },
                move || {
                    if let Some(inner) = retry_target.upgrade() {
                        inner.retry_connect();
                    }
                },
            );
            ServiceInner {
                state: Mutex::new(ConnectionState::Disconnected),
                listeners: Mutex::new(Vec::new()),
                conf: Mutex::new(None),
                transport: Mutex::new(None),
                delivery_tx,
                monitor,
                generation: AtomicU64::new(0),
                #[cfg(test)]
                monitor_failures: std::sync::atomic::AtomicUsize::new(0),
            }
        });
        tokio::spawn(delivery_loop(Arc::downgrade(&inner), delivery_rx));
        Self { inner }
    }

    /// Open a connection, tearing down any live one first. Safe to call in
    /// any state. The conf is stored for later reconnects.
    pub fn connect(&self, conf: ConnectionConf) {
        self.inner.monitor.reset();
        *self.inner.conf.lock() = Some(conf.clone());
        self.inner.begin_connect(conf, false);
    }

    /// Re-open using the stored conf. No-op when `disconnect` cleared it.
    pub fn reconnect(&self) {
        self.inner.retry_connect();
    }

    /// Close the connection and drop the stored conf so nothing reconnects.
    /// Safe in any state; an already-disconnected service stays silent.
    pub fn disconnect(&self) {
        self.inner.monitor.reset();
        *self.inner.conf.lock() = None;
        let was_live = {
            let mut state = self.inner.state.lock();
            let was_live = !matches!(*state, ConnectionState::Disconnected);
            *state = ConnectionState::Disconnected;
            was_live
        };
        self.inner.close_transport();
        if was_live {
            tracing::info!("disconnected by request");
            let _ = self.inner.delivery_tx.send(Delivery::Disconnected);
        }
    }

    /// Enqueue an outbound frame. Returns immediately; delivery is
    /// best-effort once the frame is handed to the write loop.
    pub fn send_event(&self, event: &serde_json::Value) -> Result<(), ChatError> {
        let text =
            serde_json::to_string(event).map_err(|e| ChatError::Serialization(e.to_string()))?;
        let guard = self.inner.transport.lock();
        let Some(transport) = guard.as_ref() else {
            return Err(ChatError::Socket("no open connection".into()));
        };
        transport
            .write_tx
            .send(WsMessage::Text(text))
            .map_err(|_| ChatError::Socket("no open connection".into()))
    }

    pub fn add_listener(&self, listener: Arc<dyn SocketListener>) {
        self.inner.listeners.lock().push(listener);
    }

    /// Remove by identity. Effective for all future deliveries; an
    /// already-queued delivery may still be observed once.
    pub fn remove_listener(&self, listener: &Arc<dyn SocketListener>) {
        self.inner
            .listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.state.lock(), ConnectionState::Connected(_))
    }

    /// The server-assigned connection id, while connected.
    pub fn connection_id(&self) -> Option<String> {
        match &*self.inner.state.lock() {
            ConnectionState::Connected(event) => match &event.payload {
                driftline_core::EventPayload::Connected { connection_id, .. } => {
                    Some(connection_id.clone())
                }
                _ => None,
            },
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn deliver(&self, delivery: Delivery) {
        let _ = self.inner.delivery_tx.send(delivery);
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// How many times a socket failure was handed to the health monitor.
    #[cfg(test)]
    pub(crate) fn monitor_failures(&self) -> usize {
        self.inner
            .monitor_failures
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl ServiceInner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn begin_connect(self: &Arc<Self>, conf: ConnectionConf, is_reconnection: bool) {
        self.close_transport();
        *self.state.lock() = ConnectionState::Connecting;
        let _ = self.delivery_tx.send(Delivery::Connecting);
        tracing::info!(endpoint = %conf.endpoint, is_reconnection, "opening connection");
        self.open_transport(conf);
    }

    fn retry_connect(self: &Arc<Self>) {
        let conf = self.conf.lock().clone();
        match conf {
            Some(conf) => self.begin_connect(conf, true),
            None => tracing::debug!("no stored connection conf, skipping reconnect"),
        }
    }

    /// Drop the write handle so the transport task sends a close frame and
    /// winds down on its own; bump the generation so anything it still
    /// reports is ignored.
    fn close_transport(&self) {
        self.transport.lock().take();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn open_transport(self: &Arc<Self>, conf: ConnectionConf) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let url = match build_connection_url(&conf) {
            Ok(url) => url,
            Err(e) => {
                self.on_socket_error(e, generation);
                return;
            }
        };
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        *self.transport.lock() = Some(TransportHandle { write_tx });
        let target = Arc::downgrade(self);
        tokio::spawn(run_transport(target, url, write_rx, generation));
    }

    fn send_health_check(&self) {
        let frame = serde_json::json!({ "type": event_types::HEALTH_CHECK });
        let guard = self.transport.lock();
        let Some(transport) = guard.as_ref() else {
            return;
        };
        if transport
            .write_tx
            .send(WsMessage::Text(frame.to_string()))
            .is_err()
        {
            tracing::debug!("health check dropped, transport is closing");
        }
    }

    fn on_connection_resolved(&self, event: ChatEvent, generation: u64) {
        if generation != self.current_generation() {
            return;
        }
        {
            let mut state = self.state.lock();
            if !matches!(*state, ConnectionState::Connecting) {
                tracing::debug!("ack arrived outside a connection attempt, dropping");
                return;
            }
            *state = ConnectionState::Connected(event.clone());
        }
        tracing::info!("connection established");
        self.monitor.start();
        let _ = self.delivery_tx.send(Delivery::Connected(event));
    }

    fn on_inbound_event(&self, event: ChatEvent, generation: u64) {
        if generation != self.current_generation() {
            return;
        }
        self.monitor.ack();
        let _ = self.delivery_tx.send(Delivery::Event(event));
    }

    /// A frame failed to decode after the ack. Reported, never fatal.
    fn on_decode_error(&self, error: ChatError, generation: u64) {
        if generation != self.current_generation() {
            return;
        }
        tracing::warn!(%error, "dropping undecodable frame");
        let _ = self.delivery_tx.send(Delivery::Error(error));
    }

    /// The connection is unusable. Runs the Error -> Disconnected sequence
    /// exactly once and hands the failure to the monitor.
    ///
    /// The generation check and both state writes happen under a single
    /// lock acquisition: a concurrent `connect` or `disconnect` cannot
    /// interleave between Error and Disconnected, so listeners never see
    /// a duplicate Disconnected or an error after a requested disconnect.
    fn on_socket_error(&self, error: ChatError, generation: u64) {
        {
            let mut state = self.state.lock();
            if generation != self.current_generation() {
                tracing::debug!(%error, "ignoring error from a torn-down transport");
                return;
            }
            if matches!(*state, ConnectionState::Disconnected) {
                return;
            }
            tracing::warn!(%error, "connection failed");
            *state = ConnectionState::Error(error.clone());
            let _ = self.delivery_tx.send(Delivery::Error(error));
            *state = ConnectionState::Disconnected;
            let _ = self.delivery_tx.send(Delivery::Disconnected);
        }
        self.close_transport();
        #[cfg(test)]
        self.monitor_failures
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.monitor.on_error();
    }
}

/// Single consumer of the delivery queue. Listeners are copied out of the
/// lock before invocation, so a callback may add or remove listeners
/// without deadlocking.
async fn delivery_loop(target: Weak<ServiceInner>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        let Some(inner) = target.upgrade() else { break };
        let listeners = inner.listeners.lock().clone();
        drop(inner);
        for listener in &listeners {
            match &delivery {
                Delivery::Connecting => listener.on_connecting(),
                Delivery::Connected(event) => listener.on_connected(event),
                Delivery::Disconnected => listener.on_disconnected(),
                Delivery::Error(error) => listener.on_error(error),
                Delivery::Event(event) => listener.on_event(event),
            }
        }
    }
}

/// Owns one WebSocket connection end to end: dial, then pump outbound
/// frames and decode inbound ones until either side ends it.
async fn run_transport(
    target: Weak<ServiceInner>,
    url: Url,
    mut write_rx: mpsc::UnboundedReceiver<WsMessage>,
    generation: u64,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            if let Some(inner) = target.upgrade() {
                inner.on_socket_error(ChatError::Socket(e.to_string()), generation);
            }
            return;
        }
    };
    let (mut sink, mut frames) = stream.split();
    let mut parser = EventsParser::new();

    loop {
        tokio::select! {
            outbound = write_rx.recv() => match outbound {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        if let Some(inner) = target.upgrade() {
                            inner.on_socket_error(ChatError::Socket(e.to_string()), generation);
                        }
                        return;
                    }
                }
                // write handle dropped: this connection was torn down
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return;
                }
            },
            inbound = frames.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    let Some(inner) = target.upgrade() else { return };
                    match parser.handle_frame(&text) {
                        ParsedFrame::ConnectionAck(event) => {
                            inner.on_connection_resolved(event, generation);
                        }
                        ParsedFrame::Event(event) => inner.on_inbound_event(event, generation),
                        ParsedFrame::Error(error) => match error {
                            ChatError::CantParseEvent(_) => {
                                inner.on_decode_error(error, generation);
                            }
                            other => {
                                inner.on_socket_error(other, generation);
                                return;
                            }
                        },
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    if let Some(inner) = target.upgrade() {
                        inner.on_socket_error(
                            ChatError::Socket("connection closed".into()),
                            generation,
                        );
                    }
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if let Some(inner) = target.upgrade() {
                        inner.on_socket_error(ChatError::Socket(e.to_string()), generation);
                    }
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::WebSocketStream;

    const ACK: &str = r#"{"type":"health.check","created_at":"2024-03-01T10:00:00Z","connection_id":"conn-1","me":{"id":"u1"}}"#;
    const NEW_MESSAGE: &str = r#"{"type":"message.new","created_at":"2024-03-01T10:00:01Z","cid":"messaging:general","user":{"id":"u2"},"message":{"id":"m1","text":"hi","type":"regular"}}"#;
    const TYPING: &str = r#"{"type":"typing.start","created_at":"2024-03-01T10:00:02Z","cid":"messaging:general","user":{"id":"u2"}}"#;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, entry: impl Into<String>) {
            self.log.lock().push(entry.into());
        }

        fn snapshot(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        fn count(&self, entry: &str) -> usize {
            self.log.lock().iter().filter(|e| *e == entry).count()
        }
    }

    impl SocketListener for Recorder {
        fn on_connecting(&self) {
            self.push("connecting");
        }
        fn on_connected(&self, _event: &ChatEvent) {
            self.push("connected");
        }
        fn on_disconnected(&self) {
            self.push("disconnected");
        }
        fn on_error(&self, error: &ChatError) {
            self.push(format!("error:{}", error.code()));
        }
        fn on_event(&self, event: &ChatEvent) {
            self.push(format!("event:{}", event.event_type));
        }
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// One-shot server running the given script on the first connection.
    async fn script_server<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    script(ws).await;
                }
            }
        });
        format!("ws://{addr}/")
    }

    async fn hold_open(mut ws: WebSocketStream<TcpStream>) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    #[tokio::test]
    async fn test_connect_delivers_ack_then_events_in_order() {
        let url = script_server(|mut ws| async move {
            for frame in [ACK, NEW_MESSAGE, TYPING] {
                ws.send(WsMessage::Text(frame.into())).await.unwrap();
            }
            hold_open(ws).await;
        })
        .await;

        let service = ChatSocketService::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        service.add_listener(first.clone());
        service.add_listener(second.clone());

        service.connect(ConnectionConf::anonymous(url, "key"));
        wait_for(|| first.snapshot().len() >= 4 && second.snapshot().len() >= 4).await;

        let expected = vec![
            "connecting".to_string(),
            "connected".to_string(),
            "event:message.new".to_string(),
            "event:typing.start".to_string(),
        ];
        assert_eq!(first.snapshot(), expected);
        assert_eq!(second.snapshot(), expected, "every subscriber sees the same order");

        assert!(service.is_connected());
        assert_eq!(service.connection_id().as_deref(), Some("conn-1"));
        service.disconnect();
    }

    #[tokio::test]
    async fn test_bad_first_frame_never_reaches_connected() {
        let url = script_server(|mut ws| async move {
            // valid event shape, but not a connection ack
            ws.send(WsMessage::Text(NEW_MESSAGE.into())).await.unwrap();
            hold_open(ws).await;
        })
        .await;

        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        service.connect(ConnectionConf::anonymous(url, "key"));
        wait_for(|| recorder.count("disconnected") >= 1).await;

        let log = recorder.snapshot();
        assert_eq!(log[..3], ["connecting", "error:1004", "disconnected"]);
        assert!(!log.iter().any(|e| e == "connected"));
        assert!(!service.is_connected());
        service.disconnect();
    }

    #[tokio::test]
    async fn test_double_disconnect_notifies_once() {
        let url = script_server(|mut ws| async move {
            ws.send(WsMessage::Text(ACK.into())).await.unwrap();
            hold_open(ws).await;
        })
        .await;

        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        service.connect(ConnectionConf::anonymous(url, "key"));
        wait_for(|| recorder.count("connected") == 1).await;

        service.disconnect();
        wait_for(|| recorder.count("disconnected") == 1).await;
        service.disconnect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.count("disconnected"), 1);
    }

    #[tokio::test]
    async fn test_socket_error_while_connected_then_reconnect() {
        let url = script_server(|mut ws| async move {
            ws.send(WsMessage::Text(ACK.into())).await.unwrap();
            // dropping the stream fails the connection from the server side
        })
        .await;

        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        service.connect(ConnectionConf::anonymous(url, "key"));
        wait_for(|| recorder.count("disconnected") >= 1).await;
        let failed_at = std::time::Instant::now();

        let log = recorder.snapshot();
        assert_eq!(
            log[..4],
            ["connecting", "connected", "error:1005", "disconnected"]
        );
        assert_eq!(service.monitor_failures(), 1, "one failure, one monitor notice");

        // the monitor schedules a retry from the stored conf, inside the
        // first-failure delay window
        wait_for(|| recorder.count("connecting") >= 2).await;
        let elapsed = failed_at.elapsed();
        assert!(
            elapsed >= Duration::from_millis(200),
            "retry fired too early: {elapsed:?}"
        );
        assert!(
            elapsed <= Duration::from_millis(3500),
            "retry fired too late: {elapsed:?}"
        );
        service.disconnect();
    }

    #[tokio::test]
    async fn test_disconnect_after_error_teardown_stays_silent() {
        let url = script_server(|mut ws| async move {
            ws.send(WsMessage::Text(ACK.into())).await.unwrap();
        })
        .await;

        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        service.connect(ConnectionConf::anonymous(url, "key"));
        wait_for(|| recorder.count("disconnected") >= 1).await;

        service.disconnect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = recorder.snapshot();
        assert_eq!(recorder.count("disconnected"), 1);
        let error_at = log.iter().position(|e| e == "error:1005").unwrap();
        let disconnected_at = log.iter().position(|e| e == "disconnected").unwrap();
        assert!(error_at < disconnected_at, "error must precede disconnected");
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_soft_reported_and_connection_survives() {
        let url = script_server(|mut ws| async move {
            ws.send(WsMessage::Text(ACK.into())).await.unwrap();
            ws.send(WsMessage::Text("{{not json".into())).await.unwrap();
            ws.send(WsMessage::Text(TYPING.into())).await.unwrap();
            hold_open(ws).await;
        })
        .await;

        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        service.connect(ConnectionConf::anonymous(url, "key"));
        wait_for(|| recorder.count("event:typing.start") >= 1).await;

        assert_eq!(
            recorder.snapshot(),
            vec![
                "connecting".to_string(),
                "connected".to_string(),
                "error:1000".to_string(),
                "event:typing.start".to_string(),
            ]
        );
        assert!(service.is_connected(), "a bad frame must not drop the connection");
        assert_eq!(service.monitor_failures(), 0);
        service.disconnect();
    }

    #[tokio::test]
    async fn test_connect_replaces_live_connection() {
        let stale = script_server(hold_open).await;
        let fresh = script_server(|mut ws| async move {
            ws.send(WsMessage::Text(ACK.into())).await.unwrap();
            hold_open(ws).await;
        })
        .await;

        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        service.add_listener(recorder.clone());

        service.connect(ConnectionConf::anonymous(stale, "key"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.connect(ConnectionConf::anonymous(fresh, "key"));

        wait_for(|| service.is_connected()).await;
        assert_eq!(service.connection_id().as_deref(), Some("conn-1"));
        assert_eq!(recorder.count("connecting"), 2);
        assert_eq!(recorder.count("connected"), 1);
        service.disconnect();
    }

    #[tokio::test]
    async fn test_removed_listener_gets_no_further_deliveries() {
        let service = ChatSocketService::new();
        let recorder = Arc::new(Recorder::default());
        let handle: Arc<dyn SocketListener> = recorder.clone();
        service.add_listener(handle.clone());

        service.deliver(Delivery::Disconnected);
        wait_for(|| recorder.snapshot().len() == 1).await;

        service.remove_listener(&handle);
        assert_eq!(service.listener_count(), 0);
        service.deliver(Delivery::Disconnected);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.snapshot().len(), 1);
    }

    #[test]
    fn test_connection_url_shape_jwt() {
        let conf = ConnectionConf::jwt(
            "wss://chat.example.com/",
            "key123",
            User::new("u1"),
            "jwt-token",
        );
        let url = build_connection_url(&conf).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert!(url.path().ends_with("connect"));

        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["api_key"], "key123");
        assert_eq!(pairs["authorization"], "jwt-token");
        assert_eq!(pairs["stream-auth-type"], "jwt");

        let payload: serde_json::Value = serde_json::from_str(&pairs["json"]).unwrap();
        assert_eq!(payload["user_id"], "u1");
        assert_eq!(payload["user_details"]["id"], "u1");
        assert_eq!(payload["server_determines_connection_id"], true);
    }

    #[test]
    fn test_connection_url_shape_anonymous() {
        let conf = ConnectionConf::anonymous("wss://chat.example.com/", "key123");
        let url = build_connection_url(&conf).unwrap();

        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["stream-auth-type"], "anonymous");
        assert!(!pairs.contains_key("authorization"));

        let payload: serde_json::Value = serde_json::from_str(&pairs["json"]).unwrap();
        assert_eq!(payload["user_id"], "anonymous");
    }

    #[test]
    fn test_invalid_endpoint_is_reported() {
        let conf = ConnectionConf::anonymous("not a url", "key");
        assert!(matches!(
            build_connection_url(&conf),
            Err(ChatError::InvalidUrl(_))
        ));
    }
}
