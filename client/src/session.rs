use crate::backoff::ReconnectPolicy;
use crate::error::Error;
use crate::transport::{Connector, Frame, Transport, WebSocketConnector};
use log::*;
use protocol::{ChannelId, ControlMessage, NORMAL_CLOSURE};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// What listeners are told about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A transport opened and the current channel declaration was sent on it.
    Connected,
    /// A delivery frame from the relay.
    Message(Value),
}

pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the relay, e.g. `ws://localhost:3001/ws`.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// How long the transport outlives its last listener.
    pub teardown_grace: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        }
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Open,
    ReconnectPending,
}

/// A shared, application-wide connection to the relay.
///
/// Cloning yields another handle to the same session. Every component that
/// needs relay messages calls [`Session::subscribe`] on it; the first
/// subscriber opens the transport and it is closed a grace period after the
/// last one detaches. The set of wanted channels is owned by the session and
/// replayed on every new transport.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    state: Mutex<State>,
}

enum Link {
    Idle,
    Connecting,
    Open(UnboundedSender<Frame>),
}

/// A delayed task that can be superseded. The `id` lets a task that already
/// woke up tell whether it is still the current one.
struct Scheduled {
    id: u64,
    handle: JoinHandle<()>,
}

struct State {
    link: Link,
    /// Bumped for every connect attempt and every deliberate close. Events
    /// from a transport of an older generation are ignored.
    generation: u64,
    desired_channels: BTreeSet<ChannelId>,
    listeners: BTreeMap<u64, Listener>,
    next_id: u64,
    reconnect_attempt: u32,
    reconnect: Option<Scheduled>,
    teardown: Option<Scheduled>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn declaration(&self) -> ControlMessage {
        ControlMessage::Replace {
            channels: self.desired_channels.iter().cloned().collect(),
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.handle.abort();
        }
    }

    fn cancel_teardown(&mut self) {
        if let Some(task) = self.teardown.take() {
            task.handle.abort();
            debug!("Pending teardown cancelled");
        }
    }

    /// Sends a normal close on the open transport, if any, and fences off
    /// whatever transport is open or in flight.
    fn close_link(&mut self) {
        self.cancel_reconnect();
        self.reconnect_attempt = 0;
        self.generation += 1;
        if let Link::Open(outgoing) = std::mem::replace(&mut self.link, Link::Idle) {
            let _ = outgoing.send(Frame::Close(NORMAL_CLOSURE));
            info!("Closed relay transport");
        }
    }
}

impl Session {
    /// Creates an idle session. Nothing connects until the first subscribe.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                runtime: Handle::current(),
                state: Mutex::new(State {
                    link: Link::Idle,
                    generation: 0,
                    desired_channels: BTreeSet::new(),
                    listeners: BTreeMap::new(),
                    next_id: 0,
                    reconnect_attempt: 0,
                    reconnect: None,
                    teardown: None,
                }),
            }),
        }
    }

    /// A session that connects over WebSocket.
    pub fn websocket(config: SessionConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    /// Attaches a listener and makes sure a transport is open or on its way.
    /// The listener stays attached until the returned [`Subscription`] is
    /// dropped or detached.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let listener_id = {
            let mut state = self.inner.lock();
            state.cancel_teardown();
            let id = state.next_id();
            state.listeners.insert(id, Arc::new(listener));
            id
        };
        self.connect();

        Subscription {
            session: self.clone(),
            listener_id,
            attached: true,
        }
    }

    /// Records the channels this client wants. Sent right away when a
    /// transport is open, otherwise on the next open.
    pub fn update_desired_channels<I>(&self, channels: I)
    where
        I: IntoIterator<Item = ChannelId>,
    {
        let mut state = self.inner.lock();
        state.desired_channels = channels.into_iter().collect();

        match &state.link {
            Link::Open(outgoing) => {
                if let Err(e) = send_declaration(outgoing, &state.declaration()) {
                    warn!("Failed to send channel declaration: {e}");
                }
            }
            _ => debug!(
                "Channel declaration ({} channel(s)) deferred until connected",
                state.desired_channels.len()
            ),
        }
    }

    /// Opens a transport unless one is open, connecting, or already scheduled
    /// by the reconnect policy.
    pub fn connect(&self) {
        let generation = {
            let mut state = self.inner.lock();
            if !matches!(state.link, Link::Idle) {
                return;
            }
            if state.reconnect.is_some() {
                debug!("Reconnect already scheduled");
                return;
            }
            state.generation += 1;
            state.link = Link::Connecting;
            state.generation
        };

        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(run_transport(weak, generation));
    }

    /// Closes the transport normally. Ignored while listeners remain.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        if !state.listeners.is_empty() {
            debug!(
                "Disconnect ignored, {} listener(s) still attached",
                state.listeners.len()
            );
            return;
        }
        state.cancel_teardown();
        state.close_link();
    }

    /// Detaches every listener and closes the transport.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.listeners.clear();
        state.cancel_teardown();
        state.close_link();
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.inner.lock();
        match state.link {
            Link::Open(_) => SessionStatus::Open,
            Link::Connecting => SessionStatus::Connecting,
            Link::Idle if state.reconnect.is_some() => SessionStatus::ReconnectPending,
            Link::Idle => SessionStatus::Idle,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn desired_channels(&self) -> BTreeSet<ChannelId> {
        self.inner.lock().desired_channels.clone()
    }

    fn detach(&self, listener_id: u64) {
        let mut state = self.inner.lock();
        if state.listeners.remove(&listener_id).is_none() || !state.listeners.is_empty() {
            return;
        }

        // Last listener gone: close after a grace period so a quick
        // re-subscribe reuses the transport.
        state.cancel_teardown();
        let id = state.next_id();
        let grace = self.inner.config.teardown_grace;
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.lock();
                if state.teardown.as_ref().map(|task| task.id) != Some(id) {
                    return;
                }
                state.teardown = None;
            }
            debug!("No listeners left after {grace:?}, closing transport");
            Session { inner }.disconnect();
        });
        state.teardown = Some(Scheduled { id, handle });
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current listeners, or `None` once `generation` is no longer the live transport.
    fn listeners_of(&self, generation: u64) -> Option<Vec<Listener>> {
        let state = self.lock();
        (state.generation == generation).then(|| state.listeners.values().cloned().collect())
    }

    /// The transport of `generation` ended. Normal closure is final; anything
    /// else reconnects while listeners remain.
    fn on_closed(self: &Arc<Self>, generation: u64, close_code: Option<u16>) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.link = Link::Idle;

        match close_code {
            Some(NORMAL_CLOSURE) => {
                info!("Relay closed the transport normally");
                return;
            }
            Some(code) => warn!("Relay transport closed with code {code}"),
            None => warn!("Relay transport lost"),
        }

        if state.listeners.is_empty() {
            debug!("No listeners left, not reconnecting");
            return;
        }
        self.schedule_reconnect(&mut state);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State) {
        if state.reconnect.is_some() {
            return;
        }
        let policy = &self.config.reconnect;
        if !policy.allows(state.reconnect_attempt) {
            error!(
                "Giving up on {} after {} reconnect attempt(s)",
                self.config.url, state.reconnect_attempt
            );
            return;
        }

        state.reconnect_attempt += 1;
        let attempt = state.reconnect_attempt;
        let delay = policy.delay_for(attempt);
        info!("Reconnecting in {delay:?} (attempt {attempt})");

        let id = state.next_id();
        let weak = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.lock();
                if state.reconnect.as_ref().map(|task| task.id) != Some(id) {
                    return;
                }
                state.reconnect = None;
                if state.listeners.is_empty() {
                    return;
                }
            }
            Session { inner }.connect();
        });
        state.reconnect = Some(Scheduled { id, handle });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.cancel_teardown();
        state.close_link();
    }
}

fn send_declaration(
    outgoing: &UnboundedSender<Frame>,
    declaration: &ControlMessage,
) -> Result<(), Error> {
    let json = declaration
        .to_json()
        .map_err(|e| Error::new(crate::error::ErrorKind::Transport, e))?;
    outgoing.send(Frame::Text(json))?;
    Ok(())
}

/// Calls every listener in registration order. A panicking listener is
/// logged and skipped; it must not take the transport task down with it.
fn notify(listeners: &[Listener], event: &SessionEvent) {
    for listener in listeners {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            error!("Session listener panicked while handling {event:?}");
        }
    }
}

/// Connects, declares the desired channels, then forwards inbound messages
/// until the transport ends. Holds the session weakly so a dropped session
/// takes its transport with it.
async fn run_transport(weak: Weak<Inner>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let url = inner.config.url.clone();
    let connector = Arc::clone(&inner.connector);
    drop(inner);

    let result = connector.connect(&url).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    let Transport {
        outgoing,
        mut incoming,
    } = match result {
        Ok(transport) => transport,
        Err(e) => {
            warn!("Connection to {url} failed: {e}");
            inner.on_closed(generation, None);
            return;
        }
    };

    let listeners = {
        let mut state = inner.lock();
        if state.generation != generation {
            debug!("Connection to {url} superseded, closing it");
            let _ = outgoing.send(Frame::Close(NORMAL_CLOSURE));
            return;
        }
        if let Err(e) = send_declaration(&outgoing, &state.declaration()) {
            warn!("Failed to send channel declaration: {e}");
        }
        state.link = Link::Open(outgoing);
        state.reconnect_attempt = 0;
        state.listeners.values().cloned().collect::<Vec<_>>()
    };
    info!("Connected to {url}");
    notify(&listeners, &SessionEvent::Connected);
    drop(inner);

    let close_code = loop {
        match incoming.recv().await {
            Some(Frame::Text(text)) => {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(listeners) = inner.listeners_of(generation) else {
                    debug!("Transport to {url} was superseded, dropping its frames");
                    return;
                };
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => notify(&listeners, &SessionEvent::Message(value)),
                    Err(e) => warn!("Dropping malformed message from relay: {e}"),
                }
            }
            Some(Frame::Close(code)) => break Some(code),
            None => break None,
        }
    };

    if let Some(inner) = weak.upgrade() {
        inner.on_closed(generation, close_code);
    }
}

/// Keeps a listener attached to its [`Session`]. Dropping it detaches.
pub struct Subscription {
    session: Session,
    listener_id: u64,
    attached: bool,
}

impl Subscription {
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.attached) {
            self.session.detach(self.listener_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::time::timeout;

    /// Server side of one fake transport.
    struct FakeServer {
        from_client: UnboundedReceiver<Frame>,
        to_client: UnboundedSender<Frame>,
    }

    impl FakeServer {
        async fn next(&mut self) -> Frame {
            timeout(Duration::from_secs(60), self.from_client.recv())
                .await
                .expect("timed out waiting for a client frame")
                .expect("client closed the transport")
        }

        fn send(&self, value: Value) {
            self.to_client.send(Frame::Text(value.to_string())).unwrap();
        }
    }

    struct FakeConnector {
        attempts: AtomicUsize,
        refuse: AtomicBool,
        servers: UnboundedSender<FakeServer>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _url: &str) -> Result<Transport, Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::Connect, "connection refused"));
            }

            let (outgoing, from_client) = mpsc::unbounded_channel();
            let (to_client, incoming) = mpsc::unbounded_channel();
            let _ = self.servers.send(FakeServer {
                from_client,
                to_client,
            });
            Ok(Transport { outgoing, incoming })
        }
    }

    struct Harness {
        session: Session,
        connector: Arc<FakeConnector>,
        servers: UnboundedReceiver<FakeServer>,
    }

    impl Harness {
        fn new(reconnect: ReconnectPolicy) -> Self {
            let (servers_tx, servers) = mpsc::unbounded_channel();
            let connector = Arc::new(FakeConnector {
                attempts: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                servers: servers_tx,
            });
            let config = SessionConfig::new("ws://relay.test/ws")
                .reconnect(reconnect)
                .teardown_grace(Duration::from_millis(500));
            let session = Session::new(config, connector.clone());
            Self {
                session,
                connector,
                servers,
            }
        }

        async fn next_server(&mut self) -> FakeServer {
            timeout(Duration::from_secs(60), self.servers.recv())
                .await
                .expect("timed out waiting for a connection")
                .unwrap()
        }

        fn attempts(&self) -> usize {
            self.connector.attempts.load(Ordering::SeqCst)
        }

        async fn wait_for(&self, status: SessionStatus) {
            timeout(Duration::from_secs(60), async {
                while self.session.status() != status {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .expect("session never reached the expected status");
        }
    }

    fn recorder() -> (
        Arc<Mutex<Vec<SessionEvent>>>,
        impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event: &SessionEvent| {
            sink.lock().unwrap().push(event.clone())
        })
    }

    fn replace(channels: &[&str]) -> Frame {
        let message = ControlMessage::Replace {
            channels: channels.iter().map(|c| c.to_string()).collect(),
        };
        Frame::Text(message.to_json().unwrap())
    }

    fn channels(ids: &[&str]) -> Vec<ChannelId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_subscribe_opens_transport_and_sends_deferred_declaration() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        harness.session.update_desired_channels(channels(&["ch1", "ch2"]));
        assert_eq!(harness.session.status(), SessionStatus::Idle);

        let (events, listener) = recorder();
        let _subscription = harness.session.subscribe(listener);
        let mut server = harness.next_server().await;

        assert_eq!(server.next().await, replace(&["ch1", "ch2"]));
        harness.wait_for(SessionStatus::Open).await;
        assert_eq!(events.lock().unwrap().as_slice(), &[SessionEvent::Connected]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribes_share_one_transport() {
        let mut harness = Harness::new(ReconnectPolicy::default());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let session = harness.session.clone();
                tokio::spawn(async move { session.subscribe(|_| {}) })
            })
            .collect();
        let mut subscriptions = Vec::new();
        for task in tasks {
            subscriptions.push(task.await.unwrap());
        }

        let _server = harness.next_server().await;
        harness.wait_for(SessionStatus::Open).await;
        assert_eq!(harness.attempts(), 1);
        assert_eq!(harness.session.listener_count(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_reach_every_listener_and_malformed_ones_are_dropped() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let (first, first_listener) = recorder();
        let (second, second_listener) = recorder();
        let _a = harness.session.subscribe(first_listener);
        let _b = harness.session.subscribe(second_listener);
        let mut server = harness.next_server().await;
        server.next().await;

        server.to_client.send(Frame::Text("{broken".into())).unwrap();
        server.send(json!({"channel": "ch1", "title": "x"}));
        harness.wait_for(SessionStatus::Open).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let expected = vec![
            SessionEvent::Connected,
            SessionEvent::Message(json!({"channel": "ch1", "title": "x"})),
        ];
        assert_eq!(*first.lock().unwrap(), expected);
        assert_eq!(*second.lock().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_stall_the_transport() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let _faulty = harness.session.subscribe(|event| {
            if let SessionEvent::Message(_) = event {
                panic!("listener failure");
            }
        });
        let (events, listener) = recorder();
        let _healthy = harness.session.subscribe(listener);
        let mut server = harness.next_server().await;
        server.next().await;
        harness.wait_for(SessionStatus::Open).await;

        server.send(json!({"n": 1}));
        server.send(json!({"n": 2}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::Connected,
                SessionEvent::Message(json!({"n": 1})),
                SessionEvent::Message(json!({"n": 2})),
            ]
        );
        assert_eq!(harness.session.status(), SessionStatus::Open);

        // The read loop is still alive and notices the transport going away
        drop(server);
        let _replacement = harness.next_server().await;
        assert_eq!(harness.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_transport_frames_are_not_delivered() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let subscription = harness.session.subscribe(|_| {});
        let mut stale = harness.next_server().await;
        stale.next().await;
        harness.wait_for(SessionStatus::Open).await;

        subscription.detach();
        harness.session.disconnect();
        assert_eq!(stale.next().await, Frame::Close(NORMAL_CLOSURE));

        let (events, listener) = recorder();
        let _again = harness.session.subscribe(listener);
        let mut current = harness.next_server().await;
        current.next().await;
        harness.wait_for(SessionStatus::Open).await;

        stale.send(json!({"from": "stale"}));
        current.send(json!({"from": "current"}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::Connected,
                SessionEvent::Message(json!({"from": "current"})),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_declaration_sent_immediately_when_open() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let _subscription = harness.session.subscribe(|_| {});
        let mut server = harness.next_server().await;
        assert_eq!(server.next().await, replace(&[]));
        harness.wait_for(SessionStatus::Open).await;

        harness.session.update_desired_channels(channels(&["ch9"]));

        assert_eq!(server.next().await, replace(&["ch9"]));
        assert_eq!(harness.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_reconnects_once_and_redeclares() {
        let mut harness = Harness::new(ReconnectPolicy::fixed(Duration::from_secs(2)));
        harness.session.update_desired_channels(channels(&["a", "b"]));
        let _first = harness.session.subscribe(|_| {});
        let _second = harness.session.subscribe(|_| {});
        let mut server = harness.next_server().await;
        server.next().await;
        harness.wait_for(SessionStatus::Open).await;

        server.to_client.send(Frame::Close(1011)).unwrap();
        harness.wait_for(SessionStatus::ReconnectPending).await;

        // Subscribing during the pending window does not add an attempt
        let _third = harness.session.subscribe(|_| {});
        harness.session.connect();

        let mut replacement = harness.next_server().await;
        assert_eq!(replacement.next().await, replace(&["a", "b"]));
        harness.wait_for(SessionStatus::Open).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.attempts(), 2);
        assert!(replacement.from_client.try_recv().is_err());
        assert!(harness.servers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_transport_without_close_frame_reconnects() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let _subscription = harness.session.subscribe(|_| {});
        let server = harness.next_server().await;
        harness.wait_for(SessionStatus::Open).await;

        drop(server);

        let _replacement = harness.next_server().await;
        assert_eq!(harness.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_close_does_not_reconnect() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let _subscription = harness.session.subscribe(|_| {});
        let server = harness.next_server().await;
        harness.wait_for(SessionStatus::Open).await;

        server.to_client.send(Frame::Close(NORMAL_CLOSURE)).unwrap();
        harness.wait_for(SessionStatus::Idle).await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(harness.attempts(), 1);
        assert_eq!(harness.session.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connections_retry_until_success() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        harness.connector.refuse.store(true, Ordering::SeqCst);
        let _subscription = harness.session.subscribe(|_| {});

        // 1s, then 2s of backoff
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(harness.attempts(), 3);

        harness.connector.refuse.store(false, Ordering::SeqCst);
        let _server = harness.next_server().await;
        harness.wait_for(SessionStatus::Open).await;
        assert_eq!(harness.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let harness =
            Harness::new(ReconnectPolicy::fixed(Duration::from_millis(100)).with_max_attempts(2));
        harness.connector.refuse.store(true, Ordering::SeqCst);
        let _subscription = harness.session.subscribe(|_| {});

        tokio::time::sleep(Duration::from_secs(10)).await;

        // The initial attempt plus two retries
        assert_eq!(harness.attempts(), 3);
        assert_eq!(harness.session.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_ignored_while_listeners_remain() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let subscription = harness.session.subscribe(|_| {});
        let mut server = harness.next_server().await;
        server.next().await;
        harness.wait_for(SessionStatus::Open).await;

        harness.session.disconnect();
        assert_eq!(harness.session.status(), SessionStatus::Open);

        subscription.detach();
        harness.session.disconnect();
        assert_eq!(server.next().await, Frame::Close(NORMAL_CLOSURE));
        assert_eq!(harness.session.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_detach_closes_after_grace_period() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let subscription = harness.session.subscribe(|_| {});
        let mut server = harness.next_server().await;
        server.next().await;
        harness.wait_for(SessionStatus::Open).await;

        drop(subscription);
        assert!(timeout(Duration::from_millis(250), server.from_client.recv())
            .await
            .is_err());

        assert_eq!(server.next().await, Frame::Close(NORMAL_CLOSURE));
        assert_eq!(harness.session.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_within_grace_keeps_transport() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let subscription = harness.session.subscribe(|_| {});
        let mut server = harness.next_server().await;
        server.next().await;
        harness.wait_for(SessionStatus::Open).await;

        drop(subscription);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _again = harness.session.subscribe(|_| {});
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(server.from_client.try_recv().is_err());
        assert_eq!(harness.session.status(), SessionStatus::Open);
        assert_eq!(harness.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_and_stays_closed() {
        let mut harness = Harness::new(ReconnectPolicy::default());
        let _subscription = harness.session.subscribe(|_| {});
        let mut server = harness.next_server().await;
        server.next().await;
        harness.wait_for(SessionStatus::Open).await;

        harness.session.shutdown();

        assert_eq!(server.next().await, Frame::Close(NORMAL_CLOSURE));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(harness.session.listener_count(), 0);
        assert_eq!(harness.attempts(), 1);
    }
}
