//! The session state machine.
//!
//! ```text
//! Connecting ──welcome──▶ Welcomed ──handshake──▶ Active
//!      │                     │                      │
//!      └─────────────────────┴──── post-mortem ─────┴──▶ Closed
//! ```
//!
//! A reader task owns the transport. It decodes each frame, re-arms the
//! keepalive deadlines, and hands events to the single pending consumer or
//! queues them. Everything that ends a session funnels into one post-mortem
//! path, which closes the socket, marks the session closed, and emits exactly
//! one [`SessionEvent::Close`].

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::buffer::{EventBuffer, PushOutcome};
use crate::close_code;
use crate::errors::SessionError;
use crate::frames::{self, Message, Notification, ReconnectSession, WelcomeSession};
use crate::heartbeat::{Deadlines, clamp_keepalive};
use crate::seen::{DEFAULT_HORIZON, SeenIds};
use crate::transport::{Connector, Inbound, Transport};

/// How long the reader waits for the socket to acknowledge a close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Undelivered events held before the session is dropped.
    pub buffer_capacity: usize,
    /// Queue length at which each further event logs a warning.
    pub high_water_mark: usize,
    /// Retention of seen message ids.
    pub seen_id_horizon: Duration,
    /// Keepalive interval assumed until the welcome frame says otherwise.
    /// Clamped to the negotiable range, as is the advertised one.
    pub initial_keepalive: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            high_water_mark: 48,
            seen_id_horizon: DEFAULT_HORIZON,
            initial_keepalive: Duration::from_secs(10),
        }
    }
}

/// What a session yields to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The server accepted the connection.
    Welcome(WelcomeSession),
    /// A subscribed event.
    Notification(Notification),
    /// The server wants the client on another URL. The session keeps running.
    Reconnect(ReconnectSession),
    /// The session ended. Always the last event.
    Close {
        /// One of [`close_code`], or the remote's own code.
        code: u16,
    },
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Socket open, no welcome yet.
    Connecting,
    /// Welcome received, handshake not yet observed it.
    Welcomed,
    /// Handshake complete.
    Active,
    /// Terminal.
    Closed,
}

/// One event-stream connection.
pub struct Session {
    shared: Arc<Shared>,
    close_tx: mpsc::UnboundedSender<u16>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    url: String,
    state: Mutex<State>,
}

struct State {
    phase: Phase,
    session_id: Option<String>,
    keepalive: Duration,
    seen: SeenIds,
    buffer: EventBuffer<SessionEvent>,
    waiter: Option<oneshot::Sender<SessionEvent>>,
}

impl Session {
    /// Connect and wait for the welcome.
    pub async fn open(
        connector: &dyn Connector,
        url: &str,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let session = Self::connect(connector, url, config).await?;
        let _ = session.handshake().await?;
        Ok(session)
    }

    /// Connect and start the reader. The session is still [`Phase::Connecting`].
    pub async fn connect(
        connector: &dyn Connector,
        url: &str,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let transport = connector.connect(url).await?;
        info!(url, "event stream connected");

        let shared = Arc::new(Shared {
            url: url.to_string(),
            state: Mutex::new(State {
                phase: Phase::Connecting,
                session_id: None,
                keepalive: clamp_keepalive(config.initial_keepalive),
                seen: SeenIds::new(config.seen_id_horizon),
                buffer: EventBuffer::new(config.buffer_capacity, config.high_water_mark),
                waiter: None,
            }),
        });
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), transport, close_rx));

        Ok(Self {
            shared,
            close_tx,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Wait for the welcome and promote the session to [`Phase::Active`].
    pub async fn handshake(&self) -> Result<WelcomeSession, SessionError> {
        match self.next().await {
            Some(SessionEvent::Welcome(welcome)) => {
                let mut state = self.shared.state.lock();
                if state.phase == Phase::Welcomed {
                    state.phase = Phase::Active;
                }
                debug!(url = %self.shared.url, session_id = %welcome.id, "handshake complete");
                Ok(welcome)
            }
            Some(SessionEvent::Close { code }) => Err(SessionError::Handshake { code }),
            Some(_) => {
                self.close(close_code::PROTOCOL_VIOLATION).await;
                Err(SessionError::Handshake {
                    code: close_code::PROTOCOL_VIOLATION,
                })
            }
            None => Err(SessionError::Handshake {
                code: close_code::UNSPECIFIED,
            }),
        }
    }

    /// Next event, oldest first. `None` once closed and drained.
    ///
    /// One consumer at a time; a second concurrent call displaces the first,
    /// which then sees `None`.
    pub async fn next(&self) -> Option<SessionEvent> {
        let rx = {
            let mut state = self.shared.state.lock();
            if let Some(event) = state.buffer.pop() {
                return Some(event);
            }
            if state.phase == Phase::Closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            if state.waiter.replace(tx).is_some() {
                warn!(url = %self.shared.url, "displacing pending session consumer");
            }
            rx
        };
        rx.await.ok()
    }

    /// The events of [`Session::next`] as a stream.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> + '_ {
        futures::stream::unfold(self, |session| async move {
            session.next().await.map(|event| (event, session))
        })
    }

    /// Take over `other` after a reconnect.
    ///
    /// `other` is closed with [`close_code::SUPERSEDED`] without emitting a
    /// close event. Its undelivered events move to the front of this
    /// session's queue, in order.
    pub fn combine(&self, other: &Session) {
        if Arc::ptr_eq(&self.shared, &other.shared) {
            return;
        }
        let carried: Vec<SessionEvent> = {
            let mut theirs = other.shared.state.lock();
            theirs.phase = Phase::Closed;
            theirs.waiter = None;
            theirs
                .buffer
                .take_all()
                .into_iter()
                .filter(|event| !matches!(event, SessionEvent::Close { .. }))
                .collect()
        };
        let _ = other.close_tx.send(close_code::SUPERSEDED);

        let mut ours = self.shared.state.lock();
        info!(
            from = %other.shared.url,
            to = %self.shared.url,
            carried = carried.len(),
            "session superseded"
        );
        ours.buffer.prepend(carried);
        if ours.waiter.is_some() {
            if let Some(event) = ours.buffer.pop() {
                if let Err(event) = ours.offer(event) {
                    ours.buffer.prepend([event]);
                }
            }
        }
    }

    /// Close the session with `code` and wait for the reader to finish.
    pub async fn close(&self, code: u16) {
        let _ = self.close_tx.send(code);
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!(url = %self.shared.url, error = %e, "session reader panicked");
            }
        }
    }

    /// Server-assigned id, once welcomed.
    pub fn session_id(&self) -> Option<String> {
        self.shared.state.lock().session_id.clone()
    }

    /// Current keepalive interval.
    pub fn keepalive(&self) -> Duration {
        self.shared.state.lock().keepalive
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Whether the session has reached [`Phase::Closed`].
    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Events queued and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// URL this session connected to.
    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.shared.url)
            .field("phase", &self.phase())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn keepalive(&self) -> Duration {
        self.state.lock().keepalive
    }

    /// Apply one text frame. `Some(code)` ends the session.
    fn handle_text(&self, text: &str) -> Option<u16> {
        let frame = match frames::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(url = %self.url, error = %e, "dropping undecodable frame");
                return None;
            }
        };

        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            debug!(url = %self.url, "dropping frame for a closed session");
            return None;
        }
        let message_id = &frame.metadata.message_id;
        if !state.seen.insert(message_id, Instant::now()) {
            debug!(url = %self.url, message_id, "dropping duplicate message");
            return None;
        }

        if state.phase == Phase::Connecting && !matches!(frame.message, Message::Welcome(_)) {
            warn!(
                url = %self.url,
                message_type = ?frame.metadata.message_type,
                "first frame was not a welcome"
            );
            return Some(close_code::PROTOCOL_VIOLATION);
        }

        let event = match frame.message {
            Message::Welcome(welcome) => {
                if let Some(secs) = welcome.keepalive_timeout_seconds {
                    state.keepalive = clamp_keepalive(Duration::from_secs(secs));
                }
                state.session_id = Some(welcome.id.clone());
                if state.phase == Phase::Connecting {
                    state.phase = Phase::Welcomed;
                }
                info!(url = %self.url, session_id = %welcome.id, keepalive_secs = state.keepalive.as_secs(), "session welcomed");
                SessionEvent::Welcome(welcome)
            }
            Message::Keepalive => return None,
            Message::Notification(notification) => SessionEvent::Notification(notification),
            Message::Reconnect(reconnect) => {
                info!(url = %self.url, reconnect_url = %reconnect.reconnect_url, "server requested reconnect");
                SessionEvent::Reconnect(reconnect)
            }
        };
        state.deliver(event, &self.url)
    }

    /// The only way a session ends. Idempotent; a superseded session stays
    /// silent.
    fn post_mortem(&self, code: u16) {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            debug!(url = %self.url, code, "reader stopped after supersession");
            return;
        }
        state.phase = Phase::Closed;
        info!(url = %self.url, code, reason = close_code::describe(code), "session closed");
        let event = SessionEvent::Close { code };
        if let Err(event) = state.offer(event) {
            state.buffer.force_push(event);
        }
    }
}

impl State {
    /// Hand `event` to the pending consumer, if one is still listening.
    fn offer(&mut self, event: SessionEvent) -> Result<(), SessionEvent> {
        match self.waiter.take() {
            Some(waiter) => waiter.send(event),
            None => Err(event),
        }
    }

    /// Deliver or queue `event`. `Some(code)` when the buffer overflowed.
    fn deliver(&mut self, event: SessionEvent, url: &str) -> Option<u16> {
        let event = match self.offer(event) {
            Ok(()) => return None,
            Err(event) => event,
        };
        match self.buffer.push(event) {
            PushOutcome::Queued => None,
            PushOutcome::AboveHighWater(len) => {
                warn!(url, len, capacity = self.buffer.capacity(), "session buffer above high-water mark");
                None
            }
            PushOutcome::Full => {
                error!(url, capacity = self.buffer.capacity(), "session buffer full, consumer cannot keep up");
                Some(close_code::BUFFER_OVERFLOW)
            }
        }
    }
}

/// Runs the post-mortem for a reader that stopped without reaching it.
struct ReaderGuard {
    shared: Arc<Shared>,
    code: u16,
    finished: bool,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if !self.finished {
            error!(url = %self.shared.url, "session reader stopped abruptly");
            self.shared.post_mortem(self.code);
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut transport: Box<dyn Transport>,
    mut close_rx: mpsc::UnboundedReceiver<u16>,
) {
    let mut guard = ReaderGuard {
        shared: Arc::clone(&shared),
        code: close_code::UNSPECIFIED,
        finished: false,
    };
    let mut deadlines = Deadlines::arm(shared.keepalive(), Instant::now());
    let code = loop {
        tokio::select! {
            biased;
            requested = close_rx.recv() => break requested.unwrap_or(close_code::NORMAL),
            () = sleep_until(deadlines.kill_at) => {
                error!(url = %shared.url, "keepalive missed twice, presuming connection dead");
                break close_code::HEARTBEAT_TIMEOUT;
            }
            () = sleep_until(deadlines.warn_at), if !deadlines.warned => {
                deadlines.warned = true;
                warn!(url = %shared.url, "keepalive missed, waiting one more window");
            }
            inbound = transport.recv() => {
                let outcome = match inbound {
                    None => {
                        warn!(url = %shared.url, "event stream ended without close frame");
                        Some(close_code::TRANSPORT_ERROR)
                    }
                    Some(Inbound::Error(message)) => {
                        warn!(url = %shared.url, error = %message, "event stream error");
                        Some(close_code::TRANSPORT_ERROR)
                    }
                    Some(Inbound::Closed(code)) => Some(code.unwrap_or(close_code::UNSPECIFIED)),
                    Some(Inbound::Binary(bytes)) => {
                        warn!(url = %shared.url, len = bytes.len(), "dropping non-text frame");
                        None
                    }
                    Some(Inbound::Text(text)) => shared.handle_text(&text),
                };
                if let Some(code) = outcome {
                    break code;
                }
                deadlines = Deadlines::arm(shared.keepalive(), Instant::now());
            }
        }
    };
    guard.code = code;

    if tokio::time::timeout(CLOSE_TIMEOUT, transport.close(code))
        .await
        .is_err()
    {
        warn!(url = %shared.url, code, "socket close timed out");
    }
    drop(transport);
    shared.post_mortem(code);
    guard.finished = true;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        MemoryConnector, MemoryServer, keepalive_frame, notification_frame, reconnect_frame,
        welcome_frame,
    };
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use serde_json::json;

    async fn connect(config: SessionConfig) -> (Session, MemoryServer, MemoryConnector) {
        let (connector, mut servers) = MemoryConnector::new();
        let session = Session::connect(&connector, "memory://a", config)
            .await
            .unwrap();
        let server = servers.recv().await.unwrap();
        (session, server, connector)
    }

    async fn active(config: SessionConfig, keepalive_secs: u64) -> (Session, MemoryServer) {
        let (session, server, _connector) = connect(config).await;
        assert!(server.send_text(welcome_frame("w", "s1", keepalive_secs)));
        let _ = session.handshake().await.unwrap();
        (session, server)
    }

    /// Let the reader drain everything already sent.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn tag(event: &SessionEvent) -> &str {
        match event {
            SessionEvent::Notification(n) => n.event["n"].as_str().unwrap_or_default(),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_activates_session() {
        let (session, server, _connector) = connect(SessionConfig::default()).await;
        assert_eq!(session.phase(), Phase::Connecting);
        assert!(session.session_id().is_none());

        assert!(server.send_text(welcome_frame("w", "s1", 30)));
        let welcome = session.handshake().await.unwrap();

        assert_eq!(welcome.id, "s1");
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.session_id().as_deref(), Some("s1"));
        assert_eq!(session.keepalive(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn non_welcome_first_frame_fails_handshake() {
        let (session, mut server, _connector) = connect(SessionConfig::default()).await;
        assert!(server.send_text(keepalive_frame("k")));

        assert_matches!(
            session.handshake().await,
            Err(SessionError::Handshake {
                code: close_code::PROTOCOL_VIOLATION
            })
        );
        assert_eq!(server.closed().await, Some(close_code::PROTOCOL_VIOLATION));
        assert!(session.is_closed());
        assert!(session.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_first_frame_is_skipped() {
        let (session, server, _connector) = connect(SessionConfig::default()).await;
        assert!(server.send_text("{not json"));
        assert!(server.send(Inbound::Binary(vec![1, 2, 3])));
        assert!(server.send_text(welcome_frame("w", "s1", 10)));
        assert!(session.handshake().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn early_remote_close_fails_handshake() {
        let (session, server, _connector) = connect(SessionConfig::default()).await;
        assert!(server.send(Inbound::Closed(Some(4003))));
        assert_matches!(
            session.handshake().await,
            Err(SessionError::Handshake { code: 4003 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_fails_handshake_by_heartbeat() {
        let (session, _server, _connector) = connect(SessionConfig::default()).await;
        assert_matches!(
            session.handshake().await,
            Err(SessionError::Handshake {
                code: close_code::HEARTBEAT_TIMEOUT
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_emits_one_close() {
        let (session, mut server) = active(SessionConfig::default(), 10).await;
        let started = Instant::now();

        assert_eq!(
            session.next().await,
            Some(SessionEvent::Close {
                code: close_code::HEARTBEAT_TIMEOUT
            })
        );
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(server.closed().await, Some(close_code::HEARTBEAT_TIMEOUT));
        assert!(session.next().await.is_none());
        assert!(session.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn soft_deadline_only_warns() {
        let (session, server) = active(SessionConfig::default(), 10).await;

        // Past the soft deadline, short of the hard one.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(session.phase(), Phase::Active);

        assert!(server.send_text(keepalive_frame("k1")));
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(session.phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn any_frame_resets_deadlines() {
        let (session, server) = active(SessionConfig::default(), 10).await;

        for i in 0..5 {
            tokio::time::sleep(Duration::from_secs(15)).await;
            let frame = if i % 2 == 0 {
                "garbage".to_string()
            } else {
                keepalive_frame(&format!("k{i}"))
            };
            assert!(server.send_text(frame));
        }
        settle().await;
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_keepalive_is_clamped() {
        let (session, mut server) = active(SessionConfig::default(), u64::MAX).await;
        assert_eq!(session.keepalive(), crate::heartbeat::MAX_KEEPALIVE);
        let started = Instant::now();

        assert!(server.send_text(keepalive_frame("k1")));
        settle().await;
        assert_eq!(session.phase(), Phase::Active);

        assert_eq!(
            session.next().await,
            Some(SessionEvent::Close {
                code: close_code::HEARTBEAT_TIMEOUT
            })
        );
        assert!(started.elapsed() >= Duration::from_secs(1_200));
        assert_eq!(server.closed().await, Some(close_code::HEARTBEAT_TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_reader_still_emits_one_close() {
        let (session, _server) = active(SessionConfig::default(), 10).await;
        let reader = session.reader.lock().take().unwrap();
        reader.abort();

        assert_eq!(
            session.next().await,
            Some(SessionEvent::Close {
                code: close_code::UNSPECIFIED
            })
        );
        assert!(session.is_closed());
        assert!(session.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_message_ids_dropped() {
        let (session, server) = active(SessionConfig::default(), 10).await;
        let frame = notification_frame("n1", "channel.follow", json!({"n": "first"}));
        assert!(server.send_text(frame.clone()));
        assert!(server.send_text(frame));
        assert!(server.send_text(notification_frame("n2", "channel.follow", json!({"n": "second"}))));
        settle().await;

        assert_eq!(session.buffered(), 2);
        assert_eq!(tag(&session.next().await.unwrap()), "first");
        assert_eq!(tag(&session.next().await.unwrap()), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn seen_ids_expire_after_horizon() {
        let config = SessionConfig {
            seen_id_horizon: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let (session, server) = active(config, 10).await;
        let frame = notification_frame("n1", "channel.follow", json!({"n": "x"}));
        assert!(server.send_text(frame.clone()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(server.send_text(frame));
        settle().await;
        assert_eq!(session.buffered(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_consumer_receives_directly() {
        let (session, server) = active(SessionConfig::default(), 10).await;
        let session = Arc::new(session);
        let consumer = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.next().await })
        };
        settle().await;

        assert!(server.send_text(notification_frame("n1", "channel.follow", json!({"n": "direct"}))));
        let event = consumer.await.unwrap().unwrap();
        assert_eq!(tag(&event), "direct");
        assert_eq!(session.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_closes_after_buffered_events() {
        let (session, mut server) = active(SessionConfig::default(), 10).await;
        for i in 0..65 {
            assert!(server.send_text(notification_frame(
                &format!("n{i}"),
                "channel.follow",
                json!({"n": i.to_string()})
            )));
        }
        settle().await;
        assert_eq!(server.closed().await, Some(close_code::BUFFER_OVERFLOW));

        let events: Vec<SessionEvent> = session.events().collect().await;
        assert_eq!(events.len(), 65);
        for (i, event) in events[..64].iter().enumerate() {
            assert_eq!(tag(event), i.to_string());
        }
        assert_eq!(
            events[64],
            SessionEvent::Close {
                code: close_code::BUFFER_OVERFLOW
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_is_an_event_not_a_close() {
        let (session, server) = active(SessionConfig::default(), 10).await;
        assert!(server.send_text(reconnect_frame("r1", "s1", "memory://b")));
        assert_matches!(
            session.next().await,
            Some(SessionEvent::Reconnect(ReconnectSession { ref reconnect_url, .. })) if reconnect_url == "memory://b"
        );
        assert_eq!(session.phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn combine_moves_old_events_first() {
        let (connector, mut servers) = MemoryConnector::new();

        let old = Session::connect(&connector, "memory://old", SessionConfig::default())
            .await
            .unwrap();
        let mut old_server = servers.recv().await.unwrap();
        assert!(old_server.send_text(welcome_frame("w1", "s-old", 10)));
        let _ = old.handshake().await.unwrap();

        let new = Session::connect(&connector, "memory://new", SessionConfig::default())
            .await
            .unwrap();
        let new_server = servers.recv().await.unwrap();
        assert!(new_server.send_text(welcome_frame("w2", "s-new", 10)));
        let _ = new.handshake().await.unwrap();

        assert!(old_server.send_text(notification_frame("o1", "t", json!({"n": "old-1"}))));
        assert!(old_server.send_text(notification_frame("o2", "t", json!({"n": "old-2"}))));
        assert!(new_server.send_text(notification_frame("n1", "t", json!({"n": "new-1"}))));
        settle().await;

        new.combine(&old);

        assert!(old.is_closed());
        assert_eq!(old.buffered(), 0);
        assert!(old.next().await.is_none());
        assert_eq!(old_server.closed().await, Some(close_code::SUPERSEDED));

        let order: Vec<String> = [
            new.next().await.unwrap(),
            new.next().await.unwrap(),
            new.next().await.unwrap(),
        ]
        .iter()
        .map(|e| tag(e).to_string())
        .collect();
        assert_eq!(order, vec!["old-1", "old-2", "new-1"]);
        settle().await;
        assert_eq!(old.buffered(), 0);
        assert_eq!(new.phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn combine_wakes_waiting_consumer() {
        let (connector, mut servers) = MemoryConnector::new();
        let old = Session::connect(&connector, "memory://old", SessionConfig::default())
            .await
            .unwrap();
        let old_server = servers.recv().await.unwrap();
        assert!(old_server.send_text(welcome_frame("w1", "s-old", 10)));
        let _ = old.handshake().await.unwrap();
        assert!(old_server.send_text(notification_frame("o1", "t", json!({"n": "carried"}))));

        let new = Arc::new(
            Session::connect(&connector, "memory://new", SessionConfig::default())
                .await
                .unwrap(),
        );
        let new_server = servers.recv().await.unwrap();
        assert!(new_server.send_text(welcome_frame("w2", "s-new", 10)));
        let _ = new.handshake().await.unwrap();

        let consumer = {
            let new = Arc::clone(&new);
            tokio::spawn(async move { new.next().await })
        };
        settle().await;
        new.combine(&old);

        let event = consumer.await.unwrap().unwrap();
        assert_eq!(tag(&event), "carried");
    }

    #[tokio::test(start_paused = true)]
    async fn frame_after_combine_is_not_queued_on_old_session() {
        let (connector, mut servers) = MemoryConnector::new();
        let old = Session::connect(&connector, "memory://old", SessionConfig::default())
            .await
            .unwrap();
        let old_server = servers.recv().await.unwrap();
        assert!(old_server.send_text(welcome_frame("w1", "s-old", 10)));
        let _ = old.handshake().await.unwrap();

        let new = Session::connect(&connector, "memory://new", SessionConfig::default())
            .await
            .unwrap();
        let new_server = servers.recv().await.unwrap();
        assert!(new_server.send_text(welcome_frame("w2", "s-new", 10)));
        let _ = new.handshake().await.unwrap();

        new.combine(&old);
        // A reader already past decoding when the hand-off took the buffer.
        let late = notification_frame("o9", "t", json!({"n": "late"}));
        assert_eq!(old.shared.handle_text(&late), None);

        assert_eq!(old.buffered(), 0);
        assert!(old.next().await.is_none());
        assert_eq!(new.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn owner_close_emits_code() {
        let (session, mut server) = active(SessionConfig::default(), 10).await;
        session.close(close_code::NORMAL).await;

        assert_eq!(server.closed().await, Some(close_code::NORMAL));
        assert_eq!(
            session.next().await,
            Some(SessionEvent::Close {
                code: close_code::NORMAL
            })
        );
        assert!(session.next().await.is_none());
        // Closing again is a no-op.
        session.close(close_code::NORMAL).await;
        assert!(session.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_is_transport_error() {
        let (session, server) = active(SessionConfig::default(), 10).await;
        drop(server);
        assert_eq!(
            session.next().await,
            Some(SessionEvent::Close {
                code: close_code::TRANSPORT_ERROR
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_without_code_is_unspecified() {
        let (session, server) = active(SessionConfig::default(), 10).await;
        assert!(server.send(Inbound::Closed(None)));
        assert_eq!(
            session.next().await,
            Some(SessionEvent::Close {
                code: close_code::UNSPECIFIED
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_fails_when_connect_refused() {
        let (connector, _servers) = MemoryConnector::new();
        connector.refuse("memory://down");
        assert_matches!(
            Session::open(&connector, "memory://down", SessionConfig::default()).await,
            Err(SessionError::Connect { .. })
        );
    }
}
