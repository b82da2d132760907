//! # Connection Manager
//!
//! Owns the single duplex channel: reconnection, heartbeat, outbound
//! buffering and topic dispatch.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Channel Connection States                            │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲  ▲                           │                                 │
//! │        │  │                 open ok   │   open failed                   │
//! │        │  │                   ┌───────┴──────┐                          │
//! │        │  │                   ▼              ▼                          │
//! │        │  │           ┌────────────┐  ┌────────────┐                   │
//! │        │  │           │ Connected  │  │  Errored   │                   │
//! │        │  │           └─────┬──────┘  └─────┬──────┘                   │
//! │        │  │      closed     │               │                           │
//! │        │  └─────────────────┘               │                           │
//! │        │                                    │                           │
//! │        └──── ReconnectTimer fires ──────────┘ → Connecting              │
//! │                                                                         │
//! │  RECONNECT POLICY                                                      │
//! │  ────────────────                                                      │
//! │  attempt n waits base * 2^(n-1)     (1s, 2s, 4s, 8s, 16s)              │
//! │  after max_attempts: stay put until handle_back_online() or connect()  │
//! │  disconnect(): no automatic reconnection for this session              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one reconnect timer exists per manager. [`ReconnectTimer`] holds
//! it in a single slot and aborts the previous timer before arming a new one.
//!
//! Transport failures never reach callers; watch [`ConnectionManager::state_changes`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;
use crate::lock;
use crate::protocol::{decode, InboundMessage, OutboundMessage};
use crate::pubsub::{Subscription, TopicRegistry};
use crate::retry::DoublingBackoff;
use crate::transport::{Channel, Connector};

// =============================================================================
// Connection State
// =============================================================================

/// State of the duplex channel. One per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Opening the channel.
    Connecting,
    /// Channel open.
    Connected,
    /// Not connected (never opened, closed, or explicitly disconnected).
    Disconnected,
    /// The last open attempt failed.
    Errored,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Errored => write!(f, "errored"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection manager tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Close the channel when a ping is not answered within this window.
    pub liveness_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            liveness_timeout: None,
        }
    }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        ConnectionConfig {
            base_delay: settings.base_delay(),
            max_attempts: settings.max_attempts,
            heartbeat_interval: settings.heartbeat_interval(),
            liveness_timeout: settings.liveness_timeout(),
        }
    }
}

// =============================================================================
// Reconnect Timer
// =============================================================================

/// Single-slot cancellable timer.
///
/// ```text
/// schedule(d, f) ─► abort previous ─► slot = (generation, handle)
/// fire           ─► slot still ours? ─► clear slot ─► f()
/// cancel()       ─► abort + clear
/// ```
#[derive(Default)]
pub struct ReconnectTimer {
    slot: Arc<Mutex<Option<(u64, AbortHandle)>>>,
    generation: AtomicU64,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer, replacing any pending one.
    pub fn schedule<F>(&self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = lock(&self.slot);
        if let Some((_, previous)) = slot.take() {
            previous.abort();
        }

        let task_slot = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = lock(&task_slot);
                match slot.as_ref() {
                    Some((armed, _)) if *armed == generation => *slot = None,
                    _ => return,
                }
            }
            on_fire();
        });
        *slot = Some((generation, handle.abort_handle()));
    }

    /// Disarms the pending timer, if any.
    pub fn cancel(&self) {
        if let Some((_, handle)) = lock(&self.slot).take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Outbound path shared by `send` and the session that owns the channel.
struct Link {
    /// Sender of the open channel. `None` while not connected.
    sink: Option<mpsc::UnboundedSender<String>>,
    /// Messages sent while disconnected, oldest first.
    pending: VecDeque<OutboundMessage>,
    /// Bumped per open attempt and on disconnect. Sessions with an older
    /// value no longer own the link.
    generation: u64,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
    registry: TopicRegistry,
    timer: ReconnectTimer,
    backoff: Mutex<DoublingBackoff>,
    session: Mutex<Option<JoinHandle<()>>>,
    explicit_disconnect: AtomicBool,
}

/// Handle to the connection manager. Cheap to clone.
///
/// ## Usage
/// ```rust,ignore
/// let manager = ConnectionManager::new(Arc::new(connector), ConnectionConfig::default());
/// let _sub = manager.subscribe("match_events", |msg| println!("{:?}", msg.payload()));
/// manager.connect();
/// manager.join_match("m-42");
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = DoublingBackoff::new(config.base_delay, config.max_attempts);

        ConnectionManager {
            inner: Arc::new(Inner {
                connector,
                config,
                state_tx,
                link: Mutex::new(Link {
                    sink: None,
                    pending: VecDeque::new(),
                    generation: 0,
                }),
                registry: TopicRegistry::new(),
                timer: ReconnectTimer::new(),
                backoff: Mutex::new(backoff),
                session: Mutex::new(None),
                explicit_disconnect: AtomicBool::new(false),
            }),
        }
    }

    /// Starts a connection attempt with a fresh attempt counter.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        self.inner.explicit_disconnect.store(false, Ordering::SeqCst);
        lock(&self.inner.backoff).reset();
        start_attempt(&self.inner);
    }

    /// Closes the channel and suppresses automatic reconnection.
    pub fn disconnect(&self) {
        info!("Disconnecting channel");
        self.inner.explicit_disconnect.store(true, Ordering::SeqCst);
        self.inner.timer.cancel();

        {
            let mut link = lock(&self.inner.link);
            link.generation += 1;
            // Dropping the sender closes the transport
            link.sink = None;
            self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        }

        if let Some(session) = lock(&self.inner.session).take() {
            session.abort();
        }
    }

    /// Network came back: reset the attempt counter and reconnect unless the
    /// session was explicitly disconnected.
    pub fn handle_back_online(&self) {
        if self.inner.explicit_disconnect.load(Ordering::SeqCst) {
            debug!("Back online, but channel was explicitly disconnected");
            return;
        }
        info!("Back online, reconnecting");
        lock(&self.inner.backoff).reset();
        start_attempt(&self.inner);
    }

    /// Sends now if connected, otherwise buffers until the channel reopens.
    pub fn send(&self, message: OutboundMessage) {
        self.inner.send(message);
    }

    pub fn join_match(&self, match_id: &str) {
        self.send(OutboundMessage::join_match(match_id));
    }

    pub fn leave_match(&self, match_id: &str) {
        self.send(OutboundMessage::leave_match(match_id));
    }

    /// Registers a callback for `topic`; drop the handle to unsubscribe.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(topic, callback)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Messages waiting for the channel to reopen.
    pub fn pending_outbound(&self) -> usize {
        lock(&self.inner.link).pending.len()
    }

    /// Reconnect attempts made since the last reset.
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.inner.backoff).attempts()
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.timer.is_pending()
    }
}

impl Inner {
    fn send(&self, message: OutboundMessage) {
        let mut link = lock(&self.link);
        if let Some(sink) = &link.sink {
            match message.to_frame() {
                Ok(frame) => {
                    if sink.send(frame).is_ok() {
                        debug!(kind = %message.kind, id = %message.id, "Message sent");
                        return;
                    }
                    debug!("Channel closing, buffering message");
                }
                Err(e) => {
                    warn!(?e, kind = %message.kind, "Dropping unencodable message");
                    return;
                }
            }
        }
        debug!(kind = %message.kind, pending = link.pending.len() + 1, "Buffering message");
        link.pending.push_back(message);
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.explicit_disconnect.load(Ordering::SeqCst) {
            return;
        }

        let (attempt, delay) = {
            let mut backoff = lock(&self.backoff);
            match backoff.next_backoff() {
                Some(delay) => (backoff.attempts(), delay),
                None => {
                    warn!(
                        max_attempts = self.config.max_attempts,
                        "Max reconnection attempts reached, waiting for back-online signal"
                    );
                    return;
                }
            }
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.timer.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                start_attempt(&inner);
            }
        });
    }
}

/// Opens a channel unless one is already open or opening.
fn start_attempt(inner: &Arc<Inner>) {
    inner.timer.cancel();

    let generation = {
        let mut link = lock(&inner.link);
        let began = inner.state_tx.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Connected => false,
            _ => {
                *state = ConnectionState::Connecting;
                true
            }
        });
        if !began {
            debug!("Channel already open or opening");
            return;
        }
        link.generation += 1;
        link.generation
    };

    debug!(generation, "Opening channel");
    let handle = tokio::spawn(run_session(Arc::clone(inner), generation));
    if let Some(previous) = lock(&inner.session).replace(handle) {
        previous.abort();
    }
}

/// One channel lifetime: open, pump until closed, then hand back to the
/// reconnect policy.
async fn run_session(inner: Arc<Inner>, generation: u64) {
    let channel = match inner.connector.connect().await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(?e, "Channel open failed");
            {
                let link = lock(&inner.link);
                if link.generation != generation {
                    return;
                }
                inner.state_tx.send_replace(ConnectionState::Errored);
            }
            inner.schedule_reconnect();
            return;
        }
    };

    let Channel {
        outgoing,
        mut incoming,
    } = channel;

    {
        let mut link = lock(&inner.link);
        if link.generation != generation {
            return;
        }
        let mut flushed = 0usize;
        while let Some(message) = link.pending.pop_front() {
            match message.to_frame() {
                Ok(frame) => {
                    if outgoing.send(frame).is_err() {
                        link.pending.push_front(message);
                        break;
                    }
                    flushed += 1;
                }
                Err(e) => warn!(?e, id = %message.id, "Dropping unencodable buffered message"),
            }
        }
        link.sink = Some(outgoing);
        lock(&inner.backoff).reset();
        inner.state_tx.send_replace(ConnectionState::Connected);
        info!(flushed, "Channel connected");
    }

    read_loop(&inner, &mut incoming).await;

    {
        let mut link = lock(&inner.link);
        if link.generation != generation {
            return;
        }
        link.sink = None;
        inner.state_tx.send_replace(ConnectionState::Disconnected);
    }
    info!("Channel closed");
    inner.schedule_reconnect();
}

/// Dispatches frames and sends heartbeats until the channel closes or misses
/// its liveness deadline.
async fn read_loop(inner: &Arc<Inner>, incoming: &mut mpsc::Receiver<String>) {
    let period = inner.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let liveness = async {
            match pong_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            frame = incoming.recv() => {
                let Some(text) = frame else {
                    debug!("Transport closed the channel");
                    return;
                };
                match decode(&text) {
                    Ok(message) => {
                        if matches!(message, InboundMessage::Pong(_)) {
                            pong_deadline = None;
                        }
                        debug!(topic = %message.topic(), "Frame received");
                        inner.registry.dispatch(&message);
                    }
                    Err(e) => warn!(?e, "Dropping undecodable frame"),
                }
            }

            _ = heartbeat.tick() => {
                inner.send(OutboundMessage::ping());
                if let (Some(window), None) = (inner.config.liveness_timeout, pong_deadline) {
                    pong_deadline = Some(Instant::now() + window);
                }
            }

            _ = liveness => {
                warn!("No pong within liveness window, closing channel");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Errored.to_string(), "errored");
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ConnectionSettings {
            liveness_timeout_secs: Some(10),
            ..Default::default()
        };
        let config = ConnectionConfig::from(&settings);
        assert_eq!(config.base_delay, Duration::from_millis(1000));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.liveness_timeout, Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_replaces_previous() {
        let timer = ReconnectTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        timer.schedule(Duration::from_secs(1), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = fired.clone();
        timer.schedule(Duration::from_secs(2), move || {
            f.fetch_add(10, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancel() {
        let timer = ReconnectTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        timer.schedule(Duration::from_secs(1), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
