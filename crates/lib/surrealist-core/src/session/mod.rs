//! The session coordinator shared by every Surrealist front end.
//!
//! A [`Session`] owns one transport, the live query registry and the handles
//! to the UI store. It is created by the application root and passed around by
//! clone; [`Session::shutdown`] tears it down.

mod connect;
mod query;

use std::error::Error;
use std::fmt;
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::live::LiveRegistry;
use crate::store::{Interface, Notice, SessionStore};
use crate::transport::{Transport, TransportEvent};
use crate::version::SupportedVersions;

pub use connect::AuthError;
pub use query::{QueryError, UserQueryOptions};

/// `tracing` target for usage telemetry events.
pub const TELEMETRY_TARGET: &str = "surrealist::telemetry";

/// Lifecycle notifications for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
}

/// Tunables for the session coordinator.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pause after closing the transport before it may be reused.
    pub settle_delay: Duration,
    pub version_check_timeout: Duration,
    pub supported_versions: SupportedVersions,
    pub event_capacity: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            version_check_timeout: Duration::from_secs(5),
            supported_versions: SupportedVersions::default(),
            event_capacity: 16,
        }
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    #[must_use]
    pub const fn with_version_check_timeout(mut self, timeout: Duration) -> Self {
        self.version_check_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_supported_versions(mut self, supported: SupportedVersions) -> Self {
        self.supported_versions = supported;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NoConnectionAvailable,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConnectionAvailable => write!(f, "no connection available"),
        }
    }
}

impl Error for SessionError {}

/// Identifies one `open_connection` call.
///
/// Only the most recently issued token is current; continuations of older
/// attempts must not touch shared state.
#[derive(Debug, Clone)]
pub struct AttemptToken {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl AttemptToken {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.generation
    }
}

/// Connection session over a transport.
pub struct Session<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Session state shared across clones.
struct SessionInner<T: Transport> {
    transport: T,
    store: Arc<dyn SessionStore>,
    interface: Arc<dyn Interface>,
    config: SessionConfig,
    attempts: Arc<AtomicU64>,
    live: LiveRegistry,
    signup_pending: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Session<T> {
    #[must_use]
    pub fn new(transport: T, store: Arc<dyn SessionStore>, interface: Arc<dyn Interface>) -> Self {
        Self::with_config(transport, store, interface, SessionConfig::default())
    }

    #[must_use]
    pub fn with_config(
        transport: T,
        store: Arc<dyn SessionStore>,
        interface: Arc<dyn Interface>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(SessionInner {
                transport,
                store,
                interface,
                config,
                attempts: Arc::new(AtomicU64::new(0)),
                live: LiveRegistry::new(),
                signup_pending: AtomicBool::new(false),
                events,
                watcher: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn live(&self) -> &LiveRegistry {
        &self.inner.live
    }

    /// Whether the link is open but waits for a scope signup.
    ///
    /// Set when scope credentials matched no record; cleared by a successful
    /// [`Session::register`] or sign in, and by disconnecting.
    #[must_use]
    pub fn signup_pending(&self) -> bool {
        self.inner.signup_pending.load(Ordering::SeqCst)
    }

    /// Subscribes to connection lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Starts a task reacting to links dropped by the transport.
    ///
    /// Calling it again replaces the previous watcher. The task ends when the
    /// session is dropped or shut down.
    pub fn spawn_disconnect_watcher(&self) {
        let mut events = self.inner.transport.events();
        let session = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Disconnected) => {
                        let Some(inner) = Weak::upgrade(&session) else {
                            break;
                        };
                        Self { inner }.handle_link_lost();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "disconnect watcher lagged behind transport events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the disconnect watcher and closes the connection.
    pub async fn shutdown(&self) {
        let watcher = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        self.close_connection().await;
        debug!("session shut down");
    }

    fn begin_attempt(&self) -> AttemptToken {
        let generation = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        AttemptToken {
            generation,
            latest: self.inner.attempts.clone(),
        }
    }

    fn handle_link_lost(&self) {
        warn!("connection to the database was lost");
        self.inner.interface.notify(Notice::error(
            "Connection lost",
            "The connection to the database closed unexpectedly",
        ));
        self.mark_disconnected();
    }

    fn mark_disconnected(&self) {
        let store = self.inner.store.as_ref();
        store.set_connecting(false);
        store.set_connected(false);
        store.set_version(String::new());
        self.inner.signup_pending.store(false, Ordering::SeqCst);

        let dropped = self.inner.live.clear(store);
        if dropped > 0 {
            debug!(dropped, "dropped live queries of closed connection");
        }
        let _ = self.inner.events.send(SessionEvent::Disconnected);
    }
}
