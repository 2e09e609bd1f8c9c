use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{Map, Value};
use surrealdb::engine::any::{self, Any};
use surrealdb::method::QueryStream;
use surrealdb::opt::auth::{Database, Namespace, Record, Root};
use surrealdb::{Action, Notification, Surreal};
use surrealist_model::{Credentials, LiveAction, ScopeAuth};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ConnectParams,
    LiveHandler,
    RawResult,
    Transport,
    TransportError,
    TransportEvent,
    TransportResult,
    TransportStatus,
};

const NO_RECORD_MESSAGE: &str = "No record was returned";

type LiveStream = QueryStream<surrealdb::Value>;

impl From<surrealdb::Error> for TransportError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Driver(err.to_string())
    }
}

/// Tunables for the `SurrealDB` transport.
#[derive(Debug, Clone)]
pub struct SurrealTransportConfig {
    pub health_check_interval: Option<Duration>,
    pub event_capacity: usize,
}

impl SurrealTransportConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            health_check_interval: Some(Duration::from_secs(30)),
            event_capacity: 16,
        }
    }

    #[must_use]
    pub const fn with_health_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.health_check_interval = interval;
        self
    }
}

impl Default for SurrealTransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport backed by the `surrealdb` crate's `any` engine.
///
/// Each successful `connect` creates a fresh client; `close` drops it, which
/// also tears down every live query stream opened through it. Every `connect`
/// and `close` bumps the link epoch, and a `connect` only installs its client
/// if no other call bumped the epoch while it was dialing.
#[derive(Clone)]
pub struct SurrealTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    config: SurrealTransportConfig,
    client: RwLock<Option<Surreal<Any>>>,
    epoch: AtomicU64,
    status: Mutex<TransportStatus>,
    live: Mutex<LiveStreams>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<TransportEvent>,
}

/// Live query streams captured from responses and the tasks draining them.
#[derive(Default)]
struct LiveStreams {
    pending: HashMap<Uuid, LiveStream>,
    running: HashMap<Uuid, JoinHandle<()>>,
}

impl LiveStreams {
    fn clear(&mut self) {
        self.pending.clear();
        for (_, task) in self.running.drain() {
            task.abort();
        }
    }
}

impl SurrealTransport {
    #[must_use]
    pub fn new(config: SurrealTransportConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(TransportInner {
                config,
                client: RwLock::new(None),
                epoch: AtomicU64::new(0),
                status: Mutex::new(TransportStatus::Disconnected),
                live: Mutex::new(LiveStreams::default()),
                monitor: Mutex::new(None),
                events,
            }),
        }
    }

    async fn client(&self) -> TransportResult<Surreal<Any>> {
        self.inner
            .client
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn spawn_monitor(&self, db: Surreal<Any>, epoch: u64) {
        let Some(interval) = self.inner.config.health_check_interval else {
            return;
        };
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = db.health().await {
                    warn!(error = %err, "health check failed, dropping link");
                    inner.mark_lost(epoch).await;
                    break;
                }
            }
        });
        if let Some(previous) = lock(&self.inner.monitor).replace(task) {
            previous.abort();
        }
    }
}

impl Default for SurrealTransport {
    fn default() -> Self {
        Self::new(SurrealTransportConfig::default())
    }
}

impl TransportInner {
    fn set_status(&self, status: TransportStatus) {
        *lock(&self.status) = status;
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn mark_lost(&self, epoch: u64) {
        let mut client = self.client.write().await;
        if !self.is_current(epoch) {
            return;
        }
        client.take();
        lock(&self.live).clear();
        self.set_status(TransportStatus::Disconnected);
        drop(client);
        let _ = self.events.send(TransportEvent::Disconnected);
    }
}

impl Transport for SurrealTransport {
    fn status(&self) -> TransportStatus {
        *lock(&self.inner.status)
    }

    async fn connect(&self, endpoint: &str, params: &ConnectParams) -> TransportResult<()> {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.set_status(TransportStatus::Connecting);

        let connected = async {
            let db = any::connect(endpoint).await?;
            match (&params.namespace, &params.database) {
                (Some(namespace), Some(database)) => {
                    db.use_ns(namespace).use_db(database).await?;
                }
                (Some(namespace), None) => db.use_ns(namespace).await?,
                _ => {}
            }
            Ok::<_, surrealdb::Error>(db)
        }
        .await;

        // Install, status and monitor change only under the client lock.
        let mut client = self.inner.client.write().await;
        if !self.inner.is_current(epoch) {
            debug!(endpoint, "dropping link of a superseded connect");
            return Err(TransportError::Superseded);
        }
        match connected {
            Ok(db) => {
                *client = Some(db.clone());
                self.inner.set_status(TransportStatus::Connected);
                self.spawn_monitor(db, epoch);
                debug!(endpoint, "transport link established");
                Ok(())
            }
            Err(err) => {
                self.inner.set_status(TransportStatus::Disconnected);
                Err(err.into())
            }
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let mut client = self.inner.client.write().await;
        if let Some(monitor) = lock(&self.inner.monitor).take() {
            monitor.abort();
        }
        // Dropping the streams kills their live queries on the server.
        lock(&self.inner.live).clear();
        client.take();
        self.inner.set_status(TransportStatus::Disconnected);
        Ok(())
    }

    async fn query_raw(
        &self,
        text: &str,
        params: Option<Map<String, Value>>,
    ) -> TransportResult<Vec<RawResult>> {
        let db = self.client().await?;
        let mut query = db.query(text);
        if let Some(params) = params {
            query = query.bind(params);
        }

        let started = Instant::now();
        let mut response = query.await?;
        let time = format!("{:?}", started.elapsed());

        let mut errors = response.take_errors();
        let mut results = Vec::with_capacity(response.num_statements());
        for index in 0..response.num_statements() {
            if let Some(err) = errors.remove(&index) {
                results.push(RawResult::err(err.to_string(), time.clone()));
                continue;
            }

            let stream = response.stream::<surrealdb::Value>(index).ok();
            match response.take::<surrealdb::Value>(index) {
                Ok(value) => {
                    let value = value.into_inner().into_json();
                    if let Some(stream) = stream {
                        match value.as_str().and_then(|id| Uuid::parse_str(id).ok()) {
                            Some(id) => {
                                lock(&self.inner.live).pending.insert(id, stream);
                            }
                            None => warn!(index, "live statement returned no query id"),
                        }
                    }
                    results.push(RawResult::ok(value, time.clone()));
                }
                Err(err) => results.push(RawResult::err(err.to_string(), time.clone())),
            }
        }

        Ok(results)
    }

    async fn subscribe_live(&self, id: Uuid, handler: LiveHandler) -> TransportResult<()> {
        let mut live = lock(&self.inner.live);
        let stream = live
            .pending
            .remove(&id)
            .ok_or(TransportError::UnknownLiveQuery(id))?;

        let task = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(notification) = stream.next().await {
                let Notification { action, data, .. } = notification;
                if let Some(action) = map_action(action) {
                    handler(action, data.into_inner().into_json());
                }
            }
            debug!(%id, "live query stream ended");
        });

        if let Some(previous) = live.running.insert(id, task) {
            previous.abort();
        }
        Ok(())
    }

    async fn kill(&self, id: Uuid) -> TransportResult<()> {
        let tracked = {
            let mut live = lock(&self.inner.live);
            let pending = live.pending.remove(&id).is_some();
            let running = live.running.remove(&id).map(|task| task.abort()).is_some();
            pending || running
        };
        if tracked {
            return Ok(());
        }

        let db = self.client().await?;
        db.query("KILL $id").bind(("id", id)).await?.check()?;
        Ok(())
    }

    async fn version(&self) -> TransportResult<String> {
        let db = self.client().await?;
        Ok(db.version().await?.to_string())
    }

    async fn signup(&self, auth: &ScopeAuth) -> TransportResult<()> {
        let db = self.client().await?;
        db.signup(Record {
            namespace: &auth.namespace,
            database: &auth.database,
            access: &auth.scope,
            params: auth.fields.clone(),
        })
        .await?;
        Ok(())
    }

    async fn signin(&self, credentials: &Credentials) -> TransportResult<()> {
        let db = self.client().await?;
        let signed_in = match credentials {
            Credentials::Root { username, password } => db
                .signin(Root { username, password })
                .await
                .map(drop),
            Credentials::Namespace {
                namespace,
                username,
                password,
            } => db
                .signin(Namespace {
                    namespace,
                    username,
                    password,
                })
                .await
                .map(drop),
            Credentials::Database {
                namespace,
                database,
                username,
                password,
            } => db
                .signin(Database {
                    namespace,
                    database,
                    username,
                    password,
                })
                .await
                .map(drop),
            Credentials::Scope(auth) => db
                .signin(Record {
                    namespace: &auth.namespace,
                    database: &auth.database,
                    access: &auth.scope,
                    params: auth.fields.clone(),
                })
                .await
                .map(drop),
            Credentials::Token(token) => db.authenticate(token.clone()).await.map(drop),
        };

        signed_in.map_err(|err| {
            let message = err.to_string();
            if message.contains(NO_RECORD_MESSAGE) {
                TransportError::NoRecord(message)
            } else {
                TransportError::Driver(message)
            }
        })
    }

    async fn authenticate(&self, token: &str) -> TransportResult<()> {
        let db = self.client().await?;
        db.authenticate(token.to_string()).await?;
        Ok(())
    }

    async fn invalidate(&self) -> TransportResult<()> {
        let db = self.client().await?;
        db.invalidate().await?;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}

fn map_action(action: Action) -> Option<LiveAction> {
    match action {
        Action::Create => Some(LiveAction::Create),
        Action::Update => Some(LiveAction::Update),
        Action::Delete => Some(LiveAction::Delete),
        Action::Killed => Some(LiveAction::Killed),
        // `Action` is non-exhaustive.
        #[allow(unreachable_patterns)]
        other => {
            warn!(action = ?other, "skipping live notification with unknown action");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
