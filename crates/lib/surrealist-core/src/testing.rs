//! Scripted doubles for the session tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use surrealist_model::{Credentials, LiveAction, ScopeAuth};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::store::{Interface, Notice};
use crate::transport::{
    ConnectParams,
    LiveHandler,
    RawResult,
    Transport,
    TransportError,
    TransportEvent,
    TransportResult,
    TransportStatus,
};

/// A scripted answer, optionally held back until its sender fires.
enum Step<T> {
    Ready(T),
    Gated(oneshot::Receiver<()>, T),
}

impl<T> Step<T> {
    async fn resolve(self) -> T {
        match self {
            Self::Ready(result) => result,
            Self::Gated(gate, result) => {
                let _ = gate.await;
                result
            }
        }
    }
}

struct MockState {
    status: TransportStatus,
    epoch: u64,
    connects: VecDeque<Step<TransportResult<()>>>,
    version: TransportResult<String>,
    queries: VecDeque<Step<TransportResult<Vec<RawResult>>>>,
    last_params: Option<Map<String, Value>>,
    signin_error: Option<TransportError>,
    authenticate_error: Option<TransportError>,
    signup_error: Option<TransportError>,
    handlers: HashMap<Uuid, LiveHandler>,
    calls: Vec<String>,
}

/// Transport double with scripted answers and a call log.
///
/// Unscripted calls succeed. `version` fails unless connected. A connect
/// overtaken by another connect or a close resolves to `Superseded`.
pub struct MockTransport {
    state: Mutex<MockState>,
    connect_count: AtomicUsize,
    events: broadcast::Sender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            state: Mutex::new(MockState {
                status: TransportStatus::Disconnected,
                epoch: 0,
                connects: VecDeque::new(),
                version: Ok("surrealdb-2.1.0".to_string()),
                queries: VecDeque::new(),
                last_params: None,
                signin_error: None,
                authenticate_error: None,
                signup_error: None,
                handlers: HashMap::new(),
                calls: Vec::new(),
            }),
            connect_count: AtomicUsize::new(0),
            events,
        }
    }

    /// Queues a connect that resolves to `result` once the sender fires.
    pub fn gate_connect(&self, result: TransportResult<()>) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.state()
            .connects
            .push_back(Step::Gated(gate, result));
        release
    }

    pub fn push_connect(&self, result: TransportResult<()>) {
        self.state().connects.push_back(Step::Ready(result));
    }

    pub fn set_version(&self, version: TransportResult<String>) {
        self.state().version = version;
    }

    pub fn push_query(&self, result: TransportResult<Vec<RawResult>>) {
        self.state().queries.push_back(Step::Ready(result));
    }

    /// Queues a query answer that is held back until the sender fires.
    pub fn gate_query(&self, result: TransportResult<Vec<RawResult>>) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.state().queries.push_back(Step::Gated(gate, result));
        release
    }

    pub fn fail_signin(&self, err: TransportError) {
        self.state().signin_error = Some(err);
    }

    pub fn fail_signup(&self, err: TransportError) {
        self.state().signup_error = Some(err);
    }

    pub fn fail_authenticate(&self, err: TransportError) {
        self.state().authenticate_error = Some(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<Map<String, Value>> {
        self.state().last_params.clone()
    }

    /// Drops the link as if the server went away.
    pub fn drop_link(&self) {
        {
            let mut state = self.state();
            state.status = TransportStatus::Disconnected;
            state.handlers.clear();
        }
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Pushes a notification to a subscribed live query.
    pub fn emit(&self, id: Uuid, action: LiveAction, data: Value) -> bool {
        let handler = self.state().handlers.get(&id).cloned();
        handler.is_some_and(|handler| {
            handler(action, data);
            true
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: impl Into<String>) {
        self.state().calls.push(call.into());
    }

    fn scripted(&self, call: &str, error: Option<TransportError>) -> TransportResult<()> {
        self.record(call);
        error.map_or(Ok(()), Err)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn status(&self) -> TransportStatus {
        self.state().status
    }

    async fn connect(&self, _endpoint: &str, _params: &ConnectParams) -> TransportResult<()> {
        let (step, epoch) = {
            let mut state = self.state();
            state.calls.push("connect".to_string());
            state.status = TransportStatus::Connecting;
            state.epoch += 1;
            (state.connects.pop_front(), state.epoch)
        };
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        let result = match step {
            None => Ok(()),
            Some(step) => step.resolve().await,
        };

        let mut state = self.state();
        if state.epoch != epoch {
            state.calls.push("connect-dropped".to_string());
            return Err(TransportError::Superseded);
        }
        state.status = if result.is_ok() {
            TransportStatus::Connected
        } else {
            TransportStatus::Disconnected
        };
        result
    }

    async fn close(&self) -> TransportResult<()> {
        let mut state = self.state();
        state.calls.push("close".to_string());
        state.epoch += 1;
        state.status = TransportStatus::Disconnected;
        state.handlers.clear();
        Ok(())
    }

    async fn query_raw(
        &self,
        text: &str,
        params: Option<Map<String, Value>>,
    ) -> TransportResult<Vec<RawResult>> {
        let step = {
            let mut state = self.state();
            state.calls.push(format!("query:{text}"));
            state.last_params = params;
            state.queries.pop_front()
        };
        match step {
            Some(step) => step.resolve().await,
            None => Ok(vec![RawResult::ok(Value::Array(Vec::new()), String::new())]),
        }
    }

    async fn subscribe_live(&self, id: Uuid, handler: LiveHandler) -> TransportResult<()> {
        let mut state = self.state();
        state.calls.push(format!("subscribe:{id}"));
        state.handlers.insert(id, handler);
        Ok(())
    }

    async fn kill(&self, id: Uuid) -> TransportResult<()> {
        let mut state = self.state();
        state.calls.push(format!("kill:{id}"));
        state
            .handlers
            .remove(&id)
            .map(|_| ())
            .ok_or(TransportError::UnknownLiveQuery(id))
    }

    async fn version(&self) -> TransportResult<String> {
        let state = self.state();
        if state.status == TransportStatus::Connected {
            state.version.clone()
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn signup(&self, _auth: &ScopeAuth) -> TransportResult<()> {
        let error = self.state().signup_error.clone();
        self.scripted("signup", error)
    }

    async fn signin(&self, _credentials: &Credentials) -> TransportResult<()> {
        let error = self.state().signin_error.clone();
        self.scripted("signin", error)
    }

    async fn authenticate(&self, _token: &str) -> TransportResult<()> {
        let error = self.state().authenticate_error.clone();
        self.scripted("authenticate", error)
    }

    async fn invalidate(&self) -> TransportResult<()> {
        self.scripted("invalidate", None)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// Interface double recording everything shown to the user.
#[derive(Default)]
pub struct RecordingInterface {
    notices: Mutex<Vec<Notice>>,
    signup_requests: AtomicUsize,
    schema_syncs: AtomicUsize,
}

impl RecordingInterface {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn signup_requests(&self) -> usize {
        self.signup_requests.load(Ordering::SeqCst)
    }

    pub fn schema_syncs(&self) -> usize {
        self.schema_syncs.load(Ordering::SeqCst)
    }
}

impl Interface for RecordingInterface {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }

    fn open_scope_signup(&self) {
        self.signup_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn sync_schema(&self) {
        self.schema_syncs.fetch_add(1, Ordering::SeqCst);
    }
}
