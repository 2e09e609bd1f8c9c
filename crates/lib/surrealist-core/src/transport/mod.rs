//! Transport seam between the session and the database driver.
//!
//! The session only talks to the database through [`Transport`]. The
//! `SurrealDB` adapter lives in [`surreal`]; tests provide scripted doubles.

pub mod surreal;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use surrealist_model::{Credentials, LiveAction, ScopeAuth};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use surreal::{SurrealTransport, SurrealTransportConfig};

/// Link state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Events pushed by a transport outside of request/response flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link dropped without a call to [`Transport::close`].
    Disconnected,
}

/// Namespace and database selected right after the link comes up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub namespace: Option<String>,
    pub database: Option<String>,
}

impl ConnectParams {
    /// Builds params from raw option strings, treating blank values as unset.
    #[must_use]
    pub fn new(namespace: &str, database: &str) -> Self {
        let non_blank = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        Self {
            namespace: non_blank(namespace),
            database: non_blank(database),
        }
    }
}

/// Status of a single statement in a raw query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    Ok,
    Err,
}

/// Per statement result as returned by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub status: RawStatus,
    pub result: Value,
    pub time: String,
}

impl RawResult {
    #[must_use]
    pub const fn ok(result: Value, time: String) -> Self {
        Self {
            status: RawStatus::Ok,
            result,
            time,
        }
    }

    #[must_use]
    pub fn err(message: impl Into<String>, time: String) -> Self {
        Self {
            status: RawStatus::Err,
            result: Value::String(message.into()),
            time,
        }
    }
}

/// Callback invoked for every notification of a live query.
pub type LiveHandler = Arc<dyn Fn(LiveAction, Value) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    NotConnected,
    /// Sign-in succeeded at the protocol level but matched no record.
    NoRecord(String),
    UnknownLiveQuery(Uuid),
    /// A later `connect` or `close` ran before this `connect` finished; the
    /// link it opened was dropped.
    Superseded,
    Driver(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to a database"),
            Self::NoRecord(message) => write!(f, "no record was returned: {message}"),
            Self::UnknownLiveQuery(id) => write!(f, "unknown live query: {id}"),
            Self::Superseded => write!(f, "connect superseded by a newer connect or close"),
            Self::Driver(message) => write!(f, "{message}"),
        }
    }
}

impl Error for TransportError {}

pub type TransportResult<T> = Result<T, TransportError>;

/// A single logical connection to a database engine.
///
/// Implementations must be cheap to share: the session holds one instance for
/// its whole lifetime and reconnects it in place.
pub trait Transport: Send + Sync + 'static {
    fn status(&self) -> TransportStatus;

    /// Establishes the link and selects the namespace and database.
    ///
    /// A `connect` overtaken by another `connect` or by `close` must not
    /// install its link and fails with `TransportError::Superseded`.
    fn connect(
        &self,
        endpoint: &str,
        params: &ConnectParams,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn close(&self) -> impl Future<Output = TransportResult<()>> + Send;

    /// Runs a query and returns one result per statement.
    fn query_raw(
        &self,
        text: &str,
        params: Option<Map<String, Value>>,
    ) -> impl Future<Output = TransportResult<Vec<RawResult>>> + Send;

    /// Routes notifications of a live query returned by `query_raw` to `handler`.
    fn subscribe_live(
        &self,
        id: Uuid,
        handler: LiveHandler,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn kill(&self, id: Uuid) -> impl Future<Output = TransportResult<()>> + Send;

    /// Raw server version string, e.g. `surrealdb-2.1.4`.
    fn version(&self) -> impl Future<Output = TransportResult<String>> + Send;

    fn signup(&self, auth: &ScopeAuth) -> impl Future<Output = TransportResult<()>> + Send;

    fn signin(&self, credentials: &Credentials)
    -> impl Future<Output = TransportResult<()>> + Send;

    fn authenticate(&self, token: &str) -> impl Future<Output = TransportResult<()>> + Send;

    fn invalidate(&self) -> impl Future<Output = TransportResult<()>> + Send;

    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_params_skip_blank_values() {
        let params = ConnectParams::new(" test ", "   ");
        assert_eq!(params.namespace.as_deref(), Some("test"));
        assert!(params.database.is_none());
    }
}
