use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use serde_json::{Map, Value};
use surrealist_model::{HistoryEntry, QueryResponse};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Session, TELEMETRY_TARGET};
use crate::store::{Notice, SessionStore};
use crate::surrealql::live_statement_indexes;
use crate::transport::{RawResult, RawStatus, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    NotConnected,
    MissingTab,
    EmptyQuery,
    InvalidVariables(String),
    /// The statement ran and the database reported an error.
    Statement(String),
    EmptyResponse,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "You must be connected to the database"),
            Self::MissingTab => write!(f, "No query tab is selected"),
            Self::EmptyQuery => write!(f, "The query is empty"),
            Self::InvalidVariables(message) => write!(f, "Invalid variables: {message}"),
            Self::Statement(message) => write!(f, "{message}"),
            Self::EmptyResponse => write!(f, "The query returned no results"),
        }
    }
}

impl Error for QueryError {}

/// Options for [`Session::execute_user_query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQueryOptions {
    /// Runs this text instead of the active tab's query.
    pub override_query: Option<String>,
    /// Shows the busy indicator while the query runs.
    pub loader: bool,
}

impl UserQueryOptions {
    #[must_use]
    pub fn with_override(mut self, query: impl Into<String>) -> Self {
        self.override_query = Some(query.into());
        self
    }

    #[must_use]
    pub const fn with_loader(mut self, loader: bool) -> Self {
        self.loader = loader;
        self
    }
}

/// Holds the store's busy flag until dropped.
struct BusyGuard<'a> {
    store: Option<&'a dyn SessionStore>,
}

impl<'a> BusyGuard<'a> {
    fn hold(store: &'a dyn SessionStore, enabled: bool) -> Self {
        if enabled {
            store.set_query_active(true);
        }
        Self {
            store: enabled.then_some(store),
        }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.store {
            store.set_query_active(false);
        }
    }
}

impl<T: Transport> Session<T> {
    /// Runs `text` and returns one response per statement.
    ///
    /// Never fails: a transport error becomes a single failed response.
    pub async fn execute_query(
        &self,
        text: &str,
        params: Option<Map<String, Value>>,
    ) -> Vec<QueryResponse> {
        match self.inner.transport.query_raw(text, params).await {
            Ok(results) => results.into_iter().map(map_result).collect(),
            Err(err) => {
                debug!(error = %err, "query failed before execution");
                vec![QueryResponse::err(err.to_string(), String::new())]
            }
        }
    }

    /// Runs `text` and returns the result of its first statement.
    ///
    /// # Errors
    /// Returns `QueryError::Statement` if the first statement failed and
    /// `QueryError::EmptyResponse` if there were no statements.
    pub async fn execute_query_first(
        &self,
        text: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Value, QueryError> {
        let first = self
            .execute_query(text, params)
            .await
            .into_iter()
            .next()
            .ok_or(QueryError::EmptyResponse)?;

        if first.success {
            Ok(first.result)
        } else {
            Err(QueryError::Statement(first.message()))
        }
    }

    /// Like [`Self::execute_query_first`], unwrapping the first element of a
    /// sequence result. An empty sequence yields `null`.
    ///
    /// # Errors
    /// Same as [`Self::execute_query_first`].
    pub async fn execute_query_single(
        &self,
        text: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Value, QueryError> {
        match self.execute_query_first(text, params).await? {
            Value::Array(items) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
            other => Ok(other),
        }
    }

    /// Runs the active tab's query the way the editor does.
    ///
    /// Replaces the tab's live queries with the ones started by this query,
    /// stores the response on the tab and records a history entry. Calls that
    /// fail a precondition show a notice and leave no history.
    ///
    /// # Errors
    /// Returns the failed precondition.
    pub async fn execute_user_query(
        &self,
        options: UserQueryOptions,
    ) -> Result<Vec<QueryResponse>, QueryError> {
        let store = self.inner.store.clone();

        let Some(connection) = store.active_connection().filter(|_| store.is_connected()) else {
            return Err(self.reject(QueryError::NotConnected));
        };
        let Some(tab) = store.active_tab() else {
            return Err(self.reject(QueryError::MissingTab));
        };

        let query = options
            .override_query
            .as_deref()
            .unwrap_or(tab.query.as_str())
            .trim()
            .to_string();
        if query.is_empty() {
            return Err(self.reject(QueryError::EmptyQuery));
        }
        let params = parse_variables(&tab.variables).map_err(|err| self.reject(err))?;

        let live_indexes = live_statement_indexes(&query).unwrap_or_else(|err| {
            warn!(error = %err, "failed to scan query for live statements");
            Vec::new()
        });
        if !live_indexes.is_empty() && !connection.protocol.supports_live() {
            self.inner.interface.notify(Notice::warning(
                "Live queries unsupported",
                "Live queries are not supported by the active connection protocol",
            ));
        }

        let response = {
            let _busy = BusyGuard::hold(store.as_ref(), options.loader);

            self.cancel_live_queries(&tab.id).await;
            store.clear_live_messages(&tab.id);

            let timestamp = now_ms();
            let response = self.execute_query(&query, params).await;

            let live_ids: HashSet<Uuid> = live_indexes
                .iter()
                .filter_map(|&index| response.get(index))
                .filter(|entry| entry.success)
                .filter_map(|entry| entry.result.as_str())
                .filter_map(|id| Uuid::parse_str(id).ok())
                .collect();
            let live_count = live_ids.len();

            // An overlapping run on the same tab may have installed its set
            // in the meantime.
            let displaced = self
                .inner
                .live
                .replace(&tab.id, live_ids.clone(), store.as_ref());
            self.kill_live_queries(&tab.id, displaced).await;
            for id in live_ids {
                let handler = self.inner.live.handler(&tab.id, id, store.clone(), timestamp);
                if let Err(err) = self.inner.transport.subscribe_live(id, handler).await {
                    warn!(%id, error = %err, "failed to subscribe to live query");
                }
                if !self.inner.live.is_active(&tab.id, id) {
                    self.kill_live_queries(&tab.id, [id]).await;
                }
            }

            store.set_query_response(&tab.id, response.clone());
            info!(
                target: TELEMETRY_TARGET,
                event = "query_execute",
                statements = response.len(),
                live = live_count
            );
            response
        };

        store.add_history_entry(HistoryEntry {
            id: Uuid::new_v4().to_string(),
            query,
            timestamp: now_ms(),
            origin: tab.name,
        });

        Ok(response)
    }

    /// Kills the tab's live queries and clears its live flag.
    ///
    /// Kill failures are logged; the queries are forgotten either way.
    pub async fn cancel_live_queries(&self, tab: &str) {
        let ids = self.inner.live.take(tab);
        self.kill_live_queries(tab, ids).await;
        self.inner.store.set_live(tab, false);
    }

    async fn kill_live_queries(&self, tab: &str, ids: impl IntoIterator<Item = Uuid>) {
        for id in ids {
            if let Err(err) = self.inner.transport.kill(id).await {
                warn!(tab, %id, error = %err, "failed to kill live query");
            }
        }
    }

    fn reject(&self, err: QueryError) -> QueryError {
        let notice = match &err {
            QueryError::InvalidVariables(message) => Notice::error("Invalid variables", message),
            other => Notice::error("Failed to execute", other.to_string()),
        };
        self.inner.interface.notify(notice);
        err
    }
}

fn map_result(raw: RawResult) -> QueryResponse {
    match raw.status {
        RawStatus::Ok => QueryResponse::ok(raw.result, raw.time),
        RawStatus::Err => QueryResponse {
            success: false,
            result: raw.result,
            execution_time: raw.time,
        },
    }
}

/// Parses the tab's variables. Blank text means no variables.
fn parse_variables(text: &str) -> Result<Option<Map<String, Value>>, QueryError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(QueryError::InvalidVariables(
            "variables must be a JSON object".to_string(),
        )),
        Err(err) => Err(QueryError::InvalidVariables(err.to_string())),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
