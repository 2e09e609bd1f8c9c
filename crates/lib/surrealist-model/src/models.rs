use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire protocol used to reach the database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    #[default]
    Ws,
    Wss,
    Mem,
    #[serde(rename = "indxdb")]
    IndxDb,
}

impl Protocol {
    /// Whether the protocol can deliver live query notifications.
    #[must_use]
    pub const fn supports_live(self) -> bool {
        matches!(self, Self::Ws | Self::Wss | Self::Mem | Self::IndxDb)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Ws => "ws",
            Self::Wss => "wss",
            Self::Mem => "mem",
            Self::IndxDb => "indxdb",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication strategy selected for a connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    Root,
    Namespace,
    Database,
    Scope,
    ScopeSignup,
    Token,
}

/// A user supplied field sent along with scope authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeField {
    pub subject: String,
    pub value: String,
}

/// Connection details stored by the UI for a connection tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope_fields: Vec<ScopeField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ConnectionOptions {
    /// Endpoint URI handed to the transport.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match self.protocol {
            Protocol::Mem => "mem://".to_string(),
            protocol => format!("{protocol}://{}", self.hostname.trim()),
        }
    }
}

/// Editor tab holding a query, its variables, and the last response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryTab {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub variables: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<QueryResponse>,
}

impl QueryTab {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_variables(mut self, variables: impl Into<String>) -> Self {
        self.variables = variables.into();
        self
    }
}

/// Outcome of a single statement. On failure `result` holds the error message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub success: bool,
    pub result: Value,
    pub execution_time: String,
}

impl QueryResponse {
    #[must_use]
    pub const fn ok(result: Value, execution_time: String) -> Self {
        Self {
            success: true,
            result,
            execution_time,
        }
    }

    #[must_use]
    pub fn err(message: impl Into<String>, execution_time: String) -> Self {
        Self {
            success: false,
            result: Value::String(message.into()),
            execution_time,
        }
    }

    /// Error message carried by a failed response.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.result {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Kind of change reported by a live query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiveAction {
    Create,
    Update,
    Delete,
    Killed,
}

impl fmt::Display for LiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Killed => "KILLED",
        })
    }
}

/// A push notification received for a live query, as stored in a tab's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessage {
    pub id: String,
    pub query_id: String,
    pub action: LiveAction,
    pub data: Value,
    pub timestamp: i64,
}

/// A query attempt recorded in the history pane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub query: String,
    pub timestamp: i64,
    pub origin: String,
}
