use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{AuthMode, ConnectionOptions};

/// Record access credentials used for scope sign-in and sign-up.
///
/// The user defined scope fields are flattened next to the fixed keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeAuth {
    pub namespace: String,
    pub database: String,
    pub scope: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Authentication payload derived from a connection's auth mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Credentials {
    Root {
        username: String,
        password: String,
    },
    Namespace {
        namespace: String,
        username: String,
        password: String,
    },
    Database {
        namespace: String,
        database: String,
        username: String,
        password: String,
    },
    Scope(ScopeAuth),
    Token(String),
}

/// Builds the authentication payload for the connection's auth mode.
///
/// Returns `None` when the connection does not authenticate, which callers
/// treat as a request to invalidate the current session. The signup mode maps
/// to the same scope payload; whether to sign up or sign in is decided by the
/// caller.
#[must_use]
pub fn compose_authentication(connection: &ConnectionOptions) -> Option<Credentials> {
    let ConnectionOptions {
        auth_mode,
        username,
        password,
        namespace,
        database,
        token,
        ..
    } = connection;

    match auth_mode {
        AuthMode::None => None,
        AuthMode::Root => Some(Credentials::Root {
            username: username.clone(),
            password: password.clone(),
        }),
        AuthMode::Namespace => Some(Credentials::Namespace {
            namespace: namespace.clone(),
            username: username.clone(),
            password: password.clone(),
        }),
        AuthMode::Database => Some(Credentials::Database {
            namespace: namespace.clone(),
            database: database.clone(),
            username: username.clone(),
            password: password.clone(),
        }),
        AuthMode::Scope | AuthMode::ScopeSignup => {
            Some(Credentials::Scope(build_scope_auth(connection)))
        }
        AuthMode::Token => Some(Credentials::Token(token.clone().unwrap_or_default())),
    }
}

/// Collects the scope credentials and user fields of a connection.
///
/// Fields with a blank subject are skipped; later subjects overwrite earlier
/// ones.
#[must_use]
pub fn build_scope_auth(connection: &ConnectionOptions) -> ScopeAuth {
    let fields = connection
        .scope_fields
        .iter()
        .filter(|field| !field.subject.trim().is_empty())
        .map(|field| (field.subject.clone(), Value::String(field.value.clone())))
        .collect();

    ScopeAuth {
        namespace: connection.namespace.clone(),
        database: connection.database.clone(),
        scope: connection.scope.clone(),
        fields,
    }
}
