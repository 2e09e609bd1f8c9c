use clap::Parser;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use surrealist_model::{AuthMode, ConnectionOptions, Protocol, ScopeField};

const DEFAULT_PROTOCOL: &str = "ws";
const DEFAULT_HOST: &str = "localhost:8000";
const DEFAULT_AUTH_MODE: &str = "none";
const DEFAULT_HEALTH_CHECK_SECS: u64 = 30;
const DEFAULT_VERSION_TIMEOUT_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(
    name = "surrealist",
    version,
    about = "Run a SurrealQL query against a SurrealDB server."
)]
struct CliArgs {
    /// Query text. Use `--file` to read it from disk instead.
    query: Option<String>,

    #[arg(long, env = "SURREALIST_QUERY_FILE", conflicts_with = "query")]
    file: Option<PathBuf>,

    #[arg(long, env = "SURREALIST_PROTOCOL", default_value = DEFAULT_PROTOCOL)]
    protocol: String,

    #[arg(long, env = "SURREALIST_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long = "ns", env = "SURREALIST_NAMESPACE", default_value = "")]
    namespace: String,

    #[arg(long = "db", env = "SURREALIST_DATABASE", default_value = "")]
    database: String,

    #[arg(long, env = "SURREALIST_AUTH_MODE", default_value = DEFAULT_AUTH_MODE)]
    auth_mode: String,

    #[arg(long, env = "SURREALIST_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "SURREALIST_PASSWORD")]
    password: Option<String>,

    #[arg(long, env = "SURREALIST_SCOPE")]
    scope: Option<String>,

    /// Extra scope field as `name=value`. May be repeated.
    #[arg(long = "scope-field", env = "SURREALIST_SCOPE_FIELDS", value_delimiter = ',')]
    scope_fields: Vec<String>,

    #[arg(long, env = "SURREALIST_TOKEN")]
    token: Option<String>,

    /// Query variables as a JSON object.
    #[arg(long, env = "SURREALIST_VARIABLES")]
    variables: Option<String>,

    /// Keeps printing live query messages for this many seconds.
    #[arg(long, env = "SURREALIST_WATCH_SECS", default_value_t = 0)]
    watch_secs: u64,

    /// Zero disables the periodic health check.
    #[arg(
        long,
        env = "SURREALIST_HEALTH_CHECK_SECS",
        default_value_t = DEFAULT_HEALTH_CHECK_SECS
    )]
    health_check_secs: u64,

    #[arg(
        long,
        env = "SURREALIST_VERSION_TIMEOUT_SECS",
        default_value_t = DEFAULT_VERSION_TIMEOUT_SECS
    )]
    version_timeout_secs: u64,
}

/// Runtime configuration loaded from CLI arguments and environment variables.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub connection: ConnectionOptions,
    pub query: String,
    pub variables: String,
    pub watch: Option<Duration>,
    pub health_check_interval: Option<Duration>,
    pub version_check_timeout: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingSetting(&'static str),
    InvalidSetting { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSetting(name) => write!(f, "missing required setting: {name}"),
            Self::InvalidSetting { name, value } => {
                write!(f, "invalid {name} value: {value}")
            }
        }
    }
}

impl Error for ConfigError {}

impl CliConfig {
    pub fn from_args() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        Self::try_from(args)
    }
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let protocol: Protocol = parse_keyword(&args.protocol).ok_or_else(|| {
            ConfigError::InvalidSetting {
                name: "SURREALIST_PROTOCOL",
                value: args.protocol.clone(),
            }
        })?;
        let auth_mode: AuthMode = parse_keyword(&args.auth_mode).ok_or_else(|| {
            ConfigError::InvalidSetting {
                name: "SURREALIST_AUTH_MODE",
                value: args.auth_mode.clone(),
            }
        })?;

        if protocol != Protocol::Mem && args.host.trim().is_empty() {
            return Err(ConfigError::MissingSetting("SURREALIST_HOST"));
        }

        let username = args.username.unwrap_or_default();
        let password = args.password.unwrap_or_default();
        let token = args.token.filter(|value| !value.trim().is_empty());

        match auth_mode {
            AuthMode::Root | AuthMode::Namespace | AuthMode::Database => {
                if username.trim().is_empty() {
                    return Err(ConfigError::MissingSetting("SURREALIST_USERNAME"));
                }
            }
            AuthMode::Scope | AuthMode::ScopeSignup => {
                if args.scope.as_deref().is_none_or(|scope| scope.trim().is_empty()) {
                    return Err(ConfigError::MissingSetting("SURREALIST_SCOPE"));
                }
            }
            AuthMode::Token => {
                if token.is_none() {
                    return Err(ConfigError::MissingSetting("SURREALIST_TOKEN"));
                }
            }
            AuthMode::None => {}
        }
        if matches!(auth_mode, AuthMode::Namespace | AuthMode::Database)
            && args.namespace.trim().is_empty()
        {
            return Err(ConfigError::MissingSetting("SURREALIST_NAMESPACE"));
        }

        let scope_fields = args
            .scope_fields
            .iter()
            .map(|field| parse_scope_field(field))
            .collect::<Result<Vec<_>, _>>()?;

        let query = match (args.query, args.file) {
            (Some(query), _) => query,
            (None, Some(path)) => {
                std::fs::read_to_string(&path).map_err(|err| ConfigError::InvalidSetting {
                    name: "SURREALIST_QUERY_FILE",
                    value: format!("{}: {err}", path.display()),
                })?
            }
            (None, None) => return Err(ConfigError::MissingSetting("SURREALIST_QUERY")),
        };

        Ok(Self {
            connection: ConnectionOptions {
                protocol,
                hostname: args.host,
                namespace: args.namespace,
                database: args.database,
                auth_mode,
                username,
                password,
                scope: args.scope.unwrap_or_default(),
                scope_fields,
                token,
            },
            query,
            variables: args.variables.unwrap_or_default(),
            watch: (args.watch_secs > 0).then(|| Duration::from_secs(args.watch_secs)),
            health_check_interval: (args.health_check_secs > 0)
                .then(|| Duration::from_secs(args.health_check_secs)),
            version_check_timeout: Duration::from_secs(args.version_timeout_secs),
        })
    }
}

/// Reads a lowercase keyword through the model's serde names.
fn parse_keyword<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase())).ok()
}

fn parse_scope_field(raw: &str) -> Result<ScopeField, ConfigError> {
    match raw.split_once('=') {
        Some((subject, value)) if !subject.trim().is_empty() => Ok(ScopeField {
            subject: subject.trim().to_string(),
            value: value.to_string(),
        }),
        _ => Err(ConfigError::InvalidSetting {
            name: "SURREALIST_SCOPE_FIELDS",
            value: raw.to_string(),
        }),
    }
}
