use std::error::Error;
use std::fmt;
use std::sync::atomic::Ordering;

use surrealist_model::{
    AuthMode,
    ConnectionOptions,
    Credentials,
    ScopeAuth,
    build_scope_auth,
    compose_authentication,
};
use tracing::{debug, info, warn};

use super::{AttemptToken, Session, SessionError, SessionEvent, TELEMETRY_TARGET};
use crate::store::Notice;
use crate::transport::{ConnectParams, Transport, TransportError, TransportStatus};
use crate::version::{ServerVersion, SupportedVersions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    SignupFailed,
    InvalidToken,
    SigninFailed(String),
    /// Sign-in matched no record; the user has to sign up first.
    SignupRequired,
    Invalidate(TransportError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignupFailed => write!(f, "Could not sign up"),
            Self::InvalidToken => write!(f, "Authentication token invalid"),
            Self::SigninFailed(message) => write!(f, "Connection failed: {message}"),
            Self::SignupRequired => write!(f, "No record was returned, sign up required"),
            Self::Invalidate(err) => write!(f, "Could not invalidate session: {err}"),
        }
    }
}

impl Error for AuthError {}

/// Why a connect attempt failed, one variant per user facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectError {
    Transport(TransportError),
    VersionRetrieval(String),
    UnsupportedVersion {
        version: ServerVersion,
        supported: SupportedVersions,
    },
    Authentication(AuthError),
    /// A newer `open_connection` or `close_connection` took over.
    Superseded,
}

impl ConnectError {
    /// The failure notice shown to the user, if any.
    fn into_notice(self) -> Option<Notice> {
        let notice = match self {
            Self::VersionRetrieval(message) => Notice::error(
                "Failed to retrieve version",
                format!("Could not determine the database version: {message}"),
            ),
            Self::UnsupportedVersion { version, supported } => Notice::error(
                "Unsupported version",
                format!(
                    "The server is running an unsupported version of SurrealDB ({version}). \
                     Supported versions are {supported}"
                ),
            ),
            Self::Authentication(err) => {
                Notice::error("Failed to connect", format!("Authentication failed: {err}"))
            }
            Self::Transport(err) => Notice::error("Failed to connect", err.to_string()),
            Self::Superseded => return None,
        };
        Some(notice)
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::VersionRetrieval(message) => {
                write!(f, "failed to retrieve database version: {message}")
            }
            Self::UnsupportedVersion { version, supported } => {
                write!(f, "unsupported database version {version} (supported {supported})")
            }
            Self::Authentication(err) => write!(f, "authentication failed: {err}"),
            Self::Superseded => write!(f, "superseded by a newer connection attempt"),
        }
    }
}

/// How far a successful connect attempt got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Established {
    Ready,
    /// Linked, but the scope credentials matched no record.
    SignupRequired,
}

impl<T: Transport> Session<T> {
    /// Opens a connection with `options`, or with the store's active
    /// connection when `None`.
    ///
    /// Connect failures are reported through the interface, not returned.
    /// An attempt superseded by a later call stops at its next step and its
    /// results are discarded. Scope credentials that match no record leave the
    /// link open and start the signup flow.
    ///
    /// # Errors
    /// Returns `SessionError::NoConnectionAvailable` if no options are given
    /// and the store has no active connection.
    pub async fn open_connection(
        &self,
        options: Option<ConnectionOptions>,
    ) -> Result<(), SessionError> {
        let connection = options
            .or_else(|| self.inner.store.active_connection())
            .ok_or(SessionError::NoConnectionAvailable)?;

        let attempt = self.begin_attempt();
        let endpoint = connection.endpoint();

        self.close_connection().await;
        if !attempt.is_current() {
            debug!(
                generation = attempt.generation(),
                "connection attempt superseded while closing"
            );
            return Ok(());
        }

        info!(%endpoint, generation = attempt.generation(), "opening connection");

        let store = self.inner.store.as_ref();
        store.set_connecting(true);
        store.set_connected(false);

        let outcome = self.establish(&attempt, &endpoint, &connection).await;

        if !attempt.is_current() {
            debug!(
                generation = attempt.generation(),
                "discarding result of superseded connection attempt"
            );
            return Ok(());
        }

        match outcome {
            Ok(established) => {
                store.set_connecting(false);
                store.set_connected(true);
                let signup_required = established == Established::SignupRequired;
                self.inner
                    .signup_pending
                    .store(signup_required, Ordering::SeqCst);
                if signup_required {
                    info!("scope credentials matched no record, opening signup");
                    self.inner.interface.open_scope_signup();
                }
                self.inner.interface.sync_schema();
                let _ = self.inner.events.send(SessionEvent::Connected);
                info!(
                    target: TELEMETRY_TARGET,
                    event = "connection_open",
                    protocol = %connection.protocol
                );
                info!(%endpoint, "connection established");
            }
            Err(err) => self.fail_attempt(&attempt, err).await,
        }

        self.record_version(&attempt).await;
        Ok(())
    }

    /// Closes the transport if it is connected or connecting.
    ///
    /// Waits the configured settle delay after closing so the driver can
    /// release the link before a reconnect. Calling it on a closed session is
    /// a no-op.
    pub async fn close_connection(&self) {
        let transport = &self.inner.transport;
        if !matches!(
            transport.status(),
            TransportStatus::Connected | TransportStatus::Connecting
        ) {
            return;
        }

        if let Err(err) = transport.close().await {
            warn!(error = %err, "failed to close transport cleanly");
        }
        self.mark_disconnected();
        tokio::time::sleep(self.inner.config.settle_delay).await;
    }

    /// Signs in with `auth`, or invalidates the session when `None`.
    ///
    /// A sign-in that matches no record opens the scope signup flow.
    ///
    /// # Errors
    /// Returns `AuthError` describing the failed step.
    pub async fn authenticate(&self, auth: Option<Credentials>) -> Result<(), AuthError> {
        let result = self.apply_auth(auth).await;
        match result {
            Ok(()) => self.inner.signup_pending.store(false, Ordering::SeqCst),
            Err(AuthError::SignupRequired) => {
                self.inner.signup_pending.store(true, Ordering::SeqCst);
                self.inner.interface.open_scope_signup();
            }
            Err(_) => {}
        }
        result
    }

    /// Registers a new scope user on the current connection.
    ///
    /// # Errors
    /// Returns `AuthError::SignupFailed` if the server rejects the signup.
    pub async fn register(&self, auth: &ScopeAuth) -> Result<(), AuthError> {
        self.inner.transport.signup(auth).await.map_err(|err| {
            debug!(error = %err, "scope signup rejected");
            AuthError::SignupFailed
        })?;
        self.inner.signup_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Connects, checks the version and signs in, stopping as soon as the
    /// attempt is no longer current.
    async fn establish(
        &self,
        attempt: &AttemptToken,
        endpoint: &str,
        connection: &ConnectionOptions,
    ) -> Result<Established, ConnectError> {
        ensure_current(attempt)?;
        let params = ConnectParams::new(&connection.namespace, &connection.database);
        self.inner
            .transport
            .connect(endpoint, &params)
            .await
            .map_err(|err| match err {
                TransportError::Superseded => ConnectError::Superseded,
                err => ConnectError::Transport(err),
            })?;

        ensure_current(attempt)?;
        let version = self.negotiate_version().await?;
        debug!(%version, "server version accepted");

        ensure_current(attempt)?;
        match self.prepare(connection).await {
            Ok(()) => Ok(Established::Ready),
            Err(AuthError::SignupRequired) => Ok(Established::SignupRequired),
            Err(err) => Err(ConnectError::Authentication(err)),
        }
    }

    async fn negotiate_version(&self) -> Result<ServerVersion, ConnectError> {
        let timeout = self.inner.config.version_check_timeout;
        let raw = match tokio::time::timeout(timeout, self.inner.transport.version()).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => return Err(ConnectError::VersionRetrieval(err.to_string())),
            Err(_) => {
                return Err(ConnectError::VersionRetrieval(format!(
                    "no answer within {}s",
                    timeout.as_secs_f32()
                )));
            }
        };

        let version = ServerVersion::parse(&raw)
            .map_err(|err| ConnectError::VersionRetrieval(err.to_string()))?;
        let supported = self.inner.config.supported_versions;
        if !supported.contains(&version) {
            return Err(ConnectError::UnsupportedVersion { version, supported });
        }
        Ok(version)
    }

    /// Runs once the link is up and before the connection is reported ready.
    async fn prepare(&self, connection: &ConnectionOptions) -> Result<(), AuthError> {
        if connection.auth_mode == AuthMode::ScopeSignup {
            self.register(&build_scope_auth(connection)).await
        } else {
            self.apply_auth(compose_authentication(connection)).await
        }
    }

    async fn apply_auth(&self, auth: Option<Credentials>) -> Result<(), AuthError> {
        let transport = &self.inner.transport;
        match auth {
            None => transport.invalidate().await.map_err(AuthError::Invalidate),
            Some(Credentials::Token(token)) => {
                transport.authenticate(&token).await.map_err(|err| {
                    debug!(error = %err, "token authentication rejected");
                    AuthError::InvalidToken
                })
            }
            Some(credentials) => match transport.signin(&credentials).await {
                Ok(()) => Ok(()),
                Err(TransportError::NoRecord(_)) => Err(AuthError::SignupRequired),
                Err(err) => Err(AuthError::SigninFailed(err.to_string())),
            },
        }
    }

    async fn fail_attempt(&self, attempt: &AttemptToken, err: ConnectError) {
        // The link may already belong to a newer attempt.
        if !attempt.is_current() || err == ConnectError::Superseded {
            debug!(generation = attempt.generation(), "connection attempt superseded");
            return;
        }
        warn!(error = %err, generation = attempt.generation(), "connection attempt failed");

        if let Err(close_err) = self.inner.transport.close().await {
            debug!(error = %close_err, "failed to close transport after connect failure");
        }
        if !attempt.is_current() {
            return;
        }

        let store = self.inner.store.as_ref();
        store.set_connecting(false);
        store.set_connected(false);

        if let Some(notice) = err.into_notice() {
            self.inner.interface.notify(notice);
        }
    }

    /// Best-effort: stores the server version if the attempt is still current.
    async fn record_version(&self, attempt: &AttemptToken) {
        if !attempt.is_current() {
            return;
        }
        let timeout = self.inner.config.version_check_timeout;
        match tokio::time::timeout(timeout, self.inner.transport.version()).await {
            Ok(Ok(raw)) if attempt.is_current() => {
                let version = ServerVersion::parse(&raw)
                    .map_or_else(|_| raw.clone(), |version| version.to_string());
                info!(%version, "database version");
                self.inner.store.set_version(version);
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(error = %err, "could not query database version"),
            Err(_) => debug!("database version query timed out"),
        }
    }
}

fn ensure_current(attempt: &AttemptToken) -> Result<(), ConnectError> {
    if attempt.is_current() {
        Ok(())
    } else {
        Err(ConnectError::Superseded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use surrealist_model::{AuthMode, ConnectionOptions, Protocol};

    use super::*;
    use crate::session::SessionConfig;
    use crate::store::{MemoryStore, NoticeLevel, SessionStore};
    use crate::testing::{MockTransport, RecordingInterface};

    fn options(auth_mode: AuthMode) -> ConnectionOptions {
        ConnectionOptions {
            protocol: Protocol::Ws,
            hostname: "localhost:8000".to_string(),
            namespace: "test".to_string(),
            database: "test".to_string(),
            auth_mode,
            username: "root".to_string(),
            password: "root".to_string(),
            token: Some("token".to_string()),
            ..ConnectionOptions::default()
        }
    }

    fn session(
        transport: MockTransport,
    ) -> (Session<MockTransport>, Arc<MemoryStore>, Arc<RecordingInterface>) {
        let store = Arc::new(MemoryStore::new().with_connection(options(AuthMode::Root)));
        let interface = Arc::new(RecordingInterface::default());
        let config = SessionConfig::new().with_settle_delay(Duration::ZERO);
        let session = Session::with_config(transport, store.clone(), interface.clone(), config);
        (session, store, interface)
    }

    #[tokio::test]
    async fn open_marks_connected_and_records_version() {
        let (session, store, interface) = session(MockTransport::new());
        let mut events = session.subscribe();

        session.open_connection(None).await.unwrap();

        assert!(store.is_connected());
        assert!(!store.is_connecting());
        assert_eq!(store.version(), "2.1.0");
        assert_eq!(interface.schema_syncs(), 1);
        assert!(interface.notices().is_empty());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Connected);
        assert!(session.transport().calls().contains(&"signin".to_string()));
    }

    #[tokio::test]
    async fn missing_connection_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let interface = Arc::new(RecordingInterface::default());
        let session = Session::new(MockTransport::new(), store, interface);

        assert_eq!(
            session.open_connection(None).await,
            Err(SessionError::NoConnectionAvailable)
        );
        assert!(session.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn superseded_attempt_cannot_overwrite_newer_failure() {
        let transport = MockTransport::new();
        let release_first = transport.gate_connect(Ok(()));
        transport.push_connect(Err(TransportError::Driver("connection refused".to_string())));
        let (session, store, interface) = session(transport);
        let mut events = session.subscribe();

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.open_connection(None).await })
        };
        while session.transport().connect_count() < 1 {
            tokio::task::yield_now().await;
        }

        session.open_connection(None).await.unwrap();
        assert!(!store.is_connected());
        assert!(!store.is_connecting());

        release_first.send(()).unwrap();
        first.await.unwrap().unwrap();

        assert!(!store.is_connected());
        assert!(!store.is_connecting());
        assert_eq!(store.version(), "");
        let notices = interface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Failed to connect");
        assert_eq!(notices[0].subtitle, "connection refused");
        assert_eq!(interface.schema_syncs(), 0);
        while let Ok(event) = events.try_recv() {
            assert_ne!(event, SessionEvent::Connected);
        }
    }

    #[tokio::test]
    async fn overtaken_connect_neither_signs_in_nor_keeps_its_link() {
        let transport = MockTransport::new();
        let release_first = transport.gate_connect(Ok(()));
        transport.push_connect(Err(TransportError::Driver("connection refused".to_string())));
        let (session, store, interface) = session(transport);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.open_connection(None).await })
        };
        while session.transport().connect_count() < 1 {
            tokio::task::yield_now().await;
        }
        session.open_connection(None).await.unwrap();
        session.transport().clear_calls();

        release_first.send(()).unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(session.transport().status(), TransportStatus::Disconnected);
        assert_eq!(session.transport().calls(), vec!["connect-dropped".to_string()]);
        assert!(!store.is_connected());
        assert_eq!(interface.notices().len(), 1);
    }

    #[tokio::test]
    async fn late_connect_leaves_newer_link_in_place() {
        let transport = MockTransport::new();
        let release_first = transport.gate_connect(Ok(()));
        let (session, store, interface) = session(transport);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.open_connection(None).await })
        };
        while session.transport().connect_count() < 1 {
            tokio::task::yield_now().await;
        }
        session.open_connection(None).await.unwrap();
        assert!(store.is_connected());
        session.transport().clear_calls();

        release_first.send(()).unwrap();
        first.await.unwrap().unwrap();

        assert_eq!(session.transport().status(), TransportStatus::Connected);
        assert_eq!(session.transport().calls(), vec!["connect-dropped".to_string()]);
        assert!(store.is_connected());
        assert_eq!(store.version(), "2.1.0");
        assert_eq!(interface.schema_syncs(), 1);
        assert!(interface.notices().is_empty());
    }

    #[tokio::test]
    async fn unsupported_version_is_reported_and_closes() {
        let transport = MockTransport::new();
        transport.set_version(Ok("surrealdb-1.5.4".to_string()));
        let (session, store, interface) = session(transport);

        session.open_connection(None).await.unwrap();

        assert!(!store.is_connected());
        assert_eq!(session.transport().status(), TransportStatus::Disconnected);
        let notices = interface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Unsupported version");
        assert!(notices[0].subtitle.contains("1.5.4"));
    }

    #[tokio::test]
    async fn version_retrieval_failure_has_its_own_notice() {
        let transport = MockTransport::new();
        transport.set_version(Err(TransportError::Driver("HTTP 502".to_string())));
        let (session, store, interface) = session(transport);

        session.open_connection(None).await.unwrap();

        assert!(!store.is_connected());
        let notices = interface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Failed to retrieve version");
        assert_eq!(notices[0].level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn missing_record_keeps_link_open_for_signup() {
        let transport = MockTransport::new();
        transport.fail_signin(TransportError::NoRecord("No record was returned".to_string()));
        let (session, store, interface) = session(transport);
        let scope = options(AuthMode::Scope);

        session.open_connection(Some(scope.clone())).await.unwrap();

        assert_eq!(session.transport().status(), TransportStatus::Connected);
        assert!(store.is_connected());
        assert!(session.signup_pending());
        assert_eq!(interface.signup_requests(), 1);
        assert!(interface.notices().is_empty());

        session.register(&build_scope_auth(&scope)).await.unwrap();

        assert!(session.transport().calls().contains(&"signup".to_string()));
        assert!(!session.signup_pending());
        assert!(store.is_connected());
    }

    #[tokio::test]
    async fn invalid_token_aborts_attempt() {
        let transport = MockTransport::new();
        transport.fail_authenticate(TransportError::Driver("expired".to_string()));
        let (session, store, interface) = session(transport);

        session
            .open_connection(Some(options(AuthMode::Token)))
            .await
            .unwrap();

        assert!(!store.is_connected());
        let notices = interface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices[0].subtitle,
            "Authentication failed: Authentication token invalid"
        );
    }

    #[tokio::test]
    async fn signup_mode_registers_and_no_mode_invalidates() {
        let (session, store, _) = session(MockTransport::new());

        session
            .open_connection(Some(options(AuthMode::ScopeSignup)))
            .await
            .unwrap();
        assert!(store.is_connected());
        assert!(session.transport().calls().contains(&"signup".to_string()));

        session
            .open_connection(Some(options(AuthMode::None)))
            .await
            .unwrap();
        assert!(store.is_connected());
        assert!(session.transport().calls().contains(&"invalidate".to_string()));
    }

    #[tokio::test]
    async fn rejected_signup_is_an_authentication_failure() {
        let transport = MockTransport::new();
        transport.fail_signup(TransportError::Driver("record exists".to_string()));
        let (session, store, interface) = session(transport);

        session
            .open_connection(Some(options(AuthMode::ScopeSignup)))
            .await
            .unwrap();

        assert!(!store.is_connected());
        assert_eq!(interface.signup_requests(), 0);
        let notices = interface.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].subtitle, "Authentication failed: Could not sign up");
    }

    #[tokio::test]
    async fn authenticate_routes_missing_record_to_signup() {
        let transport = MockTransport::new();
        let (session, _, interface) = session(transport);
        session.open_connection(None).await.unwrap();

        session
            .transport()
            .fail_signin(TransportError::NoRecord("No record was returned".to_string()));
        let result = session
            .authenticate(Some(Credentials::Root {
                username: "root".to_string(),
                password: "wrong".to_string(),
            }))
            .await;

        assert_eq!(result, Err(AuthError::SignupRequired));
        assert_eq!(interface.signup_requests(), 1);
        assert!(session.signup_pending());
        assert_eq!(session.authenticate(None).await, Ok(()));
        assert!(!session.signup_pending());
    }

    #[tokio::test]
    async fn close_twice_is_idempotent() {
        let (session, store, _) = session(MockTransport::new());
        session.open_connection(None).await.unwrap();
        let mut events = session.subscribe();

        session.close_connection().await;
        assert_eq!(session.transport().status(), TransportStatus::Disconnected);
        assert!(!store.is_connected());

        session.close_connection().await;
        assert_eq!(session.transport().status(), TransportStatus::Disconnected);

        assert_eq!(events.try_recv().unwrap(), SessionEvent::Disconnected);
        assert!(events.try_recv().is_err());
        let closes = session
            .transport()
            .calls()
            .iter()
            .filter(|call| *call == "close")
            .count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn watcher_handles_unexpected_disconnect() {
        let (session, store, interface) = session(MockTransport::new());
        session.spawn_disconnect_watcher();
        session.open_connection(None).await.unwrap();
        let mut events = session.subscribe();

        session.transport().drop_link();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);

        assert!(!store.is_connected());
        assert_eq!(store.version(), "");
        assert_eq!(interface.notices()[0].title, "Connection lost");
        session.shutdown().await;
    }
}
