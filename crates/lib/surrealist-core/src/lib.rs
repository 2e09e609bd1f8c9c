//! Session core of the Surrealist database client.
//!
//! The [`Session`] coordinates one database connection for the UI: it guards
//! against overlapping connect attempts, tracks the live queries of each query
//! tab, and runs queries on behalf of the editor. UI state is reached through
//! the [`SessionStore`] and [`Interface`] traits; the database through a
//! [`Transport`].

pub mod live;
pub mod session;
pub mod store;
pub mod surrealql;
pub mod transport;
pub mod version;

#[cfg(test)]
mod testing;

pub use live::LiveRegistry;
pub use session::{
    AttemptToken,
    AuthError,
    QueryError,
    Session,
    SessionConfig,
    SessionError,
    SessionEvent,
    TELEMETRY_TARGET,
    UserQueryOptions,
};
pub use store::{Interface, LogInterface, MemoryStore, Notice, NoticeLevel, SessionStore};
pub use transport::{
    ConnectParams,
    SurrealTransport,
    SurrealTransportConfig,
    Transport,
    TransportError,
    TransportEvent,
    TransportStatus,
};
pub use version::{ServerVersion, SupportedVersions};
