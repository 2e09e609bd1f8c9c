//! Data model shared by the Surrealist session core and its front ends.
//!
//! This crate defines connection options, the credential payloads derived from
//! them, and the per-tab query state exchanged with the UI store.

pub mod auth;
pub mod models;

pub use auth::{Credentials, ScopeAuth, build_scope_auth, compose_authentication};
pub use models::*;
