//! Authentication module for sessions, credentials and the signed-in principal.
//!
//! This module provides:
//! - `Session`: token session persisted to the cache directory
//! - `CredentialStore`: optional "remember me" password via the OS keychain
//! - `AuthState`: the signed-in principal, its permission state, and the
//!   observers notified when either changes

pub mod credentials;
pub mod session;
pub mod state;

pub use credentials::CredentialStore;
pub use session::{Session, SessionData};
pub use state::{AuthEvent, AuthState, ObserverId};
