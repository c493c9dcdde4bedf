//! Core library for the DuroAcademy admin client.
//!
//! This crate owns the two pieces of client logic that sit between the
//! dashboard screens and the hosted backend:
//!
//! - [`cache::CacheDb`]: a persistent key/value cache with per-entry TTL and a
//!   read-through `fetch_or_compute` entry point
//! - [`permissions::PermissionResolver`]: decides which screens a signed-in
//!   principal may see, merging static role defaults with per-admin overrides
//!
//! Everything else (auth, row-level security, storage) is delegated to the
//! backend and reached through [`api::ApiClient`].

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod permissions;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthEvent, AuthState, CredentialStore, Session, SessionData};
pub use cache::{CacheDb, TtlPreset};
pub use config::Config;
pub use models::{DashboardCounts, Module, Principal, Role};
pub use permissions::{
    PermissionError, PermissionOverride, PermissionResolver, PermissionSession, PermissionSet,
    ResolutionState, Screen, StaticRolePermissions,
};
