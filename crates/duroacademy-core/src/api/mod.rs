//! REST API client module for the DuroAcademy backend.
//!
//! This module provides the `ApiClient` for signing in, reading principals
//! and permission overrides, and fetching reference data for the dashboard.
//!
//! Requests carry the project's anon key plus the signed-in user's bearer
//! token; the backend's row-level security does the actual authorization.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
