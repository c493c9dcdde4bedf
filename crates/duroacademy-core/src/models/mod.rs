//! Data models for DuroAcademy entities.
//!
//! - `Principal`, `Role`: the signed-in identity and its platform role
//! - `Module`: a course module from the catalog
//! - `DashboardCounts`: headline row counts shown on the dashboard screen

pub mod catalog;
pub mod principal;

pub use catalog::{DashboardCounts, Module};
pub use principal::{Principal, Role};
