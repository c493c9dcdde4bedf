//! Application configuration management.
//!
//! This module handles loading the application configuration:
//! the backend URL, the project's public anon key, and the static role
//! permissions used when an admin has no override row.
//!
//! Configuration is stored at `~/.config/duroacademy-admin/config.json`.
//! `DUROACADEMY_URL` and `DUROACADEMY_ANON_KEY` override the file.

use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

use crate::permissions::StaticRolePermissions;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "duroacademy-admin";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BACKEND_URL: &str = "DUROACADEMY_URL";
pub const ENV_ANON_KEY: &str = "DUROACADEMY_ANON_KEY";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    #[serde(default)]
    pub role_permissions: StaticRolePermissions,
}

impl Config {
    /// Load from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            self.backend_url = Some(url);
        }
        if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.trim().is_empty()) {
            self.anon_key = Some(key);
        }
    }

    /// Backend URL and anon key, or an error naming what is missing.
    pub fn backend(&self) -> Result<(&str, &str)> {
        let url = self.backend_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("Backend URL not configured (set {} or edit config.json)", ENV_BACKEND_URL)
        })?;
        let key = self.anon_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("Anon key not configured (set {} or edit config.json)", ENV_ANON_KEY)
        })?;
        Ok((url, key))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::permissions::{PermissionSet, Screen};

    #[test]
    fn test_defaults_when_fields_missing() {
        let config: Config = serde_json::from_str(r#"{"backend_url": "https://x.supabase.co"}"#).unwrap();
        assert_eq!(config.backend_url.as_deref(), Some("https://x.supabase.co"));
        assert!(config.anon_key.is_none());
        assert_eq!(
            config.role_permissions.for_role(Role::SuperAdmin),
            Some(&PermissionSet::All)
        );
    }

    #[test]
    fn test_custom_role_permissions() {
        let json = r#"{
            "backend_url": null,
            "anon_key": null,
            "role_permissions": {"admin": {"kind": "screens", "screens": ["VIDEOS"]}}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let admin = config.role_permissions.for_role(Role::Admin).unwrap();
        assert!(admin.allows(Screen::Videos));
        assert!(!admin.allows(Screen::Dashboard));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config {
            backend_url: Some("https://file.example".into()),
            ..Default::default()
        };
        config.apply_env(|name| match name {
            ENV_ANON_KEY => Some("env-key".to_string()),
            ENV_BACKEND_URL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.backend_url.as_deref(), Some("https://file.example"));
        assert_eq!(config.anon_key.as_deref(), Some("env-key"));
        assert_eq!(config.backend().unwrap(), ("https://file.example", "env-key"));
    }

    #[test]
    fn test_backend_requires_both_values() {
        let config = Config::default();
        let err = config.backend().unwrap_err().to_string();
        assert!(err.contains(ENV_BACKEND_URL));
    }
}
