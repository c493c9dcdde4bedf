//! API client for the DuroAcademy backend.
//!
//! The backend is a hosted Postgres exposed through a REST gateway
//! (`/rest/v1/<table>`, PostgREST filter syntax) plus a password-grant auth
//! endpoint (`/auth/v1/token`). Row-level security decides what each token
//! may read or write; this client only shapes requests and decodes rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use crate::auth::SessionData;
use crate::models::{DashboardCounts, Module, Principal};
use crate::permissions::{OverrideSource, PermissionOverride};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const PROFILES_TABLE: &str = "profiles";
const OVERRIDES_TABLE: &str = "admin_permissions";
const MODULES_TABLE: &str = "modules";

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    email: Option<String>,
}

impl AuthResponse {
    fn into_session(self) -> SessionData {
        SessionData {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: self.user.id,
            email: self.user.email,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
        }
    }
}

/// REST client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    anon_key: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validate that a string looks like a UUID: 8-4-4-4-12 hex digits.
    /// Ids are interpolated into filter expressions, so anything else is rejected.
    fn is_valid_uuid(s: &str) -> bool {
        if s.len() != 36 {
            return false;
        }
        s.chars().enumerate().all(|(i, c)| {
            if i == 8 || i == 13 || i == 18 || i == 23 {
                c == '-'
            } else {
                c.is_ascii_hexdigit()
            }
        })
    }

    fn require_uuid(id: &str) -> Result<(), ApiError> {
        if Self::is_valid_uuid(id) {
            Ok(())
        } else {
            Err(ApiError::InvalidRequest(format!("not a valid user id: {}", id)))
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self.token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn send<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %response.url(), retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }

    async fn get_rows<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<Vec<T>, ApiError> {
        let url = self.rest_url(path);
        let response = self.send(|| self.request(Method::GET, &url)).await?;
        Self::parse_json(response, what).await
    }

    // ===== Auth =====

    /// Sign in with email and password.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<SessionData, ApiError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let body = serde_json::json!({ "email": email, "password": password });

        let response = self
            .send(|| {
                self.client
                    .post(&url)
                    .header("apikey", &self.anon_key)
                    .json(&body)
            })
            .await?;

        let auth: AuthResponse = Self::parse_json(response, "auth response").await?;
        debug!(user_id = %auth.user.id, "Authenticated");
        Ok(auth.into_session())
    }

    /// Exchange a refresh token for a new session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<SessionData, ApiError> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);
        let body = serde_json::json!({ "refresh_token": refresh_token });

        let response = self
            .send(|| {
                self.client
                    .post(&url)
                    .header("apikey", &self.anon_key)
                    .json(&body)
            })
            .await?;

        let auth: AuthResponse = Self::parse_json(response, "token refresh response").await?;
        Ok(auth.into_session())
    }

    // ===== Principals and permissions =====

    /// Fetch the profile row that carries the principal's role.
    pub async fn fetch_principal(&self, user_id: &str) -> Result<Principal, ApiError> {
        Self::require_uuid(user_id)?;
        let path = format!(
            "{}?id=eq.{}&select=id,role,email,full_name",
            PROFILES_TABLE, user_id
        );
        let mut rows: Vec<Principal> = self.get_rows(&path, "profile").await?;
        if rows.is_empty() {
            return Err(ApiError::NotFound(format!("profile {}", user_id)));
        }
        Ok(rows.swap_remove(0))
    }

    /// Fetch the override row for an admin. An empty result set is `Ok(None)`;
    /// every failure, including an undecodable body, is an error.
    pub async fn fetch_permission_override(
        &self,
        user_id: &str,
    ) -> Result<Option<PermissionOverride>, ApiError> {
        Self::require_uuid(user_id)?;
        let path = format!(
            "{}?user_id=eq.{}&select=user_id,allowed_screens,updated_by,updated_at",
            OVERRIDES_TABLE, user_id
        );
        let rows: Vec<PermissionOverride> = self.get_rows(&path, "permission override").await?;
        if rows.len() > 1 {
            warn!(user_id, rows = rows.len(), "Multiple override rows, using the first");
        }
        Ok(rows.into_iter().next())
    }

    /// Insert or replace an admin's override row.
    pub async fn upsert_permission_override(&self, row: &PermissionOverride) -> Result<(), ApiError> {
        Self::require_uuid(&row.user_id)?;
        let url = self.rest_url(&format!("{}?on_conflict=user_id", OVERRIDES_TABLE));
        self.send(|| {
            self.request(Method::POST, &url)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(row)
        })
        .await?;
        debug!(user_id = %row.user_id, screens = row.allowed_screens.len(), "Override saved");
        Ok(())
    }

    /// Remove an admin's override so the static defaults apply again.
    pub async fn delete_permission_override(&self, user_id: &str) -> Result<(), ApiError> {
        Self::require_uuid(user_id)?;
        let url = self.rest_url(&format!("{}?user_id=eq.{}", OVERRIDES_TABLE, user_id));
        self.send(|| self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    // ===== Reference data =====

    pub async fn fetch_modules(&self) -> Result<Vec<Module>, ApiError> {
        let path = format!(
            "{}?select=id,title,description,order_index,is_published,created_at&order=order_index.asc",
            MODULES_TABLE
        );
        self.get_rows(&path, "modules").await
    }

    /// Exact row count for a table/filter using `Prefer: count=exact`.
    async fn count_rows(&self, path: &str) -> Result<u64, ApiError> {
        let url = self.rest_url(path);
        let response = self
            .send(|| {
                self.request(Method::HEAD, &url)
                    .header("Prefer", "count=exact")
            })
            .await?;

        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| ApiError::InvalidResponse(format!("missing row count for {}", path)))
    }

    /// Headline counts for the dashboard, fetched concurrently.
    pub async fn fetch_dashboard_counts(&self) -> Result<DashboardCounts, ApiError> {
        let (users, modules, videos, quizzes, pending_access_requests) = futures::try_join!(
            self.count_rows("profiles?select=id"),
            self.count_rows("modules?select=id"),
            self.count_rows("videos?select=id"),
            self.count_rows("quizzes?select=id"),
            self.count_rows("access_requests?select=id&status=eq.pending"),
        )?;

        Ok(DashboardCounts {
            users,
            modules,
            videos,
            quizzes,
            pending_access_requests,
        })
    }
}

#[async_trait]
impl OverrideSource for ApiClient {
    async fn fetch_override(&self, user_id: &str) -> Result<Option<PermissionOverride>, ApiError> {
        self.fetch_permission_override(user_id).await
    }
}

/// Total from a `Content-Range` header such as `0-24/312` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.split_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_uuid() {
        assert!(ApiClient::is_valid_uuid("6f1c1f36-6c4c-4b7c-9d0a-3f4c2c1d8e11"));
        assert!(ApiClient::is_valid_uuid("00000000-0000-0000-0000-000000000000"));

        assert!(!ApiClient::is_valid_uuid(""));
        assert!(!ApiClient::is_valid_uuid("6f1c1f366c4c4b7c9d0a3f4c2c1d8e11"));
        assert!(!ApiClient::is_valid_uuid("6f1c1f36-6c4c-4b7c-9d0a-3f4c2c1d8e1"));
        assert!(!ApiClient::is_valid_uuid("6f1c1f36-6c4c-4b7c-9d0a-3f4c2c1d8e11&or=(x)"));
        assert!(!ApiClient::is_valid_uuid("zzzzzzzz-zzzz-zzzz-zzzz-zzzzzzzzzzzz"));
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/312"), Some(312));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_auth_response_into_session() {
        let json = r#"{
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "rt",
            "user": {"id": "6f1c1f36-6c4c-4b7c-9d0a-3f4c2c1d8e11", "email": "ada@duro.academy"}
        }"#;
        let auth: AuthResponse = serde_json::from_str(json).unwrap();
        let session = auth.into_session();
        assert_eq!(session.access_token, "at");
        assert_eq!(session.refresh_token, "rt");
        assert_eq!(session.email.as_deref(), Some("ada@duro.academy"));
        assert!(!session.is_expired());
        assert!(session.minutes_until_expiry() >= 59);
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = ApiClient::new("https://example.supabase.co/", "anon").unwrap();
        assert_eq!(client.base_url(), "https://example.supabase.co");
        assert_eq!(
            client.rest_url("modules"),
            "https://example.supabase.co/rest/v1/modules"
        );
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_before_request() {
        let client = ApiClient::new("http://127.0.0.1:9", "anon").unwrap();
        let result = client.fetch_permission_override("not-a-uuid").await;
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }
}
