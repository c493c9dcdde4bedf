//! Application state for the admin CLI.
//!
//! `App` wires the core pieces together once per process: config, the
//! persisted session, the file-backed cache, the API client, and the auth
//! state that owns permission resolution. Every command goes through it.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use duroacademy_core::cache::keys;
use duroacademy_core::permissions::{DenyReason, OverrideSource};
use duroacademy_core::{
    ApiClient, ApiError, AuthState, CacheDb, Config, CredentialStore, DashboardCounts, Module,
    PermissionOverride, PermissionResolver, Principal, ResolutionState, Role, Screen, Session,
    SessionData, TtlPreset,
};

/// Maximum length for email input.
const MAX_EMAIL_LENGTH: usize = 254;

pub struct App {
    pub config: Config,
    pub cache: CacheDb,
    pub session: Session,
    api: ApiClient,
    auth: AuthState,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        debug!(?cache_dir, "Cache directory configured");

        let (url, key) = config.backend()?;
        let api = ApiClient::new(url, key).context("Failed to build API client")?;

        let cache = CacheDb::open(cache_dir.join("data")).await;
        let session = Session::new(cache_dir);

        let auth = Self::build_auth(&config, &api, &cache);

        Ok(Self {
            config,
            cache,
            session,
            api,
            auth,
        })
    }

    fn build_auth(config: &Config, api: &ApiClient, cache: &CacheDb) -> AuthState {
        let source: Arc<dyn OverrideSource> = Arc::new(api.clone());
        let resolver = PermissionResolver::new(source, config.role_permissions.clone());
        let auth = AuthState::new(resolver, cache.clone());
        auth.on_principal_changed(|principal| match principal {
            Some(p) => debug!(user_id = %p.id, "Principal changed"),
            None => debug!("Principal cleared"),
        });
        auth
    }

    /// Point the API client and resolver at a new bearer token.
    fn use_token(&mut self, token: String) {
        self.api.set_token(token);
        self.auth = Self::build_auth(&self.config, &self.api, &self.cache);
    }

    // ===== Login / logout =====

    pub async fn login(&mut self, email_arg: Option<String>, remember: bool) -> Result<()> {
        let email = match email_arg {
            Some(email) => email,
            None => {
                let remembered = self.cache.get_meta(keys::META_REMEMBERED_EMAIL).await;
                prompt_email(remembered.as_deref())?
            }
        };
        let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

        let data = match self.api.authenticate(&email, &password).await {
            Ok(data) => data,
            Err(ApiError::Unauthorized) => bail!("Invalid email or password"),
            Err(e) => return Err(anyhow::Error::new(e).context("Sign-in failed")),
        };

        self.start_session(data).await?;
        self.cache.set_meta(keys::META_REMEMBERED_EMAIL, &email).await;

        if remember {
            if let Err(e) = CredentialStore::store(&email, &password) {
                warn!(error = %e, "Could not save password to keychain");
            }
        }

        let principal = self.current_principal().await?;
        println!("Signed in as {} ({})", principal.display_name(), principal.role.display_name());
        Ok(())
    }

    /// Resolve the principal for a fresh token and persist the session only if
    /// the dashboard is allowed.
    async fn start_session(&mut self, data: SessionData) -> Result<()> {
        self.use_token(data.access_token.clone());

        let principal = self.load_principal(&data.user_id).await?;
        let state = self.auth.sign_in(principal).await;
        if let ResolutionState::Denied(reason) = state {
            self.auth.sign_out().await;
            bail!(describe_denial(&reason));
        }

        self.session.update(data);
        self.session.save().context("Failed to save session")?;
        Ok(())
    }

    pub async fn logout(&mut self) -> Result<()> {
        if let Err(e) = self.session.load() {
            warn!(error = %e, "Could not read saved session");
        }
        if let Some(email) = self.session.data.as_ref().and_then(|d| d.email.clone()) {
            if let Err(e) = CredentialStore::delete(&email) {
                warn!(error = %e, "Could not remove keychain entry");
            }
        }
        self.session.clear().context("Failed to clear session")?;
        self.auth.sign_out().await;
        println!("Signed out. Local cache cleared.");
        Ok(())
    }

    /// Restore the saved session, refreshing the token if needed, and resolve
    /// permissions for it.
    pub async fn restore(&mut self) -> Result<()> {
        if !self.session.load()? {
            bail!("Not signed in. Run `duroacademy-admin login` first.");
        }
        let data = self
            .session
            .data
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Session file is empty"))?;

        if !data.needs_refresh() {
            let token = self
                .session
                .token()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("Session expired. Please log in again."))?;
            self.use_token(token);
            let principal = self.load_principal(&data.user_id).await?;
            return match self.auth.sign_in(principal).await {
                ResolutionState::Resolved(_) => Ok(()),
                ResolutionState::Denied(reason) => bail!(describe_denial(&reason)),
                other => bail!("Permissions not resolved: {:?}", other),
            };
        }

        info!(minutes_left = data.minutes_until_expiry(), "Session needs refresh");
        let refreshed = match self.api.refresh_session(&data.refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, trying saved credentials");
                let email = data
                    .email
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("Session expired. Please log in again."))?;
                let password = CredentialStore::get_password(&email)
                    .map_err(|_| anyhow::anyhow!("Session expired. Please log in again."))?;
                self.api
                    .authenticate(&email, &password)
                    .await
                    .context("Re-authentication failed")?
            }
        };
        self.start_session(refreshed).await
    }

    /// Profile row for `user_id`, always from the server. The role decides
    /// permissions, so it is never read from the cache.
    async fn load_principal(&self, user_id: &str) -> Result<Principal> {
        self.api
            .fetch_principal(user_id)
            .await
            .context("Failed to load profile")
    }

    async fn current_principal(&self) -> Result<Principal> {
        self.auth
            .principal()
            .await
            .ok_or_else(|| anyhow::anyhow!("Not signed in"))
    }

    async fn require(&self, screen: Screen) -> Result<()> {
        if self.auth.can_view(screen).await {
            Ok(())
        } else {
            bail!("You do not have access to {}", screen.title())
        }
    }

    // ===== Commands =====

    pub async fn whoami(&self, json: bool) -> Result<()> {
        let principal = self.current_principal().await?;
        let state = self.auth.state().await;

        if json {
            let out = serde_json::json!({ "principal": principal, "permissions": state });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }

        println!("{}", principal.display_name());
        println!("  id:    {}", principal.id);
        println!("  role:  {}", principal.role.display_name());
        if let Some(data) = &self.session.data {
            println!("  token: expires in {}m", data.minutes_until_expiry());
        }
        let screens: Vec<&str> = self
            .auth
            .visible_screens()
            .await
            .iter()
            .map(|s| s.title())
            .collect();
        println!("  screens: {}", screens.join(", "));
        Ok(())
    }

    pub async fn screens(&self) -> Result<()> {
        for screen in Screen::ALL {
            let mark = if self.auth.can_view(screen).await { "✓" } else { "✗" };
            println!("{} {:<18} {}", mark, screen.as_str(), screen.title());
        }
        Ok(())
    }

    pub async fn modules(&self, force_refresh: bool) -> Result<()> {
        self.require(Screen::Modules).await?;
        let modules: Vec<Module> = self
            .cache
            .fetch_or_compute(
                keys::MODULE_CATALOG,
                || self.api.fetch_modules(),
                TtlPreset::VeryLong.duration(),
                force_refresh,
            )
            .await
            .context("Failed to load modules")?;

        for module in &modules {
            println!(
                "{:>3}  {:<40} {}",
                module.order_index.map(|i| i.to_string()).unwrap_or_default(),
                module.title,
                module.status_label()
            );
        }
        self.print_age(keys::MODULE_CATALOG, modules.len()).await;
        Ok(())
    }

    pub async fn stats(&self, force_refresh: bool) -> Result<()> {
        self.require(Screen::Dashboard).await?;
        let counts: DashboardCounts = self
            .cache
            .fetch_or_compute(
                keys::DASHBOARD_COUNTS,
                || self.api.fetch_dashboard_counts(),
                TtlPreset::Short.duration(),
                force_refresh,
            )
            .await
            .context("Failed to load dashboard counts")?;

        println!("Users:                   {}", counts.users);
        println!("Modules:                 {}", counts.modules);
        println!("Videos:                  {}", counts.videos);
        println!("Quizzes:                 {}", counts.quizzes);
        println!("Pending access requests: {}", counts.pending_access_requests);
        self.print_age(keys::DASHBOARD_COUNTS, 1).await;
        Ok(())
    }

    async fn print_age(&self, key: &str, items: usize) {
        if let Some(age) = self.cache.age_display(key).await {
            eprintln!("({} item(s), updated {})", items, age);
        }
    }

    /// Replace an admin's screen override. Super admins only.
    pub async fn grant(&self, user_id: &str, screen_args: &[String]) -> Result<()> {
        let editor = self.require_super_admin().await?;

        let mut screens = Vec::with_capacity(screen_args.len());
        for arg in screen_args {
            screens.push(arg.parse::<Screen>()?);
        }

        let target = self.api.fetch_principal(user_id).await.context("Failed to load target user")?;
        if target.role != Role::Admin {
            bail!(
                "{} is a {}; overrides only apply to admins",
                target.display_name(),
                target.role.display_name()
            );
        }

        let row = PermissionOverride {
            user_id: target.id.clone(),
            allowed_screens: screens.into_iter().collect(),
            updated_by: Some(editor.id),
            updated_at: Some(Utc::now()),
        };
        self.api
            .upsert_permission_override(&row)
            .await
            .context("Failed to save override")?;

        let names: Vec<&str> = row.allowed_screens.iter().map(|s| s.as_str()).collect();
        println!("{} can now see: {}", target.display_name(), names.join(", "));
        Ok(())
    }

    /// Drop an admin's override so the static admin defaults apply.
    pub async fn revoke_override(&self, user_id: &str) -> Result<()> {
        self.require_super_admin().await?;
        self.api
            .delete_permission_override(user_id)
            .await
            .context("Failed to remove override")?;
        println!("Override removed; default admin permissions apply.");
        Ok(())
    }

    async fn require_super_admin(&self) -> Result<Principal> {
        self.require(Screen::AdminPermissions).await?;
        let principal = self.current_principal().await?;
        if principal.role != Role::SuperAdmin {
            bail!("Only super admins can edit admin permissions");
        }
        Ok(principal)
    }

    pub async fn cache_cleanup(&self) -> Result<()> {
        let removed = self.cache.cleanup_expired().await;
        println!("Removed {} expired cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
        Ok(())
    }
}

fn describe_denial(reason: &DenyReason) -> String {
    match reason {
        DenyReason::RoleNotPermitted { role } => format!(
            "Accounts with the {} role cannot use the admin dashboard",
            role.display_name()
        ),
        DenyReason::FetchFailed { message } => format!(
            "Could not verify your permissions ({}). Access is blocked; try again.",
            message
        ),
    }
}

fn prompt_email(default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("Email [{}]: ", d),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    let email = if input.is_empty() {
        default.map(str::to_string).unwrap_or_default()
    } else {
        input.to_string()
    };

    if email.is_empty() {
        bail!("Email is required");
    }
    if email.len() > MAX_EMAIL_LENGTH {
        bail!("Email is too long");
    }
    Ok(email)
}
