//! Signed-in principal and its permission state, with explicit observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::cache::CacheDb;
use crate::models::Principal;
use crate::permissions::{
    PermissionError, PermissionResolver, PermissionSession, PermissionSet, ResolutionState, Screen,
};

/// Buffer size for the auth event channel.
const EVENT_CHANNEL_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Principal),
    PermissionsChanged {
        principal_id: String,
        state: ResolutionState,
    },
    SignedOut,
}

type PrincipalObserver = Arc<dyn Fn(Option<&Principal>) + Send + Sync>;

/// Handle returned by [`AuthState::on_principal_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(usize);

/// Holds who is signed in and what they may see.
///
/// Consumers either register a callback with `on_principal_changed` or take
/// a broadcast receiver with `subscribe` for the full event stream.
pub struct AuthState {
    resolver: PermissionResolver,
    cache: CacheDb,
    current: RwLock<Option<PermissionSession>>,
    events: broadcast::Sender<AuthEvent>,
    observers: StdMutex<Vec<(ObserverId, PrincipalObserver)>>,
    next_observer: StdMutex<usize>,
    next_generation: AtomicU64,
}

impl AuthState {
    pub fn new(resolver: PermissionResolver, cache: CacheDb) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            resolver,
            cache,
            current: RwLock::new(None),
            events: tx,
            observers: StdMutex::new(Vec::new()),
            next_observer: StdMutex::new(0),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Call `callback` whenever a principal signs in (`Some`) or out (`None`).
    pub fn on_principal_changed<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(Option<&Principal>) + Send + Sync + 'static,
    {
        let mut next = self.next_observer.lock().unwrap_or_else(|e| e.into_inner());
        let id = ObserverId(*next);
        *next += 1;
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(oid, _)| *oid != id);
    }

    /// Callbacks run with the observer list unlocked so they may register
    /// or remove observers themselves.
    fn notify(&self, principal: Option<&Principal>) {
        let callbacks: Vec<PrincipalObserver> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(principal);
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Install `principal` as the signed-in identity and resolve its
    /// permissions. Returns the resulting state.
    pub async fn sign_in(&self, principal: Principal) -> ResolutionState {
        info!(user_id = %principal.id, role = principal.role.as_str(), "Signing in");
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut guard = self.current.write().await;
            let mut session = PermissionSession::with_generation(principal.clone(), generation);
            session.begin();
            *guard = Some(session);
        }
        self.notify(Some(&principal));
        self.emit(AuthEvent::SignedIn(principal.clone()));

        let result = self.resolver.load_permissions(&principal).await;
        self.finish_resolution(&principal.id, generation, result).await
    }

    /// Re-resolve the current principal's permissions. `None` when nobody is
    /// signed in.
    pub async fn refresh_permissions(&self) -> Option<ResolutionState> {
        let (principal, generation) = {
            let mut guard = self.current.write().await;
            let session = guard.as_mut()?;
            if !session.begin() {
                debug!("Session denied, not refreshing");
                return Some(session.state().clone());
            }
            (session.principal().clone(), session.generation())
        };

        let result = self.resolver.refresh(&principal).await;
        Some(self.finish_resolution(&principal.id, generation, result).await)
    }

    async fn finish_resolution(
        &self,
        principal_id: &str,
        generation: u64,
        result: Result<PermissionSet, PermissionError>,
    ) -> ResolutionState {
        let state = {
            let mut guard = self.current.write().await;
            match guard.as_mut() {
                // Signed out, or signed in again, while we were fetching
                Some(session) if session.generation() == generation => {
                    session.complete(result).clone()
                }
                _ => {
                    debug!(principal_id, generation, "Discarding stale permission result");
                    return ResolutionState::Unresolved;
                }
            }
        };

        self.emit(AuthEvent::PermissionsChanged {
            principal_id: principal_id.to_string(),
            state: state.clone(),
        });
        state
    }

    /// Forget the principal and drop every cached value.
    pub async fn sign_out(&self) {
        let had_principal = self.current.write().await.take().is_some();
        self.cache.clear_all().await;
        if had_principal {
            info!("Signed out");
        }
        self.notify(None);
        self.emit(AuthEvent::SignedOut);
    }

    pub async fn principal(&self) -> Option<Principal> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.principal().clone())
    }

    pub async fn state(&self) -> ResolutionState {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.state().clone())
            .unwrap_or(ResolutionState::Unresolved)
    }

    pub async fn can_view(&self, screen: Screen) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.can_view(screen))
            .unwrap_or(false)
    }

    pub async fn visible_screens(&self) -> Vec<Screen> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.visible_screens())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::permissions::resolver::tests::{statics_ab, FakeOverrides};
    use crate::permissions::DenyReason;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn setup() -> (Arc<FakeOverrides>, AuthState, CacheDb) {
        let source = Arc::new(FakeOverrides::default());
        let resolver = PermissionResolver::new(source.clone(), statics_ab());
        let cache = CacheDb::in_memory();
        (source, AuthState::new(resolver, cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_sign_in_resolves_and_emits() {
        let (_, auth, _) = setup();
        let mut rx = auth.subscribe();

        let state = auth.sign_in(Principal::new("a1", Role::Admin)).await;
        assert!(matches!(state, ResolutionState::Resolved(_)));
        assert!(auth.can_view(Screen::Dashboard).await);
        assert!(!auth.can_view(Screen::Users).await);

        assert!(matches!(rx.recv().await.unwrap(), AuthEvent::SignedIn(p) if p.id == "a1"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AuthEvent::PermissionsChanged { state: ResolutionState::Resolved(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_observers_see_sign_in_and_out() {
        let (_, auth, _) = setup();
        let signed_in = Arc::new(AtomicUsize::new(0));
        let signed_out = Arc::new(AtomicUsize::new(0));
        let (i, o) = (signed_in.clone(), signed_out.clone());

        let id = auth.on_principal_changed(move |p| {
            if p.is_some() {
                i.fetch_add(1, Ordering::SeqCst);
            } else {
                o.fetch_add(1, Ordering::SeqCst);
            }
        });

        auth.sign_in(Principal::new("s1", Role::SuperAdmin)).await;
        auth.sign_out().await;
        assert_eq!(signed_in.load(Ordering::SeqCst), 1);
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);

        auth.remove_observer(id);
        auth.sign_in(Principal::new("s1", Role::SuperAdmin)).await;
        assert_eq!(signed_in.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_dashboard_role_is_denied() {
        let (_, auth, _) = setup();
        let state = auth.sign_in(Principal::new("u1", Role::User)).await;
        assert_eq!(
            state,
            ResolutionState::Denied(DenyReason::RoleNotPermitted { role: Role::User })
        );
        assert!(auth.visible_screens().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_reflects_external_edit() {
        let (source, auth, _) = setup();
        auth.sign_in(Principal::new("a1", Role::Admin)).await;

        source.grant("a1", &[Screen::Notifications]).await;
        let state = auth.refresh_permissions().await.unwrap();
        assert_eq!(
            state,
            ResolutionState::Resolved(PermissionSet::screens([Screen::Notifications]))
        );
        assert!(!auth.can_view(Screen::Dashboard).await);
    }

    #[tokio::test]
    async fn test_refresh_failure_fails_closed() {
        let (source, auth, _) = setup();
        auth.sign_in(Principal::new("a1", Role::Admin)).await;

        *source.failing.lock().await = true;
        let state = auth.refresh_permissions().await.unwrap();
        assert!(state.is_denied());
        assert!(!auth.can_view(Screen::Dashboard).await);

        // Denied sticks until sign-out
        *source.failing.lock().await = false;
        assert!(auth.refresh_permissions().await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_refresh_without_principal() {
        let (_, auth, _) = setup();
        assert!(auth.refresh_permissions().await.is_none());
        assert_eq!(auth.state().await, ResolutionState::Unresolved);
    }

    #[tokio::test]
    async fn test_sign_out_clears_cache() {
        let (_, auth, cache) = setup();
        auth.sign_in(Principal::new("a1", Role::Admin)).await;
        cache.set("modules:catalog", &vec!["m1"], None).await;
        cache.set_meta("remembered_email", "ada@duro.academy").await;

        auth.sign_out().await;
        assert!(auth.principal().await.is_none());
        assert!(cache.get::<Vec<String>>("modules:catalog").await.is_none());
        assert!(cache.get_meta("remembered_email").await.is_none());
        assert!(!auth.can_view(Screen::Dashboard).await);
    }

    #[tokio::test]
    async fn test_observer_may_register_another_observer() {
        let (_, auth, _) = setup();
        let auth = Arc::new(auth);
        let added = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&auth);
        let counter = added.clone();
        auth.on_principal_changed(move |_| {
            if let Some(auth) = weak.upgrade() {
                auth.on_principal_changed(|_| {});
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let state = tokio::time::timeout(
            Duration::from_secs(3),
            auth.sign_in(Principal::new("s1", Role::SuperAdmin)),
        )
        .await
        .expect("sign_in must not block on observer registration");
        assert_eq!(state, ResolutionState::Resolved(PermissionSet::All));
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observer_may_remove_itself() {
        let (_, auth, _) = setup();
        let auth = Arc::new(auth);
        let calls = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(StdMutex::new(None::<ObserverId>));

        let weak = Arc::downgrade(&auth);
        let (counter, slot) = (calls.clone(), own_id.clone());
        let id = auth.on_principal_changed(move |p| {
            counter.fetch_add(1, Ordering::SeqCst);
            if p.is_none() {
                let id = *slot.lock().unwrap();
                if let (Some(auth), Some(id)) = (weak.upgrade(), id) {
                    auth.remove_observer(id);
                }
            }
        });
        *own_id.lock().unwrap() = Some(id);

        auth.sign_in(Principal::new("s1", Role::SuperAdmin)).await;
        tokio::time::timeout(Duration::from_secs(3), auth.sign_out())
            .await
            .expect("sign_out must not block on observer removal");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        auth.sign_in(Principal::new("s1", Role::SuperAdmin)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_result_from_previous_sign_in_is_discarded() {
        let (_, auth, _) = setup();
        auth.sign_in(Principal::new("a1", Role::Admin)).await;
        auth.sign_out().await;
        // Same id, new role, new sign-in
        auth.sign_in(Principal::new("a1", Role::SuperAdmin)).await;

        // A late result from the first sign-in arrives
        let stale = auth
            .finish_resolution("a1", 0, Ok(PermissionSet::screens([Screen::Dashboard])))
            .await;
        assert_eq!(stale, ResolutionState::Unresolved);
        assert_eq!(auth.state().await, ResolutionState::Resolved(PermissionSet::All));
        assert!(auth.can_view(Screen::Users).await);
    }
}
