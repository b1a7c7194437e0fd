//! Process-wide session state: stored credentials, the cached profile and
//! the single-flight token refresh shared by every outbound request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::common::{AuthTokens, User};
use crate::error::Result;
use crate::network::transport::{ApiRequest, HttpTransport};
use crate::storage::{SessionStore, StoredSession};

pub const REFRESH_PATH: &str = "/users/token/refresh/";

/// Lifecycle of the signed-in session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Active,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    RefreshFailed,
    MissingRefreshToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is gone; the user must sign in again at `redirect_to`.
    LoggedOut {
        reason: LogoutReason,
        redirect_to: String,
    },
}

/// Why a refresh exchange did not produce a new access credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    MissingRefreshToken,
    Rejected { status: u16 },
    Transport(String),
    Storage(String),
}

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshFailure::MissingRefreshToken => write!(f, "no refresh token stored"),
            RefreshFailure::Rejected { status } => write!(f, "refresh rejected with {status}"),
            RefreshFailure::Transport(msg) => write!(f, "refresh transport failure: {msg}"),
            RefreshFailure::Storage(msg) => write!(f, "refresh storage failure: {msg}"),
        }
    }
}

type RefreshResult = std::result::Result<String, RefreshFailure>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshReply {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

struct Inner {
    store: Mutex<SessionStore>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Mutex<Option<(u64, SharedRefresh)>>,
    generation: AtomicU64,
    login_route: String,
}

/// Shared handle to the session. Cheap to clone.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    /// Wraps `store`, starting `Active` when an access token is persisted.
    pub fn open(store: SessionStore, login_route: impl Into<String>) -> Result<Self> {
        let stored = store.load()?;
        let initial = if stored.access_token.is_some() {
            log::info!("Restored stored session");
            SessionState::Active
        } else {
            if !stored.is_empty() {
                log::warn!("Stored session has no access token; treating as signed out");
            }
            SessionState::NoSession
        };
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                state,
                events,
                in_flight: Mutex::new(None),
                generation: AtomicU64::new(0),
                login_route: login_route.into(),
            }),
        })
    }

    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.inner.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn login_route(&self) -> &str {
        &self.inner.login_route
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        Ok(self.store().access_token()?)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.store().refresh_token()?)
    }

    pub fn user(&self) -> Result<Option<User>> {
        Ok(self.store().user()?)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.access_token(), Ok(Some(_)))
    }

    /// Persist a newly minted session and mark it active.
    pub fn establish(&self, tokens: &AuthTokens, user: Option<&User>) -> Result<()> {
        self.store().save(&StoredSession {
            access_token: Some(tokens.access.clone()),
            refresh_token: Some(tokens.refresh.clone()),
            user: user.cloned(),
        })?;
        self.inner.state.send_replace(SessionState::Active);
        log::info!(
            "Session established{}",
            user.map(|u| format!(" for {}", u.display_name()))
                .unwrap_or_default()
        );
        Ok(())
    }

    pub fn set_user(&self, user: &User) -> Result<()> {
        self.store().set_user(user)?;
        Ok(())
    }

    /// Destroy the session and tell observers to send the user to login.
    pub fn clear(&self, reason: LogoutReason) -> Result<()> {
        let cleared = self.store().clear();
        self.inner.state.send_replace(SessionState::NoSession);
        let _ = self.inner.events.send(SessionEvent::LoggedOut {
            reason,
            redirect_to: self.inner.login_route.clone(),
        });
        log::info!("Session cleared ({reason:?})");
        Ok(cleared?)
    }

    /// Exchange the refresh credential for a new access credential.
    ///
    /// Concurrent callers share a single in-flight exchange. On failure the
    /// session is cleared once, by the exchange itself.
    pub async fn refresh(&self, transport: Arc<dyn HttpTransport>) -> RefreshResult {
        let (generation, shared) = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((generation, shared)) => {
                    log::debug!("Joining in-flight token refresh");
                    (*generation, shared.clone())
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let shared = self.clone().exchange(transport).boxed().shared();
                    *slot = Some((generation, shared.clone()));
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            *slot = None;
        }
        result
    }

    async fn exchange(self, transport: Arc<dyn HttpTransport>) -> RefreshResult {
        let refresh = self
            .refresh_token()
            .map_err(|err| RefreshFailure::Storage(err.to_string()))?
            .ok_or(RefreshFailure::MissingRefreshToken)?;

        self.inner.state.send_replace(SessionState::Refreshing);
        log::info!("Access token expired; refreshing");

        let outcome = self.request_new_access(transport, &refresh).await;
        match &outcome {
            Ok(_) => {
                self.inner.state.send_replace(SessionState::Active);
                log::info!("Access token refreshed");
            }
            Err(failure) => {
                log::warn!("Token refresh failed: {failure}");
                if let Err(err) = self.clear(LogoutReason::RefreshFailed) {
                    log::error!("Failed to clear session after refresh failure: {err}");
                }
            }
        }
        outcome
    }

    async fn request_new_access(
        &self,
        transport: Arc<dyn HttpTransport>,
        refresh: &str,
    ) -> RefreshResult {
        let mut request = ApiRequest::post(REFRESH_PATH)
            .anonymous()
            .json(&RefreshBody { refresh })
            .map_err(|err| RefreshFailure::Transport(err.to_string()))?;
        request.is_refresh = true;

        let response = transport
            .execute(request)
            .await
            .map_err(|err| RefreshFailure::Transport(err.to_string()))?;
        if !response.is_success() {
            return Err(RefreshFailure::Rejected {
                status: response.status,
            });
        }

        let reply: RefreshReply = serde_json::from_value(response.body)
            .map_err(|err| RefreshFailure::Transport(format!("malformed refresh reply: {err}")))?;

        let store = self.store();
        store
            .set_access_token(&reply.access)
            .map_err(|err| RefreshFailure::Storage(err.to_string()))?;
        if let Some(rotated) = reply.refresh.as_deref() {
            store
                .set_refresh_token(rotated)
                .map_err(|err| RefreshFailure::Storage(err.to_string()))?;
        }
        Ok(reply.access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::ApiResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowRefresh {
        calls: AtomicUsize,
        status: u16,
    }

    #[async_trait]
    impl HttpTransport for SlowRefresh {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
            assert!(request.is_refresh);
            assert!(request.bearer.is_none());
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(ApiResponse::new(self.status, json!({"access": "access-2"})))
        }
    }

    fn active_session() -> SessionContext {
        let session = SessionContext::open(SessionStore::in_memory().unwrap(), "/login").unwrap();
        session
            .establish(
                &AuthTokens {
                    access: "access-1".to_string(),
                    refresh: "refresh-1".to_string(),
                },
                None,
            )
            .unwrap();
        session
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_exchange() {
        let session = active_session();
        let transport = Arc::new(SlowRefresh {
            calls: AtomicUsize::new(0),
            status: 200,
        });

        let (a, b, c) = tokio::join!(
            session.refresh(transport.clone()),
            session.refresh(transport.clone()),
            session.refresh(transport.clone()),
        );

        assert_eq!(a, Ok("access-2".to_string()));
        assert_eq!(b, a);
        assert_eq!(c, a);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().unwrap().as_deref(), Some("access-2"));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn later_refresh_starts_a_new_exchange() {
        let session = active_session();
        let transport = Arc::new(SlowRefresh {
            calls: AtomicUsize::new(0),
            status: 200,
        });

        session.refresh(transport.clone()).await.unwrap();
        session.refresh(transport.clone()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_session_and_redirects() {
        let session = active_session();
        let mut events = session.events();
        let transport = Arc::new(SlowRefresh {
            calls: AtomicUsize::new(0),
            status: 401,
        });

        let result = session.refresh(transport).await;
        assert_eq!(result, Err(RefreshFailure::Rejected { status: 401 }));
        assert_eq!(session.state(), SessionState::NoSession);
        assert!(session.access_token().unwrap().is_none());
        assert!(session.refresh_token().unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::RefreshFailed,
                redirect_to: "/login".to_string(),
            }
        );
    }

    #[test]
    fn open_reflects_persisted_state() {
        let session = SessionContext::open(SessionStore::in_memory().unwrap(), "/login").unwrap();
        assert_eq!(session.state(), SessionState::NoSession);
        assert!(!session.is_authenticated());
    }
}
