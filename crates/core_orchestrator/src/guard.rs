use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use core_types::{AuthBackend, AuthStatus, ClientError, ErrorCategory, UserIdentity};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::session::SessionState;

/// Decides whether the protected dashboard may be shown.
///
/// Checks are serialized. A logout bumps the epoch so a check that was in
/// flight at that moment can never publish `Authenticated` afterwards.
pub struct SessionGuard {
    auth: Arc<dyn AuthBackend>,
    session: Arc<SessionState>,
    status: watch::Sender<AuthStatus>,
    check_lock: Mutex<()>,
    epoch: AtomicU64,
}

impl SessionGuard {
    pub fn new(auth: Arc<dyn AuthBackend>, session: Arc<SessionState>) -> Self {
        let (status, _) = watch::channel(AuthStatus::Unknown);
        Self {
            auth,
            session,
            status,
            check_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> AuthStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    /// Re-validates the stored credential. The status stays `Unknown` until the
    /// backend answers, so the gate never flashes the protected view.
    pub async fn check_authenticated(&self) -> AuthStatus {
        let _serial = self.check_lock.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.status.send_replace(AuthStatus::Unknown);

        let user = self.validate().await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("auth check superseded by logout");
            return self.status();
        }
        let outcome = match user {
            Some(user) => {
                if let Err(err) = self.session.store_user(&user) {
                    warn!(error = %err, "failed to cache user identity");
                }
                AuthStatus::Authenticated
            }
            None => AuthStatus::Unauthenticated,
        };
        self.status.send_replace(outcome);
        outcome
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthStatus, ClientError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ClientError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        let tokens = self
            .auth
            .login(username, password)
            .await
            .map_err(|err| {
                warn!(username, error = %err, "login rejected");
                ClientError::backend(ErrorCategory::Critical, &err)
            })?;
        self.session
            .store_tokens(&tokens)
            .map_err(|err| ClientError::backend(ErrorCategory::Critical, &err))?;
        info!(username, "logged in");

        Ok(self.check_authenticated().await)
    }

    /// Makes any in-flight check stale and publishes `Unauthenticated`.
    pub(crate) fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.status.send_replace(AuthStatus::Unauthenticated);
    }

    async fn validate(&self) -> Option<UserIdentity> {
        let Some(token) = self.session.access_token() else {
            debug!("no stored credential");
            return None;
        };

        match self.auth.validate(&token).await {
            Ok(user) => {
                debug!(username = %user.username, "credential accepted");
                Some(user)
            }
            Err(err) => {
                warn!(error = %err, "credential rejected");
                None
            }
        }
    }
}
