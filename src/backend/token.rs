//! # Token Lifecycle Manager
//!
//! Keeps the backend session authenticated for the lifetime of the process.
//!
//! ```text
//! LoggedOut -> Authenticating -> Watching -> (Renewing <-> Watching) -> LoggedOut
//! ```
//!
//! Login failures back off exponentially (5s up to 60s, unbounded). A renewable
//! token is watched and every renewal is written back to the session; when the
//! watcher finishes, the client is recreated and the manager logs in again after
//! a short pause.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session::BackendSession;
use super::watcher::WatchEvent;
use super::{BackendError, SecretResponse};
use crate::constants::TOKEN_SETTLE_DELAY_SECS;
use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;

/// Where the manager is in its login/renewal cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    LoggedOut,
    Authenticating,
    Watching,
    Renewing,
}

/// Drives login, renewal and re-login against the shared session
#[derive(Debug)]
pub struct TokenManager {
    session: Arc<BackendSession>,
    backoff: ExponentialBackoff,
    settle_delay: Duration,
    state: TokenState,
}

impl TokenManager {
    #[must_use]
    pub fn new(session: Arc<BackendSession>) -> Self {
        Self::with_timing(
            session,
            ExponentialBackoff::for_token_renewal(),
            Duration::from_secs(TOKEN_SETTLE_DELAY_SECS),
        )
    }

    /// Manager with custom login backoff and settle pause
    #[must_use]
    pub fn with_timing(
        session: Arc<BackendSession>,
        backoff: ExponentialBackoff,
        settle_delay: Duration,
    ) -> Self {
        Self {
            session,
            backoff,
            settle_delay,
            state: TokenState::LoggedOut,
        }
    }

    #[must_use]
    pub fn state(&self) -> TokenState {
        self.state
    }

    fn transition(&mut self, next: TokenState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Token manager state change");
            self.state = next;
        }
    }

    /// Log in until it works, backing off between failures
    ///
    /// On success the backoff is reset and the token stored in the session.
    pub async fn authenticate(&mut self) -> SecretResponse {
        self.transition(TokenState::Authenticating);
        let addr = self.session.address();

        loop {
            let attempt = match self.session.get_or_create().await {
                Ok(client) => client.login().await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(auth) => {
                    self.backoff.reset();
                    metrics::set_vault_token_error(&addr, 0);
                    if let Some(token) = auth.token() {
                        self.session.set_token(token).await;
                    }
                    return auth;
                }
                Err(e) => {
                    metrics::set_vault_token_error(&addr, chrono::Utc::now().timestamp());
                    let delay = self.backoff.next_backoff();
                    error!(
                        addr = %addr,
                        error = %e,
                        attempt = self.backoff.attempt_count(),
                        "❌ Backend login failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Keep `auth` alive until its watcher finishes
    ///
    /// Returns immediately for non-renewable tokens.
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn watch(&mut self, auth: &SecretResponse) -> Result<(), BackendError> {
        if !auth.is_renewable() {
            debug!("Token is not renewable, nothing to watch");
            return Ok(());
        }

        self.transition(TokenState::Watching);
        let client = self.session.get_or_create().await?;
        let mut watcher = client.new_lease_watcher(auth)?;

        loop {
            match watcher.next_event().await {
                WatchEvent::Renewed(output) => {
                    self.transition(TokenState::Renewing);
                    if let Some(token) = output.secret.token() {
                        self.session.set_token(token).await;
                    }
                    info!(
                        ttl = output.secret.ttl(),
                        renewed_at = %output.renewed_at,
                        "🔁 Backend token renewed"
                    );
                    self.transition(TokenState::Watching);
                }
                WatchEvent::Done(result) => return result,
            }
        }
    }

    /// One full cycle: authenticate, watch, recreate the client, pause
    pub async fn run_cycle(&mut self) {
        let auth = self.authenticate().await;

        if let Err(e) = self.watch(&auth).await {
            warn!(error = %e, "Token renewal stopped");
        }

        self.transition(TokenState::LoggedOut);
        if let Err(e) = self.session.force_refresh().await {
            warn!(error = %e, "Failed to recreate backend client after token expiry");
        }
        tokio::time::sleep(self.settle_delay).await;
    }

    /// Run forever
    pub async fn run(mut self) {
        info!(addr = %self.session.address(), "🔑 Starting token lifecycle manager");
        loop {
            self.run_cycle().await;
        }
    }

    /// Run on a background task
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Start-up authentication
///
/// With token auth the token is only looked up; the lifecycle manager runs only
/// if that token can be renewed. Every other auth mode always gets a manager.
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub async fn start_token_management(
    session: Arc<BackendSession>,
    token_auth: bool,
) -> Result<Option<JoinHandle<()>>, BackendError> {
    let client = session.get_or_create().await?;

    if token_auth {
        let lookup = client.lookup_self().await?;
        let renewable = lookup.data_str("renewable").is_some_and(|r| r == "true");
        info!(renewable = renewable, "Using static backend token");
        if !renewable {
            return Ok(None);
        }
    }

    Ok(Some(TokenManager::new(session).spawn()))
}
