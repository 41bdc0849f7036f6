//! # Lease Watcher
//!
//! Background task that keeps a token or lease alive. Renewals are reported on a
//! channel; the task finishes through a one-shot channel when the backend stops
//! extending the TTL (maximum lifetime reached) or a renewal fails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::api::ApiConnection;
use super::{BackendError, SecretResponse};

/// A successful renewal
#[derive(Debug, Clone)]
pub struct RenewalOutput {
    pub renewed_at: DateTime<Utc>,
    pub secret: SecretResponse,
}

/// What the watcher reported next
#[derive(Debug)]
pub enum WatchEvent {
    Renewed(RenewalOutput),
    /// `Ok` when the lifetime ran out, `Err` when renewal failed
    Done(Result<(), BackendError>),
}

/// Handle on a running renewal task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct LeaseWatcher {
    renew_rx: mpsc::Receiver<RenewalOutput>,
    done_rx: oneshot::Receiver<Result<(), BackendError>>,
    task: Option<JoinHandle<()>>,
}

impl LeaseWatcher {
    /// Wrap channels fed by something other than the backend renewal task
    #[must_use]
    pub fn from_channels(
        renew_rx: mpsc::Receiver<RenewalOutput>,
        done_rx: oneshot::Receiver<Result<(), BackendError>>,
    ) -> Self {
        Self {
            renew_rx,
            done_rx,
            task: None,
        }
    }

    /// Wait for the next renewal or for the watcher to finish
    pub async fn next_event(&mut self) -> WatchEvent {
        tokio::select! {
            biased;
            Some(output) = self.renew_rx.recv() => WatchEvent::Renewed(output),
            done = &mut self.done_rx => {
                // sender dropped without a verdict: nothing left to watch
                WatchEvent::Done(done.unwrap_or(Ok(())))
            }
        }
    }
}

impl Drop for LeaseWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub(super) fn spawn(client: ApiConnection, secret: SecretResponse) -> LeaseWatcher {
    let (renew_tx, renew_rx) = mpsc::channel(4);
    let (done_tx, done_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let result = renew_until_exhausted(&client, &secret, &renew_tx).await;
        if done_tx.send(result).is_err() {
            debug!("Lease watcher finished after its handle was dropped");
        }
    });

    LeaseWatcher {
        renew_rx,
        done_rx,
        task: Some(task),
    }
}

/// Renew at two thirds of the remaining TTL until the TTL stops growing
async fn renew_until_exhausted(
    client: &ApiConnection,
    secret: &SecretResponse,
    renew_tx: &mpsc::Sender<RenewalOutput>,
) -> Result<(), BackendError> {
    let is_token = secret.auth.is_some();
    let increment = secret.ttl();
    let mut ttl = secret.ttl();

    while ttl > 0 {
        let wait = renewal_delay(ttl);
        tokio::time::sleep(wait).await;

        let renewed = if is_token {
            client.renew_self(increment).await?
        } else {
            client.renew(&secret.lease_id, increment).await?
        };
        let new_ttl = renewed.ttl();
        debug!(ttl = new_ttl, token = is_token, "Renewed backend lease");

        if renew_tx
            .send(RenewalOutput {
                renewed_at: Utc::now(),
                secret: renewed,
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        if new_ttl < ttl {
            // capped by the maximum lifetime; use what is left, then hand back
            tokio::time::sleep(renewal_delay(new_ttl)).await;
            return Ok(());
        }
        ttl = new_ttl;
    }

    Ok(())
}

fn renewal_delay(ttl_secs: i64) -> Duration {
    let secs = u64::try_from(ttl_secs).unwrap_or_default();
    Duration::from_secs((secs * 2 / 3).max(1))
}
