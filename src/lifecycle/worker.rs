//! Fire-and-forget dispatch for renewal batches.
//!
//! The admin trigger enqueues a job and acknowledges immediately; a single
//! worker task drains the queue and runs one batch at a time to completion.
//! An optional sweep task enqueues on a timer so renewal happens even when
//! nobody pokes the admin API.

use super::LifecycleManager;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// A unit of background work.
#[derive(Debug)]
pub enum SyncJob {
    /// Run one renewal batch over the current expiry window
    RenewBatch,
}

/// Sending half of the background queue, cloned into request handlers.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncJob>,
}

impl SyncQueue {
    /// Creates the queue and the receiver the worker drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a renewal batch. Returns false if the worker is gone.
    pub fn enqueue_renewal(&self) -> bool {
        self.tx.send(SyncJob::RenewBatch).is_ok()
    }
}

/// Drains the queue, one job at a time. Runs until every sender is dropped.
pub async fn run_sync_worker(
    manager: Arc<LifecycleManager>,
    mut rx: mpsc::UnboundedReceiver<SyncJob>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            SyncJob::RenewBatch => match manager.renew_batch(Utc::now()).await {
                Ok(report) => info!(
                    selected = report.selected,
                    renewed = report.renewed,
                    failed = report.failed,
                    "Background renewal batch finished"
                ),
                Err(e) => error!(error = %e, "Background renewal batch failed"),
            },
        }
    }
}

/// Enqueues a renewal batch every `interval_minutes`.
///
/// The immediate first tick is consumed so the first sweep lands a full
/// interval after startup.
pub async fn run_renewal_sweep(queue: SyncQueue, interval_minutes: u64) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(interval_minutes * 60));
    interval.tick().await;

    loop {
        interval.tick().await;
        info!("Renewal sweep: enqueueing batch");
        if !queue.enqueue_renewal() {
            // Worker is gone; nothing left to sweep for
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_reports_worker_liveness() {
        let (queue, rx) = SyncQueue::new();
        assert!(queue.enqueue_renewal());

        drop(rx);
        assert!(!queue.enqueue_renewal());
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        use crate::credentials::{Credential, CredentialStore};
        use crate::membership::{MembershipGateway, MembershipOutcome, ReplayError};
        use crate::oauth::{ExchangeError, IdentityProfile, TokenExchanger, TokenGrant};
        use async_trait::async_trait;
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
        use chrono::Duration;

        struct Exchanger;

        #[async_trait]
        impl TokenExchanger for Exchanger {
            async fn exchange_code(&self, _: &str) -> Result<TokenGrant, ExchangeError> {
                unreachable!("worker only renews")
            }
            async fn exchange_refresh_token(
                &self,
                refresh_token: &str,
            ) -> Result<TokenGrant, ExchangeError> {
                Ok(TokenGrant {
                    access_token: "renewed".to_string(),
                    refresh_token: format!("rotated-{}", refresh_token),
                    expires_in: 604800,
                })
            }
            async fn fetch_profile(&self, _: &str) -> Result<IdentityProfile, ExchangeError> {
                unreachable!("worker only renews")
            }
        }

        struct Gateway;

        #[async_trait]
        impl MembershipGateway for Gateway {
            async fn add_member(
                &self,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<MembershipOutcome, ReplayError> {
                unreachable!("worker only renews")
            }
        }

        let key = BASE64.encode([0u8; 32]);
        let store = std::sync::Arc::new(CredentialStore::open(":memory:", &key).unwrap());
        let now = Utc::now();
        store
            .upsert(&Credential {
                identity_id: "42".to_string(),
                display_name: "somebody".to_string(),
                avatar: None,
                access_token: "stale".to_string(),
                refresh_token: "refresh-42".to_string(),
                expires_at: now + Duration::days(1),
                origin_address: None,
                created_at: now,
                last_updated: now,
            })
            .unwrap();

        let manager = Arc::new(LifecycleManager::new(
            Arc::clone(&store),
            Arc::new(Exchanger),
            Arc::new(Gateway),
            Duration::days(7),
        ));

        let (queue, rx) = SyncQueue::new();
        let worker = tokio::spawn(run_sync_worker(manager, rx));

        assert!(queue.enqueue_renewal());
        drop(queue); // worker exits after draining

        worker.await.unwrap();

        let renewed = store.get("42").unwrap().unwrap();
        assert_eq!(renewed.access_token, "renewed");
        assert_eq!(renewed.refresh_token, "rotated-refresh-42");
    }
}
