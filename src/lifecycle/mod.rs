//! Token lifecycle orchestration.
//!
//! Owns the three movements of a credential record:
//!
//! 1. **capture** — authorization code arrives at the callback, gets exchanged
//!    for a token pair, and the identity is upserted into the store
//! 2. **renew** — records nearing expiry are refreshed in a batch, each one
//!    independently, with aggregate success/failure accounting
//! 3. **replay** — every stored record is presented to the membership API to
//!    re-add its identity to a target guild
//!
//! A record's failure during a batch never aborts the batch: the record is
//! left exactly as it was, the failure is counted, and the loop moves on.

mod worker;

pub use worker::{run_renewal_sweep, run_sync_worker, SyncJob, SyncQueue};

use crate::credentials::{Credential, CredentialStore};
use crate::membership::MembershipGateway;
use crate::oauth::{ExchangeError, TokenExchanger};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a capture failed.
#[derive(Debug)]
pub enum CaptureError {
    /// The token exchange or profile fetch was rejected — nothing was written
    Exchange(ExchangeError),
    /// The grant succeeded but persisting it failed
    Store(anyhow::Error),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Exchange(e) => write!(f, "Verification failed: {}", e),
            CaptureError::Store(e) => write!(f, "Failed to store credential: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Exchange(e) => Some(e),
            CaptureError::Store(e) => Some(e.as_ref()),
        }
    }
}

/// Aggregate counts for one renewal batch. `renewed + failed == selected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RenewalReport {
    pub selected: u64,
    pub renewed: u64,
    pub failed: u64,
}

/// Aggregate counts for one replay pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub restored: u64,
    pub failed: u64,
}

/// Orchestrates capture, batch renewal, and membership replay over the store.
pub struct LifecycleManager {
    store: Arc<CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
    membership: Arc<dyn MembershipGateway>,
    /// Lookahead for selecting renewal candidates
    renewal_window: Duration,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<CredentialStore>,
        exchanger: Arc<dyn TokenExchanger>,
        membership: Arc<dyn MembershipGateway>,
        renewal_window: Duration,
    ) -> Self {
        Self {
            store,
            exchanger,
            membership,
            renewal_window,
        }
    }

    /// Exchanges an authorization code and upserts the resulting credential.
    ///
    /// Re-capturing a known identity overwrites its record in place; a failed
    /// exchange writes nothing and surfaces to the caller.
    pub async fn capture(
        &self,
        code: &str,
        origin_address: Option<String>,
    ) -> Result<Credential, CaptureError> {
        let grant = self
            .exchanger
            .exchange_code(code)
            .await
            .map_err(CaptureError::Exchange)?;

        let profile = self
            .exchanger
            .fetch_profile(&grant.access_token)
            .await
            .map_err(CaptureError::Exchange)?;

        let now = Utc::now();
        let record = Credential {
            identity_id: profile.id,
            display_name: profile.username,
            avatar: profile.avatar,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: now + Duration::seconds(grant.expires_in),
            origin_address,
            created_at: now, // preserved by the store for existing rows
            last_updated: now,
        };

        let stored = self.store.upsert(&record).map_err(CaptureError::Store)?;

        info!(
            identity_id = %stored.identity_id,
            display_name = %stored.display_name,
            expires_at = %stored.expires_at,
            "Captured identity"
        );

        Ok(stored)
    }

    /// Renews every record expiring within the renewal window.
    ///
    /// Each record is refreshed independently; a rejected refresh (including
    /// a "refresh token already used" race with a concurrent batch) leaves
    /// that record untouched and is counted, never propagated.
    pub async fn renew_batch(&self, now: DateTime<Utc>) -> Result<RenewalReport> {
        let selected = self.store.find_expiring_before(now + self.renewal_window)?;

        let mut renewed: u64 = 0;
        let mut failed: u64 = 0;

        for record in &selected {
            match self.renew_one(record).await {
                Ok(()) => renewed += 1,
                Err(e) => {
                    warn!(
                        identity_id = %record.identity_id,
                        error = %e,
                        "Token renewal failed"
                    );
                    failed += 1;
                }
            }
        }

        let report = RenewalReport {
            selected: selected.len() as u64,
            renewed,
            failed,
        };

        info!(
            selected = report.selected,
            renewed = report.renewed,
            failed = report.failed,
            "Renewal batch complete"
        );

        Ok(report)
    }

    async fn renew_one(&self, record: &Credential) -> Result<()> {
        let grant = self
            .exchanger
            .exchange_refresh_token(&record.refresh_token)
            .await?;

        // Expiry is anchored to the moment the grant succeeded
        let now = Utc::now();
        let updated = Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: now + Duration::seconds(grant.expires_in),
            last_updated: now,
            ..record.clone()
        };

        self.store.upsert(&updated)?;

        debug!(identity_id = %record.identity_id, "Token renewed");
        Ok(())
    }

    /// Replays every stored credential against the membership API.
    ///
    /// `Created` and `AlreadyMember` both count as restored; any error counts
    /// as failed and the loop continues.
    pub async fn replay_all(&self, guild_id: &str) -> Result<ReplayReport> {
        let records = self.store.all()?;

        let mut restored: u64 = 0;
        let mut failed: u64 = 0;

        for record in &records {
            match self
                .membership
                .add_member(guild_id, &record.identity_id, &record.access_token)
                .await
            {
                Ok(outcome) => {
                    debug!(
                        identity_id = %record.identity_id,
                        outcome = ?outcome,
                        "Membership replayed"
                    );
                    restored += 1;
                }
                Err(e) => {
                    warn!(
                        identity_id = %record.identity_id,
                        error = %e,
                        "Membership replay failed"
                    );
                    failed += 1;
                }
            }
        }

        let report = ReplayReport { restored, failed };

        info!(
            guild_id = %guild_id,
            restored = report.restored,
            failed = report.failed,
            "Membership replay complete"
        );

        Ok(report)
    }
}
