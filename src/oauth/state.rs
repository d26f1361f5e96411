//! CSRF state tokens for the login redirect.
//!
//! `/login` mints a single-use state, the provider echoes it back to
//! `/callback`, and a callback with an unknown or expired state is rejected
//! before any token exchange happens.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Single-use login states with automatic expiration.
#[derive(Clone)]
pub struct LoginStateManager {
    states: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    expiry_duration: Duration,
}

impl LoginStateManager {
    /// # Arguments
    /// * `expiry_seconds` - How long a minted state stays valid (600 = 10 minutes)
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    /// Mint a new state token (UUID v4) and remember when it was issued.
    pub fn create_state(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.states.lock().unwrap().insert(state.clone(), Utc::now());
        state
    }

    /// Consume a state token. Returns true if it was known and unexpired.
    /// Either way the token is gone afterwards (single-use).
    pub fn validate_and_consume(&self, state: &str) -> bool {
        let mut states = self.states.lock().unwrap();

        match states.remove(state) {
            Some(issued_at) => Utc::now() - issued_at <= self.expiry_duration,
            None => false,
        }
    }

    /// Drop expired states. Called periodically from a background task.
    pub fn cleanup_expired(&self) {
        let mut states = self.states.lock().unwrap();
        let now = Utc::now();
        states.retain(|_, issued_at| now - *issued_at <= self.expiry_duration);
    }

    /// Number of outstanding states (monitoring/tests).
    pub fn count(&self) -> usize {
        self.states.lock().unwrap().len()
    }
}

/// Background task that periodically prunes expired login states.
pub async fn run_login_state_cleanup(manager: LoginStateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "Login state cleanup complete");
    }
}
