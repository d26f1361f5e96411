//! Encrypted credential storage for captured OAuth identities.
//!
//! One record per platform identity, keyed by the platform-assigned user id.
//! Access and refresh tokens are encrypted at rest with AES-256-GCM (unique
//! nonce per value); everything else is stored in the clear. SQLite provides
//! the durability and the single-statement upsert that keeps a record from
//! ever being half-written.
//!
//! # Security
//!
//! - Master key is supplied from the environment and kept in memory only
//! - Decrypted tokens stay inside the service; anything outward-facing gets
//!   the token-free [`CredentialSummary`] view
//! - Authenticated encryption: a tampered row fails to decrypt

use chrono::{DateTime, Utc};
use serde::Serialize;

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::CredentialStore;

/// A captured OAuth identity and its current token pair.
///
/// `expires_at` is always `grant time + expires_in` of the most recent
/// successful grant; nothing else ever writes it. `origin_address` is
/// advisory — the network origin of the capturing request, if known.
#[derive(Clone, Debug, PartialEq)]
pub struct Credential {
    /// Platform-assigned user id (natural primary key)
    pub identity_id: String,
    /// Latest known display name, refreshed on every capture
    pub display_name: String,
    /// Avatar hash from the identity profile, if any
    pub avatar: Option<String>,
    /// OAuth access token (replayed to the membership API)
    pub access_token: String,
    /// OAuth refresh token (drives batch renewal)
    pub refresh_token: String,
    /// Access token expiry (UTC)
    pub expires_at: DateTime<Utc>,
    /// Origin of the capturing request
    pub origin_address: Option<String>,
    /// First capture time
    pub created_at: DateTime<Utc>,
    /// Most recent successful write
    pub last_updated: DateTime<Utc>,
}

/// Token-free view of a credential, safe to return from the admin API.
#[derive(Clone, Debug, Serialize)]
pub struct CredentialSummary {
    pub identity_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub origin_address: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            identity_id: c.identity_id.clone(),
            display_name: c.display_name.clone(),
            avatar: c.avatar.clone(),
            expires_at: c.expires_at,
            origin_address: c.origin_address.clone(),
            last_updated: c.last_updated,
        }
    }
}
