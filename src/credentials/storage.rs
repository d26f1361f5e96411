//! SQLite-backed credential store.
//!
//! # Schema
//! ```sql
//! CREATE TABLE members (
//!     identity_id TEXT PRIMARY KEY,     -- platform user id
//!     display_name TEXT NOT NULL,
//!     avatar TEXT,
//!     access_token TEXT NOT NULL,       -- encrypted
//!     access_token_nonce TEXT NOT NULL,
//!     refresh_token TEXT NOT NULL,      -- encrypted
//!     refresh_token_nonce TEXT NOT NULL,
//!     expires_at TEXT NOT NULL,         -- RFC 3339 UTC, fixed precision
//!     origin_address TEXT,
//!     created_at TEXT NOT NULL,
//!     last_updated TEXT NOT NULL
//! );
//! ```
//!
//! Upserts are a single `INSERT ... ON CONFLICT DO UPDATE` statement, so a
//! record is either fully replaced or untouched; a failed renewal can never
//! leave a token pair from one grant next to an expiry from another.
//!
//! # Thread Safety
//! The connection is wrapped in a `Mutex`; SQLite itself runs in serialized
//! mode.

use super::{encryption::TokenCipher, Credential};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Durable mapping from identity id to credential record.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

/// Timestamps are stored RFC 3339 UTC with microsecond precision. The fixed
/// width keeps lexicographic `<` on the TEXT column aligned with time order,
/// which the expiry-window scan relies on.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse stored timestamp '{}'", raw))
}

/// Row image before token decryption.
struct RawRow {
    identity_id: String,
    display_name: String,
    avatar: Option<String>,
    access_token: String,
    access_token_nonce: String,
    refresh_token: String,
    refresh_token_nonce: String,
    expires_at: String,
    origin_address: Option<String>,
    created_at: String,
    last_updated: String,
}

const SELECT_COLUMNS: &str = "identity_id, display_name, avatar, \
     access_token, access_token_nonce, refresh_token, refresh_token_nonce, \
     expires_at, origin_address, created_at, last_updated";

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        identity_id: row.get(0)?,
        display_name: row.get(1)?,
        avatar: row.get(2)?,
        access_token: row.get(3)?,
        access_token_nonce: row.get(4)?,
        refresh_token: row.get(5)?,
        refresh_token_nonce: row.get(6)?,
        expires_at: row.get(7)?,
        origin_address: row.get(8)?,
        created_at: row.get(9)?,
        last_updated: row.get(10)?,
    })
}

impl CredentialStore {
    /// Opens (or creates) the credential database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite file (`:memory:` in tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn open<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher = TokenCipher::from_base64_key(encryption_key)
            .context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS members (
                identity_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                avatar TEXT,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                refresh_token_nonce TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                origin_address TEXT,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create members table")?;

        // The renewal sweep scans by expiry
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_members_expires_at ON members(expires_at)",
            [],
        )
        .context("Failed to create expiry index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Inserts or fully overwrites the record for `record.identity_id`.
    ///
    /// All mutable fields are replaced; `created_at` of an existing row is
    /// preserved. Returns the stored record.
    pub fn upsert(&self, record: &Credential) -> Result<Credential> {
        let (access_token, access_token_nonce) = self
            .cipher
            .seal(&record.access_token)
            .context("Failed to encrypt access token")?;
        let (refresh_token, refresh_token_nonce) = self
            .cipher
            .seal(&record.refresh_token)
            .context("Failed to encrypt refresh token")?;

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO members (
                    identity_id, display_name, avatar,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, origin_address, created_at, last_updated
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(identity_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    avatar = excluded.avatar,
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    origin_address = excluded.origin_address,
                    last_updated = excluded.last_updated
                "#,
                params![
                    record.identity_id,
                    record.display_name,
                    record.avatar,
                    access_token,
                    access_token_nonce,
                    refresh_token,
                    refresh_token_nonce,
                    fmt_ts(record.expires_at),
                    record.origin_address,
                    fmt_ts(record.created_at),
                    fmt_ts(record.last_updated),
                ],
            )
            .context("Failed to upsert credential")?;

        self.get(&record.identity_id)?
            .context("Upserted credential missing on read-back")
    }

    /// Looks up a single record by identity id.
    pub fn get(&self, identity_id: &str) -> Result<Option<Credential>> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM members WHERE identity_id = ?1",
                    SELECT_COLUMNS
                ))
                .context("Failed to prepare query")?;

            let mut rows = stmt
                .query_map(params![identity_id], raw_from_row)
                .context("Failed to execute query")?
                .collect::<rusqlite::Result<Vec<RawRow>>>()
                .context("Failed to read row")?;
            rows.pop()
        };

        raw.map(|r| self.decode(r)).transpose()
    }

    /// All records whose `expires_at` is strictly before `threshold`.
    /// Order is unspecified.
    pub fn find_expiring_before(&self, threshold: DateTime<Utc>) -> Result<Vec<Credential>> {
        let raws = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM members WHERE expires_at < ?1",
                    SELECT_COLUMNS
                ))
                .context("Failed to prepare query")?;

            let raws = stmt
                .query_map(params![fmt_ts(threshold)], raw_from_row)
                .context("Failed to execute query")?
                .collect::<rusqlite::Result<Vec<RawRow>>>()
                .context("Failed to read rows")?;
            raws
        };

        raws.into_iter().map(|r| self.decode(r)).collect()
    }

    /// Full scan, used by replay and the admin dashboard. Order unspecified.
    pub fn all(&self) -> Result<Vec<Credential>> {
        let raws = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM members", SELECT_COLUMNS))
                .context("Failed to prepare query")?;

            let raws = stmt
                .query_map([], raw_from_row)
                .context("Failed to execute query")?
                .collect::<rusqlite::Result<Vec<RawRow>>>()
                .context("Failed to read rows")?;
            raws
        };

        raws.into_iter().map(|r| self.decode(r)).collect()
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn
            .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))
            .context("Failed to count members")?;
        Ok(count)
    }

    fn decode(&self, raw: RawRow) -> Result<Credential> {
        let access_token = self
            .cipher
            .open(&raw.access_token, &raw.access_token_nonce)
            .context("Failed to decrypt access token")?;
        let refresh_token = self
            .cipher
            .open(&raw.refresh_token, &raw.refresh_token_nonce)
            .context("Failed to decrypt refresh token")?;

        Ok(Credential {
            identity_id: raw.identity_id,
            display_name: raw.display_name,
            avatar: raw.avatar,
            access_token,
            refresh_token,
            expires_at: parse_ts(&raw.expires_at)?,
            origin_address: raw.origin_address,
            created_at: parse_ts(&raw.created_at)?,
            last_updated: parse_ts(&raw.last_updated)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::{Duration, TimeZone};

    fn test_key() -> String {
        BASE64.encode([0u8; 32])
    }

    fn test_store() -> CredentialStore {
        CredentialStore::open(":memory:", &test_key()).expect("Failed to create test store")
    }

    /// Whole-second timestamps so storage round-trips compare exactly.
    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, hour, 0, 0).unwrap()
    }

    fn test_credential(identity_id: &str) -> Credential {
        Credential {
            identity_id: identity_id.to_string(),
            display_name: "somebody".to_string(),
            avatar: Some("a1b2c3".to_string()),
            access_token: "access-token-12345".to_string(),
            refresh_token: "refresh-token-67890".to_string(),
            expires_at: ts(12) + Duration::days(7),
            origin_address: Some("1.2.3.4".to_string()),
            created_at: ts(12),
            last_updated: ts(12),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = test_store();
        let record = test_credential("100");

        let stored = store.upsert(&record).expect("Failed to upsert");
        assert_eq!(stored.identity_id, "100");
        assert_eq!(stored.display_name, "somebody");

        let fetched = store.get("100").unwrap().expect("record not found");
        assert_eq!(fetched.access_token, record.access_token);
        assert_eq!(fetched.refresh_token, record.refresh_token);
        assert_eq!(fetched.expires_at, record.expires_at);
        assert_eq!(fetched.origin_address, record.origin_address);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = test_store();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let store = test_store();
        let first = test_credential("100");
        store.upsert(&first).unwrap();

        let second = Credential {
            display_name: "renamed".to_string(),
            access_token: "new-access".to_string(),
            refresh_token: "new-refresh".to_string(),
            expires_at: ts(12) + Duration::days(14),
            created_at: ts(13), // ignored for existing rows
            last_updated: ts(13),
            ..first.clone()
        };
        store.upsert(&second).unwrap();

        assert_eq!(store.count().unwrap(), 1);

        let fetched = store.get("100").unwrap().unwrap();
        assert_eq!(fetched.display_name, "renamed");
        assert_eq!(fetched.access_token, "new-access");
        assert_eq!(fetched.refresh_token, "new-refresh");
        assert_eq!(fetched.expires_at, ts(12) + Duration::days(14));
        assert_eq!(fetched.last_updated, ts(13));
        // created_at of the original row survives the overwrite
        assert_eq!(fetched.created_at, ts(12));
    }

    #[test]
    fn test_expiry_window_selection() {
        let store = test_store();
        let now = ts(12);

        let mut soon = test_credential("soon");
        soon.expires_at = now + Duration::days(6);
        store.upsert(&soon).unwrap();

        let mut later = test_credential("later");
        later.expires_at = now + Duration::days(8);
        store.upsert(&later).unwrap();

        let selected = store.find_expiring_before(now + Duration::days(7)).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].identity_id, "soon");
    }

    #[test]
    fn test_expiry_threshold_is_exclusive() {
        let store = test_store();
        let threshold = ts(12) + Duration::days(7);

        let mut exact = test_credential("exact");
        exact.expires_at = threshold;
        store.upsert(&exact).unwrap();

        assert!(store.find_expiring_before(threshold).unwrap().is_empty());
    }

    #[test]
    fn test_all_and_count() {
        let store = test_store();
        store.upsert(&test_credential("1")).unwrap();
        store.upsert(&test_credential("2")).unwrap();
        store.upsert(&test_credential("3")).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(store.count().unwrap(), 3);

        let mut ids: Vec<String> = all.into_iter().map(|c| c.identity_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_tokens_encrypted_at_rest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("vault.db");

        let store = CredentialStore::open(&db_path, &test_key()).unwrap();
        store.upsert(&test_credential("100")).unwrap();
        drop(store);

        // Read the raw column with a plain connection: no plaintext on disk
        let conn = Connection::open(&db_path).unwrap();
        let (raw_access, raw_refresh): (String, String) = conn
            .query_row(
                "SELECT access_token, refresh_token FROM members WHERE identity_id = '100'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();

        assert_ne!(raw_access, "access-token-12345");
        assert_ne!(raw_refresh, "refresh-token-67890");
    }

    #[test]
    fn test_invalid_encryption_key() {
        assert!(CredentialStore::open(":memory:", "short").is_err());
        assert!(CredentialStore::open(":memory:", "not-valid-base64!@#$").is_err());
    }
}
