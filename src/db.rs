//! Database module for the campaign bot
//!
//! Durable counters, sharing-code ownership, the coupon image and user
//! profiles, all in one SQLite file.

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Malformed profile for {user_id}: {source}")]
    MalformedProfile {
        user_id: String,
        source: serde_json::Error,
    },
    #[error("Sharing code already minted: {0}")]
    SharingCodeExists(String),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Claim Counter ====================

    /// Number of coupons handed out in the current campaign
    pub fn claim_count(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT value FROM campaign_counters WHERE name = ?1",
            params![COUPON_COUNT],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn increment_claim_count(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE campaign_counters SET value = value + 1 WHERE name = ?1",
            params![COUPON_COUNT],
        )?;
        Ok(())
    }

    pub fn reset_claim_count(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE campaign_counters SET value = 0 WHERE name = ?1",
            params![COUPON_COUNT],
        )?;
        Ok(())
    }

    /// Count one claim only while fewer than `limit` have been handed out.
    ///
    /// The check and the increment are a single UPDATE, so concurrent callers
    /// can never push the counter past `limit`.
    pub fn claim_unit(&self, limit: i64) -> DbResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE campaign_counters SET value = value + 1 WHERE name = ?1 AND value < ?2",
            params![COUPON_COUNT, limit],
        )?;
        Ok(updated == 1)
    }

    // ==================== Sharing Codes ====================

    /// Record the issuing user of a freshly minted sharing code.
    ///
    /// Codes are immutable: minting an existing code fails.
    pub fn set_sharing_owner(&self, code: &str, user_id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO sharing_codes (code, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![code, user_id, Utc::now().to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(DbError::SharingCodeExists(code.to_string()));
        }
        Ok(())
    }

    pub fn sharing_owner(&self, code: &str) -> DbResult<Option<String>> {
        let conn = self.conn()?;
        let owner = conn
            .query_row(
                "SELECT user_id FROM sharing_codes WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Highest serial ever minted, used to re-seed the serial after a restart
    pub fn highest_sharing_serial(&self) -> DbResult<Option<u32>> {
        let conn = self.conn()?;
        let code: Option<String> = conn
            .query_row("SELECT MAX(code) FROM sharing_codes", [], |row| row.get(0))?;
        Ok(code.and_then(|c| c.parse().ok()))
    }

    // ==================== Coupon Image ====================

    pub fn coupon_image(&self) -> DbResult<Option<String>> {
        let conn = self.conn()?;
        let encoded = conn
            .query_row("SELECT encoded FROM coupon_images WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(encoded)
    }

    pub fn set_coupon_image(&self, encoded: &str) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO coupon_images (id, encoded, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET encoded = excluded.encoded, updated_at = excluded.updated_at",
            params![encoded, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ==================== User Profiles ====================

    pub fn get_profile(&self, user_id: &str) -> DbResult<Option<UserProfile>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT profile FROM user_profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|source| DbError::MalformedProfile {
                user_id: user_id.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn store_profile(&self, user_id: &str, profile: &UserProfile) -> DbResult<()> {
        let json = serde_json::to_string(profile).map_err(|source| DbError::MalformedProfile {
            user_id: user_id.to_string(),
            source,
        })?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_profiles (user_id, profile, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at",
            params![user_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Create a profile stamped with the follow time unless one exists.
    ///
    /// Returns whether a new profile was written.
    pub fn record_follow(&self, user_id: &str, follow_time: &str) -> DbResult<bool> {
        let profile = UserProfile::followed_at(follow_time);
        let json = serde_json::to_string(&profile).map_err(|source| DbError::MalformedProfile {
            user_id: user_id.to_string(),
            source,
        })?;
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO user_profiles (user_id, profile, updated_at) VALUES (?1, ?2, ?3)",
            params![user_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_counter_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.claim_count().unwrap(), 0);

        db.increment_claim_count().unwrap();
        db.increment_claim_count().unwrap();
        assert_eq!(db.claim_count().unwrap(), 2);

        db.reset_claim_count().unwrap();
        assert_eq!(db.claim_count().unwrap(), 0);
    }

    #[test]
    fn test_claim_unit_stops_at_limit() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.claim_unit(2).unwrap());
        assert!(db.claim_unit(2).unwrap());
        assert!(!db.claim_unit(2).unwrap());
        assert_eq!(db.claim_count().unwrap(), 2);

        // A closed campaign grants nothing
        db.reset_claim_count().unwrap();
        assert!(!db.claim_unit(0).unwrap());
        assert_eq!(db.claim_count().unwrap(), 0);
    }

    #[test]
    fn test_sharing_codes_are_immutable() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.highest_sharing_serial().unwrap(), None);

        db.set_sharing_owner("000000", "alice").unwrap();
        db.set_sharing_owner("000007", "bob").unwrap();

        assert_eq!(db.sharing_owner("000000").unwrap().as_deref(), Some("alice"));
        assert_eq!(db.sharing_owner("123456").unwrap(), None);
        assert_eq!(db.highest_sharing_serial().unwrap(), Some(7));

        let err = db.set_sharing_owner("000000", "mallory").unwrap_err();
        assert!(matches!(err, DbError::SharingCodeExists(code) if code == "000000"));
        assert_eq!(db.sharing_owner("000000").unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_coupon_image_replaced() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.coupon_image().unwrap(), None);

        db.set_coupon_image("first").unwrap();
        db.set_coupon_image("second").unwrap();
        assert_eq!(db.coupon_image().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_profile_round_trip_keeps_unknown_fields() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_profile("alice").unwrap().is_none());

        let mut profile: UserProfile = serde_json::from_value(serde_json::json!({
            "followTime": "2026-01-02 03:04:05",
            "weight": 61,
        }))
        .unwrap();
        assert!(!profile.is_admin);
        assert!(!profile.has_claimed());

        profile.is_admin = true;
        db.store_profile("alice", &profile).unwrap();

        let loaded = db.get_profile("alice").unwrap().unwrap();
        assert!(loaded.is_admin);
        assert_eq!(loaded.follow_time.as_deref(), Some("2026-01-02 03:04:05"));
        assert_eq!(loaded.extra.get("weight"), Some(&serde_json::json!(61)));
    }

    #[test]
    fn test_record_follow_does_not_overwrite() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.record_follow("alice", "2026-01-01 00:00:00").unwrap());
        let mut profile = db.get_profile("alice").unwrap().unwrap();
        profile.parent_user_id = Some("bob".to_string());
        db.store_profile("alice", &profile).unwrap();

        assert!(!db.record_follow("alice", "2026-05-05 00:00:00").unwrap());
        let loaded = db.get_profile("alice").unwrap().unwrap();
        assert_eq!(loaded.follow_time.as_deref(), Some("2026-01-01 00:00:00"));
        assert_eq!(loaded.parent_user_id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_reopen_on_disk_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.db");

        {
            let db = Database::open(&path).unwrap();
            db.increment_claim_count().unwrap();
            db.set_sharing_owner("000003", "alice").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.claim_count().unwrap(), 1);
        assert_eq!(db.highest_sharing_serial().unwrap(), Some(3));
    }
}
