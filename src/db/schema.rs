//! Database schema and record types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS campaign_counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO campaign_counters (name, value) VALUES ('coupon_count', 0);

CREATE TABLE IF NOT EXISTS sharing_codes (
    code TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sharing_codes_user ON sharing_codes(user_id);

CREATE TABLE IF NOT EXISTS coupon_images (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    encoded TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_profiles (
    user_id TEXT PRIMARY KEY,
    profile TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Counter row holding the number of coupons handed out in the current campaign
pub const COUPON_COUNT: &str = "coupon_count";

/// Format of `followTime` as written by the transport's follow event
pub const FOLLOW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// User profile as stored by the profile collaborator.
///
/// Only `is_admin` and `parent_user_id` are written by the campaign flow;
/// everything else round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Fresh profile for a user who just followed
    pub fn followed_at(follow_time: impl Into<String>) -> Self {
        Self {
            follow_time: Some(follow_time.into()),
            ..Self::default()
        }
    }

    /// Whether this user already redeemed a sharing code
    pub fn has_claimed(&self) -> bool {
        self.parent_user_id.is_some()
    }
}
