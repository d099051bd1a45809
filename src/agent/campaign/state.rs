//! Global campaign state held by the campaign agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// How a successful claim is counted against the supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMode {
    /// The claim is granted by a conditional increment; never over-issues
    #[default]
    Atomic,
    /// Read the counter, then increment it in a separate write. Concurrent
    /// claims near the limit can all pass the check.
    Racy,
}

impl FromStr for ClaimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(ClaimMode::Atomic),
            "racy" => Ok(ClaimMode::Racy),
            other => Err(format!("unknown claim mode '{other}' (expected 'atomic' or 'racy')")),
        }
    }
}

impl fmt::Display for ClaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimMode::Atomic => f.write_str("atomic"),
            ClaimMode::Racy => f.write_str("racy"),
        }
    }
}

/// Point-in-time copy of the campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CampaignSnapshot {
    /// Coupons on offer; zero or less means the campaign is closed
    pub available: i64,
    pub started_at: Option<DateTime<Utc>>,
    /// Serial the next sharing code will be minted from
    pub next_serial: u32,
}

impl CampaignSnapshot {
    pub fn is_open(&self) -> bool {
        self.available > 0
    }
}

/// Single authoritative campaign state.
///
/// Lives in process memory; a second replica would have its own copy.
#[derive(Debug, Default)]
pub struct CampaignState {
    inner: Mutex<CampaignSnapshot>,
}

impl CampaignState {
    /// Closed campaign minting from `next_serial`
    pub fn new(next_serial: u32) -> Self {
        Self {
            inner: Mutex::new(CampaignSnapshot {
                next_serial,
                ..CampaignSnapshot::default()
            }),
        }
    }

    // The snapshot is plain data, so a panic elsewhere cannot leave it torn
    fn lock(&self) -> MutexGuard<'_, CampaignSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> CampaignSnapshot {
        *self.lock()
    }

    /// Open with `available` coupons, stamping the start instant
    pub fn open(&self, available: i64, now: DateTime<Utc>) {
        let mut state = self.lock();
        state.available = available;
        state.started_at = Some(now);
    }

    /// Change the supply of a running campaign
    pub fn set_available(&self, available: i64) {
        self.lock().available = available;
    }

    pub fn close(&self) {
        self.lock().available = 0;
    }

    /// Take the next sharing-code serial
    pub fn mint_serial(&self) -> u32 {
        let mut state = self.lock();
        let serial = state.next_serial;
        state.next_serial = serial.saturating_add(1);
        serial
    }
}
