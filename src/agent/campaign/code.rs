//! Six-digit sharing codes

use std::fmt;

const CODE_LEN: usize = 6;
const MAX_SERIAL: u32 = 999_999;

/// Zero-padded six-digit decimal code minted for an inviter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharingCode(String);

impl SharingCode {
    /// Code for a mint serial; `None` once six digits no longer fit
    pub fn from_serial(serial: u32) -> Option<Self> {
        (serial <= MAX_SERIAL).then(|| Self(format!("{serial:06}")))
    }

    /// Accept exactly six ASCII digits, ignoring surrounding whitespace
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        (text.len() == CODE_LEN && text.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SharingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
