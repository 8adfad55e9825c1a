//! Keyset cursor over ledger rows.

use std::fmt;

use base64::prelude::*;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::ids::LedgerEntryId;
use crate::model::LedgerEntry;

/// Position after a ledger row in `(created_at, id)` order.
///
/// The id breaks ties between rows created at the same instant. On the wire
/// the cursor is an opaque URL-safe base64 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LedgerCursor {
    /// Creation time of the last seen row.
    pub created_at: Timestamp,
    /// Id of the last seen row.
    pub id: LedgerEntryId,
}

impl LedgerCursor {
    /// Creates a cursor from its parts.
    pub fn new(created_at: Timestamp, id: LedgerEntryId) -> Self {
        Self { created_at, id }
    }

    /// Creates a cursor positioned after `entry`.
    pub fn after(entry: &LedgerEntry) -> Self {
        Self::new(entry.created_at, entry.id)
    }

    /// Returns whether `entry` sorts strictly after the cursor.
    pub fn precedes(&self, entry: &LedgerEntry) -> bool {
        (entry.created_at, entry.id) > (self.created_at, self.id)
    }

    /// Encodes the cursor as a URL-safe base64 string.
    pub fn encode(&self) -> String {
        let data = format!("{}|{}", self.created_at, self.id);
        BASE64_URL_SAFE_NO_PAD.encode(data.as_bytes())
    }

    /// Decodes a cursor, returning `None` when malformed.
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let data = String::from_utf8(bytes).ok()?;
        let (created_at, id) = data.split_once('|')?;

        Some(Self {
            created_at: created_at.parse().ok()?,
            id: id.parse().ok()?,
        })
    }
}

impl fmt::Display for LedgerCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<LedgerCursor> for String {
    fn from(cursor: LedgerCursor) -> Self {
        cursor.encode()
    }
}

impl TryFrom<String> for LedgerCursor {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value).ok_or("invalid ledger cursor")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ContactId, StepId};
    use crate::model::LedgerStatus;

    #[test]
    fn test_encode_decode() {
        let cursor = LedgerCursor::new("2024-01-02T03:04:05Z".parse().unwrap(), LedgerEntryId::new());
        let encoded = cursor.encode();
        assert!(!encoded.contains('='));
        assert_eq!(LedgerCursor::decode(&encoded), Some(cursor));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(LedgerCursor::decode("not base64!"), None);
        assert_eq!(LedgerCursor::decode(&BASE64_URL_SAFE_NO_PAD.encode("a|b")), None);
    }

    #[test]
    fn test_precedes_breaks_ties_by_id() {
        let now = Timestamp::now();
        let first = LedgerEntry::new(ContactId::new(), StepId::new(), LedgerStatus::Pending, now);
        let second = LedgerEntry::new(ContactId::new(), StepId::new(), LedgerStatus::Pending, now);

        let cursor = LedgerCursor::after(&first);
        assert!(!cursor.precedes(&first));
        assert!(cursor.precedes(&second));
    }
}
