//! Opaque keyset cursors: serde shape → JSON → URL-safe base64.
//!
//! Cursors are transient and versionless. A stale or mangled token decodes
//! to "no cursor" and the scan restarts from the first page; clients replay
//! cursors freely without ever seeing a hard error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use playmap_core::{PageBound, Place, SortOrder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "s", rename_all = "snake_case")]
pub enum Cursor {
    Popularity { score: f64, id: Uuid },
    Recent { created_at: DateTime<Utc>, id: Uuid },
    Distance { id: Uuid },
}

impl Cursor {
    /// Cursor for resuming after `last`, shaped by the active sort.
    pub fn after(last: &Place, sort: SortOrder) -> Self {
        match sort {
            SortOrder::Popularity => Cursor::Popularity {
                score: last.popularity_score,
                id: last.id,
            },
            SortOrder::Recent => Cursor::Recent {
                created_at: last.created_at,
                id: last.id,
            },
            // Distance is not a stable storage-level ordering key, so the
            // cursor carries identity only.
            SortOrder::Distance => Cursor::Distance { id: last.id },
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor shape always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Any failure (bad base64, bad JSON, unknown shape) yields `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// A cursor minted under a different sort must not constrain this scan.
    pub fn matches_sort(&self, sort: SortOrder) -> bool {
        matches!(
            (self, sort),
            (Cursor::Popularity { .. }, SortOrder::Popularity)
                | (Cursor::Recent { .. }, SortOrder::Recent)
                | (Cursor::Distance { .. }, SortOrder::Distance)
        )
    }

    pub fn bound(&self) -> PageBound {
        match self {
            Cursor::Popularity { score, id } => PageBound::Popularity {
                score: *score,
                id: *id,
            },
            Cursor::Recent { created_at, id } => PageBound::Recent {
                created_at: *created_at,
                id: *id,
            },
            Cursor::Distance { id } => PageBound::AfterId { id: *id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_three_shapes_round_trip() {
        let id = Uuid::new_v4();
        let shapes = [
            Cursor::Popularity { score: 42.5, id },
            Cursor::Recent {
                created_at: Utc::now(),
                id,
            },
            Cursor::Distance { id },
        ];
        for cursor in shapes {
            let encoded = cursor.encode();
            assert_eq!(Cursor::decode(&encoded), Some(cursor));
        }
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert_eq!(Cursor::decode("not base64 at all!!"), None);
        assert_eq!(Cursor::decode(""), None);
        // Valid base64, not a cursor.
        let bogus = URL_SAFE_NO_PAD.encode(b"{\"hello\":\"world\"}");
        assert_eq!(Cursor::decode(&bogus), None);
    }

    #[test]
    fn cursor_sort_mismatch_is_detected() {
        let cursor = Cursor::Distance { id: Uuid::new_v4() };
        assert!(cursor.matches_sort(SortOrder::Distance));
        assert!(!cursor.matches_sort(SortOrder::Popularity));
        assert!(!cursor.matches_sort(SortOrder::Recent));
    }
}
