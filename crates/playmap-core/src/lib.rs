//! Core domain model for Playmap: places, mentions, collection logs,
//! verification checks and the query/sort vocabulary shared by every crate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "playmap-core";

/// Canonical venue/event taxonomy. Provider category codes map onto these;
/// anything unrecognized falls back to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Performance,
    Exhibition,
    Museum,
    Library,
    Park,
    Playground,
    Experience,
    Festival,
    Sports,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Performance,
        Category::Exhibition,
        Category::Museum,
        Category::Library,
        Category::Park,
        Category::Playground,
        Category::Experience,
        Category::Festival,
        Category::Sports,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Performance => "performance",
            Category::Exhibition => "exhibition",
            Category::Museum => "museum",
            Category::Library => "library",
            Category::Park => "park",
            Category::Playground => "playground",
            Category::Experience => "experience",
            Category::Festival => "festival",
            Category::Sports => "sports",
            Category::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Category> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == value.trim().to_ascii_lowercase())
    }
}

/// `(source, source_id)` pair uniquely identifying an externally-sourced
/// record. Immutable once set; the dedup key for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub source: String,
    pub source_id: String,
}

impl NaturalKey {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
        }
    }
}

/// Normalized adapter handoff into the ingestion pipeline. Everything a
/// provider can tell us about a venue, minus identity and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDraft {
    pub source: String,
    pub source_id: String,
    pub name: String,
    pub category: Category,
    pub address: Option<String>,
    pub district: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub price: Option<String>,
    pub age_range: Option<String>,
    pub indoor: Option<bool>,
    pub facility_tags: Vec<String>,
}

impl PlaceDraft {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.source.clone(), self.source_id.clone())
    }
}

/// Canonical persisted place/event record.
///
/// `popularity_score`, `is_active` and `display_eligible` are derived state:
/// only the scoring/lifecycle batches write them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: Uuid,
    pub name: String,
    pub category: Category,
    pub address: Option<String>,
    pub district: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub price: Option<String>,
    pub age_range: Option<String>,
    pub indoor: Option<bool>,
    pub facility_tags: Vec<String>,
    pub is_active: bool,
    pub display_eligible: bool,
    pub popularity_score: f64,
    pub source: String,
    pub source_id: String,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Place {
    /// Materialize a draft into a fresh (inactive, unscored) record.
    pub fn from_draft(draft: PlaceDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            category: draft.category,
            address: draft.address,
            district: draft.district,
            lat: draft.lat,
            lng: draft.lng,
            start_date: draft.start_date,
            end_date: draft.end_date,
            price: draft.price,
            age_range: draft.age_range,
            indoor: draft.indoor,
            facility_tags: draft.facility_tags,
            is_active: false,
            display_eligible: false,
            popularity_score: 0.0,
            source: draft.source,
            source_id: draft.source_id,
            last_verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.source.clone(), self.source_id.clone())
    }

    pub fn position(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        }
    }
}

/// A single observed reference to a place (blog post, listing, article).
/// Immutable once written; feeds the scoring aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: Uuid,
    pub place_id: Uuid,
    pub source_tag: String,
    pub mentioned_at: DateTime<Utc>,
    pub relevant: bool,
}

/// Terminal status of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Error,
}

/// One append-only audit row per ingestion run per collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionLog {
    pub id: Uuid,
    pub collector: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: u64,
    pub new_records: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub status: RunStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Timestamped proof-of-freshness event for a place. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub id: Uuid,
    pub place_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub method: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("bounding box coordinates must be finite numbers")]
    NonFinite,
    #[error("bounding box min must be strictly less than max on both axes")]
    Inverted,
    #[error("latitude must be within [-90, 90] and longitude within [-180, 180]")]
    OutOfRange,
}

/// Caller-supplied viewport. Mandatory on every listing query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Result<Self, GeoError> {
        let bbox = Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), GeoError> {
        let coords = [self.min_lat, self.min_lng, self.max_lat, self.max_lng];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(GeoError::NonFinite);
        }
        if self.min_lat >= self.max_lat || self.min_lng >= self.max_lng {
            return Err(GeoError::Inverted);
        }
        if self.min_lat < -90.0 || self.max_lat > 90.0 || self.min_lng < -180.0 || self.max_lng > 180.0
        {
            return Err(GeoError::OutOfRange);
        }
        Ok(())
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }
}

/// Listing sort strategies. Each carries a deterministic id tie-break so the
/// composite order is total and keyset pages never skip or duplicate rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Distance,
    Popularity,
    Recent,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<SortOrder> {
        match value.trim().to_ascii_lowercase().as_str() {
            "distance" => Some(SortOrder::Distance),
            "popularity" => Some(SortOrder::Popularity),
            "recent" => Some(SortOrder::Recent),
            _ => None,
        }
    }
}

/// Keyset resume point, decoded from the request cursor. The storage layer
/// returns rows strictly "after" this point under the active sort.
#[derive(Debug, Clone, PartialEq)]
pub enum PageBound {
    /// Rows with (score, id) lexicographically below the tuple.
    Popularity { score: f64, id: Uuid },
    /// Rows with (created_at, id) lexicographically below the tuple.
    Recent { created_at: DateTime<Utc>, id: Uuid },
    /// Distance pages resume on id only; ordering is re-derived in memory.
    AfterId { id: Uuid },
}

/// Filter + sort + keyset parameters for one listing scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceQuery {
    pub bbox: BoundingBox,
    pub categories: Vec<Category>,
    pub facility_tags: Vec<String>,
    pub indoor: Option<bool>,
    pub text: Option<String>,
    pub min_score: f64,
    pub active_only: bool,
    /// Restrict to records inside the per-district display cap. Applied at
    /// coarse zoom when no narrowing filter is present; category/text
    /// searches still reach capped-out records.
    pub display_eligible_only: bool,
    pub sort: SortOrder,
    pub bound: Option<PageBound>,
    pub limit: usize,
}

impl PlaceQuery {
    pub fn new(bbox: BoundingBox, sort: SortOrder, limit: usize) -> Self {
        Self {
            bbox,
            categories: Vec::new(),
            facility_tags: Vec::new(),
            indoor: None,
            text: None,
            min_score: 0.0,
            active_only: true,
            display_eligible_only: false,
            sort,
            bound: None,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_round_trips() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("no-such-category"), None);
    }

    #[test]
    fn bounding_box_rejects_inverted_and_out_of_range() {
        assert!(BoundingBox::new(37.4, 126.8, 37.7, 127.2).is_ok());
        assert!(matches!(
            BoundingBox::new(37.7, 126.8, 37.4, 127.2),
            Err(GeoError::Inverted)
        ));
        assert!(matches!(
            BoundingBox::new(-95.0, 126.8, 37.4, 127.2),
            Err(GeoError::OutOfRange)
        ));
        assert!(matches!(
            BoundingBox::new(f64::NAN, 126.8, 37.4, 127.2),
            Err(GeoError::NonFinite)
        ));
    }

    #[test]
    fn bounding_box_contains_is_inclusive() {
        let bbox = BoundingBox::new(37.4, 126.8, 37.7, 127.2).unwrap();
        assert!(bbox.contains(GeoPoint { lat: 37.4, lng: 126.8 }));
        assert!(bbox.contains(GeoPoint { lat: 37.55, lng: 127.0 }));
        assert!(!bbox.contains(GeoPoint { lat: 37.8, lng: 127.0 }));
    }

    #[test]
    fn sort_order_parse_is_case_insensitive() {
        assert_eq!(SortOrder::parse("Popularity"), Some(SortOrder::Popularity));
        assert_eq!(SortOrder::parse(" recent "), Some(SortOrder::Recent));
        assert_eq!(SortOrder::parse("distance"), Some(SortOrder::Distance));
        assert_eq!(SortOrder::parse("alphabetical"), None);
    }
}
