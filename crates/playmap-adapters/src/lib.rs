//! Source adapter contracts and shared normalization for upstream providers.
//!
//! Each adapter is stateless: it fetches one page of provider data, renames
//! fields into the canonical draft shape and maps provider category codes
//! onto the internal taxonomy. Paging tokens and page sizes are
//! adapter-specific; page size is pinned to the provider's documented
//! maximum.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use playmap_core::PlaceDraft;
use playmap_storage::{FetchError, HttpFetcher};

pub mod seoul;
pub mod tour_api;

pub use seoul::SeoulEventsAdapter;
pub use tour_api::TourApiAdapter;

pub const CRATE_NAME: &str = "playmap-adapters";

/// Provider integer-scaled coordinates carry seven implied decimal places.
pub const COORD_DIVISOR: f64 = 10_000_000.0;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("upstream fetch failed: {0}")]
    Upstream(#[from] FetchError),
    #[error("malformed provider payload: {0}")]
    Payload(String),
}

/// Run-scoped inputs shared by every fetch. Credentials come from the config
/// struct built at startup, never from ad hoc env reads inside adapters;
/// `fetched_at` stamps every record created during the run.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub service_key: String,
    pub fetched_at: DateTime<Utc>,
}

/// One independent slice of an upstream result set (e.g. content-type ×
/// area-code). Partitions fail independently; one partition's upstream
/// outage never blocks its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub label: String,
    pub content_type_id: Option<String>,
    pub area_code: Option<String>,
}

impl Partition {
    pub fn whole_source(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content_type_id: None,
            area_code: None,
        }
    }
}

/// One fetched-and-normalized page: `(items, hasMore)` with the resumption
/// token carried in `next_token`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage {
    pub drafts: Vec<PlaceDraft>,
    pub next_token: Option<u32>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> &'static str;

    /// Provider's documented page maximum; fixed per adapter.
    fn page_size(&self) -> u32 {
        100
    }

    fn partitions(&self) -> Vec<Partition>;

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
        partition: &Partition,
        page: u32,
    ) -> Result<SourcePage, AdapterError>;

    /// Pure transform of one provider payload. Shared by `fetch_page` and
    /// offline fixture tests.
    fn parse_page(
        &self,
        partition: &Partition,
        page: u32,
        body: &JsonValue,
    ) -> Result<SourcePage, AdapterError>;
}

pub fn adapter_for_source(source: &str) -> Option<Box<dyn SourceAdapter>> {
    match source {
        "tour_api" => Some(Box::new(TourApiAdapter)),
        "seoul_gov" => Some(Box::new(SeoulEventsAdapter)),
        _ => None,
    }
}

pub fn all_adapters() -> Vec<Box<dyn SourceAdapter>> {
    vec![Box::new(TourApiAdapter), Box::new(SeoulEventsAdapter)]
}

/// `YYYYMMDD` → `NaiveDate`, failing closed: anything that is not exactly
/// eight digits forming a real calendar date becomes `None` instead of
/// rejecting the record.
pub fn normalize_yyyymmdd(raw: &str) -> Option<NaiveDate> {
    let digits = raw.trim();
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Provider integer-scaled coordinate → decimal degrees.
pub fn scaled_coordinate(raw: i64) -> f64 {
    raw as f64 / COORD_DIVISOR
}

/// Pull the administrative district out of a road address ("서울특별시
/// 송파구 …" → "송파구"). Degrades to `None` when no district token exists.
pub fn district_from_address(address: &str) -> Option<String> {
    address
        .split_whitespace()
        .find(|token| token.len() > 1 && (token.ends_with('구') || token.ends_with('군')))
        .map(|token| token.to_string())
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
