//! JSON API for Playmap: cursor-paginated place listings, nearest-facility
//! lookup and per-place verification status.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

use playmap_core::{BoundingBox, Category, GeoPoint, Place, PlaceQuery, SortOrder};
use playmap_storage::{PlaceStore, SearchLog, SearchLogStore, Stores, VerificationStore};

pub mod cursor;
pub mod geo;

pub use cursor::Cursor;
pub use geo::{haversine_m, ZoomPolicy};

pub const CRATE_NAME: &str = "playmap-web";

const DEFAULT_ZOOM: u8 = 12;
const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;
const NEAREST_LIMIT: usize = 5;
/// Half-width in degrees of the viewport synthesized around a nearest-query
/// point, roughly 11 km of latitude. Together with the candidate cap below,
/// this bounds the search: a tagged facility outside the window, or past
/// the top candidates by score inside it, is not considered.
const NEAREST_WINDOW_DEG: f64 = 0.1;
const NEAREST_CANDIDATE_LIMIT: usize = 500;
const RECENT_VERIFICATION_DAYS: i64 = 90;

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub zoom: ZoomPolicy,
}

impl AppState {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            zoom: ZoomPolicy::default(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/places", get(list_places_handler))
        .route("/api/places/nearest", get(nearest_handler))
        .route("/api/places/{id}/verification", get(verification_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(stores: Stores) -> anyhow::Result<()> {
    let port: u16 = std::env::var("PLAYMAP_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");
    axum::serve(listener, app(AppState::new(stores))).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct ListParams {
    bbox: Option<String>,
    zoom: Option<u8>,
    categories: Option<String>,
    facility_tags: Option<String>,
    indoor: Option<bool>,
    q: Option<String>,
    sort: Option<String>,
    cursor: Option<String>,
    limit: Option<usize>,
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct NearestParams {
    lat: Option<f64>,
    lng: Option<f64>,
    facility: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlaceItem {
    id: Uuid,
    name: String,
    category: &'static str,
    address: Option<String>,
    district: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    price: Option<String>,
    age_range: Option<String>,
    indoor: Option<bool>,
    facility_tags: Vec<String>,
    popularity_score: f64,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_m: Option<f64>,
}

impl PlaceItem {
    fn from_place(place: Place, distance_m: Option<f64>) -> Self {
        Self {
            id: place.id,
            name: place.name,
            category: place.category.as_str(),
            address: place.address,
            district: place.district,
            lat: place.lat,
            lng: place.lng,
            start_date: place.start_date,
            end_date: place.end_date,
            price: place.price,
            age_range: place.age_range,
            indoor: place.indoor,
            facility_tags: place.facility_tags,
            popularity_score: place.popularity_score,
            created_at: place.created_at,
            distance_m,
        }
    }
}

#[derive(Debug, Serialize)]
struct PlacesResponse {
    items: Vec<PlaceItem>,
    next_cursor: Option<String>,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "record not found" })),
    )
        .into_response()
}

fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "query failed" })),
    )
        .into_response()
}

/// "min_lat,min_lng,max_lat,max_lng" → validated box.
fn parse_bbox(raw: &str) -> Result<BoundingBox, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| "bbox coordinates must be numbers".to_string())?;
    if parts.len() != 4 {
        return Err("bbox must be four comma-separated values: min_lat,min_lng,max_lat,max_lng".into());
    }
    BoundingBox::new(parts[0], parts[1], parts[2], parts[3]).map_err(|e| e.to_string())
}

fn parse_categories(raw: &str) -> Result<Vec<Category>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Category::parse(p).ok_or_else(|| format!("unknown category: {p}")))
        .collect()
}

async fn list_places_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let Some(raw_bbox) = params.bbox.as_deref() else {
        return bad_request("bbox is required: min_lat,min_lng,max_lat,max_lng");
    };
    let bbox = match parse_bbox(raw_bbox) {
        Ok(bbox) => bbox,
        Err(message) => return bad_request(message),
    };
    let sort = match params.sort.as_deref() {
        None => SortOrder::Popularity,
        Some(raw) => match SortOrder::parse(raw) {
            Some(sort) => sort,
            None => return bad_request("sort must be one of: distance, popularity, recent"),
        },
    };
    let origin = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    };
    if sort == SortOrder::Distance && origin.is_none() {
        return bad_request("sort=distance requires lat and lng");
    }

    let zoom = params.zoom.unwrap_or(DEFAULT_ZOOM);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut query = PlaceQuery::new(bbox, sort, limit + 1);
    query.min_score = state.zoom.score_floor(zoom);
    if let Some(raw) = params.categories.as_deref() {
        query.categories = match parse_categories(raw) {
            Ok(categories) => categories,
            Err(message) => return bad_request(message),
        };
    }
    if let Some(raw) = params.facility_tags.as_deref() {
        query.facility_tags = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }
    query.indoor = params.indoor;
    query.text = params.q.clone().filter(|q| !q.trim().is_empty());
    // At coarse zoom an unfiltered map view only shows district-cap winners;
    // a category or text search still reaches capped-out records.
    query.display_eligible_only =
        !state.zoom.full_detail(zoom) && query.categories.is_empty() && query.text.is_none();
    if let Some(raw) = params.cursor.as_deref() {
        query.bound = Cursor::decode(raw)
            .filter(|c| c.matches_sort(sort))
            .map(|c| c.bound());
    }

    let mut rows = match state.stores.places.list(&query).await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(error = %err, "place listing failed");
            return server_error();
        }
    };

    // Best-effort query log off the response path.
    if let Some(text) = query.text.clone() {
        let search_logs = state.stores.search_logs.clone();
        tokio::spawn(async move {
            if let Err(err) = search_logs.append(SearchLog::new(text)).await {
                tracing::debug!(error = %err, "search log write failed");
            }
        });
    }

    let has_more = rows.len() > limit;
    rows.truncate(limit);
    // The cursor resumes the storage-order scan, so it is derived before any
    // in-memory distance re-sort.
    let next_cursor = if has_more {
        rows.last().map(|last| Cursor::after(last, sort).encode())
    } else {
        None
    };

    let mut items: Vec<PlaceItem> = rows
        .into_iter()
        .map(|place| {
            let distance_m = match (origin, place.position()) {
                (Some(from), Some(to)) => Some(haversine_m(from, to)),
                _ => None,
            };
            PlaceItem::from_place(place, distance_m)
        })
        .collect();
    if sort == SortOrder::Distance {
        items.sort_by(|a, b| {
            let da = a.distance_m.unwrap_or(f64::MAX);
            let db = b.distance_m.unwrap_or(f64::MAX);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    Json(PlacesResponse { items, next_cursor }).into_response()
}

async fn nearest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearestParams>,
) -> Response {
    let (Some(lat), Some(lng)) = (params.lat, params.lng) else {
        return bad_request("lat and lng are required");
    };
    if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
        return bad_request("lat/lng out of range");
    }
    let origin = GeoPoint { lat, lng };
    let bbox = match BoundingBox::new(
        (lat - NEAREST_WINDOW_DEG).max(-90.0),
        (lng - NEAREST_WINDOW_DEG).max(-180.0),
        (lat + NEAREST_WINDOW_DEG).min(90.0),
        (lng + NEAREST_WINDOW_DEG).min(180.0),
    ) {
        Ok(bbox) => bbox,
        Err(err) => return bad_request(err.to_string()),
    };

    let mut query = PlaceQuery::new(bbox, SortOrder::Popularity, NEAREST_CANDIDATE_LIMIT);
    if let Some(facility) = params.facility.as_deref() {
        query.facility_tags = vec![facility.to_string()];
    }
    let rows = match state.stores.places.list(&query).await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(error = %err, "nearest lookup failed");
            return server_error();
        }
    };

    let mut annotated: Vec<(f64, Place)> = rows
        .into_iter()
        .filter(|p| !p.facility_tags.is_empty())
        .filter_map(|p| p.position().map(|pos| (haversine_m(origin, pos), p)))
        .collect();
    annotated.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    annotated.truncate(NEAREST_LIMIT);

    let items: Vec<PlaceItem> = annotated
        .into_iter()
        .map(|(distance, place)| PlaceItem::from_place(place, Some(distance)))
        .collect();
    Json(serde_json::json!({ "items": items })).into_response()
}

#[derive(Debug, Serialize)]
struct VerificationResponse {
    id: Uuid,
    is_recently_verified: bool,
    last_verified_at: Option<DateTime<Utc>>,
    verification_count: usize,
}

async fn verification_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    let place = match state.stores.places.get(id).await {
        Ok(Some(place)) => place,
        Ok(None) => return not_found(),
        Err(err) => {
            tracing::error!(error = %err, "place lookup failed");
            return server_error();
        }
    };
    let checks = match state.stores.verifications.for_place(id).await {
        Ok(checks) => checks,
        Err(err) => {
            tracing::error!(error = %err, "verification lookup failed");
            return server_error();
        }
    };

    let last_verified_at = checks
        .iter()
        .map(|c| c.checked_at)
        .max()
        .or(place.last_verified_at);
    let is_recently_verified = last_verified_at
        .map(|at| Utc::now() - at <= Duration::days(RECENT_VERIFICATION_DAYS))
        .unwrap_or(false);

    Json(VerificationResponse {
        id,
        is_recently_verified,
        last_verified_at,
        verification_count: checks.len(),
    })
    .into_response()
}
