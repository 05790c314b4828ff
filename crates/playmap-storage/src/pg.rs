//! Postgres implementation of the repository traits. Natural-key dedup rides
//! the unique constraint (`ON CONFLICT DO NOTHING`) so concurrent inserts of
//! the same `(source, source_id)` surface as duplicates, never as failures.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use playmap_core::{
    Category, CollectionLog, Mention, NaturalKey, PageBound, Place, PlaceQuery, RunStatus,
    SortOrder, VerificationCheck,
};

use crate::{
    CollectionLogStore, InsertOutcome, MentionStore, PlaceStore, SearchLog, SearchLogStore,
    StoreError, VerificationStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn place_from_row(row: &PgRow) -> Result<Place, sqlx::Error> {
    let category: String = row.try_get("category")?;
    Ok(Place {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: Category::parse(&category).unwrap_or(Category::Other),
        address: row.try_get("address")?,
        district: row.try_get("district")?,
        lat: row.try_get("lat")?,
        lng: row.try_get("lng")?,
        start_date: row.try_get::<Option<NaiveDate>, _>("start_date")?,
        end_date: row.try_get::<Option<NaiveDate>, _>("end_date")?,
        price: row.try_get("price")?,
        age_range: row.try_get("age_range")?,
        indoor: row.try_get("indoor")?,
        facility_tags: row.try_get("facility_tags")?,
        is_active: row.try_get("is_active")?,
        display_eligible: row.try_get("display_eligible")?,
        popularity_score: row.try_get("popularity_score")?,
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        last_verified_at: row.try_get::<Option<DateTime<Utc>>, _>("last_verified_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_status_as_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "success",
        RunStatus::Partial => "partial",
        RunStatus::Error => "error",
    }
}

fn run_status_parse(value: &str) -> RunStatus {
    match value {
        "success" => RunStatus::Success,
        "partial" => RunStatus::Partial,
        _ => RunStatus::Error,
    }
}

#[async_trait]
impl PlaceStore for PgStore {
    async fn insert(&self, place: Place) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO places (
                id, name, category, address, district, lat, lng,
                start_date, end_date, price, age_range, indoor, facility_tags,
                is_active, display_eligible, popularity_score,
                source, source_id, last_verified_at, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12, $13,
                $14, $15, $16,
                $17, $18, $19, $20, $21
            )
            ON CONFLICT (source, source_id) DO NOTHING
            "#,
        )
        .bind(place.id)
        .bind(&place.name)
        .bind(place.category.as_str())
        .bind(&place.address)
        .bind(&place.district)
        .bind(place.lat)
        .bind(place.lng)
        .bind(place.start_date)
        .bind(place.end_date)
        .bind(&place.price)
        .bind(&place.age_range)
        .bind(place.indoor)
        .bind(&place.facility_tags)
        .bind(place.is_active)
        .bind(place.display_eligible)
        .bind(place.popularity_score)
        .bind(&place.source)
        .bind(&place.source_id)
        .bind(place.last_verified_at)
        .bind(place.created_at)
        .bind(place.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::DuplicateKey)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<Place>, StoreError> {
        let row = sqlx::query("SELECT * FROM places WHERE source = $1 AND source_id = $2")
            .bind(&key.source)
            .bind(&key.source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| place_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Place>, StoreError> {
        let row = sqlx::query("SELECT * FROM places WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| place_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn list(&self, query: &PlaceQuery) -> Result<Vec<Place>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM places WHERE lat IS NOT NULL AND lng IS NOT NULL");

        qb.push(" AND lat >= ").push_bind(query.bbox.min_lat);
        qb.push(" AND lat <= ").push_bind(query.bbox.max_lat);
        qb.push(" AND lng >= ").push_bind(query.bbox.min_lng);
        qb.push(" AND lng <= ").push_bind(query.bbox.max_lng);

        if query.active_only {
            qb.push(" AND is_active = TRUE");
        }
        if query.display_eligible_only {
            qb.push(" AND display_eligible = TRUE");
        }
        if query.min_score > 0.0 {
            qb.push(" AND popularity_score >= ").push_bind(query.min_score);
        }
        if !query.categories.is_empty() {
            let names: Vec<String> = query
                .categories
                .iter()
                .map(|c| c.as_str().to_string())
                .collect();
            qb.push(" AND category = ANY(").push_bind(names).push(")");
        }
        if !query.facility_tags.is_empty() {
            qb.push(" AND facility_tags && ")
                .push_bind(query.facility_tags.clone());
        }
        if let Some(indoor) = query.indoor {
            qb.push(" AND indoor = ").push_bind(indoor);
        }
        if let Some(text) = &query.text {
            let pattern = format!("%{text}%");
            qb.push(" AND (name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR address ILIKE ")
                .push_bind(pattern)
                .push(")");
        }

        match &query.bound {
            Some(PageBound::Popularity { score, id }) => {
                qb.push(" AND (popularity_score, id) < (")
                    .push_bind(*score)
                    .push(", ")
                    .push_bind(*id)
                    .push(")");
            }
            Some(PageBound::Recent { created_at, id }) => {
                qb.push(" AND (created_at, id) < (")
                    .push_bind(*created_at)
                    .push(", ")
                    .push_bind(*id)
                    .push(")");
            }
            Some(PageBound::AfterId { id }) => {
                qb.push(" AND id < ").push_bind(*id);
            }
            None => {}
        }

        match query.sort {
            SortOrder::Popularity | SortOrder::Distance => {
                qb.push(" ORDER BY popularity_score DESC, id DESC");
            }
            SortOrder::Recent => {
                qb.push(" ORDER BY created_at DESC, id DESC");
            }
        }
        qb.push(" LIMIT ").push_bind(query.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(place_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn all(&self) -> Result<Vec<Place>, StoreError> {
        let rows = sqlx::query("SELECT * FROM places")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(place_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn update_score(&self, id: Uuid, score: f64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE places SET popularity_score = $2 WHERE id = $1")
            .bind(id)
            .bind(score)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_display_eligible(&self, id: Uuid, eligible: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE places SET display_eligible = $2 WHERE id = $1")
            .bind(id)
            .bind(eligible)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE places SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl MentionStore for PgStore {
    async fn append(&self, mention: Mention) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO mentions (id, place_id, source_tag, mentioned_at, relevant)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(mention.id)
        .bind(mention.place_id)
        .bind(&mention.source_tag)
        .bind(mention.mentioned_at)
        .bind(mention.relevant)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_place(&self, place_id: Uuid) -> Result<Vec<Mention>, StoreError> {
        let rows = sqlx::query("SELECT * FROM mentions WHERE place_id = $1")
            .bind(place_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(mention_from_row).collect()
    }

    async fn all(&self) -> Result<Vec<Mention>, StoreError> {
        let rows = sqlx::query("SELECT * FROM mentions")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(mention_from_row).collect()
    }
}

fn mention_from_row(row: &PgRow) -> Result<Mention, StoreError> {
    Ok(Mention {
        id: row.try_get("id")?,
        place_id: row.try_get("place_id")?,
        source_tag: row.try_get("source_tag")?,
        mentioned_at: row.try_get("mentioned_at")?,
        relevant: row.try_get("relevant")?,
    })
}

#[async_trait]
impl CollectionLogStore for PgStore {
    async fn append(&self, log: CollectionLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO collection_logs (
                id, collector, started_at, finished_at,
                fetched, new_records, duplicates, errors,
                status, error, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.id)
        .bind(&log.collector)
        .bind(log.started_at)
        .bind(log.finished_at)
        .bind(log.fetched as i64)
        .bind(log.new_records as i64)
        .bind(log.duplicates as i64)
        .bind(log.errors as i64)
        .bind(run_status_as_str(log.status))
        .bind(&log.error)
        .bind(log.duration_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<CollectionLog>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM collection_logs ORDER BY started_at DESC LIMIT $1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(CollectionLog {
                    id: row.try_get("id")?,
                    collector: row.try_get("collector")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                    fetched: row.try_get::<i64, _>("fetched")? as u64,
                    new_records: row.try_get::<i64, _>("new_records")? as u64,
                    duplicates: row.try_get::<i64, _>("duplicates")? as u64,
                    errors: row.try_get::<i64, _>("errors")? as u64,
                    status: run_status_parse(&status),
                    error: row.try_get("error")?,
                    duration_ms: row.try_get::<i64, _>("duration_ms")? as u64,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VerificationStore for PgStore {
    async fn append(&self, check: VerificationCheck) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO verification_checks (id, place_id, checked_at, method)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(check.id)
        .bind(check.place_id)
        .bind(check.checked_at)
        .bind(&check.method)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_place(&self, place_id: Uuid) -> Result<Vec<VerificationCheck>, StoreError> {
        let rows = sqlx::query("SELECT * FROM verification_checks WHERE place_id = $1")
            .bind(place_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(VerificationCheck {
                    id: row.try_get("id")?,
                    place_id: row.try_get("place_id")?,
                    checked_at: row.try_get("checked_at")?,
                    method: row.try_get("method")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SearchLogStore for PgStore {
    async fn append(&self, entry: SearchLog) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO search_logs (id, query, logged_at) VALUES ($1, $2, $3)")
            .bind(entry.id)
            .bind(&entry.query)
            .bind(entry.logged_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
