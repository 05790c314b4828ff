//! In-memory store backing tests and local runs with the same filter,
//! ordering and keyset semantics as the Postgres implementation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use playmap_core::{
    CollectionLog, Mention, NaturalKey, PageBound, Place, PlaceQuery, SortOrder, VerificationCheck,
};

use crate::{
    CollectionLogStore, InsertOutcome, MentionStore, PlaceStore, SearchLog, SearchLogStore,
    StoreError, VerificationStore,
};

#[derive(Default)]
pub struct MemoryStore {
    places: RwLock<HashMap<Uuid, Place>>,
    natural_keys: RwLock<HashMap<NaturalKey, Uuid>>,
    mentions: RwLock<Vec<Mention>>,
    collection_logs: RwLock<Vec<CollectionLog>>,
    verifications: RwLock<Vec<VerificationCheck>>,
    search_logs: RwLock<Vec<SearchLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(place: &Place, query: &PlaceQuery) -> bool {
    if query.active_only && !place.is_active {
        return false;
    }
    if query.display_eligible_only && !place.display_eligible {
        return false;
    }
    let Some(position) = place.position() else {
        return false;
    };
    if !query.bbox.contains(position) {
        return false;
    }
    if place.popularity_score < query.min_score {
        return false;
    }
    if !query.categories.is_empty() && !query.categories.contains(&place.category) {
        return false;
    }
    if !query.facility_tags.is_empty() {
        let overlap = query.facility_tags.iter().any(|wanted| {
            place
                .facility_tags
                .iter()
                .any(|have| have.eq_ignore_ascii_case(wanted))
        });
        if !overlap {
            return false;
        }
    }
    if let Some(indoor) = query.indoor {
        if place.indoor != Some(indoor) {
            return false;
        }
    }
    if let Some(text) = &query.text {
        let needle = text.to_lowercase();
        let in_name = place.name.to_lowercase().contains(&needle);
        let in_address = place
            .address
            .as_deref()
            .map(|a| a.to_lowercase().contains(&needle))
            .unwrap_or(false);
        if !in_name && !in_address {
            return false;
        }
    }
    true
}

/// Strictly-after predicate for keyset continuation under a descending
/// composite order: a row qualifies when its ordering tuple is
/// lexicographically below the cursor tuple.
fn after_bound(place: &Place, bound: &PageBound) -> bool {
    match bound {
        PageBound::Popularity { score, id } => {
            place.popularity_score < *score
                || (place.popularity_score == *score && place.id < *id)
        }
        PageBound::Recent { created_at, id } => {
            place.created_at < *created_at || (place.created_at == *created_at && place.id < *id)
        }
        PageBound::AfterId { id } => place.id < *id,
    }
}

fn compare(a: &Place, b: &Place, sort: SortOrder) -> Ordering {
    match sort {
        // Distance pages use the same index-friendly storage order as
        // popularity; the caller re-sorts in memory.
        SortOrder::Popularity | SortOrder::Distance => b
            .popularity_score
            .partial_cmp(&a.popularity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.id.cmp(&a.id)),
        SortOrder::Recent => b
            .created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id)),
    }
}

#[async_trait]
impl PlaceStore for MemoryStore {
    async fn insert(&self, place: Place) -> Result<InsertOutcome, StoreError> {
        let mut keys = self.natural_keys.write().expect("lock poisoned");
        let key = place.natural_key();
        if keys.contains_key(&key) {
            return Ok(InsertOutcome::DuplicateKey);
        }
        keys.insert(key, place.id);
        self.places
            .write()
            .expect("lock poisoned")
            .insert(place.id, place);
        Ok(InsertOutcome::Inserted)
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<Place>, StoreError> {
        let id = {
            let keys = self.natural_keys.read().expect("lock poisoned");
            keys.get(key).copied()
        };
        Ok(id.and_then(|id| self.places.read().expect("lock poisoned").get(&id).cloned()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Place>, StoreError> {
        Ok(self.places.read().expect("lock poisoned").get(&id).cloned())
    }

    async fn list(&self, query: &PlaceQuery) -> Result<Vec<Place>, StoreError> {
        let places = self.places.read().expect("lock poisoned");
        let mut rows: Vec<Place> = places
            .values()
            .filter(|p| matches(p, query))
            .filter(|p| query.bound.as_ref().map_or(true, |b| after_bound(p, b)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| compare(a, b, query.sort));
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn all(&self) -> Result<Vec<Place>, StoreError> {
        Ok(self
            .places
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn update_score(&self, id: Uuid, score: f64) -> Result<(), StoreError> {
        let mut places = self.places.write().expect("lock poisoned");
        let place = places.get_mut(&id).ok_or(StoreError::NotFound)?;
        place.popularity_score = score;
        Ok(())
    }

    async fn set_display_eligible(&self, id: Uuid, eligible: bool) -> Result<(), StoreError> {
        let mut places = self.places.write().expect("lock poisoned");
        let place = places.get_mut(&id).ok_or(StoreError::NotFound)?;
        place.display_eligible = eligible;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let mut places = self.places.write().expect("lock poisoned");
        let place = places.get_mut(&id).ok_or(StoreError::NotFound)?;
        place.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl MentionStore for MemoryStore {
    async fn append(&self, mention: Mention) -> Result<(), StoreError> {
        self.mentions.write().expect("lock poisoned").push(mention);
        Ok(())
    }

    async fn for_place(&self, place_id: Uuid) -> Result<Vec<Mention>, StoreError> {
        Ok(self
            .mentions
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|m| m.place_id == place_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Mention>, StoreError> {
        Ok(self.mentions.read().expect("lock poisoned").clone())
    }
}

#[async_trait]
impl CollectionLogStore for MemoryStore {
    async fn append(&self, log: CollectionLog) -> Result<(), StoreError> {
        self.collection_logs
            .write()
            .expect("lock poisoned")
            .push(log);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<CollectionLog>, StoreError> {
        let logs = self.collection_logs.read().expect("lock poisoned");
        let mut rows: Vec<CollectionLog> = logs.clone();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn append(&self, check: VerificationCheck) -> Result<(), StoreError> {
        self.verifications
            .write()
            .expect("lock poisoned")
            .push(check);
        Ok(())
    }

    async fn for_place(&self, place_id: Uuid) -> Result<Vec<VerificationCheck>, StoreError> {
        Ok(self
            .verifications
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|v| v.place_id == place_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SearchLogStore for MemoryStore {
    async fn append(&self, entry: SearchLog) -> Result<(), StoreError> {
        self.search_logs.write().expect("lock poisoned").push(entry);
        Ok(())
    }
}
