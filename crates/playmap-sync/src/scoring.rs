//! Composite popularity scoring and per-district density control.
//!
//! The score blends four weighted signals: a Bayesian-smoothed, log-scaled
//! mention count, mention-source diversity, mention recency decay, and
//! record completeness. The smoothing constant is derived from the current
//! population (25th-percentile mention count) so sparse items are damped
//! without a hand-tuned constant.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use playmap_core::{Mention, Place};
use playmap_storage::{MentionStore, PlaceStore, Stores};

/// Days for one unit of exponential recency decay: same-day mentions score
/// 1.0, 180-day-old mentions ≈ 0.368, 360-day-old ≈ 0.135.
pub const RECENCY_DECAY_DAYS: f64 = 180.0;

/// Distinct mention sources beyond this add nothing (diminishing returns).
pub const DIVERSITY_SOURCE_CAP: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub mention: f64,
    pub diversity: f64,
    pub recency: f64,
    pub completeness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            mention: 0.35,
            diversity: 0.25,
            recency: 0.25,
            completeness: 0.15,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.mention + self.diversity + self.recency + self.completeness
    }
}

/// Smoothing constant for the mention component: the mention count at the
/// 25th percentile of the ascending-sorted population, defaulting to 1 for
/// an empty population.
pub fn bayesian_constant(counts: &[u64]) -> f64 {
    if counts.is_empty() {
        return 1.0;
    }
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    let index = ((sorted.len() as f64) * 0.25).floor() as usize;
    let index = index.min(sorted.len() - 1);
    sorted[index] as f64
}

pub fn mention_component(count: u64, smoothing: f64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    let count = count as f64;
    (1.0 + count).ln() / (1.0 + count + smoothing.max(0.0)).ln()
}

pub fn diversity_component(distinct_sources: usize) -> f64 {
    distinct_sources.min(DIVERSITY_SOURCE_CAP) as f64 / DIVERSITY_SOURCE_CAP as f64
}

pub fn recency_component(days_since_latest: f64) -> f64 {
    (-days_since_latest / RECENCY_DECAY_DAYS).exp()
}

/// Fraction of informative fields present on the record.
pub fn completeness_component(place: &Place) -> f64 {
    let filled = [
        place.address.is_some(),
        place.district.is_some(),
        place.start_date.is_some(),
        place.end_date.is_some(),
        place.price.is_some(),
        place.age_range.is_some(),
        place.indoor.is_some(),
        !place.facility_tags.is_empty(),
    ];
    let total = filled.len() as f64;
    filled.iter().filter(|present| **present).count() as f64 / total
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MentionSignals {
    pub count: u64,
    pub distinct_sources: usize,
    pub days_since_latest: Option<f64>,
}

impl MentionSignals {
    fn from_mentions(mentions: &[&Mention], now: DateTime<Utc>) -> Self {
        let relevant: Vec<&&Mention> = mentions.iter().filter(|m| m.relevant).collect();
        let distinct: HashSet<&str> = relevant.iter().map(|m| m.source_tag.as_str()).collect();
        let latest = relevant.iter().map(|m| m.mentioned_at).max();
        Self {
            count: relevant.len() as u64,
            distinct_sources: distinct.len(),
            days_since_latest: latest
                .map(|at| ((now - at).num_seconds() as f64 / 86_400.0).max(0.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine {
    pub weights: ScoreWeights,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringSummary {
    pub scored: usize,
    pub smoothing_constant: f64,
}

impl ScoringEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Composite score on a 0–100 scale.
    pub fn composite(&self, signals: MentionSignals, place: &Place, smoothing: f64) -> f64 {
        let recency = signals
            .days_since_latest
            .map(recency_component)
            .unwrap_or(0.0);
        let blended = self.weights.mention * mention_component(signals.count, smoothing)
            + self.weights.diversity * diversity_component(signals.distinct_sources)
            + self.weights.recency * recency
            + self.weights.completeness * completeness_component(place);
        blended * 100.0
    }

    /// Full scoring pass: derive the population smoothing constant once,
    /// then recompute and persist every record's score. Idempotent.
    pub async fn run(&self, stores: &Stores, now: DateTime<Utc>) -> Result<ScoringSummary> {
        let places = stores.places.all().await?;
        let mentions = stores.mentions.all().await?;

        let mut by_place: HashMap<Uuid, Vec<&Mention>> = HashMap::new();
        for mention in &mentions {
            by_place.entry(mention.place_id).or_default().push(mention);
        }

        let counts: Vec<u64> = places
            .iter()
            .map(|p| {
                by_place
                    .get(&p.id)
                    .map(|ms| ms.iter().filter(|m| m.relevant).count() as u64)
                    .unwrap_or(0)
            })
            .collect();
        let smoothing = bayesian_constant(&counts);

        for place in &places {
            let signals = by_place
                .get(&place.id)
                .map(|ms| MentionSignals::from_mentions(ms, now))
                .unwrap_or(MentionSignals {
                    count: 0,
                    distinct_sources: 0,
                    days_since_latest: None,
                });
            let score = self.composite(signals, place, smoothing);
            stores.places.update_score(place.id, score).await?;
        }

        Ok(ScoringSummary {
            scored: places.len(),
            smoothing_constant: smoothing,
        })
    }
}

/// Per-district display cap for the default zoom level.
#[derive(Debug, Clone, Copy)]
pub struct DensityPolicy {
    pub per_district_top_n: usize,
}

impl Default for DensityPolicy {
    fn default() -> Self {
        Self {
            per_district_top_n: 20,
        }
    }
}

/// Flag the top-N active records per district as display-eligible. A derived
/// flag, never a deletion: lower-ranked records stay queryable by category
/// or text search.
pub async fn apply_density_control(stores: &Stores, policy: &DensityPolicy) -> Result<usize> {
    let places = stores.places.all().await?;

    let mut by_district: BTreeMap<String, Vec<&Place>> = BTreeMap::new();
    for place in places.iter().filter(|p| p.is_active) {
        let district = place.district.clone().unwrap_or_default();
        by_district.entry(district).or_default().push(place);
    }

    let mut changed = 0usize;
    for (_district, mut group) in by_district {
        group.sort_by(|a, b| {
            b.popularity_score
                .partial_cmp(&a.popularity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.cmp(&a.id))
        });
        for (rank, place) in group.iter().enumerate() {
            let eligible = rank < policy.per_district_top_n;
            if place.display_eligible != eligible {
                stores.places.set_display_eligible(place.id, eligible).await?;
                changed += 1;
            }
        }
    }

    // Inactive records are never display-eligible.
    for place in places.iter().filter(|p| !p.is_active && p.display_eligible) {
        stores.places.set_display_eligible(place.id, false).await?;
        changed += 1;
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use playmap_core::{Category, PlaceDraft};

    fn place(district: &str, score: f64) -> Place {
        let mut p = Place::from_draft(
            PlaceDraft {
                source: "tour_api".into(),
                source_id: Uuid::new_v4().to_string(),
                name: "venue".into(),
                category: Category::Park,
                address: Some("addr".into()),
                district: Some(district.into()),
                lat: Some(37.5),
                lng: Some(127.0),
                start_date: None,
                end_date: None,
                price: None,
                age_range: None,
                indoor: None,
                facility_tags: Vec::new(),
            },
            Utc::now(),
        );
        p.is_active = true;
        p.popularity_score = score;
        p
    }

    #[test]
    fn weights_sum_to_exactly_one() {
        assert_eq!(ScoreWeights::default().sum(), 1.0);
    }

    #[test]
    fn recency_decay_matches_known_points() {
        assert!((recency_component(0.0) - 1.0).abs() < 1e-12);
        assert!((recency_component(180.0) - 0.368).abs() < 0.01);
        assert!((recency_component(360.0) - 0.135).abs() < 0.01);
    }

    #[test]
    fn bayesian_constant_is_25th_percentile() {
        let counts = [1, 5, 10, 15, 20, 25, 30, 35, 40];
        assert_eq!(bayesian_constant(&counts), 10.0);

        // Order-insensitive: constant derives from the sorted population.
        let shuffled = [40, 10, 1, 35, 20, 5, 30, 15, 25];
        assert_eq!(bayesian_constant(&shuffled), 10.0);

        assert_eq!(bayesian_constant(&[]), 1.0);
        assert_eq!(bayesian_constant(&[7]), 7.0);
    }

    #[test]
    fn diversity_saturates_at_four_sources() {
        assert_eq!(diversity_component(0), 0.0);
        assert_eq!(diversity_component(2), 0.5);
        assert_eq!(diversity_component(4), 1.0);
        assert_eq!(diversity_component(9), 1.0);
    }

    #[test]
    fn mention_component_is_monotone_and_bounded() {
        let k = 10.0;
        assert_eq!(mention_component(0, k), 0.0);
        let low = mention_component(1, k);
        let mid = mention_component(10, k);
        let high = mention_component(100, k);
        assert!(low < mid && mid < high);
        assert!(high < 1.0);
    }

    #[test]
    fn completeness_counts_informative_fields() {
        let full = place("강남구", 0.0);
        // address + district + lat/lng don't all count; the informative set
        // here is address, district and nothing else.
        assert!((completeness_component(&full) - 0.25).abs() < 1e-12);

        let mut bare = full.clone();
        bare.address = None;
        bare.district = None;
        assert_eq!(completeness_component(&bare), 0.0);
    }

    #[tokio::test]
    async fn scoring_run_is_idempotent() {
        let stores = Stores::memory();
        let now = Utc::now();
        let venue = place("송파구", 0.0);
        let id = venue.id;
        stores.places.insert(venue).await.unwrap();
        for i in 0..3 {
            stores
                .mentions
                .append(Mention {
                    id: Uuid::new_v4(),
                    place_id: id,
                    source_tag: format!("blog-{i}"),
                    mentioned_at: now - Duration::days(i),
                    relevant: true,
                })
                .await
                .unwrap();
        }

        let engine = ScoringEngine::default();
        engine.run(&stores, now).await.unwrap();
        let first = stores.places.get(id).await.unwrap().unwrap().popularity_score;
        assert!(first > 0.0);

        engine.run(&stores, now).await.unwrap();
        let second = stores.places.get(id).await.unwrap().unwrap().popularity_score;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn density_control_caps_each_district_at_top_n() {
        let stores = Stores::memory();
        for i in 0..30 {
            stores
                .places
                .insert(place("송파구", i as f64))
                .await
                .unwrap();
        }
        for i in 0..5 {
            stores
                .places
                .insert(place("강남구", i as f64))
                .await
                .unwrap();
        }

        let changed = apply_density_control(&stores, &DensityPolicy::default())
            .await
            .unwrap();
        assert_eq!(changed, 25); // 20 in 송파구 + 5 in 강남구

        let places = stores.places.all().await.unwrap();
        let songpa_eligible = places
            .iter()
            .filter(|p| p.district.as_deref() == Some("송파구") && p.display_eligible)
            .count();
        assert_eq!(songpa_eligible, 20);
        // Eligibility goes to the highest scores.
        let cutoff_losers = places
            .iter()
            .filter(|p| p.district.as_deref() == Some("송파구") && !p.display_eligible)
            .map(|p| p.popularity_score)
            .collect::<Vec<_>>();
        assert!(cutoff_losers.iter().all(|s| *s < 10.0));

        // Re-running changes nothing.
        let changed_again = apply_density_control(&stores, &DensityPolicy::default())
            .await
            .unwrap();
        assert_eq!(changed_again, 0);
    }
}
