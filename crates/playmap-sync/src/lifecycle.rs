//! Lifecycle batch passes: trusted-source auto-promotion and per-category
//! TTL deactivation. Policy data (allowlist, TTL table) is injected, not
//! baked into the mechanism.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};

use playmap_core::{Category, Place};
use playmap_storage::{PlaceStore, Stores};

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Public-sector sources whose records activate without manual review.
    pub trusted_sources: HashSet<String>,
    /// Days since last verification (falling back to `updated_at`) before a
    /// record goes inactive, per category.
    pub ttl_days: HashMap<Category, i64>,
    pub default_ttl_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        let trusted_sources = ["data_go_kr", "localdata", "kopis", "tour_api", "seoul_gov"]
            .into_iter()
            .map(String::from)
            .collect();
        let ttl_days = HashMap::from([
            (Category::Performance, 90),
            (Category::Exhibition, 90),
            (Category::Festival, 90),
            (Category::Experience, 180),
            (Category::Park, 180),
            (Category::Playground, 180),
            (Category::Sports, 180),
            (Category::Museum, 365),
            (Category::Library, 365),
            (Category::Other, 90),
        ]);
        Self {
            trusted_sources,
            ttl_days,
            default_ttl_days: 180,
        }
    }
}

impl LifecyclePolicy {
    pub fn ttl_for(&self, category: Category) -> i64 {
        self.ttl_days
            .get(&category)
            .copied()
            .unwrap_or(self.default_ttl_days)
    }

    fn is_stale(&self, place: &Place, now: DateTime<Utc>) -> bool {
        let anchor = place.last_verified_at.unwrap_or(place.updated_at);
        (now - anchor).num_days() > self.ttl_for(place.category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecycleSummary {
    pub promoted: u64,
    pub deactivated: u64,
}

/// One lifecycle sweep. Both passes are idempotent: without new data a
/// re-run reports zero changes.
///
/// Promotion only touches fresh records, so a TTL-expired record is not
/// re-activated by the very pass that should retire it.
pub async fn run(
    stores: &Stores,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> Result<LifecycleSummary> {
    let places = stores.places.all().await?;
    let mut summary = LifecycleSummary::default();

    for place in &places {
        let stale = policy.is_stale(place, now);
        if !place.is_active && !stale && policy.trusted_sources.contains(&place.source) {
            stores.places.set_active(place.id, true).await?;
            summary.promoted += 1;
        } else if place.is_active && stale {
            stores.places.set_active(place.id, false).await?;
            summary.deactivated += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use playmap_core::PlaceDraft;
    use uuid::Uuid;

    fn place(source: &str, category: Category) -> Place {
        Place::from_draft(
            PlaceDraft {
                source: source.into(),
                source_id: Uuid::new_v4().to_string(),
                name: "venue".into(),
                category,
                address: None,
                district: None,
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
        )
    }

    #[tokio::test]
    async fn trusted_sources_promote_untrusted_wait_for_review() {
        let stores = Stores::memory();
        let trusted = place("tour_api", Category::Park);
        let trusted_id = trusted.id;
        let blog = place("some_blog", Category::Park);
        let blog_id = blog.id;
        stores.places.insert(trusted).await.unwrap();
        stores.places.insert(blog).await.unwrap();

        let summary = run(&stores, &LifecyclePolicy::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(summary.promoted, 1);
        assert!(stores.places.get(trusted_id).await.unwrap().unwrap().is_active);
        assert!(!stores.places.get(blog_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn ttl_boundary_controls_deactivation() {
        let stores = Stores::memory();
        let policy = LifecyclePolicy::default();
        let now = Utc::now();

        // Performance TTL is 90 days: one record expired, one verified a
        // day before expiry.
        let mut expired = place("kopis", Category::Performance);
        expired.is_active = true;
        expired.last_verified_at = Some(now - Duration::days(91));
        let expired_id = expired.id;

        let mut fresh = place("kopis", Category::Performance);
        fresh.is_active = true;
        fresh.last_verified_at = Some(now - Duration::days(89));
        let fresh_id = fresh.id;

        stores.places.insert(expired).await.unwrap();
        stores.places.insert(fresh).await.unwrap();

        let summary = run(&stores, &policy, now).await.unwrap();
        assert_eq!(summary.deactivated, 1);
        assert!(!stores.places.get(expired_id).await.unwrap().unwrap().is_active);
        assert!(stores.places.get(fresh_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn expired_records_are_not_repromoted() {
        let stores = Stores::memory();
        let policy = LifecyclePolicy::default();
        let now = Utc::now();

        let mut stale = place("tour_api", Category::Performance);
        stale.is_active = true;
        stale.last_verified_at = Some(now - Duration::days(200));
        let stale_id = stale.id;
        stores.places.insert(stale).await.unwrap();

        let first = run(&stores, &policy, now).await.unwrap();
        assert_eq!(first.deactivated, 1);

        // The next sweep must not flip it back on.
        let second = run(&stores, &policy, now).await.unwrap();
        assert_eq!(second, LifecycleSummary::default());
        assert!(!stores.places.get(stale_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn category_ttls_differ() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.ttl_for(Category::Performance), 90);
        assert_eq!(policy.ttl_for(Category::Park), 180);
        assert_eq!(policy.ttl_for(Category::Library), 365);
    }
}
