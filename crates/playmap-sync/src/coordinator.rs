//! Ingestion coordinator: drives one adapter across its partitions and
//! pages, deduplicates on the natural key, and writes the audit row.

use anyhow::Result;
use chrono::Utc;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use playmap_adapters::{FetchContext, SourceAdapter};
use playmap_core::{CollectionLog, Place, RunStatus};
use playmap_storage::{CollectionLogStore, HttpFetcher, InsertOutcome, PlaceStore, Stores};

pub struct Coordinator<'a> {
    stores: &'a Stores,
    http: &'a HttpFetcher,
}

impl<'a> Coordinator<'a> {
    pub fn new(stores: &'a Stores, http: &'a HttpFetcher) -> Self {
        Self { stores, http }
    }

    /// Run one collector to completion and append exactly one audit row.
    ///
    /// A missing credential is fatal: the run short-circuits with a single
    /// `Error` row. Anything that goes wrong inside a partition is counted
    /// and logged but never aborts the sibling partitions.
    pub async fn run_collector(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &FetchContext,
    ) -> Result<CollectionLog> {
        let started_at = Utc::now();

        if ctx.service_key.is_empty() {
            let finished_at = Utc::now();
            let log = CollectionLog {
                id: Uuid::new_v4(),
                collector: adapter.source().to_string(),
                started_at,
                finished_at,
                fetched: 0,
                new_records: 0,
                duplicates: 0,
                errors: 1,
                status: RunStatus::Error,
                error: Some(format!("missing credential for {}", adapter.source())),
                duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            };
            self.stores.collection_logs.append(log.clone()).await?;
            return Ok(log);
        }

        let mut fetched = 0u64;
        let mut new_records = 0u64;
        let mut duplicates = 0u64;
        let mut errors = 0u64;

        for partition in adapter.partitions() {
            let span = info_span!(
                "ingest_partition",
                collector = adapter.source(),
                partition = %partition.label
            );
            async {
                // Sequential scan: the next page is not requested until the
                // current page's items are fully processed.
                let mut token = Some(1u32);
                while let Some(page_no) = token {
                    match adapter.fetch_page(self.http, ctx, &partition, page_no).await {
                        Ok(page) => {
                            fetched += page.drafts.len() as u64;
                            for draft in page.drafts {
                                // One timestamp per run: every record from
                                // this sweep shares the fetch anchor.
                                let place = Place::from_draft(draft, ctx.fetched_at);
                                match self.stores.places.insert(place).await {
                                    Ok(InsertOutcome::Inserted) => new_records += 1,
                                    Ok(InsertOutcome::DuplicateKey) => duplicates += 1,
                                    Err(err) => {
                                        errors += 1;
                                        warn!(error = %err, "failed to persist draft");
                                    }
                                }
                            }
                            token = page.next_token;
                        }
                        Err(err) => {
                            // Attribute the failure to this page and move on
                            // to the next partition.
                            errors += 1;
                            warn!(page = page_no, error = %err, "partition page fetch failed");
                            token = None;
                        }
                    }
                }
            }
            .instrument(span)
            .await;
        }

        let finished_at = Utc::now();
        let status = if errors == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        let log = CollectionLog {
            id: Uuid::new_v4(),
            collector: adapter.source().to_string(),
            started_at,
            finished_at,
            fetched,
            new_records,
            duplicates,
            errors,
            status,
            error: None,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        };
        self.stores.collection_logs.append(log.clone()).await?;
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use playmap_adapters::{AdapterError, Partition, SourcePage};
    use playmap_core::{Category, PlaceDraft};
    use playmap_storage::{FetchError, HttpClientConfig};

    fn draft(source_id: &str) -> PlaceDraft {
        PlaceDraft {
            source: "fixture".into(),
            source_id: source_id.into(),
            name: format!("Fixture venue {source_id}"),
            category: Category::Playground,
            address: None,
            district: Some("강남구".into()),
            lat: Some(37.5),
            lng: Some(127.0),
            start_date: None,
            end_date: None,
            price: None,
            age_range: None,
            indoor: Some(true),
            facility_tags: Vec::new(),
        }
    }

    /// Offline adapter: two partitions, two pages each, optional failure in
    /// a chosen partition.
    struct FixtureAdapter {
        fail_partition: Option<usize>,
    }

    #[async_trait]
    impl SourceAdapter for FixtureAdapter {
        fn source(&self) -> &'static str {
            "fixture"
        }

        fn partitions(&self) -> Vec<Partition> {
            vec![
                Partition::whole_source("part-0"),
                Partition::whole_source("part-1"),
            ]
        }

        async fn fetch_page(
            &self,
            _http: &HttpFetcher,
            _ctx: &FetchContext,
            partition: &Partition,
            page: u32,
        ) -> Result<SourcePage, AdapterError> {
            let index = if partition.label == "part-0" { 0 } else { 1 };
            if self.fail_partition == Some(index) {
                return Err(AdapterError::Upstream(FetchError::HttpStatus {
                    status: 503,
                    url: "https://fixture.example/page".into(),
                }));
            }
            let drafts = vec![
                draft(&format!("{index}-{page}-a")),
                draft(&format!("{index}-{page}-b")),
            ];
            let next_token = if page < 2 { Some(page + 1) } else { None };
            Ok(SourcePage { drafts, next_token })
        }

        fn parse_page(
            &self,
            _partition: &Partition,
            _page: u32,
            _body: &serde_json::Value,
        ) -> Result<SourcePage, AdapterError> {
            unreachable!("fixture adapter fetches directly")
        }
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig::default()).unwrap()
    }

    fn ctx() -> FetchContext {
        FetchContext {
            service_key: "test-key".into(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rerun_over_unchanged_upstream_is_idempotent() {
        let stores = Stores::memory();
        let http = fetcher();
        let coordinator = Coordinator::new(&stores, &http);
        let adapter = FixtureAdapter { fail_partition: None };

        let first = coordinator.run_collector(&adapter, &ctx()).await.unwrap();
        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(first.fetched, 8); // 2 partitions × 2 pages × 2 items
        assert_eq!(first.new_records, 8);
        assert_eq!(first.duplicates, 0);

        let second = coordinator.run_collector(&adapter, &ctx()).await.unwrap();
        assert_eq!(second.new_records, 0);
        assert_eq!(second.duplicates, second.fetched);
        assert_eq!(stores.places.all().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn records_carry_the_run_fetch_timestamp() {
        let stores = Stores::memory();
        let http = fetcher();
        let coordinator = Coordinator::new(&stores, &http);
        let adapter = FixtureAdapter { fail_partition: None };
        let run_ctx = ctx();

        coordinator.run_collector(&adapter, &run_ctx).await.unwrap();

        let places = stores.places.all().await.unwrap();
        assert!(!places.is_empty());
        assert!(places
            .iter()
            .all(|p| p.created_at == run_ctx.fetched_at && p.updated_at == run_ctx.fetched_at));
    }

    #[tokio::test]
    async fn partition_failure_does_not_abort_siblings() {
        let stores = Stores::memory();
        let http = fetcher();
        let coordinator = Coordinator::new(&stores, &http);
        let adapter = FixtureAdapter {
            fail_partition: Some(0),
        };

        let log = coordinator.run_collector(&adapter, &ctx()).await.unwrap();
        assert_eq!(log.status, RunStatus::Partial);
        assert_eq!(log.errors, 1);
        // The healthy partition still landed all of its items.
        assert_eq!(log.new_records, 4);
    }

    #[tokio::test]
    async fn missing_credential_short_circuits_with_error_row() {
        let stores = Stores::memory();
        let http = fetcher();
        let coordinator = Coordinator::new(&stores, &http);
        let adapter = FixtureAdapter { fail_partition: None };
        let empty_ctx = FetchContext {
            service_key: String::new(),
            fetched_at: Utc::now(),
        };

        let log = coordinator
            .run_collector(&adapter, &empty_ctx)
            .await
            .unwrap();
        assert_eq!(log.status, RunStatus::Error);
        assert_eq!(log.fetched, 0);
        assert!(log.error.as_deref().unwrap().contains("missing credential"));

        let rows = stores.collection_logs.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(stores.places.all().await.unwrap().is_empty());
    }
}
