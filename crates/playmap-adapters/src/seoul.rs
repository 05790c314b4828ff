//! Adapter for the Seoul city cultural events API (`seoul_gov`).
//!
//! Paging is a 1-based window: the token is the start index and each page
//! covers `[start, start + page_size - 1]`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use playmap_core::{Category, PlaceDraft};
use playmap_storage::HttpFetcher;

use crate::{
    district_from_address, non_empty, normalize_yyyymmdd, scaled_coordinate, AdapterError,
    FetchContext, Partition, SourceAdapter, SourcePage,
};

const BASE_URL: &str = "http://openapi.seoul.go.kr:8088";

pub struct SeoulEventsAdapter;

fn category_for_codename(codename: &str) -> Category {
    let code = codename.trim();
    if code.contains("뮤지컬") || code.contains("오페라") || code.contains("연극") || code.contains("콘서트")
    {
        Category::Performance
    } else if code.contains("전시") || code.contains("미술") {
        Category::Exhibition
    } else if code.contains("축제") {
        Category::Festival
    } else if code.contains("교육") || code.contains("체험") {
        Category::Experience
    } else {
        Category::Other
    }
}

fn row_str<'a>(row: &'a JsonValue, field: &str) -> Option<&'a str> {
    row.get(field).and_then(JsonValue::as_str)
}

#[async_trait]
impl SourceAdapter for SeoulEventsAdapter {
    fn source(&self) -> &'static str {
        "seoul_gov"
    }

    fn partitions(&self) -> Vec<Partition> {
        vec![Partition::whole_source("cultural-events")]
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
        partition: &Partition,
        start: u32,
    ) -> Result<SourcePage, AdapterError> {
        if ctx.service_key.is_empty() {
            return Err(AdapterError::MissingCredential("SEOUL_API_KEY"));
        }
        let end = start + self.page_size() - 1;
        let url = format!(
            "{BASE_URL}/{key}/json/culturalEventInfo/{start}/{end}/",
            key = ctx.service_key,
        );
        let body: JsonValue = http.get_json(self.source(), &url).await?;
        self.parse_page(partition, start, &body)
    }

    fn parse_page(
        &self,
        _partition: &Partition,
        start: u32,
        body: &JsonValue,
    ) -> Result<SourcePage, AdapterError> {
        let root = body
            .get("culturalEventInfo")
            .ok_or_else(|| AdapterError::Payload("missing culturalEventInfo".into()))?;
        let total = root
            .get("list_total_count")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| AdapterError::Payload("missing list_total_count".into()))?;

        let rows: Vec<&JsonValue> = match root.get("row") {
            Some(JsonValue::Array(arr)) => arr.iter().collect(),
            _ => Vec::new(),
        };

        let drafts = rows
            .into_iter()
            .filter_map(|row| {
                let source_id = non_empty(row_str(row, "EVENT_ID"))?;
                let name = non_empty(row_str(row, "TITLE"))?;
                let address = non_empty(row_str(row, "PLACE"));
                let district = non_empty(row_str(row, "GUNAME"))
                    .or_else(|| address.as_deref().and_then(district_from_address));
                Some(PlaceDraft {
                    source: self.source().to_string(),
                    source_id,
                    name,
                    category: row_str(row, "CODENAME")
                        .map(category_for_codename)
                        .unwrap_or(Category::Other),
                    address,
                    district,
                    lat: row.get("LAT").and_then(JsonValue::as_i64).map(scaled_coordinate),
                    lng: row.get("LOT").and_then(JsonValue::as_i64).map(scaled_coordinate),
                    start_date: row_str(row, "STRTDATE").and_then(normalize_yyyymmdd),
                    end_date: row_str(row, "END_DATE").and_then(normalize_yyyymmdd),
                    price: non_empty(row_str(row, "USE_FEE")),
                    age_range: non_empty(row_str(row, "USE_TRGT")),
                    indoor: None,
                    facility_tags: Vec::new(),
                })
            })
            .collect::<Vec<_>>();

        let end = u64::from(start) + u64::from(self.page_size()) - 1;
        let next_token = if end < total {
            Some(start + self.page_size())
        } else {
            None
        };

        Ok(SourcePage { drafts, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partition() -> Partition {
        Partition::whole_source("cultural-events")
    }

    fn page_body(total: u64, rows: JsonValue) -> JsonValue {
        json!({
            "culturalEventInfo": {
                "list_total_count": total,
                "row": rows
            }
        })
    }

    #[test]
    fn window_paging_advances_by_page_size() {
        let adapter = SeoulEventsAdapter;
        let body = page_body(250, json!([]));

        let first = adapter.parse_page(&partition(), 1, &body).unwrap();
        assert_eq!(first.next_token, Some(101));

        let last = adapter.parse_page(&partition(), 201, &body).unwrap();
        assert_eq!(last.next_token, None);
    }

    #[test]
    fn rows_normalize_into_drafts() {
        let adapter = SeoulEventsAdapter;
        let body = page_body(
            1,
            json!([{
                "EVENT_ID": "ev-2026-001",
                "TITLE": "어린이 뮤지컬",
                "CODENAME": "뮤지컬/오페라",
                "GUNAME": "종로구",
                "PLACE": "세종문화회관",
                "LAT": 375_720_000i64,
                "LOT": 1_269_760_000i64,
                "STRTDATE": "20260401",
                "END_DATE": "20260430",
                "USE_FEE": "전석 20,000원",
                "USE_TRGT": "5세 이상"
            }]),
        );

        let page = adapter.parse_page(&partition(), 1, &body).unwrap();
        assert_eq!(page.drafts.len(), 1);
        let draft = &page.drafts[0];
        assert_eq!(draft.category, Category::Performance);
        assert_eq!(draft.district.as_deref(), Some("종로구"));
        assert_eq!(draft.lat, Some(37.572));
        assert_eq!(draft.price.as_deref(), Some("전석 20,000원"));
    }

    #[test]
    fn unknown_codename_falls_back_to_other() {
        assert_eq!(category_for_codename("기타/행사"), Category::Other);
        assert_eq!(category_for_codename("전시/미술"), Category::Exhibition);
        assert_eq!(category_for_codename("축제-문화/예술"), Category::Festival);
    }
}
