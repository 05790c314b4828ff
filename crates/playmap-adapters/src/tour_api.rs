//! Adapter for the national tourism open API (`tour_api`).
//!
//! Pages are numeric and 1-based; partitions are content-type × area-code so
//! a single content type failing upstream cannot block the others.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use playmap_core::{Category, PlaceDraft};
use playmap_storage::HttpFetcher;

use crate::{
    district_from_address, non_empty, normalize_yyyymmdd, scaled_coordinate, AdapterError,
    FetchContext, Partition, SourceAdapter, SourcePage,
};

const BASE_URL: &str = "https://apis.data.go.kr/B551011/KorService1/areaBasedList1";

/// Seoul-area content types collected by default: attractions, cultural
/// facilities, festivals/performances, leisure/sports.
const CONTENT_TYPES: [&str; 4] = ["12", "14", "15", "28"];
const AREA_SEOUL: &str = "1";

pub struct TourApiAdapter;

fn category_for_content_type(content_type_id: &str) -> Category {
    // Provider code → canonical taxonomy; unknown codes land in the
    // "기타/행사" bucket.
    match content_type_id {
        "12" => Category::Park,
        "14" => Category::Museum,
        "15" => Category::Festival,
        "28" => Category::Sports,
        _ => Category::Other,
    }
}

fn item_str<'a>(item: &'a JsonValue, field: &str) -> Option<&'a str> {
    item.get(field).and_then(JsonValue::as_str)
}

fn item_scaled_coord(item: &JsonValue, field: &str) -> Option<f64> {
    item.get(field).and_then(JsonValue::as_i64).map(scaled_coordinate)
}

#[async_trait]
impl SourceAdapter for TourApiAdapter {
    fn source(&self) -> &'static str {
        "tour_api"
    }

    fn partitions(&self) -> Vec<Partition> {
        CONTENT_TYPES
            .iter()
            .map(|ct| Partition {
                label: format!("ct{ct}-area{AREA_SEOUL}"),
                content_type_id: Some((*ct).to_string()),
                area_code: Some(AREA_SEOUL.to_string()),
            })
            .collect()
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
        partition: &Partition,
        page: u32,
    ) -> Result<SourcePage, AdapterError> {
        if ctx.service_key.is_empty() {
            return Err(AdapterError::MissingCredential("TOUR_API_KEY"));
        }
        let content_type = partition.content_type_id.as_deref().unwrap_or("12");
        let area = partition.area_code.as_deref().unwrap_or(AREA_SEOUL);
        let url = format!(
            "{BASE_URL}?serviceKey={key}&MobileOS=ETC&MobileApp=playmap&_type=json\
             &numOfRows={rows}&pageNo={page}&contentTypeId={content_type}&areaCode={area}",
            key = ctx.service_key,
            rows = self.page_size(),
        );
        let body: JsonValue = http.get_json(self.source(), &url).await?;
        self.parse_page(partition, page, &body)
    }

    fn parse_page(
        &self,
        partition: &Partition,
        page: u32,
        body: &JsonValue,
    ) -> Result<SourcePage, AdapterError> {
        let response_body = body
            .pointer("/response/body")
            .ok_or_else(|| AdapterError::Payload("missing response.body".into()))?;
        let total = response_body
            .get("totalCount")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| AdapterError::Payload("missing totalCount".into()))?;

        // Single-item pages arrive as an object, multi-item as an array.
        let items: Vec<&JsonValue> = match response_body.pointer("/items/item") {
            Some(JsonValue::Array(arr)) => arr.iter().collect(),
            Some(obj @ JsonValue::Object(_)) => vec![obj],
            _ => Vec::new(),
        };

        let fallback_category = partition
            .content_type_id
            .as_deref()
            .map(category_for_content_type)
            .unwrap_or(Category::Other);

        let drafts = items
            .into_iter()
            .filter_map(|item| {
                // A record without identity or name cannot be keyed; skip it.
                let source_id = non_empty(item_str(item, "contentid"))?;
                let name = non_empty(item_str(item, "title"))?;
                let address = non_empty(item_str(item, "addr1"));
                let district = address.as_deref().and_then(district_from_address);
                let category = item_str(item, "contenttypeid")
                    .map(category_for_content_type)
                    .unwrap_or(fallback_category);
                Some(PlaceDraft {
                    source: self.source().to_string(),
                    source_id,
                    name,
                    category,
                    address,
                    district,
                    lat: item_scaled_coord(item, "mapy"),
                    lng: item_scaled_coord(item, "mapx"),
                    start_date: item_str(item, "eventstartdate").and_then(normalize_yyyymmdd),
                    end_date: item_str(item, "eventenddate").and_then(normalize_yyyymmdd),
                    price: non_empty(item_str(item, "usefee")),
                    age_range: non_empty(item_str(item, "agelimit")),
                    indoor: None,
                    facility_tags: Vec::new(),
                })
            })
            .collect::<Vec<_>>();

        let seen = u64::from(page) * u64::from(self.page_size());
        let next_token = if seen < total { Some(page + 1) } else { None };

        Ok(SourcePage { drafts, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn partition() -> Partition {
        Partition {
            label: "ct15-area1".into(),
            content_type_id: Some("15".into()),
            area_code: Some("1".into()),
        }
    }

    fn page_body(total: u64, items: JsonValue) -> JsonValue {
        json!({
            "response": {
                "body": {
                    "totalCount": total,
                    "items": { "item": items }
                }
            }
        })
    }

    #[test]
    fn parses_items_and_signals_more_pages() {
        let adapter = TourApiAdapter;
        let body = page_body(
            250,
            json!([{
                "contentid": "126508",
                "title": "서울 어린이 축제",
                "addr1": "서울특별시 송파구 올림픽로 240",
                "contenttypeid": "15",
                "mapy": 375_123_450i64,
                "mapx": 1_271_100_230i64,
                "eventstartdate": "20260301",
                "eventenddate": "20260310"
            }]),
        );

        let page = adapter.parse_page(&partition(), 1, &body).unwrap();
        assert_eq!(page.next_token, Some(2));
        assert_eq!(page.drafts.len(), 1);

        let draft = &page.drafts[0];
        assert_eq!(draft.source, "tour_api");
        assert_eq!(draft.source_id, "126508");
        assert_eq!(draft.category, Category::Festival);
        assert_eq!(draft.district.as_deref(), Some("송파구"));
        assert_eq!(draft.lat, Some(37.512345));
        assert_eq!(draft.lng, Some(127.110023));
        assert_eq!(draft.start_date.unwrap().to_string(), "2026-03-01");
    }

    #[test]
    fn last_page_has_no_next_token() {
        let adapter = TourApiAdapter;
        let body = page_body(150, json!([]));
        let page = adapter.parse_page(&partition(), 2, &body).unwrap();
        assert_eq!(page.next_token, None);
    }

    #[test]
    fn malformed_dates_degrade_to_none() {
        let adapter = TourApiAdapter;
        let body = page_body(
            1,
            json!([{
                "contentid": "9",
                "title": "상설 전시",
                "contenttypeid": "14",
                "eventstartdate": "2026031",
                "eventenddate": "not-a-date"
            }]),
        );
        let page = adapter.parse_page(&partition(), 1, &body).unwrap();
        let draft = &page.drafts[0];
        assert_eq!(draft.category, Category::Museum);
        assert_eq!(draft.start_date, None);
        assert_eq!(draft.end_date, None);
        assert_eq!(draft.lat, None);
    }

    #[test]
    fn unknown_content_type_falls_back_to_other() {
        let adapter = TourApiAdapter;
        let body = page_body(
            1,
            json!([{ "contentid": "7", "title": "미분류", "contenttypeid": "99" }]),
        );
        let page = adapter.parse_page(&partition(), 1, &body).unwrap();
        assert_eq!(page.drafts[0].category, Category::Other);
    }

    #[test]
    fn single_item_object_payload_is_accepted() {
        let adapter = TourApiAdapter;
        let body = page_body(
            1,
            json!({ "contentid": "1", "title": "단일 항목", "contenttypeid": "12" }),
        );
        let page = adapter.parse_page(&partition(), 1, &body).unwrap();
        assert_eq!(page.drafts.len(), 1);
        assert_eq!(page.drafts[0].category, Category::Park);
    }

    #[test]
    fn items_without_identity_are_skipped() {
        let adapter = TourApiAdapter;
        let body = page_body(
            2,
            json!([
                { "title": "이름만 있는 항목" },
                { "contentid": "2", "title": "정상 항목" }
            ]),
        );
        let page = adapter.parse_page(&partition(), 1, &body).unwrap();
        assert_eq!(page.drafts.len(), 1);
        assert_eq!(page.drafts[0].source_id, "2");
    }
}
