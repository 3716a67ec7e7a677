// Integration tests for ozon-repricer
// These run the client and the engine against a mock seller API

pub mod catalog_tests;
pub mod client_tests;
pub mod engine_tests;

use ozon_repricer::{AppConfig, MarketplaceClient, models::Credentials};
use serde_json::{Value, json};
use wiremock::{Request, Respond, ResponseTemplate};

pub const CLIENT_ID: &str = "123456";
pub const API_KEY: &str = "test-api-key";

/// Test configuration pointing at a mock server
pub fn get_test_config(base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.api.base_url = base_url.to_string();
    config.api.request_timeout = 5;
    config.api.retry_delay_ms = 10;
    config.images.enabled = false;
    config
}

pub fn create_test_client(base_url: &str) -> MarketplaceClient {
    MarketplaceClient::new(&Credentials::new(CLIENT_ID, API_KEY), &get_test_config(base_url).api)
        .expect("test credentials are valid")
}

/// Listing items `ART-{id}` for every id in the range
pub fn summary_items(ids: std::ops::Range<i64>) -> Vec<Value> {
    ids.map(|id| json!({"product_id": id, "offer_id": format!("ART-{}", id)}))
        .collect()
}

pub fn list_page(items: Vec<Value>, last_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": {"items": items, "last_id": last_id, "total": 0}
    }))
}

/// Answers a detail lookup with one record per requested id, priced by
/// `price_of`, in request order.
pub struct EchoDetails {
    pub price_of: fn(i64) -> String,
}

impl Respond for EchoDetails {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match request.body_json() {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let items: Vec<Value> = body["product_id"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_i64)
                    .map(|id| {
                        json!({
                            "id": id,
                            "offer_id": format!("ART-{}", id),
                            "name": format!("Product {}", id),
                            "price": (self.price_of)(id),
                            "marketing_price": "",
                            "primary_image": [],
                            "statuses": {"status": "price_sent", "status_description": ""}
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "items": items }))
    }
}

/// Reports every submitted price as updated except the listed offers
pub struct ImportResults {
    pub rejected: Vec<&'static str>,
}

impl Respond for ImportResults {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match request.body_json() {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let result: Vec<Value> = body["prices"]
            .as_array()
            .map(|prices| {
                prices
                    .iter()
                    .enumerate()
                    .map(|(i, price)| {
                        let offer_id = price["offer_id"].as_str().unwrap_or_default();
                        let updated = !self.rejected.contains(&offer_id);
                        let errors = if updated {
                            json!([])
                        } else {
                            json!([{"code": "PRICE_TOO_LOW", "message": "price is below the minimum"}])
                        };
                        json!({"product_id": i as i64 + 1, "offer_id": offer_id, "updated": updated, "errors": errors})
                    })
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "result": result }))
    }
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    false
}
