use super::*;
use ozon_repricer::MarketplaceApi;
use ozon_repricer::marketplace::Visibility;
use ozon_repricer::models::PriceUpdateRequest;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn offer_ids(prefix: &str, count: usize) -> Vec<PriceUpdateRequest> {
    (1..=count)
        .map(|i| PriceUpdateRequest::for_offer(format!("{}-{}", prefix, i), Decimal::from(100 + i as i64)))
        .collect()
}

#[tokio::test]
async fn test_listing_follows_cursor_until_exhausted() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .and(body_partial_json(json!({"last_id": "", "limit": 1000, "filter": {"visibility": "ALL"}})))
        .respond_with(list_page(summary_items(0..1000), "cursor-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .and(body_partial_json(json!({"last_id": "cursor-1"})))
        .respond_with(list_page(summary_items(1000..2000), "cursor-2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .and(body_partial_json(json!({"last_id": "cursor-2"})))
        .respond_with(list_page(summary_items(2000..2437), ""))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let products = client.list_all_products(Visibility::All, 1000).await;

    assert_eq!(products.len(), 2437);
    assert!(products.iter().enumerate().all(|(i, p)| p.product_id == i as i64));
    assert_eq!(products[2436].offer_id, "ART-2436");

    Ok(())
}

#[tokio::test]
async fn test_listing_keeps_pages_loaded_before_a_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .and(body_partial_json(json!({"last_id": ""})))
        .respond_with(list_page(summary_items(0..1000), "cursor-1"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .and(body_partial_json(json!({"last_id": "cursor-1"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let products = client.list_all_products(Visibility::All, 1000).await;

    assert_eq!(products.len(), 1000);

    Ok(())
}

#[tokio::test]
async fn test_listing_stops_on_empty_page() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(list_page(Vec::new(), "cursor-that-goes-nowhere"))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    assert!(client.list_all_products(Visibility::Visible, 1000).await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_transient_failure_is_retried_when_configured() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(list_page(summary_items(0..3), ""))
        .mount(&server)
        .await;

    let mut config = get_test_config(&server.uri());
    config.api.retry_attempts = 2;
    let client = MarketplaceClient::new(&Credentials::new(CLIENT_ID, API_KEY), &config.api)?;

    assert_eq!(client.list_all_products(Visibility::All, 1000).await.len(), 3);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_requests_carry_account_headers() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .and(header("Client-Id", CLIENT_ID))
        .and(header("Api-Key", API_KEY))
        .and(header("Content-Type", "application/json"))
        .respond_with(list_page(summary_items(0..1), ""))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    assert_eq!(client.list_all_products(Visibility::All, 1000).await.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_details_are_requested_in_chunks() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/info/list"))
        .respond_with(EchoDetails {
            price_of: |_| "100".to_string(),
        })
        .expect(3)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let ids: Vec<i64> = (1..=2500).collect();
    let details = client.fetch_details(&ids).await;

    assert_eq!(details.len(), 2500);
    assert!(details.iter().zip(&ids).all(|(detail, id)| detail.id == *id));

    let chunk_sizes: Vec<usize> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| {
            let body: Value = request.body_json().unwrap_or_default();
            body["product_id"].as_array().map(Vec::len).unwrap_or_default()
        })
        .collect();
    assert_eq!(chunk_sizes, vec![1000, 1000, 500]);

    Ok(())
}

#[tokio::test]
async fn test_failed_detail_chunk_is_skipped() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/info/list"))
        .and(body_partial_json(json!({"product_id": [1]})))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    assert!(client.fetch_details(&[1]).await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_empty_inputs_make_no_calls() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = create_test_client(&server.uri());

    assert!(client.fetch_details(&[]).await.is_empty());
    let outcome = client.submit_price_updates(&[]).await;
    assert_eq!(outcome.total(), 0);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_price_results_are_split_by_updated_flag() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/product/import/prices"))
        .respond_with(ImportResults {
            rejected: vec!["ART-2", "ART-4"],
        })
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let outcome = client.submit_price_updates(&offer_ids("ART", 5)).await;

    let updated: Vec<String> = outcome.successful.iter().map(|r| r.label()).collect();
    let failed: Vec<String> = outcome.failed.iter().map(|r| r.label()).collect();
    assert_eq!(updated, vec!["ART-1", "ART-3", "ART-5"]);
    assert_eq!(failed, vec!["ART-2", "ART-4"]);
    assert_eq!(outcome.failed[0].errors.len(), 1);
    assert!(outcome.failed[0].errors[0].contains("PRICE_TOO_LOW"));

    Ok(())
}

#[tokio::test]
async fn test_failed_price_batch_marks_every_item_failed() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/product/import/prices"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let requests = offer_ids("ART", 3);
    let outcome = client.submit_price_updates(&requests).await;

    assert!(outcome.successful.is_empty());
    assert_eq!(outcome.failed.len(), 3);
    assert!(outcome.failed.iter().all(|result| !result.updated));

    Ok(())
}

#[tokio::test]
async fn test_price_batches_are_capped_at_one_thousand() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/product/import/prices"))
        .respond_with(ImportResults { rejected: vec![] })
        .expect(2)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let outcome = client.submit_price_updates(&offer_ids("SKU", 1001)).await;

    assert_eq!(outcome.successful.len(), 1001);

    let first: Value = server.received_requests().await.unwrap_or_default()[0].body_json()?;
    assert_eq!(
        first["prices"][0],
        json!({"offer_id": "SKU-1", "price": "101.00", "old_price": "0", "currency_code": "RUB"})
    );

    Ok(())
}
