use super::*;
use ozon_repricer::catalog;
use ozon_repricer::marketplace::Visibility;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_catalog_merges_details_in_listing_order() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(list_page(summary_items(1..4), ""))
        .mount(&server)
        .await;
    // details come back shuffled and without product 2
    Mock::given(method("POST"))
        .and(path("/v3/product/info/list"))
        .and(body_partial_json(json!({"product_id": [1, 2, 3]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": 3, "name": "Teapot", "price": "1500", "marketing_price": "1400",
                 "primary_image": ["https://cdn.example/3.jpg"],
                 "statuses": {"status_description": "On sale"}},
                {"id": 1, "name": "Kettle", "price": "1000", "marketing_price": ""}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let products = catalog::assemble(&client, Visibility::All, 1000).await;

    let offers: Vec<&str> = products.iter().map(|p| p.offer_id()).collect();
    assert_eq!(offers, vec!["ART-1", "ART-2", "ART-3"]);
    assert_eq!(products[0].name(), Some("Kettle"));
    assert!(products[1].detail.is_none());
    assert_eq!(products[2].marketing_price(), Some("1400"));
    assert_eq!(products[2].status_description(), Some("On sale"));
    assert_eq!(products[2].primary_image_url(), Some("https://cdn.example/3.jpg"));

    Ok(())
}

#[tokio::test]
async fn test_catalog_falls_back_to_listing_when_details_fail() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(list_page(summary_items(1..3), ""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/info/list"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let products = catalog::assemble(&client, Visibility::All, 1000).await;

    assert_eq!(products.len(), 2);
    assert!(products.iter().all(|p| p.detail.is_none()));
    assert_eq!(products[1].to_json()["offer_id"], "ART-2");

    Ok(())
}

#[tokio::test]
async fn test_empty_listing_skips_detail_lookup() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(list_page(Vec::new(), ""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/info/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    assert!(catalog::assemble(&client, Visibility::All, 1000).await.is_empty());

    Ok(())
}
