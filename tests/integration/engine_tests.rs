use super::*;
use ozon_repricer::console;
use ozon_repricer::settings::SettingsStore;
use ozon_repricer::tracking::TrackingStore;
use ozon_repricer::{EngineHandle, Session};
use serde_json::{Value, json};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v3/product/list"))
        .respond_with(list_page(summary_items(1..3), ""))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/product/info/list"))
        .respond_with(EchoDetails {
            price_of: |id| if id == 1 { "1000".to_string() } else { "500".to_string() },
        })
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/product/import/prices"))
        .respond_with(ImportResults { rejected: vec![] })
        .mount(server)
        .await;
}

fn save_account(path: &Path, targets: &[(&str, u32)]) -> anyhow::Result<()> {
    let mut settings = SettingsStore::open(path)?;
    settings.save_credentials(&Credentials::new(CLIENT_ID, API_KEY));
    let mut tracking = TrackingStore::new(CLIENT_ID);
    for (offer_id, target) in targets {
        tracking.track(*offer_id, *target)?;
    }
    settings.save_tracked_products(&tracking);
    settings.flush()?;
    Ok(())
}

async fn cycles_succeeded(handle: &EngineHandle, count: u64) -> bool {
    let handle = handle.clone();
    wait_for_condition(
        || {
            let handle = handle.clone();
            async move {
                handle
                    .snapshot()
                    .await
                    .map(|s| s.stats.cycles_succeeded >= count && s.phase.is_none())
                    .unwrap_or(false)
            }
        },
        5,
    )
    .await
}

async fn submitted_prices(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == "/v1/product/import/prices")
        .filter_map(|request| request.body_json::<Value>().ok())
        .flat_map(|body| body["prices"].as_array().cloned().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_cycle_resubmits_only_drifted_targets() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let dir = tempfile::tempdir()?;
    let settings_path = dir.path().join("settings.toml");
    save_account(&settings_path, &[("ART-1", 850), ("ART-2", 500)])?;

    let config = get_test_config(&server.uri());
    let (session, handle) = Session::new(&config, SettingsStore::open(&settings_path)?)?;
    let engine = tokio::spawn(session.run());

    handle.start(None).await?;
    assert!(cycles_succeeded(&handle, 1).await, "first cycle did not finish");

    let prices = submitted_prices(&server).await;
    assert_eq!(
        prices,
        vec![json!({"offer_id": "ART-1", "price": "998.00", "old_price": "0", "currency_code": "RUB"})]
    );

    let snapshot = handle.snapshot().await?;
    assert_eq!(snapshot.account, CLIENT_ID);
    assert!(snapshot.timer_armed);
    assert_eq!(snapshot.tracked, 2);
    assert_eq!(snapshot.stats.updates_submitted, 1);
    // newest listing entries come first
    let offers: Vec<&str> = snapshot.rows.iter().map(|row| row.offer_id.as_str()).collect();
    assert_eq!(offers, vec!["ART-2", "ART-1"]);
    assert!(snapshot.rows.iter().all(|row| row.checked));

    handle.shutdown();
    engine.await??;

    Ok(())
}

#[tokio::test]
async fn test_edits_apply_on_leaving_edit_mode() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let dir = tempfile::tempdir()?;
    let settings_path = dir.path().join("settings.toml");
    save_account(&settings_path, &[])?;

    let config = get_test_config(&server.uri());
    let (session, handle) = Session::new(&config, SettingsStore::open(&settings_path)?)?;
    let engine = tokio::spawn(session.run());

    handle.start(None).await?;
    assert!(cycles_succeeded(&handle, 1).await);
    assert!(submitted_prices(&server).await.is_empty());

    assert!(handle.toggle_edit_mode().await?);
    handle.set_checked("ART-2", true).await?;
    handle.set_target("ART-2", Some(600)).await?;
    handle.set_checked("ART-1", true).await?;
    assert!(!handle.toggle_edit_mode().await?);
    assert!(cycles_succeeded(&handle, 2).await, "edit cycle did not finish");

    // ART-1 was checked without a target and is dropped on apply
    let prices = submitted_prices(&server).await;
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0]["offer_id"], "ART-2");
    assert_eq!(prices[0]["price"], "705.00");

    handle.shutdown();
    engine.await??;

    let saved = SettingsStore::open(&settings_path)?.load_tracked_products(CLIENT_ID);
    assert_eq!(saved.target("ART-2"), Some(600));
    assert!(!saved.contains("ART-1"));

    Ok(())
}

#[tokio::test]
async fn test_console_session_ends_engine_on_quit() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let dir = tempfile::tempdir()?;
    let settings_path = dir.path().join("settings.toml");
    save_account(&settings_path, &[])?;

    let config = get_test_config(&server.uri());
    let (session, handle) = Session::new(&config, SettingsStore::open(&settings_path)?)?;
    let engine = tokio::spawn(session.run());

    let (lines, input) = tokio::sync::mpsc::unbounded_channel();
    for line in ["status", "frobnicate", "edit", "coef 0,9", "edit", "quit", "status"] {
        lines.send(line.to_string())?;
    }
    console::run_console(handle.clone(), input).await;

    engine.await??;
    assert!(handle.is_closed());

    let saved = SettingsStore::open(&settings_path)?;
    assert_eq!(saved.load_coefficient(0.852), 0.9);

    Ok(())
}
