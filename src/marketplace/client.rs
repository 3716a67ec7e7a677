use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};
use url::Url;
use validator::Validate;

use super::{MAX_BATCH_SIZE, MarketplaceApi, Visibility};
use crate::config::ApiConfig;
use crate::models::{
    Credentials, PriceUpdateRequest, PriceUpdateResult, ProductDetail, ProductSummary, UpdateOutcome,
};
use crate::utils::error::{AppError, Result};

const LIST_ENDPOINT: &str = "/v3/product/list";
const INFO_ENDPOINT: &str = "/v3/product/info/list";
const IMPORT_PRICES_ENDPOINT: &str = "/v1/product/import/prices";

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    filter: ListFilter,
    last_id: &'a str,
    limit: u32,
}

#[derive(Debug, Serialize)]
struct ListFilter {
    visibility: Visibility,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: ListResult,
}

#[derive(Debug, Default, Deserialize)]
struct ListResult {
    #[serde(default)]
    items: Vec<ProductSummary>,
    #[serde(default)]
    last_id: String,
}

#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    product_id: &'a [i64],
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    items: Option<Vec<ProductDetail>>,
}

#[derive(Debug, Serialize)]
struct ImportPricesRequest<'a> {
    prices: &'a [PriceUpdateRequest],
}

#[derive(Debug, Deserialize)]
struct ImportPricesResponse {
    result: Option<Vec<PriceUpdateResult>>,
}

/// Authenticated client for one seller account.
#[derive(Debug, Clone)]
pub struct MarketplaceClient {
    http: Client,
    base_url: Url,
    client_id: String,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl MarketplaceClient {
    /// Fails immediately when either credential is empty.
    pub fn new(credentials: &Credentials, config: &ApiConfig) -> Result<Self> {
        credentials.validate()?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AppError::Validation(format!("Invalid API base URL {}: {}", config.base_url, e))
        })?;

        let mut api_key = header_value("Api-Key", &credentials.api_key)?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("client-id"),
            header_value("Client-Id", &credentials.client_id)?,
        );
        headers.insert(HeaderName::from_static("api-key"), api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .user_agent(concat!("ozon-repricer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            client_id: credentials.client_id.clone(),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| AppError::Internal(format!("Invalid endpoint {}: {}", endpoint, e)))?;

        let strategy = FixedInterval::new(self.retry_delay).take(self.retry_attempts);
        RetryIf::spawn(
            strategy,
            || self.post_once(url.clone(), body),
            |e: &AppError| {
                let transient = e.is_transient();
                if transient {
                    warn!("Retrying {} after transient failure: {}", endpoint, e);
                }
                transient
            },
        )
        .await
    }

    async fn post_once<B, R>(&self, url: Url, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<R>().await?)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| AppError::Validation(format!("{} contains characters not allowed in a header", name)))
}

#[async_trait]
impl MarketplaceApi for MarketplaceClient {
    async fn list_all_products(&self, visibility: Visibility, page_size: u32) -> Vec<ProductSummary> {
        let limit = page_size.clamp(1, MAX_BATCH_SIZE as u32);
        let mut products = Vec::new();
        let mut last_id = String::new();

        info!("Loading product list (visibility {:?})", visibility);
        loop {
            let request = ListRequest {
                filter: ListFilter { visibility },
                last_id: &last_id,
                limit,
            };

            let page: ListResponse = match self.post(LIST_ENDPOINT, &request).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Product listing stopped early after {} items: {}", products.len(), e);
                    break;
                }
            };

            let ListResult { items, last_id: next_id } = page.result;
            if items.is_empty() {
                break;
            }
            products.extend(items);
            debug!("Loaded product page, {} products so far", products.len());

            if next_id.is_empty() {
                break;
            }
            if next_id == last_id {
                warn!("Listing cursor did not advance ({}), stopping", next_id);
                break;
            }
            last_id = next_id;
        }

        info!("Product list loaded: {} products", products.len());
        products
    }

    async fn fetch_details(&self, ids: &[i64]) -> Vec<ProductDetail> {
        let mut details = Vec::with_capacity(ids.len());
        debug!("Loading details for {} products", ids.len());

        for chunk in ids.chunks(MAX_BATCH_SIZE) {
            let request = InfoRequest { product_id: chunk };
            match self.post::<_, InfoResponse>(INFO_ENDPOINT, &request).await {
                Ok(InfoResponse { items: Some(items) }) => {
                    details.extend(items);
                    debug!("Loaded details for {}/{} products", details.len(), ids.len());
                }
                Ok(InfoResponse { items: None }) => {
                    warn!("Detail batch of {} ids returned no items field", chunk.len());
                }
                Err(e) => {
                    warn!("Detail batch of {} ids failed: {}", chunk.len(), e);
                }
            }
        }

        details
    }

    async fn submit_price_updates(&self, requests: &[PriceUpdateRequest]) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        if requests.is_empty() {
            return outcome;
        }

        info!("Submitting price updates for {} items", requests.len());
        for chunk in requests.chunks(MAX_BATCH_SIZE) {
            let request = ImportPricesRequest { prices: chunk };
            match self.post::<_, ImportPricesResponse>(IMPORT_PRICES_ENDPOINT, &request).await {
                Ok(ImportPricesResponse { result: Some(results) }) => {
                    for result in results {
                        if result.updated {
                            outcome.successful.push(result);
                        } else {
                            outcome.failed.push(result);
                        }
                    }
                    debug!("Processed price batch of {} items", chunk.len());
                }
                Ok(ImportPricesResponse { result: None }) => {
                    warn!("Price batch of {} items returned no result field", chunk.len());
                    outcome.failed.extend(chunk.iter().map(PriceUpdateResult::rejected));
                }
                Err(e) => {
                    warn!("Price batch of {} items failed: {}", chunk.len(), e);
                    outcome.failed.extend(chunk.iter().map(PriceUpdateResult::rejected));
                }
            }
        }

        info!(
            "Price submission finished: {} updated, {} failed",
            outcome.successful.len(),
            outcome.failed.len()
        );
        outcome
    }
}
