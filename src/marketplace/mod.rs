use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{PriceUpdateRequest, ProductDetail, ProductSummary, UpdateOutcome};

pub mod client;

pub use client::MarketplaceClient;

/// Largest page, id batch or price batch the seller API accepts per call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Product visibility filter for the listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    All,
    Visible,
    Invisible,
    EmptyStock,
    NotModerated,
    Moderated,
    Disabled,
    StateFailed,
    ReadyToSupply,
    InSale,
    RemovedFromSale,
    Archived,
}

/// Seller API operations used by the repricing engine.
///
/// Implementations never surface transport failures: a failed page or chunk
/// only shortens the returned sequence, and failed price batches land in
/// [`UpdateOutcome::failed`].
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Walks the paginated product listing until the cursor runs out.
    async fn list_all_products(&self, visibility: Visibility, page_size: u32) -> Vec<ProductSummary>;

    /// Looks up product details in batches of at most [`MAX_BATCH_SIZE`] ids.
    async fn fetch_details(&self, ids: &[i64]) -> Vec<ProductDetail>;

    /// Submits price updates in batches of at most [`MAX_BATCH_SIZE`].
    async fn submit_price_updates(&self, requests: &[PriceUpdateRequest]) -> UpdateOutcome;
}
