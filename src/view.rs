//! Per-row view model of the displayed catalog.
//!
//! Rows are built once per session from the first successful fetch; later
//! cycles only refresh prices of rows whose offer is still listed.

use serde::Serialize;
use std::collections::HashMap;

use crate::images::Thumbnail;
use crate::models::EnrichedProduct;
use crate::pricing::{PriceInputs, PricingPolicy};
use crate::tracking::TrackingStore;

/// Status label shown when the marketplace reports no status description.
pub const ON_SALE_STATUS: &str = "On sale";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ThumbnailState {
    NoImage,
    Loading,
    Ready(Thumbnail),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRow {
    pub offer_id: String,
    pub product_id: i64,
    pub name: String,
    pub status: String,
    pub on_sale: bool,
    pub display_price: Option<String>,
    pub checked: bool,
    pub target_input: Option<u32>,
    pub image_url: Option<String>,
    pub thumbnail: ThumbnailState,
    #[serde(skip)]
    price_inputs: Option<PriceInputs>,
}

impl ProductRow {
    fn build(product: &EnrichedProduct, tracking: &TrackingStore, policy: &PricingPolicy) -> Self {
        let offer_id = product.offer_id().to_string();
        let status = match product.status_description() {
            Some(description) if !description.is_empty() => description.to_string(),
            _ => ON_SALE_STATUS.to_string(),
        };
        let image_url = product.primary_image_url().map(str::to_string);
        let price_inputs = PriceInputs::from_product(product);
        let target = tracking.target(&offer_id);

        Self {
            product_id: product.product_id(),
            name: product.name().unwrap_or_default().to_string(),
            on_sale: status == ON_SALE_STATUS,
            status,
            display_price: price_inputs.and_then(|inputs| policy.display_price_label(&inputs)),
            checked: target.is_some(),
            target_input: target,
            thumbnail: if image_url.is_some() {
                ThumbnailState::Loading
            } else {
                ThumbnailState::NoImage
            },
            image_url,
            price_inputs,
            offer_id,
        }
    }

    pub fn price_inputs(&self) -> Option<PriceInputs> {
        self.price_inputs
    }

    fn reprice(&mut self, policy: &PricingPolicy) {
        if let Some(label) = self.price_inputs.and_then(|inputs| policy.display_price_label(&inputs)) {
            self.display_price = Some(label);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogView {
    rows: Vec<ProductRow>,
    status_filter: bool,
}

impl CatalogView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all rows and resets the status filter. Returns the
    /// `(row, image url)` jobs for the thumbnail downloader.
    pub fn rebuild(
        &mut self,
        products: &[EnrichedProduct],
        tracking: &TrackingStore,
        policy: &PricingPolicy,
    ) -> Vec<(usize, String)> {
        self.status_filter = false;
        self.rows = products
            .iter()
            .map(|product| ProductRow::build(product, tracking, policy))
            .collect();

        self.rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| row.image_url.clone().map(|url| (index, url)))
            .collect()
    }

    /// Updates display prices of rows whose offer appears in `products`.
    /// Rows with an unparseable new seller price keep their old price.
    /// Returns the number of rows that got a new price.
    pub fn refresh_prices(&mut self, products: &[EnrichedProduct], policy: &PricingPolicy) -> usize {
        let by_offer: HashMap<&str, &EnrichedProduct> =
            products.iter().map(|product| (product.offer_id(), product)).collect();

        let mut refreshed = 0;
        for row in &mut self.rows {
            let Some(product) = by_offer.get(row.offer_id.as_str()) else {
                continue;
            };
            let Some(inputs) = PriceInputs::from_product(product) else {
                continue;
            };
            row.price_inputs = Some(inputs);
            row.display_price = policy.display_price_label(&inputs);
            refreshed += 1;
        }
        refreshed
    }

    /// Recomputes every display price from the last observed inputs,
    /// used after the discount coefficient changes.
    pub fn reprice_all(&mut self, policy: &PricingPolicy) {
        for row in &mut self.rows {
            row.reprice(policy);
        }
    }

    pub fn rows(&self) -> &[ProductRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.status_filter = false;
    }

    pub fn find_row(&self, offer_id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.offer_id == offer_id)
    }

    pub fn row(&self, index: usize) -> Option<&ProductRow> {
        self.rows.get(index)
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut ProductRow> {
        self.rows.get_mut(index)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut ProductRow> {
        self.rows.iter_mut()
    }

    pub fn status_filter(&self) -> bool {
        self.status_filter
    }

    /// Flips between showing all rows and only rows that are on sale.
    pub fn toggle_status_filter(&mut self) -> bool {
        self.status_filter = !self.status_filter;
        self.status_filter
    }

    pub fn visible_rows(&self) -> Vec<(usize, &ProductRow)> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !self.status_filter || row.on_sale)
            .collect()
    }

    /// Stores a downloaded thumbnail. `None` marks the image unavailable.
    /// Ignored when the row no longer exists.
    pub fn set_thumbnail(&mut self, index: usize, thumbnail: Option<Thumbnail>) -> bool {
        match self.rows.get_mut(index) {
            Some(row) => {
                row.thumbnail = match thumbnail {
                    Some(thumbnail) => ThumbnailState::Ready(thumbnail),
                    None => ThumbnailState::Unavailable,
                };
                true
            }
            None => false,
        }
    }
}
