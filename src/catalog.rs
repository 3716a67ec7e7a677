use std::collections::HashMap;
use tracing::{info, warn};

use crate::marketplace::{MarketplaceApi, Visibility};
use crate::models::{EnrichedProduct, ProductDetail};

/// Loads the full product listing and enriches every entry with its detail
/// record. Keeps the listing order.
///
/// Degrades instead of failing: an empty listing yields an empty catalog, and
/// when no details come back the bare listing entries are returned.
pub async fn assemble<A>(api: &A, visibility: Visibility, page_size: u32) -> Vec<EnrichedProduct>
where
    A: MarketplaceApi + ?Sized,
{
    let summaries = api.list_all_products(visibility, page_size).await;
    if summaries.is_empty() {
        return Vec::new();
    }

    let ids: Vec<i64> = summaries.iter().map(|s| s.product_id).collect();
    let details = api.fetch_details(&ids).await;
    if details.is_empty() {
        warn!("No product details loaded, keeping {} bare listing entries", summaries.len());
        return summaries
            .into_iter()
            .map(|summary| EnrichedProduct::new(summary, None))
            .collect();
    }

    let detail_by_id: HashMap<i64, ProductDetail> =
        details.into_iter().map(|detail| (detail.id, detail)).collect();

    // duplicate listing entries all share the one detail record
    let products: Vec<EnrichedProduct> = summaries
        .into_iter()
        .map(|summary| {
            let detail = detail_by_id.get(&summary.product_id).cloned();
            EnrichedProduct::new(summary, detail)
        })
        .collect();

    info!(
        "Catalog assembled: {} products, {} with details",
        products.len(),
        products.iter().filter(|p| p.detail.is_some()).count()
    );
    products
}
