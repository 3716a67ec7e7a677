use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One entry of the paginated product listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSummary {
    pub product_id: i64,
    #[serde(default)]
    pub offer_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductStatuses {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Detailed product record returned by the batch info lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductDetail {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub offer_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub price: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub marketing_price: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub primary_image: Vec<String>,
    #[serde(default)]
    pub statuses: Option<ProductStatuses>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A listing entry merged with its detail record, if one was returned.
/// Detail fields take precedence over summary fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedProduct {
    pub summary: ProductSummary,
    pub detail: Option<ProductDetail>,
}

impl EnrichedProduct {
    pub fn new(summary: ProductSummary, detail: Option<ProductDetail>) -> Self {
        Self { summary, detail }
    }

    pub fn product_id(&self) -> i64 {
        self.summary.product_id
    }

    pub fn offer_id(&self) -> &str {
        self.detail
            .as_ref()
            .and_then(|d| d.offer_id.as_deref())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.summary.offer_id)
    }

    pub fn name(&self) -> Option<&str> {
        self.detail.as_ref().and_then(|d| d.name.as_deref())
    }

    /// Seller price as the raw decimal string from the API.
    pub fn price(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.price.as_deref())
            .or_else(|| self.summary.extra.get("price").and_then(Value::as_str))
    }

    pub fn marketing_price(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.marketing_price.as_deref())
            .or_else(|| self.summary.extra.get("marketing_price").and_then(Value::as_str))
    }

    pub fn status_description(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.statuses.as_ref())
            .map(|s| s.status_description.as_str())
    }

    pub fn primary_image_url(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.primary_image.first())
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    /// The merged record as a single JSON object.
    pub fn to_json(&self) -> Value {
        let mut merged = match serde_json::to_value(&self.summary) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Some(detail) = &self.detail {
            if let Ok(Value::Object(fields)) = serde_json::to_value(detail) {
                for (key, value) in fields {
                    if !value.is_null() {
                        merged.insert(key, value);
                    }
                }
            }
        }
        Value::Object(merged)
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

// Older API versions return a single URL instead of a list.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}
