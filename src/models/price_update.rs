use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::pricing::format_price;

pub const DEFAULT_CURRENCY_CODE: &str = "RUB";

/// `old_price` value that clears the crossed-out price.
pub const CLEAR_OLD_PRICE: &str = "0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    pub price: String,
    pub old_price: String,
    pub currency_code: String,
}

impl PriceUpdateRequest {
    pub fn for_offer(offer_id: impl Into<String>, price: Decimal) -> Self {
        Self {
            offer_id: Some(offer_id.into()),
            product_id: None,
            price: format_price(price),
            old_price: CLEAR_OLD_PRICE.to_string(),
            currency_code: DEFAULT_CURRENCY_CODE.to_string(),
        }
    }

    pub fn for_product(product_id: i64, price: Decimal) -> Self {
        Self {
            offer_id: None,
            product_id: Some(product_id),
            price: format_price(price),
            old_price: CLEAR_OLD_PRICE.to_string(),
            currency_code: DEFAULT_CURRENCY_CODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceUpdateResult {
    #[serde(default)]
    pub offer_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub updated: bool,
    #[serde(default, deserialize_with = "flatten_errors")]
    pub errors: Vec<String>,
}

impl PriceUpdateResult {
    /// Result for a request whose whole batch call failed.
    pub fn rejected(request: &PriceUpdateRequest) -> Self {
        Self {
            offer_id: request.offer_id.clone(),
            product_id: request.product_id,
            updated: false,
            errors: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        match (&self.offer_id, self.product_id) {
            (Some(offer_id), _) => offer_id.clone(),
            (None, Some(product_id)) => product_id.to_string(),
            (None, None) => "<unknown>".to_string(),
        }
    }
}

/// Successful/failed partition of a price submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub successful: Vec<PriceUpdateResult>,
    pub failed: Vec<PriceUpdateResult>,
}

impl UpdateOutcome {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn extend(&mut self, other: UpdateOutcome) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
    }
}

// The API reports errors as `{code, message}` objects.
fn flatten_errors<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|error| match error {
            Value::String(s) => s,
            Value::Object(fields) => {
                let code = fields.get("code").and_then(Value::as_str).unwrap_or_default();
                let message = fields.get("message").and_then(Value::as_str).unwrap_or_default();
                match (code.is_empty(), message.is_empty()) {
                    (false, false) => format!("{}: {}", code, message),
                    (false, true) => code.to_string(),
                    (true, false) => message.to_string(),
                    (true, true) => Value::Object(fields).to_string(),
                }
            }
            other => other.to_string(),
        })
        .collect())
}
