//! Price normalisation between the seller price on file and the price the
//! buyer actually sees.
//!
//! The marketplace shows buyers a price derived from the seller price, scaled
//! by the ratio of the marketing price to the seller price and by a tunable
//! discount coefficient. [`PricingPolicy`] computes that displayed price and
//! its inverse: the seller price that has to be submitted so that the buyer
//! sees a desired target price.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::EnrichedProduct;
use crate::utils::error::{AppError, Result};

pub const DEFAULT_DISCOUNT_COEFFICIENT: f64 = 0.852;

// Products of decimal quotients carry representation noise in the last
// digits; it must not push an exact whole price up by one.
const ROUNDING_GUARD_DP: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscountCoefficient(Decimal);

impl DiscountCoefficient {
    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Discount coefficient must be positive, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn from_f64(value: f64) -> Result<Self> {
        let decimal = Decimal::from_f64(value)
            .filter(|_| value.is_finite())
            .ok_or_else(|| AppError::Validation(format!("Invalid discount coefficient: {}", value)))?;
        Self::new(decimal.normalize())
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(DEFAULT_DISCOUNT_COEFFICIENT)
    }
}

impl Default for DiscountCoefficient {
    fn default() -> Self {
        Self(Decimal::new(852, 3))
    }
}

impl fmt::Display for DiscountCoefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses a decimal price field. Blank or non-numeric input is `None`.
pub fn parse_price(raw: Option<&str>) -> Option<Decimal> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw).ok()
}

/// Formats a price with two fixed fraction digits, e.g. `1174.00`.
pub fn format_price(price: Decimal) -> String {
    format!("{:.2}", price)
}

/// Parsed price fields of one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceInputs {
    pub seller: Decimal,
    pub market: Decimal,
}

impl PriceInputs {
    /// `None` when the seller price is missing, unparseable or not positive:
    /// the product is skipped for this recompute. A missing marketing price
    /// falls back to the seller price.
    pub fn from_raw(price: Option<&str>, marketing_price: Option<&str>) -> Option<Self> {
        let seller = parse_price(price).filter(|p| *p > Decimal::ZERO)?;
        let market = parse_price(marketing_price)
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(seller);
        Some(Self { seller, market })
    }

    pub fn from_product(product: &EnrichedProduct) -> Option<Self> {
        Self::from_raw(product.price(), product.marketing_price())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PricingPolicy {
    coefficient: DiscountCoefficient,
}

impl PricingPolicy {
    pub fn new(coefficient: DiscountCoefficient) -> Self {
        Self { coefficient }
    }

    pub fn coefficient(&self) -> DiscountCoefficient {
        self.coefficient
    }

    pub fn set_coefficient(&mut self, coefficient: DiscountCoefficient) {
        self.coefficient = coefficient;
    }

    /// `(market / seller) * coefficient`
    pub fn final_coefficient(&self, inputs: &PriceInputs) -> Option<Decimal> {
        inputs
            .market
            .checked_div(inputs.seller)?
            .checked_mul(self.coefficient.value())
    }

    /// Smallest whole price not below `seller * final_coefficient`.
    pub fn display_price(&self, inputs: &PriceInputs) -> Option<Decimal> {
        let exact = inputs.seller.checked_mul(self.final_coefficient(inputs)?)?;
        Some(exact.round_dp(ROUNDING_GUARD_DP).ceil())
    }

    /// Seller price to submit so that the displayed price reaches `target`.
    pub fn required_seller_price(&self, target: Decimal, inputs: &PriceInputs) -> Option<Decimal> {
        let exact = target.checked_div(self.final_coefficient(inputs)?)?;
        Some(exact.round_dp(ROUNDING_GUARD_DP).ceil())
    }

    pub fn display_price_label(&self, inputs: &PriceInputs) -> Option<String> {
        self.display_price(inputs).map(format_price)
    }
}

/// True when the observed seller price left the ±1% band around the target.
pub fn needs_resubmission(seller_price: Decimal, target: u32) -> bool {
    let target = Decimal::from(target);
    seller_price > target * Decimal::new(101, 2) || seller_price < target * Decimal::new(99, 2)
}
