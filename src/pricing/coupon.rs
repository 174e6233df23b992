use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How a coupon's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CouponKind {
    /// `value` is a percentage of the subtotal.
    #[serde(rename = "PERCENT")]
    Percent,
    /// `value` is an amount taken off the subtotal.
    #[serde(rename = "FIXED")]
    Fixed,
    /// Shipping is waived; `value` is ignored.
    #[serde(rename = "FREESHIP")]
    FreeShip,
    /// Stored kind this build does not know about. Never discounts.
    #[serde(other, rename = "UNRECOGNIZED")]
    Unrecognized,
}

impl CouponKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PERCENT" => CouponKind::Percent,
            "FIXED" => CouponKind::Fixed,
            "FREESHIP" => CouponKind::FreeShip,
            _ => CouponKind::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CouponKind::Percent => "PERCENT",
            CouponKind::Fixed => "FIXED",
            CouponKind::FreeShip => "FREESHIP",
            CouponKind::Unrecognized => "UNRECOGNIZED",
        }
    }
}

/// A promotion as the pricing engine sees it. Read-only here.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupon {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub min_subtotal: Option<Decimal>,
    /// Enforced by the caller against redemption history, not by the engine.
    pub max_uses: Option<i32>,
    /// Enforced by the caller against redemption history, not by the engine.
    pub per_user_limit: Option<i32>,
}

impl Coupon {
    /// An active coupon with no window, minimum or usage caps.
    pub fn new(code: impl Into<String>, kind: CouponKind, value: Decimal) -> Self {
        Self {
            code: code.into(),
            kind,
            value,
            is_active: true,
            starts_at: None,
            ends_at: None,
            min_subtotal: None,
            max_uses: None,
            per_user_limit: None,
        }
    }
}

/// Whether `coupon` may affect totals for a cart worth `subtotal` at `now`.
///
/// Both window bounds are inclusive.
pub fn coupon_is_currently_valid(coupon: &Coupon, subtotal: Decimal, now: DateTime<Utc>) -> bool {
    if !coupon.is_active {
        return false;
    }
    if coupon.starts_at.is_some_and(|starts_at| starts_at > now) {
        return false;
    }
    if coupon.ends_at.is_some_and(|ends_at| ends_at < now) {
        return false;
    }
    if coupon.min_subtotal.is_some_and(|min| subtotal < min) {
        return false;
    }
    true
}

/// Canonical form of a user-typed code. Codes compare case-insensitively.
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_uppercase())
}
