use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    models::Coupon,
    pricing::{CouponKind, Totals},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppliedCoupon {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponApplied {
    pub coupon: AppliedCoupon,
    #[serde(flatten)]
    pub totals: Totals,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponCancelled {
    pub totals: Totals,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCouponRequest {
    pub code: String,
    pub kind: CouponKind,
    #[serde(default)]
    pub value: Decimal,
    pub is_active: Option<bool>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub min_subtotal: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub per_user_limit: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponList {
    pub items: Vec<Coupon>,
}
