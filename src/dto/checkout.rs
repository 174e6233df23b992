use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{cart::CartLineView, coupons::AppliedCoupon},
    pricing::Totals,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutPreview {
    pub cart_id: Uuid,
    pub items: Vec<CartLineView>,
    pub coupon: Option<AppliedCoupon>,
    #[serde(flatten)]
    pub totals: Totals,
}
