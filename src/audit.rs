use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CartUpdate,
    CartRemove,
    CouponApply,
    CouponCancel,
    CouponCreate,
    OrderCreate,
    OrderStatusUpdate,
    ProductCreate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CartUpdate => "cart_update",
            AuditAction::CartRemove => "cart_remove",
            AuditAction::CouponApply => "coupon_apply",
            AuditAction::CouponCancel => "coupon_cancel",
            AuditAction::CouponCreate => "coupon_create",
            AuditAction::OrderCreate => "order_create",
            AuditAction::OrderStatusUpdate => "order_status_update",
            AuditAction::ProductCreate => "product_create",
        }
    }

    pub fn resource(&self) -> &'static str {
        match self {
            AuditAction::CartUpdate | AuditAction::CartRemove => "cart_items",
            AuditAction::CouponApply | AuditAction::CouponCancel => "coupon_redemptions",
            AuditAction::CouponCreate => "coupons",
            AuditAction::OrderCreate | AuditAction::OrderStatusUpdate => "orders",
            AuditAction::ProductCreate => "products",
        }
    }
}

pub async fn log_audit(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: AuditAction,
    metadata: Option<Value>,
) -> AppResult<()> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(action.as_str())
    .bind(action.resource())
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}

/// Best-effort audit write; failures are logged and swallowed.
pub async fn record_audit(pool: &DbPool, user_id: Option<Uuid>, action: AuditAction, metadata: Value) {
    if let Err(err) = log_audit(pool, user_id, action, Some(metadata)).await {
        tracing::warn!(error = %err, action = action.as_str(), "audit log failed");
    }
}
