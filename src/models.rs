use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entity, pricing::CouponKind};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    #[schema(example = "79.99")]
    pub price: Decimal,
    pub stock: i32,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub category: Option<Category>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub kind: CouponKind,
    #[schema(example = "10.00")]
    pub value: Decimal,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub min_subtotal: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub coupon_amount: Option<Decimal>,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<entity::categories::Model> for Category {
    fn from(model: entity::categories::Model) -> Self {
        Category {
            id: model.id,
            name: model.name,
            slug: model.slug,
        }
    }
}

impl From<entity::products::Model> for Product {
    fn from(model: entity::products::Model) -> Self {
        Product::from((model, None))
    }
}

impl From<(entity::products::Model, Option<entity::categories::Model>)> for Product {
    fn from(
        (model, category): (entity::products::Model, Option<entity::categories::Model>),
    ) -> Self {
        Product {
            id: model.id,
            name: model.name,
            slug: model.slug,
            description: model.description,
            price: model.price,
            stock: model.stock,
            image_url: model.image_url,
            category_id: model.category_id,
            category: category.map(Category::from),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::coupons::Model> for Coupon {
    fn from(model: entity::coupons::Model) -> Self {
        Coupon {
            id: model.id,
            kind: CouponKind::parse(&model.kind),
            code: model.code,
            value: model.value,
            is_active: model.is_active,
            starts_at: model.starts_at.map(|dt| dt.with_timezone(&Utc)),
            ends_at: model.ends_at.map(|dt| dt.with_timezone(&Utc)),
            min_subtotal: model.min_subtotal,
            max_uses: model.max_uses,
            per_user_limit: model.per_user_limit,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::orders::Model> for Order {
    fn from(model: entity::orders::Model) -> Self {
        Order {
            id: model.id,
            user_id: model.user_id,
            status: model.status,
            subtotal: model.subtotal,
            discount_total: model.discount_total,
            shipping_total: model.shipping_total,
            tax_total: model.tax_total,
            total: model.total,
            coupon_code: model.coupon_code,
            coupon_amount: model.coupon_amount,
            shipping_address_id: model.shipping_address_id,
            billing_address_id: model.billing_address_id,
            notes: model.notes,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<entity::order_items::Model> for OrderItem {
    fn from(model: entity::order_items::Model) -> Self {
        OrderItem {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            product_name: model.product_name,
            product_slug: model.product_slug,
            quantity: model.quantity,
            unit_price: model.unit_price,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}
