use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::{Expr, LockType};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, record_audit},
    dto::orders::{AddressInput, BillingInput, CreateOrderRequest, OrderList, OrderWithItems},
    entity::{
        addresses::{self, ActiveModel as AddressActive},
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::Entity as Carts,
        coupon_redemptions::{Column as RedemptionCol, Entity as CouponRedemptions},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    middleware::{auth::AuthUser, cart_session::CartSession},
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service::resolve_cart,
        checkout_service::price_cart,
    },
    state::AppState,
};

pub const STATUS_PENDING: &str = "PENDING";

async fn insert_address<C: ConnectionTrait>(db: &C, input: AddressInput) -> AppResult<addresses::Model> {
    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        first_name: Set(input.first_name),
        last_name: Set(input.last_name),
        email: Set(input.email),
        phone: Set(input.phone),
        document_id: Set(input.document_id),
        line1: Set(input.line1),
        line2: Set(input.line2),
        city: Set(input.city),
        state: Set(input.state),
        postal_code: Set(input.postal_code),
        country: Set(input.country),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(address)
}

/// Billing falls back to the shipping address unless a separate one is given.
fn billing_address(billing: Option<BillingInput>) -> Option<AddressInput> {
    match billing {
        Some(BillingInput::Address(address)) => Some(address),
        Some(BillingInput::UseShipping { .. }) | None => None,
    }
}

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    session: CartSession,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    payload.shipping.validate("shipping")?;
    let billing = billing_address(payload.billing);
    if let Some(billing) = &billing {
        billing.validate("billing")?;
    }

    let txn = state.orm.begin().await?;

    let resolved = resolve_cart(&txn, Some(user.user_id), session).await?;
    let cart_id = resolved.cart.id;

    // Serializes concurrent checkouts of the same cart.
    Carts::find_by_id(cart_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let priced = price_cart(&txn, state, cart_id).await?;
    if priced.rows.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }
    let totals = priced.totals;

    // A coupon that no longer passes the gate is dropped rather than recorded.
    let honored = if priced.coupon_honored { priced.coupon } else { None };

    let shipping_address = insert_address(&txn, payload.shipping).await?;
    let billing_address_id = match billing {
        Some(input) => insert_address(&txn, input).await?.id,
        None => shipping_address.id,
    };

    let now = Utc::now();
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(STATUS_PENDING.into()),
        subtotal: Set(totals.subtotal),
        discount_total: Set(totals.discount),
        shipping_total: Set(totals.shipping),
        tax_total: Set(Decimal::ZERO),
        total: Set(totals.total),
        coupon_code: Set(honored.as_ref().map(|c| c.code.clone())),
        coupon_amount: Set(honored.as_ref().map(|c| c.value)),
        shipping_address_id: Set(shipping_address.id),
        billing_address_id: Set(billing_address_id),
        notes: Set(payload.notes.filter(|n| !n.trim().is_empty())),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::with_capacity(priced.rows.len());
    for (item, product) in &priced.rows {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            product_name: Set(product.name.clone()),
            product_slug: Set(product.slug.clone()),
            quantity: Set(item.quantity),
            unit_price: Set(product.price),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        order_items.push(OrderItem::from(item));
    }

    // move the redemption from the cart to the order
    if honored.is_some() {
        CouponRedemptions::update_many()
            .col_expr(RedemptionCol::OrderId, Expr::value(Some(order.id)))
            .col_expr(RedemptionCol::UserId, Expr::value(Some(user.user_id)))
            .col_expr(RedemptionCol::CartId, Expr::value(Option::<Uuid>::None))
            .filter(RedemptionCol::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
    } else {
        CouponRedemptions::delete_many()
            .filter(RedemptionCol::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
    }

    // clear cart
    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    tracing::info!(order_id = %order.id, total = %order.total, "order created");
    record_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderCreate,
        serde_json::json!({ "order_id": order.id, "cart_id": cart_id, "coupon": order.coupon_code }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: Order::from(order),
            items: order_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.to_uppercase()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn load_order_items<C: ConnectionTrait>(db: &C, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(db)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect();
    Ok(items)
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = load_order_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}
