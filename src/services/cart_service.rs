use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, LockType, OnConflict},
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, record_audit},
    dto::cart::{AddToCartRequest, CartLineView, CartProduct, CartView, SetCartQuantityRequest},
    entity::{
        cart_items::{self, ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{self, ActiveModel as CartActive, Column as CartCol, Entity as Carts},
        products::{self, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::{auth::MaybeAuthUser, cart_session::CartSession},
    pricing::{CartLine, round2},
    response::ApiResponse,
    state::AppState,
};

/// The cart a request operates on, plus the id to hand back as a cookie when
/// the cart was created for this request.
#[derive(Debug, Clone)]
pub struct ResolvedCart {
    pub cart: carts::Model,
    pub issued_cookie: Option<Uuid>,
}

/// A cart row joined with its product.
pub type CartRow = (cart_items::Model, products::Model);

/// Finds the caller's cart, creating one when neither the user nor the
/// cookie points at an existing cart.
///
/// A signed-in user's own cart wins over the cookie. An anonymous cookie cart
/// is claimed by the first user who presents it.
pub async fn resolve_cart<C: ConnectionTrait>(
    db: &C,
    user_id: Option<Uuid>,
    session: CartSession,
) -> AppResult<ResolvedCart> {
    if let Some(user_id) = user_id {
        let owned = Carts::find()
            .filter(CartCol::UserId.eq(user_id))
            .order_by_desc(CartCol::CreatedAt)
            .one(db)
            .await?;
        if let Some(cart) = owned {
            return Ok(ResolvedCart {
                cart,
                issued_cookie: None,
            });
        }
    }

    if let Some(cookie_id) = session.cookie_cart_id {
        if let Some(cart) = Carts::find_by_id(cookie_id).one(db).await? {
            match (cart.user_id, user_id) {
                (None, Some(user_id)) => {
                    let mut active: CartActive = cart.into();
                    active.user_id = Set(Some(user_id));
                    active.updated_at = Set(Utc::now().into());
                    let cart = active.update(db).await?;
                    return Ok(ResolvedCart {
                        cart,
                        issued_cookie: None,
                    });
                }
                (owner, caller) if owner.is_none() || owner == caller => {
                    return Ok(ResolvedCart {
                        cart,
                        issued_cookie: None,
                    });
                }
                _ => {}
            }
        }
    }

    let now = Utc::now();
    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await?;
    tracing::debug!(cart_id = %cart.id, "created cart");

    Ok(ResolvedCart {
        issued_cookie: Some(cart.id),
        cart,
    })
}

pub async fn load_cart_rows<C: ConnectionTrait>(db: &C, cart_id: Uuid) -> AppResult<Vec<CartRow>> {
    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(db)
        .await?
        .into_iter()
        .filter_map(|(item, product)| product.map(|p| (item, p)))
        .collect();
    Ok(rows)
}

/// Engine input for the given rows. Rows with a non-positive quantity are skipped.
pub fn cart_lines(rows: &[CartRow]) -> Vec<CartLine> {
    rows.iter()
        .filter_map(|(item, product)| {
            u32::try_from(item.quantity)
                .ok()
                .filter(|q| *q > 0)
                .map(|q| CartLine::new(product.price, q))
        })
        .collect()
}

pub fn line_view(item: &cart_items::Model, product: &products::Model) -> CartLineView {
    CartLineView {
        id: item.id,
        product_id: item.product_id,
        quantity: item.quantity,
        product: CartProduct {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            image_url: product.image_url.clone(),
            price: product.price,
        },
        line_total: round2(product.price * Decimal::from(item.quantity)),
    }
}

pub fn cart_view(cart_id: Uuid, rows: &[CartRow]) -> CartView {
    let items: Vec<CartLineView> = rows.iter().map(|(item, product)| line_view(item, product)).collect();
    let count = items.iter().map(|line| i64::from(line.quantity)).sum();
    let subtotal = round2(items.iter().map(|line| line.line_total).sum());
    CartView {
        id: cart_id,
        items,
        count,
        subtotal,
    }
}

async fn current_view(state: &AppState, cart_id: Uuid) -> AppResult<CartView> {
    let rows = load_cart_rows(&state.orm, cart_id).await?;
    Ok(cart_view(cart_id, &rows))
}

pub async fn get_cart(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
) -> AppResult<(ApiResponse<CartView>, Option<Uuid>)> {
    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let view = current_view(state, resolved.cart.id).await?;
    Ok((ApiResponse::ok(view), resolved.issued_cookie))
}

/// Upper bound for a single cart line.
pub const MAX_LINE_QUANTITY: i32 = 9_999;

fn quantity_too_large() -> AppError {
    AppError::BadRequest(format!("quantity must not exceed {MAX_LINE_QUANTITY}"))
}

/// Quantity after adding `added` to a line that currently holds `existing`.
pub fn merged_quantity(existing: Option<i32>, added: i32) -> Result<i32, AppError> {
    existing
        .unwrap_or(0)
        .checked_add(added)
        .filter(|total| *total <= MAX_LINE_QUANTITY)
        .ok_or_else(quantity_too_large)
}

async fn ensure_product_exists(state: &AppState, product_id: Uuid) -> AppResult<()> {
    match Products::find_by_id(product_id).one(&state.orm).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound),
    }
}

pub async fn add_to_cart(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
    payload: AddToCartRequest,
) -> AppResult<(ApiResponse<CartView>, Option<Uuid>)> {
    let quantity = payload.quantity.unwrap_or(1);
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    ensure_product_exists(state, payload.product_id).await?;

    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let cart_id = resolved.cart.id;

    // Locking the cart keeps the bound check and the increment together.
    let txn = state.orm.begin().await?;
    Carts::find_by_id(cart_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .filter(CartItemCol::ProductId.eq(payload.product_id))
        .one(&txn)
        .await?
        .map(|item| item.quantity);
    merged_quantity(existing, quantity)?;

    CartItems::insert(CartItemActive {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        product_id: Set(payload.product_id),
        quantity: Set(quantity),
        created_at: Set(Utc::now().into()),
    })
    .on_conflict(
        OnConflict::columns([CartItemCol::CartId, CartItemCol::ProductId])
            .value(
                CartItemCol::Quantity,
                Expr::col((CartItems, CartItemCol::Quantity)).add(quantity),
            )
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;
    txn.commit().await?;

    record_audit(
        &state.pool,
        user.user_id(),
        AuditAction::CartUpdate,
        serde_json::json!({ "cart_id": cart_id, "product_id": payload.product_id, "added": quantity }),
    )
    .await;

    let view = current_view(state, cart_id).await?;
    Ok((ApiResponse::success("OK", view, None), resolved.issued_cookie))
}

pub async fn set_quantity(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
    payload: SetCartQuantityRequest,
) -> AppResult<(ApiResponse<CartView>, Option<Uuid>)> {
    if payload.quantity < 0 {
        return Err(AppError::BadRequest(
            "quantity must not be negative".to_string(),
        ));
    }
    if payload.quantity > MAX_LINE_QUANTITY {
        return Err(quantity_too_large());
    }

    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let cart_id = resolved.cart.id;

    if payload.quantity == 0 {
        CartItems::delete_many()
            .filter(CartItemCol::CartId.eq(cart_id))
            .filter(CartItemCol::ProductId.eq(payload.product_id))
            .exec(&state.orm)
            .await?;
    } else {
        ensure_product_exists(state, payload.product_id).await?;
        CartItems::insert(CartItemActive {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            product_id: Set(payload.product_id),
            quantity: Set(payload.quantity),
            created_at: Set(Utc::now().into()),
        })
        .on_conflict(
            OnConflict::columns([CartItemCol::CartId, CartItemCol::ProductId])
                .update_column(CartItemCol::Quantity)
                .to_owned(),
        )
        .exec_without_returning(&state.orm)
        .await?;
    }

    let action = if payload.quantity == 0 {
        AuditAction::CartRemove
    } else {
        AuditAction::CartUpdate
    };
    record_audit(
        &state.pool,
        user.user_id(),
        action,
        serde_json::json!({ "cart_id": cart_id, "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    let view = current_view(state, cart_id).await?;
    Ok((ApiResponse::success("OK", view, None), resolved.issued_cookie))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
    product_id: Uuid,
) -> AppResult<(ApiResponse<CartView>, Option<Uuid>)> {
    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let cart_id = resolved.cart.id;

    let result = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart_id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    record_audit(
        &state.pool,
        user.user_id(),
        AuditAction::CartRemove,
        serde_json::json!({ "cart_id": cart_id, "product_id": product_id }),
    )
    .await;

    let view = current_view(state, cart_id).await?;
    Ok((
        ApiResponse::success("Removed from cart", view, None),
        resolved.issued_cookie,
    ))
}
