use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{LockType, OnConflict},
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, record_audit},
    dto::coupons::{
        AppliedCoupon, ApplyCouponRequest, CouponApplied, CouponCancelled, CouponList,
        CreateCouponRequest,
    },
    entity::{
        coupon_redemptions::{
            ActiveModel as RedemptionActive, Column as RedemptionCol, Entity as CouponRedemptions,
        },
        coupons::{self, ActiveModel as CouponActive, Column as CouponCol, Entity as Coupons},
    },
    error::{AppError, AppResult, CouponRejection},
    middleware::{
        auth::{AuthUser, MaybeAuthUser, ensure_admin},
        cart_session::CartSession,
    },
    models::Coupon,
    pricing::{self, CouponKind, FixedClock, compute_totals, normalize_code},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::cart_service::{cart_lines, load_cart_rows, resolve_cart},
    state::AppState,
};

/// The engine's read-only view of a stored coupon.
pub fn engine_coupon(model: &coupons::Model) -> pricing::Coupon {
    pricing::Coupon {
        code: model.code.clone(),
        kind: CouponKind::parse(&model.kind),
        value: model.value,
        is_active: model.is_active,
        starts_at: model.starts_at.map(|dt| dt.with_timezone(&Utc)),
        ends_at: model.ends_at.map(|dt| dt.with_timezone(&Utc)),
        min_subtotal: model.min_subtotal,
        max_uses: model.max_uses,
        per_user_limit: model.per_user_limit,
    }
}

pub fn applied_coupon(model: &coupons::Model) -> AppliedCoupon {
    AppliedCoupon {
        code: model.code.clone(),
        kind: CouponKind::parse(&model.kind),
        value: model.value,
    }
}

/// Active flag and validity window, checked before anything touches the database.
pub fn check_window(coupon: &pricing::Coupon, now: DateTime<Utc>) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Invalid);
    }
    if coupon.starts_at.is_some_and(|starts_at| starts_at > now) {
        return Err(CouponRejection::NotYetActive);
    }
    if coupon.ends_at.is_some_and(|ends_at| ends_at < now) {
        return Err(CouponRejection::Expired);
    }
    Ok(())
}

/// `user_uses` is `None` for anonymous carts, which skip the per-user cap.
pub fn check_usage(
    coupon: &pricing::Coupon,
    total_uses: u64,
    user_uses: Option<u64>,
) -> Result<(), CouponRejection> {
    if let Some(max_uses) = coupon.max_uses {
        if total_uses >= u64::try_from(max_uses).unwrap_or(0) {
            return Err(CouponRejection::Exhausted);
        }
    }
    if let (Some(limit), Some(used)) = (coupon.per_user_limit, user_uses) {
        if used >= u64::try_from(limit).unwrap_or(0) {
            return Err(CouponRejection::PerUserLimitReached);
        }
    }
    Ok(())
}

pub fn check_minimum(coupon: &pricing::Coupon, subtotal: Decimal) -> Result<(), CouponRejection> {
    match coupon.min_subtotal {
        Some(min) if subtotal < min => Err(CouponRejection::BelowMinimum),
        _ => Ok(()),
    }
}

/// The coupon currently attached to `cart_id`, if any.
pub async fn current_coupon<C: ConnectionTrait>(
    db: &C,
    cart_id: Uuid,
) -> AppResult<Option<coupons::Model>> {
    let redemption = CouponRedemptions::find()
        .filter(RedemptionCol::CartId.eq(cart_id))
        .order_by_desc(RedemptionCol::CreatedAt)
        .find_also_related(Coupons)
        .one(db)
        .await?;
    Ok(redemption.and_then(|(_, coupon)| coupon))
}

pub async fn apply_coupon(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
    payload: ApplyCouponRequest,
) -> AppResult<(ApiResponse<CouponApplied>, Option<Uuid>)> {
    let code = normalize_code(&payload.code)
        .ok_or_else(|| AppError::BadRequest("coupon code is required".into()))?;

    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let cart_id = resolved.cart.id;

    let txn = state.orm.begin().await?;

    // The row lock serializes concurrent redemptions of one coupon, so the
    // usage counts below can't go stale before the redemption is written.
    let model = Coupons::find()
        .filter(CouponCol::Code.eq(code.as_str()))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(CouponRejection::Invalid)?;
    let coupon = engine_coupon(&model);
    let now = state.clock.now();
    check_window(&coupon, now)?;

    // This cart's own redemption is about to be replaced, so it doesn't count.
    let others = Condition::any()
        .add(RedemptionCol::CartId.is_null())
        .add(RedemptionCol::CartId.ne(cart_id));
    let total_uses = CouponRedemptions::find()
        .filter(RedemptionCol::CouponId.eq(model.id))
        .filter(others.clone())
        .count(&txn)
        .await?;
    let user_uses = match (user.user_id(), coupon.per_user_limit) {
        (Some(user_id), Some(_)) => Some(
            CouponRedemptions::find()
                .filter(RedemptionCol::CouponId.eq(model.id))
                .filter(RedemptionCol::UserId.eq(user_id))
                .filter(others)
                .count(&txn)
                .await?,
        ),
        _ => None,
    };
    check_usage(&coupon, total_uses, user_uses)?;

    let rows = load_cart_rows(&txn, cart_id).await?;
    let totals = compute_totals(
        &cart_lines(&rows),
        Some(&coupon),
        &state.pricing,
        &FixedClock(now),
    );
    check_minimum(&coupon, totals.subtotal)?;

    // One redemption per cart; a second apply replaces the first.
    CouponRedemptions::insert(RedemptionActive {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(model.id),
        user_id: Set(user.user_id()),
        cart_id: Set(Some(cart_id)),
        order_id: Set(None),
        created_at: Set(Utc::now().into()),
    })
    .on_conflict(
        OnConflict::column(RedemptionCol::CartId)
            .update_columns([
                RedemptionCol::CouponId,
                RedemptionCol::UserId,
                RedemptionCol::OrderId,
                RedemptionCol::CreatedAt,
            ])
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;
    txn.commit().await?;

    tracing::debug!(%cart_id, code = %model.code, discount = %totals.discount, "coupon applied");
    record_audit(
        &state.pool,
        user.user_id(),
        AuditAction::CouponApply,
        serde_json::json!({ "cart_id": cart_id, "coupon_id": model.id, "code": model.code }),
    )
    .await;

    Ok((
        ApiResponse::success(
            "Coupon applied",
            CouponApplied {
                coupon: applied_coupon(&model),
                totals,
            },
            Some(Meta::empty()),
        ),
        resolved.issued_cookie,
    ))
}

pub async fn cancel_coupon(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
) -> AppResult<(ApiResponse<CouponCancelled>, Option<Uuid>)> {
    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let cart_id = resolved.cart.id;

    let removed = CouponRedemptions::delete_many()
        .filter(RedemptionCol::CartId.eq(cart_id))
        .exec(&state.orm)
        .await?;

    if removed.rows_affected > 0 {
        record_audit(
            &state.pool,
            user.user_id(),
            AuditAction::CouponCancel,
            serde_json::json!({ "cart_id": cart_id }),
        )
        .await;
    }

    let rows = load_cart_rows(&state.orm, cart_id).await?;
    let totals = compute_totals(&cart_lines(&rows), None, &state.pricing, state.clock.as_ref());

    Ok((
        ApiResponse::success("Coupon removed", CouponCancelled { totals }, Some(Meta::empty())),
        resolved.issued_cookie,
    ))
}

pub async fn list_coupons(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Coupons::find().order_by_desc(CouponCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Coupon::from)
        .collect();

    Ok(ApiResponse::success(
        "Coupons",
        CouponList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

fn validate_new_coupon(payload: &CreateCouponRequest) -> Result<(), AppError> {
    if payload.kind == CouponKind::Unrecognized {
        return Err(AppError::BadRequest("unsupported coupon kind".into()));
    }
    if payload.value.is_sign_negative() {
        return Err(AppError::BadRequest("value must not be negative".into()));
    }
    if payload.kind == CouponKind::Percent && payload.value > Decimal::ONE_HUNDRED {
        return Err(AppError::BadRequest("percent value must be at most 100".into()));
    }
    if payload.min_subtotal.is_some_and(|min| min.is_sign_negative()) {
        return Err(AppError::BadRequest("min_subtotal must not be negative".into()));
    }
    if payload.max_uses.is_some_and(|n| n < 0) || payload.per_user_limit.is_some_and(|n| n < 0) {
        return Err(AppError::BadRequest("usage limits must not be negative".into()));
    }
    if let (Some(starts_at), Some(ends_at)) = (payload.starts_at, payload.ends_at) {
        if ends_at < starts_at {
            return Err(AppError::BadRequest("ends_at must not precede starts_at".into()));
        }
    }
    Ok(())
}

pub async fn create_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let code = normalize_code(&payload.code)
        .ok_or_else(|| AppError::BadRequest("coupon code is required".into()))?;
    validate_new_coupon(&payload)?;

    let exists = Coupons::find()
        .filter(CouponCol::Code.eq(code.as_str()))
        .one(&state.orm)
        .await?;
    if exists.is_some() {
        return Err(AppError::BadRequest(format!("coupon {code} already exists")));
    }

    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        kind: Set(payload.kind.as_str().to_string()),
        value: Set(payload.value),
        is_active: Set(payload.is_active.unwrap_or(true)),
        starts_at: Set(payload.starts_at.map(Into::into)),
        ends_at: Set(payload.ends_at.map(Into::into)),
        min_subtotal: Set(payload.min_subtotal),
        max_uses: Set(payload.max_uses),
        per_user_limit: Set(payload.per_user_limit),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CouponCreate,
        serde_json::json!({ "coupon_id": coupon.id, "code": coupon.code }),
    )
    .await;

    Ok(ApiResponse::success(
        "Coupon created",
        Coupon::from(coupon),
        Some(Meta::empty()),
    ))
}
