use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{delete, post},
};

use crate::{
    dto::coupons::{ApplyCouponRequest, CouponApplied, CouponCancelled},
    error::AppResult,
    middleware::{
        auth::MaybeAuthUser,
        cart_session::{CartSession, with_cart_cookie},
    },
    response::ApiResponse,
    services::coupon_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apply", post(apply_coupon))
        .route("/current", delete(cancel_coupon))
}

#[utoipa::path(
    post,
    path = "/api/coupons/apply",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon applied to the cart, replacing any previous one", body = ApiResponse<CouponApplied>),
        (status = 400, description = "Coupon rejected"),
    ),
    tag = "Coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
    Json(payload): Json<ApplyCouponRequest>,
) -> AppResult<Response> {
    let (resp, issued) = coupon_service::apply_coupon(&state, &user, session, payload).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/coupons/current",
    responses(
        (status = 200, description = "Coupon removed from the cart", body = ApiResponse<CouponCancelled>),
    ),
    tag = "Coupons"
)]
pub async fn cancel_coupon(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
) -> AppResult<Response> {
    let (resp, issued) = coupon_service::cancel_coupon(&state, &user, session).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}
