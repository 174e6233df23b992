use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    dto::checkout::CheckoutPreview,
    error::AppResult,
    middleware::{
        auth::MaybeAuthUser,
        cart_session::{CartSession, with_cart_cookie},
    },
    response::ApiResponse,
    services::checkout_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/preview", get(preview))
}

#[utoipa::path(
    get,
    path = "/api/checkout/preview",
    responses(
        (status = 200, description = "Cart lines, applied coupon and totals", body = ApiResponse<CheckoutPreview>),
    ),
    tag = "Checkout"
)]
pub async fn preview(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
) -> AppResult<Response> {
    let (resp, issued) = checkout_service::preview(&state, &user, session).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}
