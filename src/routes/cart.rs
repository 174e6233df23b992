use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, CartView, SetCartQuantityRequest},
    error::AppResult,
    middleware::{
        auth::MaybeAuthUser,
        cart_session::{CartSession, with_cart_cookie},
    },
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).patch(set_quantity))
        .route("/{product_id}", delete(remove_from_cart))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Current cart with line totals", body = ApiResponse<CartView>)
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
) -> AppResult<Response> {
    let (resp, issued) = cart_service::get_cart(&state, &user, session).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Add to cart, increasing the quantity of an existing line", body = ApiResponse<CartView>),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Product not found"),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Response> {
    let (resp, issued) = cart_service::add_to_cart(&state, &user, session, payload).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}

#[utoipa::path(
    patch,
    path = "/api/cart",
    request_body = SetCartQuantityRequest,
    responses(
        (status = 200, description = "Set a line quantity; 0 removes the line", body = ApiResponse<CartView>),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Product not found"),
    ),
    tag = "Cart"
)]
pub async fn set_quantity(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
    Json(payload): Json<SetCartQuantityRequest>,
) -> AppResult<Response> {
    let (resp, issued) = cart_service::set_quantity(&state, &user, session, payload).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/cart/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Removed from cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart item not found"),
    ),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: MaybeAuthUser,
    session: CartSession,
    Path(product_id): Path<Uuid>,
) -> AppResult<Response> {
    let (resp, issued) =
        cart_service::remove_from_cart(&state, &user, session, product_id).await?;
    Ok(with_cart_cookie(
        Json(resp).into_response(),
        issued,
        state.cart_cookie_secure,
    ))
}
