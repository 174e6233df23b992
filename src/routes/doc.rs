use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartLineView, CartProduct, CartView, SetCartQuantityRequest},
        checkout::CheckoutPreview,
        coupons::{
            AppliedCoupon, ApplyCouponRequest, CouponApplied, CouponCancelled, CouponList,
            CreateCouponRequest,
        },
        orders::{
            AddressInput, BillingInput, CreateOrderRequest, OrderList, OrderWithItems,
            UpdateOrderStatusRequest,
        },
        products::{CreateProductRequest, ProductList},
    },
    models::{Category, Coupon, Order, OrderItem, Product},
    pricing::{CouponKind, Totals},
    response::{ApiResponse, Meta},
    routes::{admin, cart, checkout, coupons, health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        products::list_products,
        products::get_product,
        cart::get_cart,
        cart::add_to_cart,
        cart::set_quantity,
        cart::remove_from_cart,
        coupons::apply_coupon,
        coupons::cancel_coupon,
        checkout::preview,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        admin::list_coupons,
        admin::create_coupon,
        admin::create_product,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status
    ),
    components(
        schemas(
            Product,
            Category,
            Coupon,
            CouponKind,
            Order,
            OrderItem,
            Totals,
            AddToCartRequest,
            SetCartQuantityRequest,
            CartProduct,
            CartLineView,
            CartView,
            ApplyCouponRequest,
            AppliedCoupon,
            CouponApplied,
            CouponCancelled,
            CreateCouponRequest,
            CouponList,
            CheckoutPreview,
            AddressInput,
            BillingInput,
            CreateOrderRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            CreateProductRequest,
            ProductList,
            health::HealthData,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<CouponApplied>,
            ApiResponse<CheckoutPreview>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Cart endpoints, keyed by the cart cookie or the signed-in user"),
        (name = "Coupons", description = "Coupon endpoints"),
        (name = "Checkout", description = "Checkout preview"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
