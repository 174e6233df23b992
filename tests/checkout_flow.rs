use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::AddToCartRequest,
        coupons::ApplyCouponRequest,
        orders::{AddressInput, CreateOrderRequest, UpdateOrderStatusRequest},
    },
    entity::{
        AuditLogs, CartItems, CouponRedemptions, audit_logs, cart_items,
        categories::ActiveModel as CategoryActive, coupon_redemptions,
        coupons::{self, ActiveModel as CouponActive},
        Coupons, products::ActiveModel as ProductActive,
    },
    error::{AppError, CouponRejection},
    middleware::{
        auth::{AuthUser, MaybeAuthUser},
        cart_session::CartSession,
    },
    pricing::{CouponKind, FixedClock},
    routes::params::{Pagination, ProductQuery},
    services::{
        admin_service, cart_service, checkout_service, coupon_service, order_service,
        product_service,
    },
    state::AppState,
};
use uuid::Uuid;

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        shipping_flat_fee: dec!(5.00),
        cart_cookie_secure: false,
    };
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    let orm = create_orm_conn(&pool);
    let clock = FixedClock(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
    Ok(AppState::new(pool, orm, &config).with_clock(Arc::new(clock)))
}

fn address() -> AddressInput {
    AddressInput {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: "ada@example.com".into(),
        phone: None,
        document_id: None,
        line1: "12 St James's Square".into(),
        line2: None,
        city: "London".into(),
        state: None,
        postal_code: Some("SW1Y 4JH".into()),
        country: "GB".into(),
    }
}

fn database_url() -> Option<String> {
    // Allow skipping when no DB is configured in the environment.
    match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            None
        }
    }
}

async fn insert_coupon(
    state: &AppState,
    code: &str,
    kind: CouponKind,
    value: Decimal,
    max_uses: Option<i32>,
) -> anyhow::Result<()> {
    CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        kind: Set(kind.as_str().into()),
        value: Set(value),
        is_active: Set(true),
        starts_at: Set(None),
        ends_at: Set(None),
        min_subtotal: Set(None),
        max_uses: Set(max_uses),
        per_user_limit: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(())
}

fn shopper(role: &str) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: role.into(),
    }
}

// cart -> coupon -> preview -> order, then usage cap and admin status update
#[tokio::test]
async fn cart_coupon_order_flow() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };

    let state = setup_state(&database_url).await?;
    let suffix = Uuid::new_v4().simple().to_string();

    let category = CategoryActive {
        id: Set(Uuid::new_v4()),
        name: Set("Flow Gear".into()),
        slug: Set(format!("flow-gear-{suffix}")),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Flow Widget".into()),
        slug: Set(format!("flow-widget-{suffix}")),
        description: Set(Some("A product for testing".into())),
        price: Set(dec!(60.00)),
        stock: Set(10),
        image_url: Set(None),
        category_id: Set(Some(category.id)),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    let detail = product_service::get_product_by_slug(&state, &product.slug)
        .await?
        .data
        .expect("product");
    assert_eq!(detail.category_id, Some(category.id));
    assert_eq!(detail.category.map(|c| c.slug), Some(category.slug.clone()));

    let listed = product_service::list_products(
        &state,
        ProductQuery {
            pagination: Pagination::default(),
            q: None,
            category: Some(category.slug.clone()),
            min_price: None,
            max_price: None,
            sort_by: None,
            sort_order: None,
        },
    )
    .await?
    .data
    .expect("products");
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].id, product.id);

    let code = format!("FLOW{}", &suffix[..8]).to_uppercase();
    insert_coupon(&state, &code, CouponKind::Percent, dec!(10), Some(1)).await?;

    // Anonymous shopper gets a cookie cart, then signs in and keeps it.
    let anonymous = MaybeAuthUser(None);
    let (resp, issued) = cart_service::add_to_cart(
        &state,
        &anonymous,
        CartSession::default(),
        AddToCartRequest {
            product_id: product.id,
            quantity: Some(2),
        },
    )
    .await?;
    let cookie_cart = issued.expect("new cart issues a cookie");
    let cart = resp.data.expect("cart");
    assert_eq!(cart.id, cookie_cart);
    assert_eq!(cart.count, 2);
    assert_eq!(cart.subtotal, dec!(120.00));

    let user = shopper("user");
    let signed_in = MaybeAuthUser(Some(user.clone()));
    let session = CartSession {
        cookie_cart_id: Some(cookie_cart),
    };
    let (resp, issued) = cart_service::get_cart(&state, &signed_in, session).await?;
    assert!(issued.is_none());
    assert_eq!(resp.data.expect("cart").id, cookie_cart);

    // Unknown codes are rejected without touching the cart.
    let err = coupon_service::apply_coupon(
        &state,
        &signed_in,
        session,
        ApplyCouponRequest {
            code: "NOPE-NOT-A-CODE".into(),
        },
    )
    .await
    .expect_err("unknown code");
    assert!(matches!(err, AppError::Coupon(CouponRejection::Invalid)));

    let (resp, _) = coupon_service::apply_coupon(
        &state,
        &signed_in,
        session,
        ApplyCouponRequest {
            code: format!("  {}  ", code.to_lowercase()),
        },
    )
    .await?;
    let applied = resp.data.expect("applied");
    assert_eq!(applied.coupon.code, code);
    assert_eq!(applied.totals.discount, dec!(12.00));
    assert_eq!(applied.totals.shipping, dec!(5.00));
    assert_eq!(applied.totals.total, dec!(113.00));

    let (resp, _) = checkout_service::preview(&state, &signed_in, session).await?;
    let preview = resp.data.expect("preview");
    assert_eq!(preview.cart_id, cookie_cart);
    assert_eq!(preview.items.len(), 1);
    assert_eq!(preview.coupon.map(|c| c.code), Some(code.clone()));
    assert_eq!(preview.totals, applied.totals);

    let resp = order_service::create_order(
        &state,
        &user,
        session,
        CreateOrderRequest {
            shipping: address(),
            billing: None,
            notes: Some("leave at the door".into()),
        },
    )
    .await?;
    let placed = resp.data.expect("order");
    assert_eq!(placed.order.status, "PENDING");
    assert_eq!(placed.order.subtotal, dec!(120.00));
    assert_eq!(placed.order.discount_total, dec!(12.00));
    assert_eq!(placed.order.shipping_total, dec!(5.00));
    assert_eq!(placed.order.total, dec!(113.00));
    assert_eq!(placed.order.coupon_code.as_deref(), Some(code.as_str()));
    assert_eq!(placed.order.shipping_address_id, placed.order.billing_address_id);
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].product_slug, product.slug);
    assert_eq!(placed.items[0].unit_price, dec!(60.00));

    let left = CartItems::find()
        .filter(cart_items::Column::CartId.eq(cookie_cart))
        .all(&state.orm)
        .await?;
    assert!(left.is_empty());

    let audit = AuditLogs::find()
        .filter(audit_logs::Column::UserId.eq(user.user_id))
        .filter(audit_logs::Column::Action.eq("order_create"))
        .one(&state.orm)
        .await?;
    assert_eq!(audit.and_then(|a| a.resource).as_deref(), Some("orders"));

    // An empty cart can't be ordered.
    let err = order_service::create_order(
        &state,
        &user,
        session,
        CreateOrderRequest {
            shipping: address(),
            billing: None,
            notes: None,
        },
    )
    .await
    .expect_err("empty cart");
    assert!(matches!(err, AppError::BadRequest(_)));

    // The single use went to the order above.
    let other = MaybeAuthUser(Some(shopper("user")));
    cart_service::add_to_cart(
        &state,
        &other,
        CartSession::default(),
        AddToCartRequest {
            product_id: product.id,
            quantity: None,
        },
    )
    .await?;
    let err = coupon_service::apply_coupon(
        &state,
        &other,
        CartSession::default(),
        ApplyCouponRequest { code: code.clone() },
    )
    .await
    .expect_err("coupon exhausted");
    assert!(matches!(err, AppError::Coupon(CouponRejection::Exhausted)));

    let admin = shopper("admin");
    let err = admin_service::update_order_status(
        &state,
        &user,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "PAID".into(),
        },
    )
    .await
    .expect_err("customers can't update status");
    assert!(matches!(err, AppError::Forbidden));

    let resp = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "paid".into(),
        },
    )
    .await?;
    assert_eq!(resp.data.expect("order").status, "PAID");

    let resp = order_service::get_order(&state, &user, placed.order.id).await?;
    let fetched = resp.data.expect("order");
    assert_eq!(fetched.order.total, dec!(113.00));
    assert_eq!(fetched.order.tax_total, Decimal::ZERO);
    assert_eq!(fetched.items.len(), 1);

    Ok(())
}

async fn coupon_id(state: &AppState, code: &str) -> anyhow::Result<Uuid> {
    let coupon = Coupons::find()
        .filter(coupons::Column::Code.eq(code))
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("coupon {code} missing"))?;
    Ok(coupon.id)
}

// Simultaneous applies of a single-use coupon from different carts.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_use_coupon_is_redeemed_once_under_contention() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&database_url).await?;
    let code = format!("ONCE{}", &Uuid::new_v4().simple().to_string()[..8]).to_uppercase();
    insert_coupon(&state, &code, CouponKind::Fixed, dec!(5), Some(1)).await?;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let state = state.clone();
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            coupon_service::apply_coupon(
                &state,
                &MaybeAuthUser(None),
                CartSession::default(),
                ApplyCouponRequest { code },
            )
            .await
        }));
    }

    let mut applied = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => applied += 1,
            Err(AppError::Coupon(CouponRejection::Exhausted)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(applied, 1);

    let redemptions = CouponRedemptions::find()
        .filter(coupon_redemptions::Column::CouponId.eq(coupon_id(&state, &code).await?))
        .count(&state.orm)
        .await?;
    assert_eq!(redemptions, 1);
    Ok(())
}

// One cart switching between two codes from parallel requests.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_reapply_keeps_one_redemption_per_cart() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&database_url).await?;
    let suffix = Uuid::new_v4().simple().to_string();
    let codes = [
        format!("SWAPA{}", &suffix[..8]).to_uppercase(),
        format!("SWAPB{}", &suffix[..8]).to_uppercase(),
    ];
    for code in &codes {
        insert_coupon(&state, code, CouponKind::FreeShip, Decimal::ZERO, None).await?;
    }

    let (_, issued) =
        cart_service::get_cart(&state, &MaybeAuthUser(None), CartSession::default()).await?;
    let cart_id = issued.expect("new cart issues a cookie");
    let session = CartSession {
        cookie_cart_id: Some(cart_id),
    };

    for _ in 0..5 {
        let mut tasks = Vec::new();
        for i in 0..8 {
            let state = state.clone();
            let code = codes[i % 2].clone();
            tasks.push(tokio::spawn(async move {
                coupon_service::apply_coupon(
                    &state,
                    &MaybeAuthUser(None),
                    session,
                    ApplyCouponRequest { code },
                )
                .await
            }));
        }
        for task in tasks {
            let (_, issued) = task.await??;
            assert!(issued.is_none());
        }

        let rows = CouponRedemptions::find()
            .filter(coupon_redemptions::Column::CartId.eq(cart_id))
            .count(&state.orm)
            .await?;
        assert_eq!(rows, 1);
    }
    Ok(())
}

#[tokio::test]
async fn oversized_cart_line_is_rejected() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };
    let state = setup_state(&database_url).await?;
    let suffix = Uuid::new_v4().simple().to_string();
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Bulk Widget".into()),
        slug: Set(format!("bulk-widget-{suffix}")),
        description: Set(None),
        price: Set(dec!(1.00)),
        stock: Set(10),
        image_url: Set(None),
        category_id: Set(None),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    let anonymous = MaybeAuthUser(None);
    let add = |quantity| AddToCartRequest {
        product_id: product.id,
        quantity: Some(quantity),
    };
    let (_, issued) =
        cart_service::add_to_cart(&state, &anonymous, CartSession::default(), add(9_000)).await?;
    let session = CartSession {
        cookie_cart_id: issued,
    };

    let err = cart_service::add_to_cart(&state, &anonymous, session, add(i32::MAX))
        .await
        .expect_err("line past the cap");
    assert!(matches!(err, AppError::BadRequest(_)));

    let (resp, _) = cart_service::get_cart(&state, &anonymous, session).await?;
    assert_eq!(resp.data.expect("cart").count, 9_000);
    Ok(())
}
