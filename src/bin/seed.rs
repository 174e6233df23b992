use rust_decimal::Decimal;
use storefront_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    pricing::CouponKind,
    services::product_service::slugify,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&pool).await?;

    seed_categories(&pool).await?;
    seed_products(&pool).await?;
    seed_coupons(&pool).await?;

    println!("Seed completed");
    Ok(())
}

async fn seed_categories(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let categories = [
        ("Laptops", "laptops"),
        ("Accesorios", "accesorios"),
        ("Software", "software"),
    ];

    for (name, slug) in categories {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, slug)
            VALUES ($1, $2, $3)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slug)
        .execute(pool)
        .await?;
    }

    println!("Seeded categories");
    Ok(())
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products = [
        (
            "Laptop Gamer GX15",
            "15.6\" 144Hz, RTX, 16GB RAM",
            Decimal::new(129999, 2),
            10,
            "laptops",
        ),
        (
            "Mouse RGB Pro",
            "Wireless mouse, 6 buttons",
            Decimal::new(3990, 2),
            50,
            "accesorios",
        ),
        (
            "Teclado Mecánico 60%",
            "Hot-swap, red switches",
            Decimal::new(7900, 2),
            30,
            "accesorios",
        ),
        (
            "Licencia Web Booster",
            "Annual performance license",
            Decimal::new(5900, 2),
            999,
            "software",
        ),
    ];

    for (name, desc, price, stock, category) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, slug, description, price, stock, category_id)
            VALUES ($1, $2, $3, $4, $5, $6, (SELECT id FROM categories WHERE slug = $7))
            ON CONFLICT (slug) DO UPDATE SET category_id = EXCLUDED.category_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slugify(name))
        .bind(desc)
        .bind(price)
        .bind(stock)
        .bind(category)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

async fn seed_coupons(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let coupons = [
        ("WELCOME10", CouponKind::Percent, Decimal::new(10, 0), None),
        (
            "SAVE20",
            CouponKind::Fixed,
            Decimal::new(20, 0),
            Some(Decimal::new(100, 0)),
        ),
        ("FREESHIP", CouponKind::FreeShip, Decimal::ZERO, None),
    ];

    for (code, kind, value, min_subtotal) in coupons {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, kind, value, min_subtotal)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(kind.as_str())
        .bind(value)
        .bind(min_subtotal)
        .execute(pool)
        .await?;
        println!("Ensured coupon {code} ({})", kind.as_str());
    }

    Ok(())
}
