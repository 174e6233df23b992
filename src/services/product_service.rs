use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, record_audit},
    dto::products::{CreateProductRequest, ProductList},
    entity::{
        categories::{self, Entity as Categories},
        products::{ActiveModel, Column, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

/// Search term, category slug and inclusive price bounds. Blank strings are
/// ignored.
fn catalog_filter(query: &ProductQuery) -> Condition {
    let mut condition = Condition::all();
    if let Some(term) = query.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{term}%");
        condition = condition.add(
            Condition::any()
                .add(Expr::col((Products, Column::Name)).ilike(pattern.clone()))
                .add(Expr::col((Products, Column::Description)).ilike(pattern)),
        );
    }
    if let Some(slug) = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        condition = condition.add(categories::Column::Slug.eq(slug));
    }
    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }
    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }
    condition
}

fn sort_column(sort_by: Option<&ProductSortBy>) -> Column {
    match sort_by {
        Some(ProductSortBy::Price) => Column::Price,
        Some(ProductSortBy::Name) => Column::Name,
        Some(ProductSortBy::CreatedAt) | None => Column::CreatedAt,
    }
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::BadRequest("min_price is greater than max_price".into()));
        }
    }
    let (page, limit, offset) = query.pagination.normalize();

    let sort_col = sort_column(query.sort_by.as_ref());
    let finder = Products::find()
        .find_also_related(Categories)
        .filter(catalog_filter(&query));
    let finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_product_by_slug(state: &AppState, slug: &str) -> AppResult<ApiResponse<Product>> {
    let product = Products::find()
        .filter(Column::Slug.eq(slug))
        .find_also_related(Categories)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Product", Product::from(product), None))
}

/// Lower-case ASCII words joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }
    if payload.price.is_sign_negative() {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    if payload.stock < 0 {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }

    let slug = slugify(payload.slug.as_deref().unwrap_or(&payload.name));
    if slug.is_empty() {
        return Err(AppError::BadRequest("slug is empty".into()));
    }
    let taken = Products::find()
        .filter(Column::Slug.eq(slug.as_str()))
        .one(&state.orm)
        .await?;
    if taken.is_some() {
        return Err(AppError::BadRequest(format!("slug {slug} is already used")));
    }

    let category = match payload.category_id {
        Some(id) => Some(
            Categories::find_by_id(id)
                .one(&state.orm)
                .await?
                .ok_or_else(|| AppError::BadRequest(format!("category {id} does not exist")))?,
        ),
        None => None,
    };

    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        slug: Set(slug),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        image_url: Set(payload.image_url),
        category_id: Set(payload.category_id),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::ProductCreate,
        serde_json::json!({ "product_id": product.id, "slug": product.slug }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from((product, category)),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_names() {
        assert_eq!(slugify("Laptop Gamer GX15"), "laptop-gamer-gx15");
        assert_eq!(slugify("  Teclado   60% -- Pro "), "teclado-60-pro");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn blank_category_filter_is_ignored() {
        let query = |category: Option<&str>| ProductQuery {
            pagination: Default::default(),
            q: None,
            category: category.map(str::to_string),
            min_price: None,
            max_price: None,
            sort_by: None,
            sort_order: None,
        };
        assert!(catalog_filter(&query(Some("   "))).is_empty());
        assert!(!catalog_filter(&query(Some("laptops"))).is_empty());
    }

    #[test]
    fn defaults_to_newest_first_column() {
        assert!(matches!(sort_column(None), Column::CreatedAt));
        assert!(matches!(sort_column(Some(&ProductSortBy::Price)), Column::Price));
    }
}
