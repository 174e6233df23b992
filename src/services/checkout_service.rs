use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use uuid::Uuid;

use crate::{
    dto::checkout::CheckoutPreview,
    entity::coupons,
    error::AppResult,
    middleware::{auth::MaybeAuthUser, cart_session::CartSession},
    pricing::{FixedClock, Totals, TotalsOptions, compute_totals, coupon_is_currently_valid},
    response::ApiResponse,
    services::{
        cart_service::{CartRow, cart_lines, line_view, load_cart_rows, resolve_cart},
        coupon_service::{applied_coupon, current_coupon, engine_coupon},
    },
    state::AppState,
};

/// Cart contents together with the totals the engine produced for them.
#[derive(Debug)]
pub struct PricedCart {
    pub rows: Vec<CartRow>,
    pub coupon: Option<coupons::Model>,
    /// Whether `coupon` passed the validity gate when `totals` were computed.
    pub coupon_honored: bool,
    pub totals: Totals,
}

/// Totals for `rows` at a single instant, plus whether `coupon` was honored.
pub fn price_rows(
    rows: &[CartRow],
    coupon: Option<&coupons::Model>,
    options: &TotalsOptions,
    now: DateTime<Utc>,
) -> (Totals, bool) {
    let engine = coupon.map(engine_coupon);
    let totals = compute_totals(&cart_lines(rows), engine.as_ref(), options, &FixedClock(now));
    let honored = engine
        .as_ref()
        .is_some_and(|c| coupon_is_currently_valid(c, totals.subtotal, now));
    (totals, honored)
}

pub async fn price_cart<C: ConnectionTrait>(
    db: &C,
    state: &AppState,
    cart_id: Uuid,
) -> AppResult<PricedCart> {
    let rows = load_cart_rows(db, cart_id).await?;
    let coupon = current_coupon(db, cart_id).await?;
    let (totals, coupon_honored) =
        price_rows(&rows, coupon.as_ref(), &state.pricing, state.clock.now());
    tracing::debug!(
        %cart_id,
        lines = rows.len(),
        subtotal = %totals.subtotal,
        discount = %totals.discount,
        shipping = %totals.shipping,
        total = %totals.total,
        "priced cart"
    );
    Ok(PricedCart {
        rows,
        coupon,
        coupon_honored,
        totals,
    })
}

pub async fn preview(
    state: &AppState,
    user: &MaybeAuthUser,
    session: CartSession,
) -> AppResult<(ApiResponse<CheckoutPreview>, Option<Uuid>)> {
    let resolved = resolve_cart(&state.orm, user.user_id(), session).await?;
    let cart_id = resolved.cart.id;
    let priced = price_cart(&state.orm, state, cart_id).await?;

    let preview = CheckoutPreview {
        cart_id,
        items: priced
            .rows
            .iter()
            .map(|(item, product)| line_view(item, product))
            .collect(),
        coupon: priced.coupon.as_ref().map(applied_coupon),
        totals: priced.totals,
    };
    Ok((ApiResponse::ok(preview), resolved.issued_cookie))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    use crate::entity::{cart_items, products};

    fn row() -> CartRow {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let product_id = Uuid::new_v4();
        (
            cart_items::Model {
                id: Uuid::new_v4(),
                cart_id: Uuid::nil(),
                product_id,
                quantity: 2,
                created_at: created.into(),
            },
            products::Model {
                id: product_id,
                name: "Mouse RGB Pro".into(),
                slug: "mouse-rgb-pro".into(),
                description: None,
                price: dec!(50.00),
                stock: 5,
                image_url: None,
                category_id: None,
                created_at: created.into(),
            },
        )
    }

    fn coupon_ending(ends_at: DateTime<Utc>) -> coupons::Model {
        coupons::Model {
            id: Uuid::new_v4(),
            code: "WELCOME10".into(),
            kind: "PERCENT".into(),
            value: dec!(10),
            is_active: true,
            starts_at: None,
            ends_at: Some(ends_at.into()),
            min_subtotal: None,
            max_uses: None,
            per_user_limit: None,
            created_at: ends_at.into(),
        }
    }

    #[test]
    fn discount_and_honored_flag_agree_at_window_edge() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let rows = vec![row()];
        let options = TotalsOptions::default();

        let still_valid = coupon_ending(now);
        let (totals, honored) = price_rows(&rows, Some(&still_valid), &options, now);
        assert!(honored);
        assert_eq!(totals.discount, dec!(10.00));

        let lapsed = coupon_ending(now - Duration::seconds(1));
        let (totals, honored) = price_rows(&rows, Some(&lapsed), &options, now);
        assert!(!honored);
        assert_eq!(totals.discount, dec!(0));
    }

    #[test]
    fn no_coupon_is_never_honored() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let (totals, honored) = price_rows(&[row()], None, &TotalsOptions::default(), now);
        assert!(!honored);
        assert_eq!(totals.total, dec!(105.00));
    }
}
