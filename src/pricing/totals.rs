use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::clock::Clock;
use super::coupon::{Coupon, CouponKind, coupon_is_currently_valid};

/// One priced cart row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartLine {
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(unit_price: Decimal, quantity: u32) -> Self {
        Self {
            unit_price,
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            shipping: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TotalsOptions {
    /// Charged whenever the cart is non-empty and shipping isn't waived.
    pub flat_shipping_fee: Decimal,
}

impl Default for TotalsOptions {
    fn default() -> Self {
        Self {
            flat_shipping_fee: Decimal::new(500, 2),
        }
    }
}

/// Rounds to cents, halves away from zero.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes subtotal, discount, shipping and total for `lines`.
///
/// A coupon that fails [`coupon_is_currently_valid`] is ignored, so passing it
/// gives the same result as passing `None`. Never fails.
pub fn compute_totals(
    lines: &[CartLine],
    coupon: Option<&Coupon>,
    options: &TotalsOptions,
    clock: &dyn Clock,
) -> Totals {
    let subtotal = round2(
        lines
            .iter()
            .map(|line| line.unit_price.saturating_mul(Decimal::from(line.quantity)))
            .fold(Decimal::ZERO, Decimal::saturating_add),
    );

    let now = clock.now();
    let applied = coupon.filter(|c| coupon_is_currently_valid(c, subtotal, now));

    let discount = applied.map_or(Decimal::ZERO, |c| discount_for(c, subtotal));

    let free_shipping = applied.is_some_and(|c| c.kind == CouponKind::FreeShip);
    let shipping = if subtotal > Decimal::ZERO && !free_shipping {
        round2(options.flat_shipping_fee.max(Decimal::ZERO))
    } else {
        Decimal::ZERO
    };

    let total = round2(subtotal - discount + shipping).max(Decimal::ZERO);

    Totals {
        subtotal,
        discount,
        shipping,
        total,
    }
}

fn discount_for(coupon: &Coupon, subtotal: Decimal) -> Decimal {
    let raw = match coupon.kind {
        CouponKind::Percent => {
            round2(subtotal.saturating_mul(coupon.value) / Decimal::ONE_HUNDRED)
        }
        CouponKind::Fixed => round2(coupon.value),
        CouponKind::FreeShip | CouponKind::Unrecognized => Decimal::ZERO,
    };
    raw.min(subtotal).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::clock::FixedClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    fn now() -> DateTime<Utc> {
        clock().0
    }

    fn sample_lines() -> Vec<CartLine> {
        vec![CartLine::new(dec!(10.00), 2), CartLine::new(dec!(5.00), 1)]
    }

    fn totals(lines: &[CartLine], coupon: Option<&Coupon>) -> Totals {
        compute_totals(lines, coupon, &TotalsOptions::default(), &clock())
    }

    #[test]
    fn no_coupon_charges_flat_shipping() {
        let result = totals(&sample_lines(), None);
        assert_eq!(result.subtotal, dec!(25.00));
        assert_eq!(result.discount, dec!(0));
        assert_eq!(result.shipping, dec!(5.00));
        assert_eq!(result.total, dec!(30.00));
    }

    #[test]
    fn percent_coupon_discounts_subtotal() {
        let coupon = Coupon::new("TEN", CouponKind::Percent, dec!(10));
        let result = totals(&sample_lines(), Some(&coupon));
        assert_eq!(result.discount, dec!(2.50));
        assert_eq!(result.shipping, dec!(5.00));
        assert_eq!(result.total, dec!(27.50));
    }

    #[test]
    fn fixed_coupon_is_capped_at_subtotal() {
        let coupon = Coupon::new("HUNDRED", CouponKind::Fixed, dec!(100));
        let result = totals(&sample_lines(), Some(&coupon));
        assert_eq!(result.discount, dec!(25.00));
        assert_eq!(result.shipping, dec!(5.00));
        assert_eq!(result.total, dec!(5.00));
    }

    #[test]
    fn freeship_coupon_waives_shipping_only() {
        let coupon = Coupon::new("SHIP", CouponKind::FreeShip, dec!(0));
        let result = totals(&sample_lines(), Some(&coupon));
        assert_eq!(result.discount, dec!(0));
        assert_eq!(result.shipping, dec!(0));
        assert_eq!(result.total, dec!(25.00));
    }

    #[test]
    fn empty_cart_is_all_zero_for_every_kind() {
        for kind in [
            CouponKind::Percent,
            CouponKind::Fixed,
            CouponKind::FreeShip,
            CouponKind::Unrecognized,
        ] {
            let coupon = Coupon::new("ANY", kind, dec!(10));
            assert_eq!(totals(&[], Some(&coupon)), Totals::zero());
        }
        assert_eq!(totals(&[], None), Totals::zero());
    }

    #[test]
    fn coupon_below_minimum_matches_no_coupon() {
        let mut coupon = Coupon::new("BIG", CouponKind::Percent, dec!(10));
        coupon.min_subtotal = Some(dec!(50.00));
        assert_eq!(
            totals(&sample_lines(), Some(&coupon)),
            totals(&sample_lines(), None)
        );
    }

    #[test]
    fn freeship_below_minimum_still_charges_shipping() {
        let mut coupon = Coupon::new("SHIP", CouponKind::FreeShip, dec!(0));
        coupon.min_subtotal = Some(dec!(100));
        assert_eq!(totals(&sample_lines(), Some(&coupon)).shipping, dec!(5.00));
    }

    #[test]
    fn expired_and_inactive_coupons_are_ignored() {
        let mut expired = Coupon::new("OLD", CouponKind::Fixed, dec!(10));
        expired.ends_at = Some(now() - Duration::days(1));
        assert_eq!(
            totals(&sample_lines(), Some(&expired)),
            totals(&sample_lines(), None)
        );

        let mut inactive = Coupon::new("OFF", CouponKind::Fixed, dec!(10));
        inactive.is_active = false;
        assert_eq!(
            totals(&sample_lines(), Some(&inactive)),
            totals(&sample_lines(), None)
        );
    }

    #[test]
    fn unrecognized_kind_gives_no_discount() {
        let coupon = Coupon::new("MYSTERY", CouponKind::Unrecognized, dec!(50));
        let result = totals(&sample_lines(), Some(&coupon));
        assert_eq!(result, totals(&sample_lines(), None));
    }

    #[test]
    fn subtotal_rounds_once_after_summation() {
        // 3 × 0.335 = 1.005 rounds to 1.01; rounding each line first would give 1.02.
        let lines = vec![
            CartLine::new(dec!(0.335), 1),
            CartLine::new(dec!(0.335), 1),
            CartLine::new(dec!(0.335), 1),
        ];
        assert_eq!(totals(&lines, None).subtotal, dec!(1.01));
    }

    #[test]
    fn percent_discount_rounds_half_away_from_zero() {
        // 12.50 × 15% = 1.875
        let lines = vec![CartLine::new(dec!(12.50), 1)];
        let coupon = Coupon::new("FIFTEEN", CouponKind::Percent, dec!(15));
        let result = totals(&lines, Some(&coupon));
        assert_eq!(result.discount, dec!(1.88));
        assert_eq!(result.total, dec!(15.62));
    }

    #[test]
    fn out_of_range_percent_is_clamped() {
        let over = Coupon::new("ALL", CouponKind::Percent, dec!(150));
        assert_eq!(totals(&sample_lines(), Some(&over)).discount, dec!(25.00));

        let negative = Coupon::new("NEG", CouponKind::Percent, dec!(-10));
        assert_eq!(totals(&sample_lines(), Some(&negative)).discount, dec!(0));
    }

    #[test]
    fn custom_flat_shipping_fee_is_used() {
        let options = TotalsOptions {
            flat_shipping_fee: dec!(7.499),
        };
        let result = compute_totals(&sample_lines(), None, &options, &clock());
        assert_eq!(result.shipping, dec!(7.50));
        assert_eq!(result.total, dec!(32.50));
    }

    #[test]
    fn inputs_are_left_untouched() {
        let lines = sample_lines();
        let coupon = Coupon::new("TEN", CouponKind::Percent, dec!(10));
        let first = totals(&lines, Some(&coupon));
        let second = totals(&lines, Some(&coupon));
        assert_eq!(first, second);
        assert_eq!(lines, sample_lines());
        assert_eq!(coupon, Coupon::new("TEN", CouponKind::Percent, dec!(10)));
    }
}
