//! Cart pricing: turns cart lines and an optional coupon into order totals.
//!
//! Everything in here is pure. Callers load rows, enforce coupon usage caps and
//! persist results; this module only does the arithmetic and the validity gate.

pub mod clock;
pub mod coupon;
pub mod totals;

pub use clock::{Clock, FixedClock, SystemClock};
pub use coupon::{Coupon, CouponKind, coupon_is_currently_valid, normalize_code};
pub use totals::{CartLine, Totals, TotalsOptions, compute_totals, round2};
