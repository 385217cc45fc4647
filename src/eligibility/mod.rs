//! Cancellation eligibility calculator
//!
//! Pure decision logic: given an order's delivery window, its status, and a
//! caller-supplied clock, determine whether the customer holds an
//! unconditional cancellation right (the provider missed the agreed delivery
//! deadline) or only a conditional one, and how many hours remain until the
//! deadline. No I/O happens here; repeated calls with a frozen clock return
//! identical results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Order;
use crate::storno::StornoType;

/// Processing fee for voluntary cancellations, in basis points of the order
/// total. Overdue cancellations carry no fee.
pub const NORMAL_STORNO_FEE_BPS: i64 = 1_000;

/// Eligibility decision for a single order at a single point in time
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EligibilityResult {
    pub can_cancel: bool,
    pub is_overdue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storno_type: Option<StornoType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub hours_until_deadline: i64,
    /// Advisory fee estimate in minor currency units; the authoritative
    /// refund amount is fixed at approval time.
    pub processing_fee: i64,
    /// Advisory refund estimate in minor currency units
    pub estimated_refund: i64,
}

impl EligibilityResult {
    /// The fail-closed default: no cancellation right.
    fn denied() -> Self {
        Self {
            can_cancel: false,
            is_overdue: false,
            storno_type: None,
            deadline: None,
            hours_until_deadline: 0,
            processing_fee: 0,
            estimated_refund: 0,
        }
    }
}

/// Evaluate cancellation eligibility for an order.
///
/// The deadline is the end of day (23:59:59.999) of the delivery-window end
/// date, falling back to the start date when no end date is set. Past the
/// deadline the customer holds an unconditional right with a full refund;
/// before it, only orders in a voluntarily-cancellable status qualify, and a
/// processing fee applies.
pub fn evaluate(order: &Order, now: DateTime<Utc>) -> EligibilityResult {
    if order.status.is_cancelled() {
        return EligibilityResult::denied();
    }

    // No delivery window on record means the overdue right can never be
    // established; only the voluntary rules apply then.
    let window_end = order.delivery_window_end.or(order.delivery_window_start);
    let deadline = window_end.and_then(end_of_day);

    let is_overdue = deadline.map(|d| now > d).unwrap_or(false);

    if is_overdue {
        return EligibilityResult {
            can_cancel: true,
            is_overdue: true,
            storno_type: Some(StornoType::Overdue),
            deadline,
            hours_until_deadline: 0,
            processing_fee: 0,
            estimated_refund: order.total_amount,
        };
    }

    let hours_until_deadline = deadline
        .map(|d| hours_until(d, now))
        .unwrap_or(0);

    if !order.status.allows_voluntary_storno() {
        return EligibilityResult {
            deadline,
            hours_until_deadline,
            ..EligibilityResult::denied()
        };
    }

    let processing_fee = order.total_amount * NORMAL_STORNO_FEE_BPS / 10_000;

    EligibilityResult {
        can_cancel: true,
        is_overdue: false,
        storno_type: Some(StornoType::Normal),
        deadline,
        hours_until_deadline,
        processing_fee,
        estimated_refund: order.total_amount - processing_fee,
    }
}

/// End of day (23:59:59.999) of the given timestamp's date.
fn end_of_day(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    ts.date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .map(|naive| naive.and_utc())
}

/// Whole hours remaining until the deadline, rounded up, floored at zero.
fn hours_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (deadline - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 3599) / 3600
    }
}
