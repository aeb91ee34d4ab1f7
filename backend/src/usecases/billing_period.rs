use chrono::{DateTime, Duration, Months, Utc};
use storefront_core::payments::stripe_client::{StripeRecurring, StripeSubscription, unix_to_utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Current billing period for a freshly retrieved subscription.
///
/// The latest invoice's period wins when it is a real range. Otherwise the
/// period starts at the billing-cycle anchor (then the start date, then `now`)
/// and lasts one interval of the first item's price, or one calendar month
/// when the price carries no interval.
pub fn derive_billing_period(subscription: &StripeSubscription, now: DateTime<Utc>) -> BillingPeriod {
    if let Some(period) = invoice_period(subscription) {
        return period;
    }

    let start = subscription
        .billing_cycle_anchor
        .or(subscription.start_date)
        .and_then(unix_to_utc)
        .unwrap_or(now);
    let recurring = subscription
        .first_price()
        .and_then(|price| price.recurring.as_ref());

    BillingPeriod {
        start,
        end: add_interval(start, recurring),
    }
}

fn invoice_period(subscription: &StripeSubscription) -> Option<BillingPeriod> {
    let invoice = subscription.latest_invoice()?;
    let start = invoice.period_start.and_then(unix_to_utc)?;
    let end = invoice.period_end.and_then(unix_to_utc)?;

    // A subscription's first invoice reports a zero-length period.
    (end > start).then_some(BillingPeriod { start, end })
}

fn add_interval(start: DateTime<Utc>, recurring: Option<&StripeRecurring>) -> DateTime<Utc> {
    let one_month = || start.checked_add_months(Months::new(1));
    let Some(recurring) = recurring else {
        return one_month().unwrap_or(start + Duration::days(30));
    };

    let count = recurring.interval_count.unwrap_or(1).max(1);
    let end = match recurring.interval.as_str() {
        "day" => start.checked_add_signed(Duration::days(i64::from(count))),
        "week" => start.checked_add_signed(Duration::weeks(i64::from(count))),
        "year" => start.checked_add_months(Months::new(count.saturating_mul(12))),
        "month" => start.checked_add_months(Months::new(count)),
        _ => one_month(),
    };
    end.unwrap_or(start + Duration::days(30))
}
