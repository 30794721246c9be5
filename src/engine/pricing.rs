use rust_decimal::Decimal;

use crate::model::{BillingKind, Interval};

/// Cost of a venue slot: hourly rate, pro-rated to the second.
///
/// Multiply before dividing so common fractions stay exact in decimal
/// (90 minutes at 40/h is 40 * 5400 / 3600 = 60, no intermediate 1.5).
/// Rounded to cents, banker's rounding. The result always carries scale 2 so
/// it renders as `60.00`, not `60`.
pub fn booking_cost(hourly_rate: Decimal, interval: &Interval) -> Decimal {
    let secs = Decimal::from(interval.duration_secs());
    to_cents(hourly_rate * secs / Decimal::from(3600u32))
}

/// Cost of a rental for `duration_days` under the chosen billing kind.
///
/// Weekly billing charges the exact fraction of a week, again multiplying
/// first: 10 days at 70/week is 70 * 10 / 7 = 100 exactly.
pub fn rental_cost(
    daily_rate: Decimal,
    weekly_rate: Decimal,
    duration_days: u32,
    billing: BillingKind,
) -> Decimal {
    let days = Decimal::from(duration_days);
    let total = match billing {
        BillingKind::Daily => daily_rate * days,
        BillingKind::Weekly => weekly_rate * days / Decimal::from(7u32),
    };
    to_cents(total)
}

fn to_cents(amount: Decimal) -> Decimal {
    let mut cents = amount.round_dp(2);
    cents.rescale(2);
    cents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeOfDay;
    use rust_decimal_macros::dec;

    fn interval(start: &str, end: &str) -> Interval {
        Interval::new(
            TimeOfDay::parse(start).unwrap(),
            TimeOfDay::parse(end).unwrap(),
        )
    }

    #[test]
    fn ninety_minutes_at_forty_is_sixty() {
        let cost = booking_cost(dec!(40), &interval("09:00:00", "10:30:00"));
        assert_eq!(cost, dec!(60.00));
    }

    #[test]
    fn one_hour_is_the_hourly_rate() {
        let cost = booking_cost(dec!(55.50), &interval("09:00:00", "10:00:00"));
        assert_eq!(cost, dec!(55.50));
    }

    #[test]
    fn sub_hour_slot_rounds_to_cents() {
        // 20 minutes at 40/h = 13.333... -> 13.33
        let cost = booking_cost(dec!(40), &interval("09:00:00", "09:20:00"));
        assert_eq!(cost, dec!(13.33));
    }

    #[test]
    fn daily_rental_multiplies() {
        let cost = rental_cost(dec!(10), dec!(70), 3, BillingKind::Daily);
        assert_eq!(cost, dec!(30.00));
    }

    #[test]
    fn weekly_rental_charges_exact_fraction() {
        // 10 days at 70/week: 70 * 10 / 7 = 100 exactly, no float drift
        let cost = rental_cost(dec!(10), dec!(70), 10, BillingKind::Weekly);
        assert_eq!(cost, dec!(100.00));
    }

    #[test]
    fn weekly_partial_week_rounds_to_cents() {
        // 3 days at 100/week = 42.857... -> 42.86
        let cost = rental_cost(dec!(20), dec!(100), 3, BillingKind::Weekly);
        assert_eq!(cost, dec!(42.86));
    }

    #[test]
    fn exact_costs_still_render_with_cents() {
        let booking = booking_cost(dec!(40), &interval("09:00:00", "10:30:00"));
        assert_eq!(booking.to_string(), "60.00");

        let daily = rental_cost(dec!(10), dec!(70), 3, BillingKind::Daily);
        assert_eq!(daily.to_string(), "30.00");

        let weekly = rental_cost(dec!(10), dec!(70), 10, BillingKind::Weekly);
        assert_eq!(weekly.to_string(), "100.00");
    }

    #[test]
    fn single_day_daily() {
        let cost = rental_cost(dec!(15.25), dec!(90), 1, BillingKind::Daily);
        assert_eq!(cost, dec!(15.25));
    }
}
