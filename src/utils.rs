use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Slack added to tolerance checks so values that sit exactly on the
/// tolerance boundary are not rejected because of binary float noise.
const FLOAT_SLACK: f64 = 1e-9;

/// Rounds a monetary value to 2 decimal places, half away from zero.
pub fn round_money(value: f64) -> f64 {
    round_to(value, 2)
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

pub fn within_tolerance(expected: f64, actual: f64, tolerance: f64) -> bool {
    (expected - actual).abs() <= tolerance + FLOAT_SLACK
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .unwrap_or(NaiveDate::MAX)
}

/// Absolute month number (`year * 12 + month0`), handy for window arithmetic.
pub fn month_ordinal(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

fn first_day_of_ordinal(ordinal: i32) -> NaiveDate {
    let year = ordinal.div_euclid(12);
    let month = ordinal.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// The calendar window of `months` whole months ending on 31 December of `base_year`.
pub fn trailing_window(base_year: i32, months: u32) -> (NaiveDate, NaiveDate) {
    let end = last_day_of_month(base_year, 12);
    let start_ordinal = month_ordinal(end) - (months.max(1) as i32 - 1);
    (first_day_of_ordinal(start_ordinal), end)
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    month_ordinal(end) - month_ordinal(start)
}
