use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Days to claim a copy when the deadline is set on a weekday.
pub const WEEKDAY_GRACE_DAYS: u64 = 2;
/// Days to claim a copy when the deadline is set on Saturday or Sunday.
pub const WEEKEND_GRACE_DAYS: u64 = 4;

/// Last day a customer in the priority window may claim the book, counted
/// from the day the deadline is assigned.
pub fn end_of_priority(today: NaiveDate) -> NaiveDate {
    let grace = match today.weekday() {
        Weekday::Sat | Weekday::Sun => WEEKEND_GRACE_DAYS,
        _ => WEEKDAY_GRACE_DAYS,
    };
    today + Days::new(grace)
}
