use chrono::NaiveDate;

use crate::model::Reservation;

use super::EngineError;

pub fn sort_by_position(waitlist: &mut [Reservation]) {
    waitlist.sort_by_key(|r| r.position);
}

/// True when positions are exactly `1..=len` with no gap or repeat.
pub fn is_contiguous(waitlist: &[Reservation]) -> bool {
    let mut positions: Vec<u32> = waitlist.iter().map(|r| r.position).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(i, &p)| p as usize == i + 1)
}

/// Whether a position can claim one of `available_copies` copies right now.
pub fn in_priority_window(position: u32, available_copies: u32) -> bool {
    position <= available_copies
}

/// Expected availability for whoever ends up `rank` places from the front
/// (zero-based). No predictions means nothing is out on loan: available today.
pub fn soon_date_for_rank(
    predicted_return_dates: &[NaiveDate],
    rank: usize,
    today: NaiveDate,
) -> Result<NaiveDate, EngineError> {
    if predicted_return_dates.is_empty() {
        return Ok(today);
    }
    predicted_return_dates
        .get(rank)
        .copied()
        .ok_or(EngineError::InvalidDateSequence {
            required: rank + 1,
            supplied: predicted_return_dates.len(),
        })
}

/// Shift everyone behind `removed_position` one place forward.
pub fn close_gap(waitlist: &mut [Reservation], removed_position: u32) {
    for r in waitlist.iter_mut().filter(|r| r.position > removed_position) {
        r.position -= 1;
    }
}

/// Fail unless there is one predicted date per reservation.
pub fn check_date_coverage(
    predicted_return_dates: &[NaiveDate],
    waitlist_len: usize,
) -> Result<(), EngineError> {
    if predicted_return_dates.len() < waitlist_len {
        return Err(EngineError::InvalidDateSequence {
            required: waitlist_len,
            supplied: predicted_return_dates.len(),
        });
    }
    Ok(())
}

/// Overwrite soon-availability dates by ordinal offset. `sorted` must already
/// be in position order; nothing is touched if the dates fall short.
pub fn assign_soon_dates(
    sorted: &mut [Reservation],
    predicted_return_dates: &[NaiveDate],
) -> Result<(), EngineError> {
    check_date_coverage(predicted_return_dates, sorted.len())?;
    for (r, date) in sorted.iter_mut().zip(predicted_return_dates) {
        r.soon_disponibility_date = *date;
    }
    Ok(())
}
