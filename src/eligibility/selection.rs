//! Selection of the guard group that is currently mintable.

use crate::types::GuardGroup;
use chrono::{DateTime, Utc};

/// Pick the group the wallet should mint with at `now`.
///
/// While the first group has not started yet it is returned as a preview of
/// the upcoming phase. Otherwise the first started group whose end time has
/// not passed wins. A group without a start time counts as started.
pub fn select_current_group(groups: &[GuardGroup], now: DateTime<Utc>) -> Option<&GuardGroup> {
    let first = groups.first()?;
    if first.start_time.map_or(false, |start| now < start) {
        return Some(first);
    }

    groups.iter().find(|group| {
        group.start_time.map_or(true, |start| start <= now)
            && group.end_time.map_or(true, |end| now < end)
    })
}

/// Position of the selected group in catalog order.
pub fn select_current_index(groups: &[GuardGroup], now: DateTime<Utc>) -> Option<usize> {
    let selected = select_current_group(groups, now)?;
    groups.iter().position(|g| std::ptr::eq(g, selected))
}
