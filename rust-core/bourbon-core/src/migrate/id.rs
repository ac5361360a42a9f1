//! Migration id allocation.
//!
//! Ids are `YYYYMMDDHHMMSS` optionally followed by `_<slug>`. Every id
//! shares the fixed-width timestamp prefix, so lexical order is
//! chronological order.

use super::naming;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// `chrono` format of the id prefix
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const TIMESTAMP_LEN: usize = 14;

/// Timestamp prefix of an id, if it has one
#[must_use]
pub fn timestamp_of(id: &str) -> Option<NaiveDateTime> {
    let prefix = id.get(..TIMESTAMP_LEN)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT).ok()
}

/// Allocate a new id at `now` named after `name`
///
/// The timestamp is moved forward past the newest timestamp among
/// `existing`, so a new id always sorts after every id already issued,
/// even with a skewed clock or several generations within one second.
pub fn allocate<'a, I>(now: DateTime<Utc>, name: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stamp = now.naive_utc();
    if let Some(latest) = existing.into_iter().filter_map(timestamp_of).max() {
        if stamp <= latest {
            stamp = latest + Duration::seconds(1);
        }
    }

    let prefix = stamp.format(TIMESTAMP_FORMAT).to_string();
    let slug = naming::slug(name);
    if slug.is_empty() {
        prefix
    } else {
        format!("{prefix}_{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_plain_allocation() {
        let none: [&str; 0] = [];
        assert_eq!(allocate(at(9, 30, 0), "Add user age", none), "20240501093000_add_user_age");
        assert_eq!(allocate(at(9, 30, 0), "", none), "20240501093000");
    }

    #[test]
    fn test_bumps_past_existing() {
        let existing = ["20240501093000_init", "20240501093005_second", "custom"];
        let id = allocate(at(9, 30, 0), "third", existing);
        assert_eq!(id, "20240501093006_third");
        assert!(id.as_str() > existing[1]);
    }

    #[test]
    fn test_bump_rolls_over_minutes() {
        let id = allocate(at(9, 30, 0), "", ["20240501095959"]);
        assert_eq!(id, "20240501100000");
    }

    #[test]
    fn test_timestamp_of() {
        assert!(timestamp_of("20240501093000_init").is_some());
        assert!(timestamp_of("2024").is_none());
        assert!(timestamp_of("20241399000000").is_none());
        assert!(timestamp_of("init_20240501093000").is_none());
    }
}
