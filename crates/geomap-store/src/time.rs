//! Time buckets: years and seasonal slots.
//!
//! A year is split into 48 slots, four per month (days 1-7, 8-14, 15-21 and
//! 22-end). Slot `0` is the all-time sentinel; it never takes part in slot
//! arithmetic.

use serde::{Deserialize, Serialize};

/// Year value denoting the all-years aggregate.
pub const YEAR_ALL: i32 = 0;

/// Number of seasonal slots in a year.
pub const SLOTS_PER_YEAR: u8 = 48;

/// Seasonal slot id: `0` (all-time) or `1..=48` (month × quartile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct SlotId(u8);

impl SlotId {
    /// The all-time sentinel slot.
    pub const ALL: SlotId = SlotId(0);

    /// Normalize a raw slot value.
    ///
    /// `0` stays the all-time sentinel; everything else wraps into `1..=48`,
    /// so `49` becomes `1` and `-1` becomes `47`.
    pub fn normalized(raw: i64) -> Self {
        if raw == 0 {
            return SlotId::ALL;
        }
        match raw.rem_euclid(i64::from(SLOTS_PER_YEAR)) {
            0 => SlotId(SLOTS_PER_YEAR),
            wrapped => SlotId(wrapped as u8),
        }
    }

    /// Slot for a month (1-12) and quartile (1-4).
    pub fn from_month_quartile(month: u8, quartile: u8) -> Option<Self> {
        if !(1..=12).contains(&month) || !(1..=4).contains(&quartile) {
            return None;
        }
        Some(SlotId((month - 1) * 4 + quartile))
    }

    /// Raw slot value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Whether this is the all-time sentinel.
    pub fn is_all(self) -> bool {
        self.0 == 0
    }

    /// Move `delta` slots forward (or backward), wrapping around the year.
    ///
    /// The all-time sentinel is returned unchanged.
    pub fn shifted(self, delta: i64) -> Self {
        if self.is_all() {
            return self;
        }
        SlotId::normalized(i64::from(self.0) + delta.rem_euclid(i64::from(SLOTS_PER_YEAR)))
    }

    /// This slot plus `radius` neighbours on each side, sorted and deduplicated.
    pub fn window(self, radius: u8) -> Vec<SlotId> {
        if self.is_all() {
            return vec![self];
        }
        let radius = i64::from(radius);
        let mut slots: Vec<SlotId> = (-radius..=radius).map(|d| self.shifted(d)).collect();
        slots.sort();
        slots.dedup();
        slots
    }

    /// Month (1-12) and quartile (1-4) of a seasonal slot.
    pub fn month_quartile(self) -> Option<(u8, u8)> {
        if self.is_all() {
            return None;
        }
        Some(((self.0 - 1) / 4 + 1, (self.0 - 1) % 4 + 1))
    }
}

impl From<i64> for SlotId {
    fn from(raw: i64) -> Self {
        SlotId::normalized(raw)
    }
}

impl From<SlotId> for i64 {
    fn from(slot: SlotId) -> Self {
        i64::from(slot.0)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.month_quartile() {
            Some((month, quartile)) => write!(f, "{}.{}", month, quartile),
            None => f.write_str("all"),
        }
    }
}

/// Time context of a layer: `(year, slot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeContext {
    /// Calendar year, or [`YEAR_ALL`] for the all-years aggregate.
    pub year: i32,
    /// Seasonal slot.
    pub slot: SlotId,
}

impl TimeContext {
    /// All years, all-time slot.
    pub const ALL: TimeContext = TimeContext {
        year: YEAR_ALL,
        slot: SlotId::ALL,
    };

    /// Create a time context.
    pub fn new(year: i32, slot: SlotId) -> Self {
        Self { year, slot }
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        TimeContext::ALL
    }
}

/// Year selection for read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YearSpan {
    /// The all-years aggregate bucket (`year = 0`).
    AllYears,
    /// Every per-year bucket in the inclusive range.
    Range {
        /// First year.
        from: i32,
        /// Last year.
        to: i32,
    },
}

impl YearSpan {
    /// Build a span from optional bounds.
    ///
    /// No bounds (or explicit zeros) select the all-years bucket; a single
    /// bound selects that one year; reversed bounds are swapped.
    pub fn from_bounds(from: Option<i32>, to: Option<i32>) -> Self {
        match (from, to) {
            (None, None) => YearSpan::AllYears,
            (Some(y), None) | (None, Some(y)) => YearSpan::single(y),
            (Some(a), Some(b)) => {
                if a == YEAR_ALL && b == YEAR_ALL {
                    YearSpan::AllYears
                } else {
                    YearSpan::Range {
                        from: a.min(b),
                        to: a.max(b),
                    }
                }
            }
        }
    }

    fn single(year: i32) -> Self {
        if year == YEAR_ALL {
            YearSpan::AllYears
        } else {
            YearSpan::Range { from: year, to: year }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_wraps() {
        assert_eq!(SlotId::normalized(0), SlotId::ALL);
        assert_eq!(SlotId::normalized(1).get(), 1);
        assert_eq!(SlotId::normalized(48).get(), 48);
        assert_eq!(SlotId::normalized(49).get(), 1);
        assert_eq!(SlotId::normalized(-1).get(), 47);
        assert_eq!(SlotId::normalized(96).get(), 48);
        assert_eq!(SlotId::normalized(-48).get(), 48);
    }

    #[test]
    fn test_normalized_extremes() {
        // 2^63 = 32 (mod 48)
        assert_eq!(SlotId::normalized(i64::MIN).get(), 16);
        assert_eq!(SlotId::normalized(i64::MAX).get(), 31);
        assert_eq!(SlotId::from(i64::MIN + 1).get(), 17);
        assert_eq!(SlotId::normalized(5).shifted(i64::MAX).get(), 36);
        assert_eq!(SlotId::normalized(5).shifted(i64::MIN).get(), 21);
        let slot: SlotId = serde_json::from_str(&i64::MIN.to_string()).unwrap();
        assert_eq!(slot.get(), 16);
    }

    #[test]
    fn test_shifted_never_touches_sentinel() {
        assert_eq!(SlotId::ALL.shifted(5), SlotId::ALL);
        assert_eq!(SlotId::normalized(48).shifted(1).get(), 1);
        assert_eq!(SlotId::normalized(1).shifted(-1).get(), 48);
    }

    #[test]
    fn test_window() {
        let w: Vec<u8> = SlotId::normalized(1).window(2).iter().map(|s| s.get()).collect();
        assert_eq!(w, vec![1, 2, 3, 47, 48]);
        assert_eq!(SlotId::ALL.window(3), vec![SlotId::ALL]);
    }

    #[test]
    fn test_month_quartile() {
        let slot = SlotId::from_month_quartile(6, 3).unwrap();
        assert_eq!(slot.get(), 23);
        assert_eq!(slot.month_quartile(), Some((6, 3)));
        assert_eq!(slot.to_string(), "6.3");
        assert_eq!(SlotId::ALL.to_string(), "all");
        assert!(SlotId::from_month_quartile(13, 1).is_none());
    }

    #[test]
    fn test_year_span_from_bounds() {
        assert_eq!(YearSpan::from_bounds(None, None), YearSpan::AllYears);
        assert_eq!(YearSpan::from_bounds(Some(0), Some(0)), YearSpan::AllYears);
        assert_eq!(
            YearSpan::from_bounds(Some(2021), None),
            YearSpan::Range { from: 2021, to: 2021 }
        );
        assert_eq!(
            YearSpan::from_bounds(Some(2024), Some(2020)),
            YearSpan::Range { from: 2020, to: 2024 }
        );
    }
}
