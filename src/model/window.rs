use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// An inclusive time window over which activity is collected and measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether an instant falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

impl core::fmt::Display for Window {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Bucket width for time series output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Granularity {
    Day,
    Month,
}

impl Granularity {
    /// The start of the bucket containing `instant`.
    #[must_use]
    pub fn truncate(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let date = instant.date_naive();
        match self {
            Self::Day => Utc
                .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
                .single()
                .expect("midnight UTC is unambiguous"),
            Self::Month => Utc
                .with_ymd_and_hms(date.year(), date.month(), 1, 0, 0, 0)
                .single()
                .expect("midnight UTC is unambiguous"),
        }
    }

    /// The start of the bucket following the one starting at `bucket`.
    #[must_use]
    pub fn next_bucket(self, bucket: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Day => bucket + Duration::days(1),
            Self::Month => {
                let (year, month) = if bucket.month() == 12 {
                    (bucket.year() + 1, 1)
                } else {
                    (bucket.year(), bucket.month() + 1)
                };
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .expect("midnight UTC is unambiguous")
            }
        }
    }

    /// Every bucket start that intersects the window, in ascending order.
    ///
    /// Buckets are half-open: a bucket covers [start, next_bucket(start)).
    /// The window's partial first and last buckets are included.
    #[must_use]
    pub fn buckets(self, window: Window) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut cursor = self.truncate(window.start);
        while cursor <= window.end {
            out.push(cursor);
            cursor = self.next_bucket(cursor);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn window_contains_is_inclusive() {
        let w = Window::new(at(2024, 3, 1, 0), at(2024, 3, 31, 23));
        assert!(w.contains(w.start));
        assert!(w.contains(w.end));
        assert!(!w.contains(at(2024, 4, 1, 0)));
    }

    #[test]
    fn day_truncation_drops_time_of_day() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 9).unwrap();
        assert_eq!(Granularity::Day.truncate(t), at(2024, 3, 15, 0));
    }

    #[test]
    fn month_truncation_snaps_to_first() {
        let t = at(2024, 3, 15, 13);
        assert_eq!(Granularity::Month.truncate(t), at(2024, 3, 1, 0));
    }

    #[test]
    fn month_buckets_wrap_the_year() {
        let w = Window::new(at(2023, 11, 10, 0), at(2024, 2, 5, 0));
        let buckets = Granularity::Month.buckets(w);
        assert_eq!(
            buckets,
            vec![at(2023, 11, 1, 0), at(2023, 12, 1, 0), at(2024, 1, 1, 0), at(2024, 2, 1, 0)]
        );
    }

    #[test]
    fn day_buckets_cover_the_whole_window() {
        let w = Window::new(at(2024, 3, 1, 12), at(2024, 3, 4, 1));
        let buckets = Granularity::Day.buckets(w);
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[0], at(2024, 3, 1, 0));
        assert_eq!(buckets[3], at(2024, 3, 4, 0));
    }
}
