//! Report timestamps and the window of reports a run reads

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATE_TIME_FORMATS: [&str; 2] = ["%b %d, %Y %I:%M %p", "%B %d, %Y %I:%M %p"];
const DATE_FORMATS: [&str; 2] = ["%b %d, %Y", "%B %d, %Y"];

/// Parse a report listing timestamp such as `Dec 3, 2025 05:20 AM`.
///
/// Long month names are accepted; when the time part is missing or
/// unreadable the first three words are parsed as a date at midnight.
pub fn parse_report_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }

    let date_part = raw.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&date_part, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Reports between `start` and `end`, both in the site's local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl ReportWindow {
    /// Window from `days_back` days before `now` at `start_hour` local time up to `now`
    pub fn ending_at(
        now: DateTime<Utc>,
        days_back: u32,
        start_hour: u32,
        offset_hours: i32,
    ) -> Option<Self> {
        let zone = FixedOffset::east_opt(offset_hours.checked_mul(3600)?)?;
        let end = now.with_timezone(&zone);
        let start_day = (end - Duration::days(i64::from(days_back))).date_naive();
        let start = zone
            .from_local_datetime(&start_day.and_hms_opt(start_hour, 0, 0)?)
            .single()?;
        Some(Self { start, end })
    }

    /// Whether a local timestamp from the listing falls inside the window
    pub fn contains(&self, local: NaiveDateTime) -> bool {
        match self.start.timezone().from_local_datetime(&local).single() {
            Some(at) => self.start <= at && at <= self.end,
            None => false,
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{} to {}",
            self.start.format("%Y-%m-%d %H:%M ET"),
            self.end.format("%Y-%m-%d %H:%M ET")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_parses_listing_formats() {
        assert_eq!(parse_report_date("Dec 3, 2025 05:20 AM"), Some(at(2025, 12, 3, 5, 20)));
        assert_eq!(parse_report_date("Dec 2, 2025 04:02 PM"), Some(at(2025, 12, 2, 16, 2)));
        assert_eq!(parse_report_date("December 3, 2025 05:20 AM"), Some(at(2025, 12, 3, 5, 20)));
    }

    #[test]
    fn test_date_only_fallback() {
        assert_eq!(parse_report_date("Dec 3, 2025 (updated)"), Some(at(2025, 12, 3, 0, 0)));
        assert_eq!(parse_report_date("yesterday"), None);
    }

    #[test]
    fn test_window_bounds() {
        // 15:00 UTC is 10:00 at UTC-5
        let now = Utc.with_ymd_and_hms(2025, 12, 3, 15, 0, 0).unwrap();
        let window = ReportWindow::ending_at(now, 2, 12, -5).unwrap();

        assert_eq!(window.label(), "2025-12-01 12:00 ET to 2025-12-03 10:00 ET");
        assert!(window.contains(at(2025, 12, 1, 12, 0)));
        assert!(window.contains(at(2025, 12, 3, 5, 20)));
        assert!(!window.contains(at(2025, 12, 1, 11, 59)));
        assert!(!window.contains(at(2025, 12, 3, 10, 1)));
    }

    #[test]
    fn test_invalid_hour_has_no_window() {
        let now = Utc.with_ymd_and_hms(2025, 12, 3, 15, 0, 0).unwrap();
        assert!(ReportWindow::ending_at(now, 2, 24, -5).is_none());
    }
}
