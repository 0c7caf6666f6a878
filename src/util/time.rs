use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Clock-time window that restricts when a campaign may send, evaluated
/// in the campaign's own time zone. Built only when both boundary times
/// and the zone are present; campaigns without a full window send around
/// the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    start: String,
    end: String,
    zone: String,
}

const CLOCK_FORMAT: &str = "%I:%M %p";

impl BusinessHours {
    pub fn new(start: &str, end: &str, zone: &str) -> Option<Self> {
        if start.is_empty() || end.is_empty() || zone.is_empty() {
            return None;
        }
        Some(Self {
            start: start.to_string(),
            end: end.to_string(),
            zone: zone.to_string(),
        })
    }

    /// Whether the zone name resolves to a known IANA zone. Callers log a
    /// warning when it does not; evaluation falls back to UTC.
    pub fn zone_is_valid(&self) -> bool {
        self.zone.parse::<Tz>().is_ok()
    }

    fn tz(&self) -> Tz {
        self.zone.parse().unwrap_or(Tz::UTC)
    }

    /// Strict containment check: the boundaries themselves are outside the
    /// window, so a campaign with a 9:00 AM start does not send at 9:00 AM
    /// sharp.
    pub fn contains(&self, now: DateTime<Utc>) -> Result<bool> {
        let start = NaiveTime::parse_from_str(&self.start, CLOCK_FORMAT)
            .with_context(|| format!("invalid window start time {:?}", self.start))?;
        let end = NaiveTime::parse_from_str(&self.end, CLOCK_FORMAT)
            .with_context(|| format!("invalid window end time {:?}", self.end))?;
        let local = now.with_timezone(&self.tz()).time();
        Ok(local > start && local < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    #[test]
    fn missing_boundaries_disable_the_window() {
        assert!(BusinessHours::new("", "5:00 PM", "UTC").is_none());
        assert!(BusinessHours::new("9:00 AM", "", "UTC").is_none());
        assert!(BusinessHours::new("9:00 AM", "5:00 PM", "").is_none());
        assert!(BusinessHours::new("9:00 AM", "5:00 PM", "UTC").is_some());
    }

    #[test]
    fn inside_window_in_utc() {
        let window = BusinessHours::new("9:00 AM", "5:00 PM", "UTC").unwrap();
        assert!(window.contains(utc(12, 30)).unwrap());
        assert!(!window.contains(utc(7, 0)).unwrap());
        assert!(!window.contains(utc(18, 0)).unwrap());
    }

    #[test]
    fn boundaries_are_exclusive() {
        let window = BusinessHours::new("9:00 AM", "5:00 PM", "UTC").unwrap();
        assert!(!window.contains(utc(9, 0)).unwrap());
        assert!(!window.contains(utc(17, 0)).unwrap());
        assert!(window.contains(utc(9, 1)).unwrap());
    }

    #[test]
    fn window_follows_the_campaign_zone() {
        // 14:00 UTC is 10:00 in New York during DST.
        let window = BusinessHours::new("9:00 AM", "5:00 PM", "America/New_York").unwrap();
        assert!(window.contains(utc(14, 0)).unwrap());
        // 14:00 UTC is 23:00 in Tokyo.
        let window = BusinessHours::new("9:00 AM", "5:00 PM", "Asia/Tokyo").unwrap();
        assert!(!window.contains(utc(14, 0)).unwrap());
    }

    #[test]
    fn unknown_zone_falls_back_to_utc() {
        let window = BusinessHours::new("9:00 AM", "5:00 PM", "Mars/Olympus").unwrap();
        assert!(!window.zone_is_valid());
        assert!(window.contains(utc(12, 0)).unwrap());
    }

    #[test]
    fn malformed_clock_times_error() {
        let window = BusinessHours::new("nine", "5:00 PM", "UTC").unwrap();
        assert!(window.contains(utc(12, 0)).is_err());
        let window = BusinessHours::new("9:00 AM", "17:00", "UTC").unwrap();
        assert!(window.contains(utc(12, 0)).is_err());
    }
}
