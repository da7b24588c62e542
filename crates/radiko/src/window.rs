//! Validation and normalization of the requested recording window.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, TimeZone, Timelike};

use crate::config::WindowConfig;
use crate::error::WindowViolation;
use crate::RecordError;

/// Timestamp layout used in upstream query strings.
const UPSTREAM_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    station: String,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn duration_std(&self) -> Duration {
        self.duration().to_std().unwrap_or_default()
    }

    pub fn upstream_start(&self) -> String {
        self.start.format(UPSTREAM_FORMAT).to_string()
    }

    pub fn upstream_end(&self) -> String {
        self.end.format(UPSTREAM_FORMAT).to_string()
    }

    /// Whether `[from, to)` intersects the window.
    pub fn overlaps(&self, from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> bool {
        to > self.start && from < self.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowResolver {
    config: WindowConfig,
}

impl WindowResolver {
    pub fn new(config: WindowConfig) -> Self {
        Self { config }
    }

    /// Parses `YYYYMMDDHHMM` (or `YYYYMMDDHHMMSS`) in the service time zone.
    pub fn parse_timestamp(&self, input: &str) -> Result<DateTime<FixedOffset>, RecordError> {
        let malformed = || RecordError::from(WindowViolation::Malformed(input.to_string()));
        if !matches!(input.len(), 12 | 14) || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let field = |range: std::ops::Range<usize>| input[range].parse::<u32>().map_err(|_| malformed());

        let year = input[0..4].parse::<i32>().map_err(|_| malformed())?;
        let second = if input.len() == 14 { field(12..14)? } else { 0 };
        let naive = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)
            .and_then(|date| date.and_hms_opt(field(8..10).ok()?, field(10..12).ok()?, second))
            .ok_or_else(malformed)?;

        self.config
            .utc_offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(malformed)
    }

    pub fn resolve_str(
        &self,
        station: &str,
        start: &str,
        end: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<TimeWindow, RecordError> {
        let start = self.parse_timestamp(start)?;
        let end = self.parse_timestamp(end)?;
        self.resolve(station, start, end, now)
    }

    /// Aligns the window to whole minutes (start floored, end ceiled) in the
    /// service time zone and checks it against the archive constraints.
    /// Resolving an already resolved window yields the same window.
    pub fn resolve(
        &self,
        station: &str,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
    ) -> Result<TimeWindow, RecordError> {
        let valid_station = !station.is_empty()
            && station
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_station {
            return Err(WindowViolation::InvalidStation(station.to_string()).into());
        }

        let offset = self.config.utc_offset;
        let start = floor_minute(start.with_timezone(&offset));
        let end = ceil_minute(end.with_timezone(&offset));
        let now = now.with_timezone(&offset);

        if start >= end {
            return Err(WindowViolation::Misordered { start, end }.into());
        }

        let horizon = now - self.config.retention;
        if start < horizon {
            return Err(WindowViolation::BeforeRetentionHorizon { start, horizon }.into());
        }

        let duration = end - start;
        if duration > self.config.max_duration {
            return Err(WindowViolation::ExceedsMaxDuration {
                duration_secs: duration.num_seconds(),
                max_secs: self.config.max_duration.num_seconds(),
            }
            .into());
        }

        let latest = now - self.config.safety_margin;
        if end > latest {
            return Err(WindowViolation::TooCloseToNow { end, latest }.into());
        }

        Ok(TimeWindow {
            station: station.to_string(),
            start,
            end,
        })
    }
}

fn floor_minute(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    t - TimeDelta::seconds(i64::from(t.second())) - TimeDelta::nanoseconds(i64::from(t.nanosecond()))
}

fn ceil_minute(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let floored = floor_minute(t);
    if floored == t {
        t
    } else {
        floored + TimeDelta::minutes(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> WindowResolver {
        WindowResolver::default()
    }

    fn at(s: &str) -> DateTime<FixedOffset> {
        resolver().parse_timestamp(s).unwrap()
    }

    fn violation(result: Result<TimeWindow, RecordError>) -> WindowViolation {
        match result {
            Err(RecordError::InvalidWindow(v)) => v,
            other => panic!("expected InvalidWindow, got {other:?}"),
        }
    }

    #[test]
    fn parses_in_service_time_zone() {
        let t = at("202610161030");
        assert_eq!(t.offset().local_minus_utc(), 9 * 3600);
        assert_eq!(t.to_rfc3339(), "2026-10-16T10:30:00+09:00");
        assert_eq!(at("20261016103045").second(), 45);
    }

    #[test]
    fn rejects_malformed_timestamps() {
        for input in ["20261016", "2026101610300", "2026-10-16 10", "202613011000", "202610161060"] {
            assert!(
                matches!(
                    resolver().parse_timestamp(input),
                    Err(RecordError::InvalidWindow(WindowViolation::Malformed(_)))
                ),
                "{input} should be malformed"
            );
        }
    }

    #[test]
    fn rejects_misordered_window() {
        let now = at("202610162000");
        let v = violation(resolver().resolve("LFR", at("202610161000"), at("202610161000"), now));
        assert!(matches!(v, WindowViolation::Misordered { .. }));
        let v = violation(resolver().resolve("LFR", at("202610161100"), at("202610161000"), now));
        assert!(matches!(v, WindowViolation::Misordered { .. }));
    }

    #[test]
    fn rejects_end_within_safety_margin() {
        let now = at("20261016120030");
        let v = violation(resolver().resolve("LFR", at("202610161100"), at("202610161200"), now));
        assert!(matches!(v, WindowViolation::TooCloseToNow { .. }));
        let v = violation(resolver().resolve("LFR", at("202610161100"), at("202610161300"), now));
        assert!(matches!(v, WindowViolation::TooCloseToNow { .. }));

        // One full minute of margin is enough.
        let now = at("202610161201");
        assert!(resolver().resolve("LFR", at("202610161100"), at("202610161200"), now).is_ok());
    }

    #[test]
    fn rejects_window_exceeding_max_duration() {
        let now = at("202610180000");
        let v = violation(resolver().resolve("TBS", at("202610160000"), at("202610170001"), now));
        assert!(matches!(
            v,
            WindowViolation::ExceedsMaxDuration { duration_secs: 86_460, max_secs: 86_400 }
        ));
        assert!(resolver().resolve("TBS", at("202610160000"), at("202610170000"), now).is_ok());
    }

    #[test]
    fn rejects_start_before_retention_horizon() {
        let now = at("202610162000");
        let v = violation(resolver().resolve("TBS", at("202610091959"), at("202610092100"), now));
        assert!(matches!(v, WindowViolation::BeforeRetentionHorizon { .. }));
    }

    #[test]
    fn rejects_bad_station() {
        let now = at("202610162000");
        for station in ["", "LF R", "../x"] {
            let v = violation(resolver().resolve(station, at("202610161000"), at("202610161100"), now));
            assert!(matches!(v, WindowViolation::InvalidStation(_)));
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let now = at("202610162000");
        let utc = FixedOffset::east_opt(0).unwrap();
        let start = at("20261016100015").with_timezone(&utc);
        let end = at("20261016105930").with_timezone(&utc);

        let window = resolver().resolve("LFR", start, end, now).unwrap();
        assert_eq!(window.start(), at("202610161000"));
        assert_eq!(window.end(), at("202610161100"));
        assert_eq!(window.upstream_start(), "20261016100000");
        assert_eq!(window.upstream_end(), "20261016110000");
        assert_eq!(window.duration_std(), Duration::from_secs(3600));

        let again = resolver()
            .resolve(window.station(), window.start(), window.end(), now)
            .unwrap();
        assert_eq!(again, window);
    }

    #[test]
    fn overlap_is_half_open() {
        let now = at("202610162000");
        let window = resolver()
            .resolve_str("LFR", "202610161000", "202610161030", now)
            .unwrap();
        assert!(!window.overlaps(at("202610160959"), at("202610161000")));
        assert!(window.overlaps(at("20261016095955"), at("20261016100005")));
        assert!(window.overlaps(at("202610161029"), at("202610161030")));
        assert!(!window.overlaps(at("202610161030"), at("202610161031")));
    }
}
