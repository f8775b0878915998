// Time correction pipeline
//
// Parses human-readable time-shift expressions, resolves timezone components
// (named zones or raw offsets) and applies the resulting constant shift to a
// photo's raw capture time before lookup. The shift is decided once per run,
// never per photo.

use std::str::FromStr;

use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::errors::{Error, Result};

/// Signed duration expression: any subset of hour/minute/second components.
static DELTA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<negative>-)?(?:(?P<hours>\d+)h)?(?:(?P<minutes>\d+)m)?(?:(?P<seconds>\d+)s)?$")
        .unwrap()
});

/// Dummy date used to anchor time-only operands of a `ref-observed`
/// expression; both sides get the same date so only the time difference
/// survives.
const DUMMY_DATE: (i32, u32, u32) = (2021, 10, 10);

/// Raw capture time of one photo: the naive datetime from the metadata and
/// the UTC offset, if one was recorded alongside it. Ephemeral, derived per
/// photo, consumed by `correct`.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTime {
    pub naive: NaiveDateTime,
    pub offset: Option<FixedOffset>,
}

/// Total clock shift for one run, split into a drift component (camera clock
/// vs GPS clock) and an optional timezone component.
#[derive(Debug, Clone, Copy)]
pub struct TimeShift {
    /// Camera clock drift relative to the GPS recorder
    pub drift: Duration,
    /// Shift compensating for a local-time capture clock, if configured
    pub timezone: Option<Duration>,
}

impl TimeShift {
    /// Resolve the run-wide shift from configuration.
    ///
    /// `deltas` are summed into the drift component. The timezone component
    /// comes from `tz` (a named zone, `auto` for the local one) or from
    /// `delta_tz` (a raw duration expression); `tz` resolution is DST-aware
    /// and anchored at the track's start instant.
    pub fn resolve(
        deltas: &[String],
        delta_tz: Option<&str>,
        tz: Option<&str>,
        track_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<TimeShift> {
        info!("Parsing time shift...");
        let drift = process_delta(deltas)?;
        log_delta(drift, "Time");

        let timezone = if let Some(name) = tz {
            let anchor = track_range.map(|(start, _)| start).unwrap_or_else(Utc::now);
            let shift = zone_shift(name, anchor)?;
            if let Some((_, end)) = track_range {
                let at_end = zone_shift(name, end)?;
                if at_end != shift {
                    warn!(
                        "Timezone {} changes offset between track start and end (DST); \
                         using the offset at track start",
                        name
                    );
                }
            }
            Some(shift)
        } else if let Some(expr) = delta_tz {
            Some(parse_timedelta(expr)?)
        } else {
            None
        };

        if let Some(tz_shift) = timezone {
            log_delta(tz_shift, "TZ time");
            log_delta(drift + tz_shift, "Total time");
        }

        Ok(TimeShift { drift, timezone })
    }

    /// The full shift applied to every photo time.
    pub fn total(&self) -> Duration {
        self.drift + self.timezone.unwrap_or_else(Duration::zero)
    }
}

/// Convert a photo's raw capture time to an absolute, shifted instant.
///
/// An embedded UTC offset is honoured unless `ignore_offset` is set;
/// otherwise the raw time is assumed to already be UTC. The caller is
/// responsible for warning about that assumption (once per batch, not here).
pub fn correct(capture: &CaptureTime, ignore_offset: bool, shift: Duration) -> DateTime<Utc> {
    let instant = match capture.offset {
        Some(off) if !ignore_offset => match off.from_local_datetime(&capture.naive) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
            LocalResult::None => Utc.from_utc_datetime(&capture.naive),
        },
        _ => Utc.from_utc_datetime(&capture.naive),
    };
    instant + shift
}

/// Parse a time-shift expression.
///
/// Two forms are accepted:
/// - a signed duration like `1h2m3s`, `-30s` or `2h` (any subset of
///   components);
/// - `ref-observed`, the difference between two instants, each an RFC 3339
///   datetime, a naive `YYYY-MM-DDTHH:MM:SS` datetime (space separator also
///   accepted) or a bare `HH:MM:SS` time.
pub fn parse_timedelta(expr: &str) -> Result<Duration> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::BadDelta(expr.to_string()));
    }

    // "ref-observed" form: a minus that is not a leading sign. The operands
    // may themselves contain dashes (dates), so try every split position and
    // take the first where both sides parse as instants.
    if expr.contains('-') && !expr.starts_with('-') {
        for (idx, _) in expr.match_indices('-') {
            let (lhs, rhs) = (&expr[..idx], &expr[idx + 1..]);
            if let (Some(reference), Some(observed)) =
                (parse_instant(lhs.trim()), parse_instant(rhs.trim()))
            {
                return Ok(reference - observed);
            }
        }
        return Err(Error::BadDelta(expr.to_string()));
    }

    let caps = DELTA_RE
        .captures(expr)
        .ok_or_else(|| Error::BadDelta(expr.to_string()))?;
    let sign = if caps.name("negative").is_some() { -1 } else { 1 };

    let mut any = false;
    let mut total = Duration::zero();
    for (name, unit) in [
        ("hours", Duration::hours(1)),
        ("minutes", Duration::minutes(1)),
        ("seconds", Duration::seconds(1)),
    ] {
        if let Some(m) = caps.name(name) {
            let value: i64 = m
                .as_str()
                .parse()
                .map_err(|_| Error::BadDelta(expr.to_string()))?;
            total = total + unit * (value as i32);
            any = true;
        }
    }
    if !any {
        return Err(Error::BadDelta(expr.to_string()));
    }

    Ok(total * sign)
}

/// Parse one operand of a `ref-observed` expression into an absolute instant.
fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
        let (y, m, d) = DUMMY_DATE;
        let date = NaiveDate::from_ymd_opt(y, m, d)?;
        return Some(Utc.from_utc_datetime(&date.and_time(time)));
    }
    None
}

/// Sum multiple shift expressions; no expressions means no shift.
pub fn process_delta(deltas: &[String]) -> Result<Duration> {
    let mut total = Duration::zero();
    for expr in deltas {
        total = total + parse_timedelta(expr)?;
    }
    Ok(total)
}

/// Parse the tolerance; the sign is ignored, a window is never negative.
pub fn process_tolerance(expr: &str) -> Result<Duration> {
    info!("Parsing tolerance...");
    let parsed = parse_timedelta(expr)?;
    let tolerance = if parsed < Duration::zero() { -parsed } else { parsed };
    info!("Tolerance: {}s", tolerance.num_seconds());
    Ok(tolerance)
}

/// Shift turning a wall-clock time in `name` into UTC at the given instant:
/// the zone's UTC offset, negated. `auto` resolves the machine's local zone.
pub fn zone_shift(name: &str, at: DateTime<Utc>) -> Result<Duration> {
    let offset_seconds = if name == "auto" {
        chrono::Local
            .offset_from_utc_datetime(&at.naive_utc())
            .fix()
            .local_minus_utc()
    } else {
        let tz = Tz::from_str(name).map_err(|_| Error::UnknownTimezone(name.to_string()))?;
        tz.offset_from_utc_datetime(&at.naive_utc())
            .fix()
            .local_minus_utc()
    };
    Ok(Duration::seconds(-i64::from(offset_seconds)))
}

/// Render a duration in the same `1h2m3s` form the parser accepts.
pub fn format_timedelta(delta: Duration) -> String {
    if delta < Duration::zero() {
        return format!("-{}", format_timedelta(-delta));
    }
    let total = delta.num_seconds();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}h{}m{}s", hours, minutes, seconds)
}

fn log_delta(delta: Duration, label: &str) {
    info!("{} shift: {}", label, format_timedelta(delta));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_full_expression() {
        assert_eq!(
            parse_timedelta("1h2m3s").unwrap(),
            Duration::seconds(3723)
        );
    }

    #[test]
    fn test_parse_partial_expressions() {
        assert_eq!(parse_timedelta("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_timedelta("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_timedelta("90m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_timedelta("1h30m").unwrap(), Duration::minutes(90));
    }

    #[test]
    fn test_parse_negative() {
        assert_eq!(parse_timedelta("-10s").unwrap(), Duration::seconds(-10));
        assert_eq!(parse_timedelta("-1h30m").unwrap(), Duration::minutes(-90));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_timedelta("").is_err());
        assert!(parse_timedelta("abc").is_err());
        assert!(parse_timedelta("10x").is_err());
    }

    #[test]
    fn test_parse_time_difference() {
        // reference minus observed: camera 30 minutes behind the clock
        assert_eq!(
            parse_timedelta("10:00:00-09:30:00").unwrap(),
            Duration::minutes(30)
        );
        // observed ahead of reference gives a negative shift
        assert_eq!(
            parse_timedelta("09:30:00-10:00:00").unwrap(),
            Duration::minutes(-30)
        );
    }

    #[test]
    fn test_parse_datetime_difference() {
        assert_eq!(
            parse_timedelta("2021-10-11T00:30:00 - 2021-10-10 23:30:00").unwrap(),
            Duration::hours(1)
        );
    }

    fn capture(offset: Option<FixedOffset>) -> CaptureTime {
        CaptureTime {
            naive: utc(2021, 10, 10, 12, 0, 0).naive_utc(),
            offset,
        }
    }

    #[test]
    fn test_shift_applied_to_capture_time() {
        // The reference scenario: -1h30m applied to 12:00:00Z.
        let shift = parse_timedelta("-1h30m").unwrap();
        let corrected = correct(&capture(None), false, shift);
        assert_eq!(corrected, utc(2021, 10, 10, 10, 30, 0));
    }

    #[test]
    fn test_correct_honours_embedded_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let corrected = correct(&capture(Some(offset)), false, Duration::zero());
        assert_eq!(corrected, utc(2021, 10, 10, 10, 0, 0));
    }

    #[test]
    fn test_correct_can_ignore_embedded_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let corrected = correct(&capture(Some(offset)), true, Duration::zero());
        assert_eq!(corrected, utc(2021, 10, 10, 12, 0, 0));
    }

    #[test]
    fn test_process_delta_sums() {
        let deltas = vec!["1h".to_string(), "-15m".to_string()];
        assert_eq!(process_delta(&deltas).unwrap(), Duration::minutes(45));
        assert_eq!(process_delta(&[]).unwrap(), Duration::zero());
    }

    #[test]
    fn test_tolerance_sign_is_dropped() {
        assert_eq!(process_tolerance("-30s").unwrap(), Duration::seconds(30));
        assert_eq!(process_tolerance("10s").unwrap(), Duration::seconds(10));
    }

    #[test]
    fn test_zone_shift_negates_utc_offset() {
        // Paris is UTC+2 on this date, so local wall-clock times must be
        // shifted back by two hours to reach UTC.
        let at = utc(2021, 10, 10, 12, 0, 0);
        assert_eq!(
            zone_shift("Europe/Paris", at).unwrap(),
            Duration::hours(-2)
        );
        // and UTC+1 after the DST switch
        let winter = utc(2021, 12, 10, 12, 0, 0);
        assert_eq!(
            zone_shift("Europe/Paris", winter).unwrap(),
            Duration::hours(-1)
        );
    }

    #[test]
    fn test_zone_shift_unknown_zone() {
        let at = utc(2021, 10, 10, 12, 0, 0);
        assert!(matches!(
            zone_shift("Mars/Olympus", at),
            Err(Error::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_format_timedelta() {
        assert_eq!(format_timedelta(Duration::seconds(3723)), "1h2m3s");
        assert_eq!(format_timedelta(Duration::minutes(-90)), "-1h30m0s");
        assert_eq!(format_timedelta(Duration::zero()), "0h0m0s");
    }

    #[test]
    fn test_format_parse_round_trip() {
        for expr in ["1h2m3s", "0h45m0s", "12h0m1s"] {
            let parsed = parse_timedelta(expr).unwrap();
            assert_eq!(format_timedelta(parsed), expr);
        }
    }

    #[test]
    fn test_timeshift_total() {
        let shift = TimeShift {
            drift: Duration::minutes(5),
            timezone: Some(Duration::hours(-2)),
        };
        assert_eq!(shift.total(), Duration::minutes(-115));
    }
}
