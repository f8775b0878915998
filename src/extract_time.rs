// Clock-photograph time-delta estimation
//
// Photographing a clock that shows the reference time (a GPS unit, a train
// station clock) gives a way to measure the camera's clock drift: OCR the
// clock reading out of the photo, pick the most plausible date for it, and
// print the difference to the EXIF capture time as a ready-to-use --delta
// expression.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::exif;
use crate::timeshift::format_timedelta;

const VISION_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

/// A clock reading: hours, minutes, seconds separated by colons.
static TIME_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+:[0-9]+:[0-9]+$").unwrap());

/// Output options for the estimator.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Print only the delta, not the absolute clock instant
    pub time_diff_only: bool,
    /// Print both the AM and PM interpretation instead of picking one
    pub both_am_pm: bool,
}

/// Estimate the camera clock delta from a photographed clock.
pub fn extract_time(photo: &Path, api_key: &str, options: &ExtractOptions) -> Result<()> {
    let capture = exif::read_capture_time(photo)?;
    let exif_time = capture.naive;

    info!("Extracting time from photo with Vision API...");
    let annotations = annotate_photo(photo, api_key)?;
    info!("Done");

    let readings = clock_readings(&annotations);
    let Some(reading) = readings.first() else {
        return Err(Error::Api(format!(
            "no clock time found in {}",
            photo.display()
        )));
    };
    info!("Found time: {}", reading);

    let clock_time = NaiveTime::parse_from_str(reading, "%H:%M:%S")
        .map_err(|_| Error::Api(format!("unparseable clock time '{}'", reading)))?;

    // A clock face cannot tell AM from PM; consider both readings.
    let alternate = opposite_half_day(clock_time);
    if options.both_am_pm {
        report(clock_time, exif_time, options);
        report(alternate, exif_time, options);
    } else {
        let primary = anchor(clock_time, exif_time);
        let secondary = anchor(alternate, exif_time);
        let closer = if distance(primary, exif_time) <= distance(secondary, exif_time) {
            clock_time
        } else {
            alternate
        };
        report(closer, exif_time, options);
    }

    Ok(())
}

/// Run the Vision text-detection call and return the text annotations.
fn annotate_photo(photo: &Path, api_key: &str) -> Result<Value> {
    let content = BASE64.encode(fs::read(photo)?);
    let request = json!({
        "requests": [{
            "image": { "content": content },
            "features": [{ "type": "TEXT_DETECTION" }],
            "imageContext": { "languageHints": ["en"] },
        }]
    });

    let response: Value = Client::new()
        .post(VISION_URL)
        .query(&[("key", api_key)])
        .json(&request)
        .send()?
        .error_for_status()?
        .json()?;

    let payload = &response["responses"][0];
    if let Some(message) = payload["error"]["message"].as_str() {
        return Err(Error::Api(format!("Vision API: {}", message)));
    }
    Ok(payload["textAnnotations"].clone())
}

/// Filter the OCR output down to clock-looking tokens.
fn clock_readings(annotations: &Value) -> Vec<String> {
    let Some(entries) = annotations.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| entry["description"].as_str())
        .inspect(|text| debug!("Found \"{}\"", text))
        .filter(|text| TIME_TOKEN_RE.is_match(text))
        .map(|text| text.to_string())
        .collect()
}

/// The same wall-clock reading twelve hours away.
fn opposite_half_day(time: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    time.with_hour((time.hour() + 12) % 24).unwrap_or(time)
}

/// Combine the clock reading with its most likely date (relative to the EXIF
/// instant).
fn anchor(time: NaiveTime, reference: NaiveDateTime) -> NaiveDateTime {
    find_most_likely_date(reference, time).and_time(time)
}

/// Pick the calendar day (reference day or its neighbours) that brings
/// `target` closest to the reference instant. A clock photographed shortly
/// after midnight may well belong to yesterday's date.
pub fn find_most_likely_date(reference: NaiveDateTime, target: NaiveTime) -> NaiveDate {
    let mut best_date = reference.date();
    let mut best_distance = distance(best_date.and_time(target), reference);
    for day_delta in [-1i64, 1] {
        let candidate = offset_date(reference.date(), day_delta);
        let candidate_distance = distance(candidate.and_time(target), reference);
        if candidate_distance < best_distance {
            best_distance = candidate_distance;
            best_date = candidate;
        }
    }
    best_date
}

fn offset_date(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(chrono::Duration::days(days))
        .unwrap_or(date)
}

fn distance(a: NaiveDateTime, b: NaiveDateTime) -> chrono::Duration {
    let diff = a - b;
    if diff < chrono::Duration::zero() {
        -diff
    } else {
        diff
    }
}

fn report(time: NaiveTime, exif_time: NaiveDateTime, options: &ExtractOptions) {
    let instant = anchor(time, exif_time);
    let delta = instant - exif_time;
    if options.time_diff_only {
        println!("Delta: {}", format_timedelta(delta));
    } else {
        println!(
            "Date: {}Z Delta: {}",
            instant.format("%Y-%m-%dT%H:%M:%S"),
            format_timedelta(delta)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_most_likely_date_same_day() {
        let reference = naive(2021, 10, 10, 14, 0, 0);
        assert_eq!(
            find_most_likely_date(reference, time(14, 5, 30)),
            NaiveDate::from_ymd_opt(2021, 10, 10).unwrap()
        );
    }

    #[test]
    fn test_most_likely_date_across_midnight_backwards() {
        // Shortly after midnight, a clock showing 23:58 belongs to yesterday.
        let reference = naive(2021, 10, 11, 0, 2, 0);
        assert_eq!(
            find_most_likely_date(reference, time(23, 58, 0)),
            NaiveDate::from_ymd_opt(2021, 10, 10).unwrap()
        );
    }

    #[test]
    fn test_most_likely_date_across_midnight_forwards() {
        // Shortly before midnight, a clock showing 00:01 belongs to tomorrow.
        let reference = naive(2021, 10, 10, 23, 59, 0);
        assert_eq!(
            find_most_likely_date(reference, time(0, 1, 0)),
            NaiveDate::from_ymd_opt(2021, 10, 11).unwrap()
        );
    }

    #[test]
    fn test_clock_readings_filters_tokens() {
        let annotations: Value = serde_json::from_str(
            r#"[
                {"description": "SEIKO"},
                {"description": "12:34:56"},
                {"description": "12:34"},
                {"description": "temperature 23"},
                {"description": "7:05:09"}
            ]"#,
        )
        .unwrap();
        assert_eq!(clock_readings(&annotations), vec!["12:34:56", "7:05:09"]);
    }

    #[test]
    fn test_clock_readings_empty_response() {
        assert!(clock_readings(&Value::Null).is_empty());
    }

    #[test]
    fn test_opposite_half_day() {
        assert_eq!(opposite_half_day(time(7, 30, 0)), time(19, 30, 0));
        assert_eq!(opposite_half_day(time(19, 30, 0)), time(7, 30, 0));
    }

    #[test]
    fn test_anchor_delta_matches_drift() {
        // Camera 90 seconds behind the photographed clock.
        let exif_time = naive(2021, 10, 10, 10, 0, 0);
        let instant = anchor(time(10, 1, 30), exif_time);
        assert_eq!(instant - exif_time, chrono::Duration::seconds(90));
    }
}
