// EXIF metadata access for local image files
//
// Reads the capture time (DateTimeOriginal, plus OffsetTimeOriginal when the
// camera recorded one) and writes or clears the GPS IFD. Coordinates are
// encoded as the standard degrees/minutes/seconds unsigned rationals with
// 5-decimal second precision.

use std::path::Path;

use chrono::{Duration, FixedOffset, NaiveDateTime};
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use little_exif::rational::uR64;

use crate::errors::{Error, Result};
use crate::locate::Position;
use crate::timeshift::CaptureTime;

/// EXIF datetime fields carry no zone designator, only this layout.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Denominator for the seconds rational: five decimal places, roughly 0.3 mm
/// of latitude, well below GPS accuracy.
const SECONDS_DENOMINATOR: u32 = 100_000;

/// Image containers the metadata library can rewrite in place.
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "heif"];

/// Read the capture time from a photo's embedded metadata.
pub fn read_capture_time(path: &Path) -> Result<CaptureTime> {
    let metadata = load_metadata(path)?;

    let mut datetime: Option<String> = None;
    let mut offset: Option<String> = None;
    for tag in &metadata {
        match tag {
            ExifTag::DateTimeOriginal(s) => datetime = Some(clean_string(s)),
            ExifTag::OffsetTimeOriginal(s) => offset = Some(clean_string(s)),
            _ => {}
        }
    }

    let datetime =
        datetime.ok_or_else(|| Error::MissingCaptureTime(path.display().to_string()))?;
    let naive = NaiveDateTime::parse_from_str(&datetime, EXIF_DATETIME_FORMAT).map_err(|_| {
        Error::Metadata {
            path: path.display().to_string(),
            message: format!("unparseable DateTimeOriginal '{}'", datetime),
        }
    })?;

    Ok(CaptureTime {
        naive,
        offset: offset.as_deref().and_then(parse_exif_offset),
    })
}

/// Write a position into the photo's GPS IFD, replacing any existing one.
pub fn write_position(path: &Path, position: Position) -> Result<()> {
    let mut metadata = load_metadata(path)?;

    let (lat_ref, lat_dms) = to_dms(position.lat, "N", "S");
    let (lon_ref, lon_dms) = to_dms(position.lon, "E", "W");

    metadata.set_tag(ExifTag::GPSLatitudeRef(lat_ref.to_string()));
    metadata.set_tag(ExifTag::GPSLatitude(lat_dms));
    metadata.set_tag(ExifTag::GPSLongitudeRef(lon_ref.to_string()));
    metadata.set_tag(ExifTag::GPSLongitude(lon_dms));

    save_metadata(&metadata, path)
}

/// Remove any position from the photo's GPS IFD.
pub fn clear_position(path: &Path) -> Result<()> {
    let mut metadata = load_metadata(path)?;

    metadata.remove_tag(ExifTag::GPSLatitudeRef(String::new()));
    metadata.remove_tag(ExifTag::GPSLatitude(Vec::new()));
    metadata.remove_tag(ExifTag::GPSLongitudeRef(String::new()));
    metadata.remove_tag(ExifTag::GPSLongitude(Vec::new()));

    save_metadata(&metadata, path)
}

/// Shift the stored capture time by `delta`, rewriting DateTimeOriginal.
pub fn shift_capture_time(path: &Path, delta: Duration) -> Result<()> {
    let capture = read_capture_time(path)?;
    let shifted = capture.naive + delta;

    let mut metadata = load_metadata(path)?;
    metadata.set_tag(ExifTag::DateTimeOriginal(
        shifted.format(EXIF_DATETIME_FORMAT).to_string(),
    ));
    save_metadata(&metadata, path)
}

fn load_metadata(path: &Path) -> Result<Metadata> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::UnsupportedFormat(path.display().to_string()));
    }

    Metadata::new_from_path(path).map_err(|e| Error::Metadata {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn save_metadata(metadata: &Metadata, path: &Path) -> Result<()> {
    metadata.write_to_file(path).map_err(|e| Error::Metadata {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Convert decimal degrees into a hemisphere reference and DMS rationals.
///
/// Degrees and minutes are exact integers; seconds keep five decimals via
/// the rational denominator.
pub fn to_dms(value: f64, positive_ref: &'static str, negative_ref: &'static str)
    -> (&'static str, Vec<uR64>)
{
    let reference = if value >= 0.0 { positive_ref } else { negative_ref };
    let value = value.abs();

    let degrees = value.trunc();
    let minutes_full = (value - degrees) * 60.0;
    let minutes = minutes_full.trunc();
    let seconds = (minutes_full - minutes) * 60.0;
    let seconds_numerator = (seconds * f64::from(SECONDS_DENOMINATOR)).round() as u32;

    let dms = vec![
        uR64 {
            nominator: degrees as u32,
            denominator: 1,
        },
        uR64 {
            nominator: minutes as u32,
            denominator: 1,
        },
        uR64 {
            nominator: seconds_numerator,
            denominator: SECONDS_DENOMINATOR,
        },
    ];
    (reference, dms)
}

/// Convert DMS rationals back to signed decimal degrees.
pub fn from_dms(reference: &str, dms: &[uR64]) -> Option<f64> {
    if dms.len() < 3 {
        return None;
    }
    let component = |r: &uR64| f64::from(r.nominator) / f64::from(r.denominator);
    let value = component(&dms[0]) + component(&dms[1]) / 60.0 + component(&dms[2]) / 3600.0;
    match reference {
        "S" | "W" => Some(-value),
        _ => Some(value),
    }
}

/// Parse an EXIF offset string like `+02:00` or `-05:30`.
fn parse_exif_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => (1, s),
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn clean_string(s: &str) -> String {
    s.trim_end_matches('\0').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Round-trip error bound: half a least-significant second digit, in degrees.
    const PRECISION: f64 = 0.5 / (SECONDS_DENOMINATOR as f64) / 3600.0;

    #[test]
    fn test_to_dms_known_value() {
        let (reference, dms) = to_dms(48.858844, "N", "S");
        assert_eq!(reference, "N");
        assert_eq!(dms[0].nominator, 48);
        assert_eq!(dms[1].nominator, 51);
        // 0.858844 deg = 51.53064 min -> 31.8384 s
        assert_eq!(dms[2].nominator, 3_183_840);
        assert_eq!(dms[2].denominator, SECONDS_DENOMINATOR);
    }

    #[test]
    fn test_hemisphere_references() {
        assert_eq!(to_dms(10.5, "N", "S").0, "N");
        assert_eq!(to_dms(-10.5, "N", "S").0, "S");
        assert_eq!(to_dms(2.35, "E", "W").0, "E");
        assert_eq!(to_dms(-122.42, "E", "W").0, "W");
        assert_eq!(to_dms(0.0, "N", "S").0, "N");
    }

    #[test]
    fn test_dms_round_trip() {
        for value in [0.0, 10.1, -48.858844, 179.999999, -0.00001, 45.5] {
            let (reference, dms) = to_dms(value, "N", "S");
            let back = from_dms(reference, &dms).unwrap();
            assert!(
                (back - value).abs() < PRECISION,
                "round trip of {} gave {}",
                value,
                back
            );
        }
    }

    #[test]
    fn test_parse_exif_offset() {
        assert_eq!(
            parse_exif_offset("+02:00"),
            FixedOffset::east_opt(2 * 3600)
        );
        assert_eq!(
            parse_exif_offset("-05:30"),
            FixedOffset::east_opt(-(5 * 3600 + 30 * 60))
        );
        assert_eq!(parse_exif_offset("junk"), None);
    }

    #[test]
    fn test_exif_datetime_format() {
        let naive =
            NaiveDateTime::parse_from_str("2021:10:10 12:00:00", EXIF_DATETIME_FORMAT).unwrap();
        assert_eq!(
            naive.format(EXIF_DATETIME_FORMAT).to_string(),
            "2021:10:10 12:00:00"
        );
    }

    #[test]
    fn test_unsupported_extension() {
        let err = read_capture_time(Path::new("/tmp/document.txt")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
