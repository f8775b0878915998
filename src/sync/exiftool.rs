// Local-file adapter backed by the external exiftool binary
//
// Useful for containers the embedded-metadata library cannot rewrite (RAW
// formats in particular). Positions are still computed by the engine; only
// the read/write mechanism differs. Each invocation operates on a single
// file so one failing photo never poisons the rest of the batch.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{Duration, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::exif::EXIF_DATETIME_FORMAT;
use crate::kml::Placemark;
use crate::locate::Position;
use crate::sync::{list_photo_files, SyncAdapter};
use crate::timeshift::CaptureTime;

const TOOL: &str = "exiftool";

/// Drives exiftool, one process per photo operation.
pub struct ExiftoolSync {
    root: PathBuf,
}

impl ExiftoolSync {
    pub fn new(root: &Path) -> Self {
        ExiftoolSync {
            root: root.to_path_buf(),
        }
    }

    /// Run exiftool with the given arguments and return stdout.
    fn run(&self, args: &[String]) -> Result<String> {
        debug!("{} {}", TOOL, args.join(" "));
        let output = Command::new(TOOL).args(args).output()?;
        if !output.status.success() {
            return Err(Error::ExternalTool {
                tool: TOOL,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl SyncAdapter for ExiftoolSync {
    type Photo = PathBuf;

    fn photos(&mut self) -> Result<Vec<PathBuf>> {
        list_photo_files(&self.root)
    }

    fn describe(&self, photo: &PathBuf) -> String {
        photo.display().to_string()
    }

    fn capture_time(&mut self, photo: &PathBuf) -> Result<CaptureTime> {
        let stdout = self.run(&[
            "-j".to_string(),
            "-DateTimeOriginal".to_string(),
            "-OffsetTimeOriginal".to_string(),
            photo.display().to_string(),
        ])?;
        let parsed: Value = serde_json::from_str(&stdout).map_err(|e| Error::Metadata {
            path: photo.display().to_string(),
            message: format!("unexpected exiftool output: {}", e),
        })?;
        let record = &parsed[0];

        let Some(datetime) = record["DateTimeOriginal"].as_str() else {
            return Err(Error::MissingCaptureTime(photo.display().to_string()));
        };
        let naive =
            NaiveDateTime::parse_from_str(datetime, EXIF_DATETIME_FORMAT).map_err(|_| {
                Error::Metadata {
                    path: photo.display().to_string(),
                    message: format!("unparseable DateTimeOriginal '{}'", datetime),
                }
            })?;
        let offset = record["OffsetTimeOriginal"]
            .as_str()
            .and_then(|s| format!("2000-01-01T00:00:00{}", s).parse::<chrono::DateTime<chrono::FixedOffset>>().ok())
            .map(|dt| *dt.offset());

        Ok(CaptureTime { naive, offset })
    }

    fn write_position(&mut self, photo: &PathBuf, position: Position) -> Result<()> {
        let lat_ref = if position.lat >= 0.0 { "N" } else { "S" };
        let lon_ref = if position.lon >= 0.0 { "E" } else { "W" };
        self.run(&[
            format!("-GPSLatitude={}", position.lat.abs()),
            format!("-GPSLatitudeRef={}", lat_ref),
            format!("-GPSLongitude={}", position.lon.abs()),
            format!("-GPSLongitudeRef={}", lon_ref),
            "-overwrite_original".to_string(),
            photo.display().to_string(),
        ])?;
        Ok(())
    }

    fn clear_position(&mut self, photo: &PathBuf) -> Result<()> {
        self.run(&[
            "-GPSLatitude=".to_string(),
            "-GPSLatitudeRef=".to_string(),
            "-GPSLongitude=".to_string(),
            "-GPSLongitudeRef=".to_string(),
            "-overwrite_original".to_string(),
            photo.display().to_string(),
        ])?;
        Ok(())
    }

    fn shift_capture_time(&mut self, photo: &PathBuf, delta: Duration) -> Result<()> {
        self.run(&[
            format!("-DateTimeOriginal+={}", shift_argument(delta)),
            "-overwrite_original".to_string(),
            photo.display().to_string(),
        ])?;
        Ok(())
    }

    fn placemark(&self, photo: &PathBuf) -> Placemark {
        Placemark {
            name: photo
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| photo.display().to_string()),
            image_src: photo.display().to_string(),
            image_style: None,
        }
    }
}

/// Render a duration in exiftool's shift syntax: `[-]0:0:0 H:M:S`.
fn shift_argument(delta: Duration) -> String {
    let total = delta.num_seconds();
    let sign = if total < 0 { "-" } else { "+" };
    let total = total.abs();
    format!(
        "{}0:0:0 {}:{}:{}",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_argument_positive() {
        assert_eq!(shift_argument(Duration::seconds(3723)), "+0:0:0 1:2:3");
    }

    #[test]
    fn test_shift_argument_negative() {
        assert_eq!(shift_argument(Duration::minutes(-90)), "-0:0:0 1:30:0");
    }

    #[test]
    fn test_shift_argument_zero() {
        assert_eq!(shift_argument(Duration::zero()), "+0:0:0 0:0:0");
    }
}
