// Local-file adapter backed by the embedded-metadata library

use std::path::{Path, PathBuf};

use chrono::Duration;

use crate::errors::Result;
use crate::exif;
use crate::kml::Placemark;
use crate::locate::Position;
use crate::sync::{list_photo_files, SyncAdapter};
use crate::timeshift::CaptureTime;

/// Writes positions straight into each file's EXIF GPS IFD.
pub struct LocalSync {
    root: PathBuf,
}

impl LocalSync {
    pub fn new(root: &Path) -> Self {
        LocalSync {
            root: root.to_path_buf(),
        }
    }
}

impl SyncAdapter for LocalSync {
    type Photo = PathBuf;

    fn photos(&mut self) -> Result<Vec<PathBuf>> {
        list_photo_files(&self.root)
    }

    fn describe(&self, photo: &PathBuf) -> String {
        photo.display().to_string()
    }

    fn capture_time(&mut self, photo: &PathBuf) -> Result<CaptureTime> {
        exif::read_capture_time(photo)
    }

    fn write_position(&mut self, photo: &PathBuf, position: Position) -> Result<()> {
        exif::write_position(photo, position)
    }

    fn clear_position(&mut self, photo: &PathBuf) -> Result<()> {
        exif::clear_position(photo)
    }

    fn shift_capture_time(&mut self, photo: &PathBuf, delta: Duration) -> Result<()> {
        exif::shift_capture_time(photo, delta)
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
