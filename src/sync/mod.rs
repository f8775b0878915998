// Destination synchronization adapters
//
// One interface, three write-back mechanisms: local files through the
// metadata library, local files through the external exiftool binary, and
// the Flickr hosting service. The batch orchestrator is generic over this
// trait and never knows which one it is driving.

pub mod exiftool;
pub mod flickr;
pub mod local;

use std::path::{Path, PathBuf};

use chrono::Duration;

use crate::errors::Result;
use crate::kml::Placemark;
use crate::locate::Position;
use crate::timeshift::CaptureTime;

/// A destination that can read a photo's capture time and persist (or erase)
/// a computed position for it.
pub trait SyncAdapter {
    /// Reference to one photo at this destination (a path, a remote id, ...)
    type Photo;

    /// Enumerate the photos to process, in a stable deterministic order.
    fn photos(&mut self) -> Result<Vec<Self::Photo>>;

    /// Human-readable identification for log messages.
    fn describe(&self, photo: &Self::Photo) -> String;

    /// Read the photo's raw capture time and optional UTC offset.
    fn capture_time(&mut self, photo: &Self::Photo) -> Result<CaptureTime>;

    /// Persist a computed position to the photo.
    fn write_position(&mut self, photo: &Self::Photo, position: Position) -> Result<()>;

    /// Erase any existing position from the photo.
    fn clear_position(&mut self, photo: &Self::Photo) -> Result<()>;

    /// Shift the stored capture time. Destinations without a writable time
    /// field ignore this.
    fn shift_capture_time(&mut self, _photo: &Self::Photo, _delta: Duration) -> Result<()> {
        Ok(())
    }

    /// Placemark data for the KML output.
    fn placemark(&self, photo: &Self::Photo) -> Placemark;
}

/// Expand a file-or-directory path into the photo files to process.
///
/// Directories yield their plain files in lexicographic name order, hidden
/// files excluded; there is no recursion.
pub fn list_photo_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        if !entry_path.is_file() {
            continue;
        }
        let hidden = entry_path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if hidden {
            continue;
        }
        files.push(entry_path);
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_list_photo_files_sorted_without_hidden() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.jpg", ".hidden.jpg", "c.jpg"] {
            File::create(dir.path().join(name)).unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let files = list_photo_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn test_list_photo_files_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        File::create(&file).unwrap();
        assert_eq!(list_photo_files(&file).unwrap(), vec![file]);
    }
}
