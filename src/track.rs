// Track model - time-indexed GPS track segments
//
// Built once per run from a GPX file and read-only afterwards, so it can be
// consulted for every photo without synchronization.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};

/// One GPS fix: a timestamp and a coordinate in floating-point degrees.
///
/// Timestamps are normalized to UTC at construction so that comparisons
/// between differently-offset sources are always absolute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    /// Time of the fix
    pub time: DateTime<Utc>,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
}

impl TrackPoint {
    pub fn new(time: DateTime<Utc>, lat: f64, lon: f64) -> Self {
        TrackPoint { time, lat, lon }
    }
}

/// A contiguous run of track points from one continuous recording.
///
/// Points are sorted by timestamp (an invariant the lookup relies on for
/// binary search) and never mutated after construction.
#[derive(Debug, Clone)]
pub struct TrackSegment {
    points: Vec<TrackPoint>,
}

impl TrackSegment {
    /// Build a segment, enforcing the sorted-by-time invariant.
    ///
    /// GPS devices record points in time order, but the format does not
    /// guarantee it. If the input is out of order the points are stable-sorted
    /// and the caller is expected to have been warned (see `from_gpx_file`).
    pub fn new(mut points: Vec<TrackPoint>) -> Self {
        if !is_sorted_by_time(&points) {
            points.sort_by_key(|p| p.time);
        }
        TrackSegment { points }
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First point of the segment. Panics on an empty segment, which the
    /// loader never produces.
    pub fn first(&self) -> &TrackPoint {
        &self.points[0]
    }

    pub fn last(&self) -> &TrackPoint {
        &self.points[self.points.len() - 1]
    }
}

/// The full ordered collection of segments from one track file.
///
/// Segment order is the order of appearance in the source; the lookup's
/// "search next segment" fallback depends on it.
#[derive(Debug, Clone)]
pub struct TrackModel {
    segments: Vec<TrackSegment>,
}

impl TrackModel {
    pub fn new(segments: Vec<TrackSegment>) -> Self {
        TrackModel {
            segments: segments.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    /// Parse a GPX file into a track model.
    ///
    /// Tracks and segments are flattened in file order. Points without a
    /// timestamp cannot be used for time lookup and are dropped. A segment
    /// whose points are out of time order is sorted with a warning.
    pub fn from_gpx_file(path: &Path) -> Result<TrackModel> {
        let file = File::open(path).map_err(|e| Error::GpxParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let gpx = gpx::read(BufReader::new(file)).map_err(|e| Error::GpxParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut segments = Vec::new();
        let mut dropped = 0usize;
        for track in gpx.tracks {
            for segment in track.segments {
                let mut points = Vec::with_capacity(segment.points.len());
                for waypoint in segment.points {
                    let Some(time) = waypoint.time else {
                        dropped += 1;
                        continue;
                    };
                    let iso = time.format().map_err(|e| Error::GpxParse {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                    let time: DateTime<Utc> =
                        iso.parse().map_err(|e: chrono::ParseError| Error::GpxParse {
                            path: path.to_path_buf(),
                            message: e.to_string(),
                        })?;
                    let point = waypoint.point();
                    points.push(TrackPoint::new(time, point.y(), point.x()));
                }
                if points.is_empty() {
                    continue;
                }
                if !is_sorted_by_time(&points) {
                    warn!(
                        "Track points out of time order in {}; sorting them",
                        path.display()
                    );
                }
                segments.push(TrackSegment::new(points));
            }
        }
        if dropped > 0 {
            debug!("Dropped {} track point(s) without a timestamp", dropped);
        }

        Ok(TrackModel::new(segments))
    }

    pub fn segments(&self) -> &[TrackSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Time of the first point of the first segment.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.segments.first().map(|s| s.first().time)
    }

    /// Time of the last point of the last segment.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.segments.last().map(|s| s.last().time)
    }
}

/// Parse a GPX file and log its overall time range.
pub fn load_model(path: &Path) -> Result<TrackModel> {
    info!("Parsing GPX...");
    let model = TrackModel::from_gpx_file(path)?;
    match (model.start_time(), model.end_time()) {
        (Some(start), Some(end)) => {
            info!("GPX time range: {} => {}", start, end);
        }
        _ => warn!("GPX file contains no usable track points"),
    }
    Ok(model)
}

fn is_sorted_by_time(points: &[TrackPoint]) -> bool {
    points.windows(2).all(|w| w[0].time <= w[1].time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 10, 10, h, m, s).unwrap()
    }

    const SAMPLE_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Morning ride</name>
    <trkseg>
      <trkpt lat="10.0" lon="20.0"><ele>12.0</ele><time>2021-10-10T10:00:00Z</time></trkpt>
      <trkpt lat="10.2" lon="20.2"><time>2021-10-10T10:10:00Z</time></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="11.0" lon="21.0"><time>2021-10-10T11:00:00Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    fn write_temp_gpx(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_gpx_file_segments() {
        let file = write_temp_gpx(SAMPLE_GPX);
        let model = TrackModel::from_gpx_file(file.path()).unwrap();

        assert_eq!(model.segments().len(), 2);
        let first = &model.segments()[0];
        assert_eq!(first.points().len(), 2);
        assert_eq!(first.first().time, utc(10, 0, 0));
        assert_eq!(first.first().lat, 10.0);
        assert_eq!(first.first().lon, 20.0);
        assert_eq!(model.start_time(), Some(utc(10, 0, 0)));
        assert_eq!(model.end_time(), Some(utc(11, 0, 0)));
    }

    #[test]
    fn test_from_gpx_file_malformed() {
        let file = write_temp_gpx("not a gpx document");
        let err = TrackModel::from_gpx_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::GpxParse { .. }));
    }

    #[test]
    fn test_points_without_time_are_dropped() {
        let gpx = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="10.0" lon="20.0"></trkpt>
    <trkpt lat="10.1" lon="20.1"><time>2021-10-10T10:05:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let file = write_temp_gpx(gpx);
        let model = TrackModel::from_gpx_file(file.path()).unwrap();
        assert_eq!(model.segments().len(), 1);
        assert_eq!(model.segments()[0].points().len(), 1);
    }

    #[test]
    fn test_unsorted_points_are_sorted() {
        let points = vec![
            TrackPoint::new(utc(10, 10, 0), 10.2, 20.2),
            TrackPoint::new(utc(10, 0, 0), 10.0, 20.0),
        ];
        let segment = TrackSegment::new(points);
        assert_eq!(segment.first().time, utc(10, 0, 0));
        assert_eq!(segment.last().time, utc(10, 10, 0));
    }

    #[test]
    fn test_empty_segments_filtered() {
        let model = TrackModel::new(vec![TrackSegment::new(Vec::new())]);
        assert!(model.is_empty());
        assert_eq!(model.start_time(), None);
    }
}
