// Position interpolation engine
//
// Maps a corrected photo timestamp to an estimated coordinate by searching
// the track model: exact timestamp hits, extrapolation within a tolerance
// window at segment boundaries, and linear interpolation between bracketing
// points. A miss is a normal result, not an error.

use chrono::{DateTime, Duration, Utc};

use crate::track::TrackModel;

/// A computed geographic position in floating-point degrees.
///
/// "No match" is represented by `Option::None` at the lookup boundary, never
/// by a zero coordinate - (0, 0) is a valid position in the Gulf of Guinea.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Position { lat, lon }
    }
}

/// Estimate the position at `query` from the track model.
///
/// Segments are searched in model order. Within a segment:
/// - an exact timestamp match returns that point's coordinates (the first
///   such point when the source contains duplicate timestamps);
/// - a query before the segment's first point returns the first point if the
///   gap is under `tolerance`, and otherwise ends the whole search: segments
///   are chronologically ordered, so no later segment can contain an earlier
///   instant;
/// - a query after the segment's last point returns the last point if the
///   gap is under `tolerance`, and otherwise moves on to the next segment,
///   since the query may fall inside a later segment's range (a paused and
///   resumed recording);
/// - a bracketed query interpolates linearly between the two neighbouring
///   points, proportionally to the elapsed time fraction.
///
/// # Arguments
/// * `query` - The corrected capture time, in UTC
/// * `model` - The track model built from the GPX file
/// * `tolerance` - Maximum extrapolation window beyond a segment boundary
///
/// # Returns
/// * `Some(Position)` when a point matched, extrapolated or interpolated
/// * `None` when the query is outside the track (plus tolerance)
pub fn locate(query: DateTime<Utc>, model: &TrackModel, tolerance: Duration) -> Option<Position> {
    for segment in model.segments() {
        let points = segment.points();
        if points.is_empty() {
            continue;
        }

        // Insertion index that keeps the segment sorted with `query` added;
        // ties resolve to the earliest insertion point, so a run of duplicate
        // timestamps is always entered at its first element.
        let index = points.partition_point(|p| p.time < query);

        if index < points.len() && points[index].time == query {
            let hit = &points[index];
            return Some(Position::new(hit.lat, hit.lon));
        }

        if index == 0 {
            // Before the segment's first point.
            let dt = points[0].time - query;
            if dt < tolerance {
                let first = &points[0];
                return Some(Position::new(first.lat, first.lon));
            }
            return None;
        } else if index == points.len() {
            // After the segment's last point.
            let last = &points[points.len() - 1];
            let dt = query - last.time;
            if dt < tolerance {
                return Some(Position::new(last.lat, last.lon));
            }
            continue;
        } else {
            let before = &points[index - 1];
            let after = &points[index];
            let gap = (after.time - before.time).num_milliseconds() as f64;
            let elapsed = (query - before.time).num_milliseconds() as f64;
            // before.time < query < after.time here, so frac is in (0, 1).
            let frac = elapsed / gap;
            let lat = before.lat + (after.lat - before.lat) * frac;
            let lon = before.lon + (after.lon - before.lon) * frac;
            return Some(Position::new(lat, lon));
        }
    }

    None
}
