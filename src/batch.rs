// Batch orchestrator
//
// Drives the per-photo pipeline: read capture time, apply the time
// correction, look up the position, apply the configured side effect. One
// photo is fully processed before the next begins; a failing photo is logged
// and skipped, never aborting its siblings.

use std::io::{self, BufRead, Write};

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::locate::{locate, Position};
use crate::sync::SyncAdapter;
use crate::timeshift::{self, format_timedelta, TimeShift};
use crate::track::TrackModel;

/// Per-photo side-effect policy, constant for one run.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    /// Write computed positions back (off = simulate only)
    pub update: bool,
    /// Erase an existing position when none can be computed
    pub clear: bool,
    /// Also shift the stored capture time by the drift delta
    pub update_time: bool,
    /// Disregard any UTC offset embedded in the photo metadata
    pub ignore_offset: bool,
    /// Ask for confirmation before touching any photo
    pub ask: bool,
}

/// Announce what the run will do and, when configured, ask the user to
/// confirm before anything is modified. Declining aborts cleanly.
pub fn confirm_updates(policy: &BatchPolicy, shift: &TimeShift) -> Result<()> {
    if !policy.update {
        warn!("The images will not be updated!");
        return Ok(());
    }
    if policy.update_time {
        warn!(
            "The times in the images will be shifted: {}!",
            format_timedelta(shift.drift)
        );
    }
    if policy.ask && !prompt_confirm("The images will be updated. Confirm?")? {
        return Err(Error::Aborted);
    }
    Ok(())
}

/// Process every photo of the adapter and return the computed positions, in
/// processing order, for the optional KML output.
pub fn process<A: SyncAdapter>(
    adapter: &mut A,
    model: &TrackModel,
    shift: &TimeShift,
    tolerance: Duration,
    policy: &BatchPolicy,
) -> Result<Vec<(Position, A::Photo)>> {
    let photos = adapter.photos()?;
    debug!("Processing {} photo(s)", photos.len());

    let total_shift = shift.total();
    let mut positions = Vec::new();
    // Warn about the assumed-UTC fallback only on the first affected photo,
    // not once per photo.
    let mut offset_warning_pending = true;

    for photo in photos {
        let outcome = process_photo(
            adapter,
            &photo,
            model,
            total_shift,
            shift.drift,
            tolerance,
            policy,
            &mut offset_warning_pending,
        );
        match outcome {
            Ok(Some(position)) => positions.push((position, photo)),
            Ok(None) => {}
            Err(e) => {
                error!("{} could not be processed: {}", adapter.describe(&photo), e);
            }
        }
    }

    Ok(positions)
}

#[allow(clippy::too_many_arguments)]
fn process_photo<A: SyncAdapter>(
    adapter: &mut A,
    photo: &A::Photo,
    model: &TrackModel,
    total_shift: Duration,
    drift: Duration,
    tolerance: Duration,
    policy: &BatchPolicy,
    offset_warning_pending: &mut bool,
) -> Result<Option<Position>> {
    let capture = match adapter.capture_time(photo) {
        Ok(capture) => capture,
        Err(e @ Error::MissingCaptureTime(_)) => {
            warn!("Skipping {}: {}", adapter.describe(photo), e);
            if policy.clear && policy.update {
                adapter.clear_position(photo)?;
            }
            return Ok(None);
        }
        Err(e @ Error::UnsupportedFormat(_)) => {
            warn!("Skipping {}: {}", adapter.describe(photo), e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if *offset_warning_pending {
        match capture.offset {
            Some(offset) if !policy.ignore_offset => {
                info!("Found offset in metadata: {}", offset);
            }
            _ => {
                warn!("No offset in metadata. Assuming UTC. Use --delta to adjust");
            }
        }
        *offset_warning_pending = false;
    }

    let corrected = timeshift::correct(&capture, policy.ignore_offset, total_shift);
    debug!(
        "Processing {} (time corrected: {})",
        adapter.describe(photo),
        corrected
    );

    let Some(position) = locate(corrected, model, tolerance) else {
        warn!(
            "Cannot compute position for {} ({} is outside GPX range + tolerance)",
            adapter.describe(photo),
            corrected
        );
        if policy.clear && policy.update {
            adapter.clear_position(photo)?;
        }
        return Ok(None);
    };

    debug!("Position: {} {}", position.lat, position.lon);

    if policy.update {
        adapter.write_position(photo, position)?;
        if policy.update_time && drift != Duration::zero() {
            adapter.shift_capture_time(photo, drift)?;
        }
    }

    Ok(Some(position))
}

/// Yes/no prompt on stdin; anything but `y`/`yes` declines.
fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
