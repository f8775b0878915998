// Error taxonomy for the whole tool
//
// Run-level errors (bad configuration, unreadable GPX, declined
// confirmation) propagate to main and terminate the run. Per-photo errors
// are caught at the orchestrator boundary and logged; they never abort the
// batch. An out-of-range lookup is not an error at all - the engine returns
// None for it.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The GPX track file is malformed or unreadable. Fatal for the run.
    #[error("cannot parse GPX file {path}: {message}")]
    GpxParse { path: PathBuf, message: String },

    /// A photo has no capture-time field. The photo is skipped.
    #[error("no capture time in {0}")]
    MissingCaptureTime(String),

    /// A photo is not a supported image container. The photo is skipped.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// A time-shift or tolerance expression could not be parsed.
    #[error("'{0}' is not a valid time delta expression")]
    BadDelta(String),

    /// A named timezone could not be resolved.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    /// An invoked external process returned a non-success status.
    #[error("{tool} exited with {status}: {stderr}")]
    ExternalTool {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    /// A remote API (Flickr, Vision) reported a failure.
    #[error("API error: {0}")]
    Api(String),

    /// Embedded metadata could not be read or written.
    #[error("metadata error for {path}: {message}")]
    Metadata { path: String, message: String },

    /// The user declined the interactive confirmation. Clean exit, no changes.
    #[error("update aborted by user")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
