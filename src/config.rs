use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::batch::BatchPolicy;

/// Add location information to images on disk or on Flickr based on a GPX file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Flag to activate debug mode
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add GPS EXIF tags to local images based on a GPX file
    Image(ImageArgs),

    /// Add GPS EXIF tags to local images based on a GPX file using the
    /// external exiftool binary (supports RAW formats)
    Exiftool(ExiftoolArgs),

    /// Add location information to Flickr images based on a GPX file
    Flickr(FlickrArgs),

    /// Extract time from a clock photo and compute a delta with the EXIF time
    ExtractTime(ExtractTimeArgs),
}

/// Options shared by every synchronization destination.
#[derive(Args, Debug)]
pub struct SyncOptions {
    /// Time shift to apply to the photo times to match the date in GPX
    /// (camera clock drift, or a missing timezone offset). Multiple possible
    #[arg(short = 'd', long = "delta", value_name = "DELTA", allow_hyphen_values = true)]
    pub delta: Vec<String>,

    /// Time zone offset to apply to the photo times to match the date in GPX
    #[arg(short = 'z', long = "delta-tz", value_name = "DELTA", allow_hyphen_values = true)]
    pub delta_tz: Option<String>,

    /// Tolerance if the time of the photo is not inside the time range of a
    /// GPX segment
    #[arg(
        short = 't',
        long,
        value_name = "DELTA",
        default_value = "10s",
        allow_hyphen_values = true
    )]
    pub tolerance: String,

    /// Path for a KML output file with placemarks for the photos (useful for
    /// checking the delta)
    #[arg(short = 'k', long = "kml", value_name = "FILE")]
    pub kml_output_path: Option<PathBuf>,

    /// Pixel size of the image popup in the KML
    #[arg(long = "kml_thumbnail_size", value_name = "PIXELS", default_value_t = 400)]
    pub kml_thumbnail_size: u32,

    /// Flag to indicate that the images should not be updated and only a KML
    /// will be generated
    #[arg(short = 'n', long = "no-update-images")]
    pub no_update_images: bool,

    /// Flag to indicate that the positions of the photos should be cleared
    /// if no position can be computed
    #[arg(short = 'c', long = "clear")]
    pub clear: bool,

    /// Flag to indicate that the times of the photos should be updated
    /// according to the delta
    #[arg(short = 'u', long = "update-time")]
    pub update_time: bool,

    /// Flag to indicate that a UTC offset present in the photo metadata
    /// should be ignored
    #[arg(long = "ignore-offset")]
    pub ignore_offset: bool,

    /// Flag to indicate a confirmation prompt will be displayed before
    /// photos are updated
    #[arg(short = 'a', long = "ask")]
    pub ask: bool,
}

impl SyncOptions {
    pub fn policy(&self) -> BatchPolicy {
        BatchPolicy {
            update: !self.no_update_images,
            clear: self.clear,
            update_time: self.update_time,
            ignore_offset: self.ignore_offset,
            ask: self.ask,
        }
    }
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// GPX file with the recorded track
    #[arg(value_name = "GPX_FILE")]
    pub gpx_file: PathBuf,

    /// Image file or directory of images
    #[arg(value_name = "IMAGE_FILE_OR_DIR")]
    pub image_path: PathBuf,

    /// Named timezone to apply to the photo times to match the date in GPX
    /// ('auto' uses the local timezone). If present, assumes --ignore-offset
    #[arg(long = "tz", value_name = "TZ", conflicts_with = "delta_tz")]
    pub tz: Option<String>,

    #[command(flatten)]
    pub sync: SyncOptions,
}

#[derive(Args, Debug)]
pub struct ExiftoolArgs {
    /// GPX file with the recorded track
    #[arg(value_name = "GPX_FILE")]
    pub gpx_file: PathBuf,

    /// Image file or directory of images
    #[arg(value_name = "IMAGE_FILE_OR_DIR")]
    pub image_path: PathBuf,

    /// Named timezone to apply to the photo times to match the date in GPX
    /// ('auto' uses the local timezone). If present, assumes --ignore-offset
    #[arg(long = "tz", value_name = "TZ", conflicts_with = "delta_tz")]
    pub tz: Option<String>,

    #[command(flatten)]
    pub sync: SyncOptions,
}

#[derive(Args, Debug)]
pub struct FlickrArgs {
    /// GPX file with the recorded track
    #[arg(value_name = "GPX_FILE")]
    pub gpx_file: PathBuf,

    /// URL of the Flickr album to synchronize
    #[arg(value_name = "FLICKR_ALBUM_URL")]
    pub album_url: String,

    /// Flickr API key
    #[arg(long, env = "FLICKR_API_KEY")]
    pub api_key: String,

    /// Flickr API secret
    #[arg(long, env = "FLICKR_API_SECRET")]
    pub api_secret: String,

    /// Path of the cached Flickr access token [default: under the user
    /// config directory]
    #[arg(long = "token-cache", value_name = "FILE")]
    pub token_cache: Option<PathBuf>,

    #[command(flatten)]
    pub sync: SyncOptions,
}

#[derive(Args, Debug)]
pub struct ExtractTimeArgs {
    /// Photo of a clock showing the reference time
    #[arg(value_name = "PHOTO_PATH")]
    pub photo_path: PathBuf,

    /// API key for the Vision text-detection service
    #[arg(long = "api-key", env = "GPX2EXIF_VISION_API_KEY")]
    pub api_key: String,

    /// Output only the time difference
    #[arg(long = "time-diff-only")]
    pub time_diff_only: bool,

    /// Output both AM and PM possibilities for the time
    #[arg(long = "both-am-pm")]
    pub both_am_pm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_image_subcommand_parsing() {
        let cli = Cli::parse_from([
            "gpx2exif", "image", "track.gpx", "photos/", "-d", "1h30m", "-t", "5s", "--clear",
        ]);
        let Command::Image(args) = cli.command else {
            panic!("expected image subcommand");
        };
        assert_eq!(args.gpx_file, PathBuf::from("track.gpx"));
        assert_eq!(args.sync.delta, vec!["1h30m".to_string()]);
        assert_eq!(args.sync.tolerance, "5s");
        let policy = args.sync.policy();
        assert!(policy.update);
        assert!(policy.clear);
        assert!(!policy.update_time);
    }

    #[test]
    fn test_multiple_deltas_accumulate() {
        let cli = Cli::parse_from([
            "gpx2exif", "image", "track.gpx", "p.jpg", "-d", "1h", "-d", "-15m",
        ]);
        let Command::Image(args) = cli.command else {
            panic!("expected image subcommand");
        };
        assert_eq!(args.sync.delta.len(), 2);
    }

    #[test]
    fn test_no_update_images_turns_updates_off() {
        let cli = Cli::parse_from(["gpx2exif", "image", "track.gpx", "p.jpg", "-n"]);
        let Command::Image(args) = cli.command else {
            panic!("expected image subcommand");
        };
        assert!(!args.sync.policy().update);
    }
}
