// gpx2exif - Main Entry Point

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};

use gpx2exif::batch::{self, BatchPolicy};
use gpx2exif::config::{Cli, Command, ExiftoolArgs, ExtractTimeArgs, FlickrArgs, ImageArgs};
use gpx2exif::errors::{Error, Result};
use gpx2exif::extract_time::{extract_time, ExtractOptions};
use gpx2exif::kml;
use gpx2exif::locate::Position;
use gpx2exif::sync::exiftool::ExiftoolSync;
use gpx2exif::sync::flickr::{parse_album_url, FlickrClient, FlickrSync};
use gpx2exif::sync::local::LocalSync;
use gpx2exif::sync::SyncAdapter;
use gpx2exif::timeshift::{process_tolerance, TimeShift};
use gpx2exif::track::{self, TrackModel};

fn main() {
    let cli = Cli::parse();

    init_logging(cli.debug);

    match run(&cli) {
        Ok(()) => {}
        Err(Error::Aborted) => {
            // A declined confirmation is a clean exit, not a failure.
            error!("Update aborted by user!");
        }
        Err(e) => {
            error!("*** An unrecoverable error occurred ***");
            error!("{}", e);
            if cli.debug {
                let mut source = std::error::Error::source(&e);
                while let Some(cause) = source {
                    error!("caused by: {}", cause);
                    source = cause.source();
                }
            }
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Image(args) => run_image(args),
        Command::Exiftool(args) => run_exiftool(args),
        Command::Flickr(args) => run_flickr(args),
        Command::ExtractTime(args) => run_extract_time(args),
    }
}

fn run_image(args: &ImageArgs) -> Result<()> {
    let model = track::load_model(&args.gpx_file)?;
    let shift = TimeShift::resolve(
        &args.sync.delta,
        args.sync.delta_tz.as_deref(),
        args.tz.as_deref(),
        model.start_time().zip(model.end_time()),
    )?;
    let tolerance = process_tolerance(&args.sync.tolerance)?;
    // A timezone shift means the capture times are local wall-clock times,
    // so any embedded offset must not be applied on top.
    let mut policy = args.sync.policy();
    policy.ignore_offset |= args.tz.is_some() || args.sync.delta_tz.is_some();

    info!("Synching EXIF GPS to GPX...");
    batch::confirm_updates(&policy, &shift)?;

    let mut adapter = LocalSync::new(&args.image_path);
    run_sync(
        &mut adapter,
        &model,
        &shift,
        tolerance,
        &policy,
        args.sync.kml_output_path.as_deref(),
        args.sync.kml_thumbnail_size,
    )
}

fn run_exiftool(args: &ExiftoolArgs) -> Result<()> {
    let model = track::load_model(&args.gpx_file)?;
    let shift = TimeShift::resolve(
        &args.sync.delta,
        args.sync.delta_tz.as_deref(),
        args.tz.as_deref(),
        model.start_time().zip(model.end_time()),
    )?;
    let tolerance = process_tolerance(&args.sync.tolerance)?;
    let mut policy = args.sync.policy();
    policy.ignore_offset |= args.tz.is_some() || args.sync.delta_tz.is_some();

    info!("Synching EXIF GPS to GPX using exiftool...");
    batch::confirm_updates(&policy, &shift)?;

    let mut adapter = ExiftoolSync::new(&args.image_path);
    run_sync(
        &mut adapter,
        &model,
        &shift,
        tolerance,
        &policy,
        args.sync.kml_output_path.as_deref(),
        args.sync.kml_thumbnail_size,
    )
}

fn run_flickr(args: &FlickrArgs) -> Result<()> {
    let model = track::load_model(&args.gpx_file)?;
    // A timezone is no different from a plain delta for Flickr: its times
    // never carry an offset.
    let shift = TimeShift::resolve(
        &args.sync.delta,
        args.sync.delta_tz.as_deref(),
        None,
        model.start_time().zip(model.end_time()),
    )?;
    let tolerance = process_tolerance(&args.sync.tolerance)?;
    let policy = args.sync.policy();

    let album = parse_album_url(&args.album_url)?;
    let token_cache = match &args.token_cache {
        Some(path) => path.clone(),
        None => default_token_cache()?,
    };
    let client = FlickrClient::connect(&args.api_key, &args.api_secret, &token_cache)?;

    info!("Synching Flickr Geo tags to GPX...");
    batch::confirm_updates(&policy, &shift)?;

    let mut adapter = FlickrSync::new(client, album)?;
    run_sync(
        &mut adapter,
        &model,
        &shift,
        tolerance,
        &policy,
        args.sync.kml_output_path.as_deref(),
        args.sync.kml_thumbnail_size,
    )
}

fn run_extract_time(args: &ExtractTimeArgs) -> Result<()> {
    extract_time(
        &args.photo_path,
        &args.api_key,
        &ExtractOptions {
            time_diff_only: args.time_diff_only,
            both_am_pm: args.both_am_pm,
        },
    )
}

/// Process the batch with the chosen adapter, then emit the optional KML.
fn run_sync<A: SyncAdapter>(
    adapter: &mut A,
    model: &TrackModel,
    shift: &TimeShift,
    tolerance: chrono::Duration,
    policy: &BatchPolicy,
    kml_output_path: Option<&Path>,
    kml_thumbnail_size: u32,
) -> Result<()> {
    let positions = batch::process(adapter, model, shift, tolerance, policy)?;
    info!("{} photo(s) georeferenced", positions.len());

    let entries: Vec<(Position, kml::Placemark)> = positions
        .iter()
        .map(|(position, photo)| (*position, adapter.placemark(photo)))
        .collect();
    kml::process_kml(&entries, kml_output_path, kml_thumbnail_size)?;

    Ok(())
}

/// Token cache location under the per-user configuration directory.
fn default_token_cache() -> Result<PathBuf> {
    let root = app_dirs2::app_root(
        app_dirs2::AppDataType::UserConfig,
        &app_dirs2::AppInfo {
            name: "gpx2exif",
            author: "gpx2exif",
        },
    )
    .map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        ))
    })?;
    Ok(root.join("flickr_token.json"))
}

/// Initialize logging subsystem
fn init_logging(debug: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if debug {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
