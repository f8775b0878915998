
pub mod batch;
pub mod config;
pub mod errors;
pub mod exif;
pub mod extract_time;
pub mod kml;
pub mod locate;
pub mod sync;
pub mod timeshift;
pub mod track;
