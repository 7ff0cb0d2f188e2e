//! # photo-sorter
//!
//! A command-line tool that watches an input folder and files every photo dropped into it
//! into two parallel trees under the output folder:
//!
//! ```text
//! <output>/ByDate/<YYYY>/<MM>/<DD>/<name>[_<n>].<ext>
//! <output>/ByLocation/<Country>/<City>/<name>[_<n>].<ext>
//! <output>/ByLocation/UnknownLocation/<name>[_<n>].<ext>
//! ```
//!
//! ## Features
//!
//! - Capture date from EXIF `DateTimeOriginal`, falling back to the file's creation time
//! - GPS coordinates from EXIF, resolved to country and city via Nominatim
//! - Shared rate limiting for the geocoding service
//! - ZIP and TAR archives expanded into a temporary workspace and processed like any
//!   other input
//! - Collision-safe copies (`photo.jpg`, `photo_1.jpg`, ...); sources are never modified

pub mod archive;
pub mod config;
pub mod exif;
pub mod geocode;
pub mod ingest;
pub mod place;
pub mod process;
pub mod watch;
