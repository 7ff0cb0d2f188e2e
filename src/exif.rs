//! EXIF metadata decoding for photo-sorter.
//!
//! This module turns the tag collection read by kamadak-exif into the two facts the
//! sorter needs: when a photo was taken and, optionally, where.
//!
//! `decode_coordinates` converts the GPS degree/minute/second triples into validated
//! decimal degrees and returns `None` whenever the tags are missing, malformed or out of
//! range. `decode_capture_date` never fails: without a usable `DateTimeOriginal` tag it
//! falls back to the file's creation time.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDateTime};
use exif::{Exif, In, Tag, Value};
use log::debug;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Latitude and longitude in decimal degrees, always within range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    latitude: f64,
    longitude: f64,
}

impl GeoCoordinate {
    /// Returns `None` unless latitude is in [-90, 90] and longitude in [-180, 180]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Some(Self {
                latitude,
                longitude,
            })
        } else {
            None
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// When a photo was taken, in local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDate(NaiveDateTime);

impl CaptureDate {
    pub fn new(date_time: NaiveDateTime) -> Self {
        Self(date_time)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        Self(DateTime::<Local>::from(time).naive_local())
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn date_time(&self) -> NaiveDateTime {
        self.0
    }

    /// Relative `YYYY/MM/DD` directory for the by-date tree
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(format!("{:04}", self.year()))
            .join(format!("{:02}", self.month()))
            .join(format!("{:02}", self.day()))
    }
}

/// The raw GPS tags needed to build a coordinate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsTags {
    pub latitude: Option<Vec<f64>>,
    pub latitude_ref: Option<String>,
    pub longitude: Option<Vec<f64>>,
    pub longitude_ref: Option<String>,
}

impl GpsTags {
    /// Collects the GPS latitude/longitude tags, or `None` when the photo has no GPS data
    pub fn from_exif(exif: &Exif) -> Option<Self> {
        let tags = Self {
            latitude: get_exif_rationals(exif, Tag::GPSLatitude),
            latitude_ref: get_exif_string(exif, Tag::GPSLatitudeRef),
            longitude: get_exif_rationals(exif, Tag::GPSLongitude),
            longitude_ref: get_exif_string(exif, Tag::GPSLongitudeRef),
        };

        if tags == Self::default() {
            None
        } else {
            Some(tags)
        }
    }

    /// Converts the DMS triples into a validated coordinate
    pub fn to_coordinate(&self) -> Option<GeoCoordinate> {
        let latitude = dms_to_decimal(
            self.latitude.as_deref()?,
            self.latitude_ref.as_deref()?,
            ('N', 'S'),
        )?;
        let longitude = dms_to_decimal(
            self.longitude.as_deref()?,
            self.longitude_ref.as_deref()?,
            ('E', 'W'),
        )?;

        GeoCoordinate::new(latitude, longitude)
    }
}

/// Converts a degrees/minutes/seconds triple to signed decimal degrees.
///
/// `hemispheres` is the (positive, negative) reference pair, e.g. `('N', 'S')`.
/// Returns `None` for anything but exactly three components or an unknown reference.
pub fn dms_to_decimal(dms: &[f64], reference: &str, hemispheres: (char, char)) -> Option<f64> {
    let [degrees, minutes, seconds] = dms else {
        return None;
    };
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    let mut chars = reference.trim().chars().map(|c| c.to_ascii_uppercase());
    match (chars.next(), chars.next()) {
        (Some(c), None) if c == hemispheres.0 => Some(decimal),
        (Some(c), None) if c == hemispheres.1 => Some(-decimal),
        _ => None,
    }
}

/// Reads the coordinate of a photo from its tag collection
pub fn decode_coordinates(exif: &Exif) -> Option<GeoCoordinate> {
    GpsTags::from_exif(exif)?.to_coordinate()
}

/// Reads the capture date, falling back to `fallback_creation_time`
pub fn decode_capture_date(exif: Option<&Exif>, fallback_creation_time: SystemTime) -> CaptureDate {
    exif.and_then(|exif| get_exif_string(exif, Tag::DateTimeOriginal))
        .and_then(|date_str| parse_exif_datetime(&date_str))
        .map(CaptureDate::new)
        .unwrap_or_else(|| CaptureDate::from_system_time(fallback_creation_time))
}

/// Everything the photo processor needs from a file's metadata
#[derive(Debug, Clone, Copy)]
pub struct PhotoMetadata {
    pub capture_date: CaptureDate,
    pub coordinate: Option<GeoCoordinate>,
}

impl PhotoMetadata {
    /// Reads metadata from a photo on disk.
    ///
    /// Only fails when the file itself cannot be stat'ed; unreadable or missing EXIF
    /// data degrades to the creation-time date and no coordinate.
    pub fn read(image_path: &Path) -> Result<Self> {
        let created = file_creation_time(image_path)?;
        let exif = read_exif(image_path);

        Ok(Self {
            capture_date: decode_capture_date(exif.as_ref(), created),
            coordinate: exif.as_ref().and_then(decode_coordinates),
        })
    }
}

/// Reads the EXIF block of an image, or `None` if it has none we can parse
pub fn read_exif(image_path: &Path) -> Option<Exif> {
    let file = match File::open(image_path) {
        Ok(file) => file,
        Err(e) => {
            debug!("Could not open {} for EXIF: {}", image_path.display(), e);
            return None;
        }
    };

    let mut bufreader = BufReader::new(&file);
    match exif::Reader::new().read_from_container(&mut bufreader) {
        Ok(exif) => Some(exif),
        Err(e) => {
            debug!("Could not extract EXIF data from {}: {}", image_path.display(), e);
            None
        }
    }
}

/// Creation time of a file, or its modification time where the platform has no birth time
pub fn file_creation_time(path: &Path) -> Result<SystemTime> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata for {}", path.display()))?;

    metadata
        .created()
        .or_else(|_| metadata.modified())
        .with_context(|| format!("No timestamps available for {}", path.display()))
}

/// Helper function to extract a string from EXIF data
fn get_exif_string(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(ref vec) = field.value {
        if let Some(string) = vec.first() {
            return Some(String::from_utf8_lossy(string).to_string());
        }
    }
    None
}

/// Helper function to extract a rational array as floats
fn get_exif_rationals(exif: &Exif, tag: Tag) -> Option<Vec<f64>> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Rational(ref vec) => Some(vec.iter().map(|r| r.to_f64()).collect()),
        _ => None,
    }
}

/// Parse EXIF DateTime format (e.g., "2023:12:25 15:30:00")
fn parse_exif_datetime(date_str: &str) -> Option<NaiveDateTime> {
    let trimmed = date_str.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S").ok()
}
