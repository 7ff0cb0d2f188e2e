//! Photo processing: metadata, geocoding and the two placements for a single photo.
//!
//! Every photo is copied twice, once into `ByDate/<YYYY>/<MM>/<DD>` and once into
//! `ByLocation/<Country>/<City>` (or `ByLocation/UnknownLocation`). The source file is
//! left untouched.

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

use crate::exif::PhotoMetadata;
use crate::geocode::{LocationName, ReverseGeocoder};
use crate::place::{place, sanitize_component};

pub const BY_DATE_DIR: &str = "ByDate";
pub const BY_LOCATION_DIR: &str = "ByLocation";
pub const UNKNOWN_LOCATION: &str = "UnknownLocation";
pub const UNKNOWN_COUNTRY: &str = "UnknownCountry";
pub const UNKNOWN_CITY: &str = "UnknownCity";

/// Where a photo ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedPhoto {
    pub by_date: PathBuf,
    pub by_location: PathBuf,
}

/// Relative `Country/City` directory for a resolved location, or `UnknownLocation`
pub fn location_relative_dir(location: Option<&LocationName>) -> PathBuf {
    let Some(location) = location else {
        return PathBuf::from(UNKNOWN_LOCATION);
    };

    let component = |name: &str, fallback: &str| {
        let sanitized = sanitize_component(name.trim());
        if sanitized.is_empty() {
            fallback.to_string()
        } else {
            sanitized
        }
    };

    PathBuf::from(component(&location.country, UNKNOWN_COUNTRY))
        .join(component(&location.city, UNKNOWN_CITY))
}

pub struct PhotoProcessor {
    output_dir: PathBuf,
    geocoder: Arc<dyn ReverseGeocoder>,
}

impl PhotoProcessor {
    pub fn new(output_dir: PathBuf, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            output_dir,
            geocoder,
        }
    }

    /// Files one photo into both trees
    pub async fn process(&self, photo_path: &Path) -> Result<PlacedPhoto> {
        let source = photo_path.to_path_buf();
        let metadata = task::spawn_blocking(move || PhotoMetadata::read(&source))
            .await
            .context("Metadata task failed")??;

        let location = match metadata.coordinate {
            Some(coordinate) => self.geocoder.resolve(coordinate).await,
            None => None,
        };

        let date_dir = metadata.capture_date.relative_dir();
        let location_dir = location_relative_dir(location.as_ref());
        let by_date_root = self.output_dir.join(BY_DATE_DIR).join(&date_dir);
        let by_location_root = self.output_dir.join(BY_LOCATION_DIR).join(&location_dir);

        let source = photo_path.to_path_buf();
        let placed = task::spawn_blocking(move || -> Result<PlacedPhoto> {
            Ok(PlacedPhoto {
                by_date: place(&source, &by_date_root)?,
                by_location: place(&source, &by_location_root)?,
            })
        })
        .await
        .context("Placement task failed")??;

        info!(
            "Processed {} -> {} | {}",
            file_name(photo_path),
            date_dir.display(),
            location_dir.display()
        );

        Ok(placed)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::{CaptureDate, GeoCoordinate, file_creation_time};
    use futures::future::BoxFuture;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Answers every lookup with a fixed location and counts the calls
    struct FixedGeocoder {
        location: Option<LocationName>,
        calls: AtomicUsize,
    }

    impl ReverseGeocoder for FixedGeocoder {
        fn resolve(&self, _coordinate: GeoCoordinate) -> BoxFuture<'_, Option<LocationName>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { self.location.clone() })
        }
    }

    fn location(country: &str, city: &str) -> LocationName {
        LocationName {
            country: country.to_string(),
            city: city.to_string(),
        }
    }

    #[test]
    fn test_location_relative_dir() {
        assert_eq!(location_relative_dir(None), PathBuf::from("UnknownLocation"));
        assert_eq!(
            location_relative_dir(Some(&location("France", "Paris"))),
            PathBuf::from("France/Paris")
        );
        assert_eq!(
            location_relative_dir(Some(&location("Côte d'Ivoire", "A/B"))),
            PathBuf::from("Côte d'Ivoire/A_B")
        );
        assert_eq!(
            location_relative_dir(Some(&location("  ", ""))),
            PathBuf::from("UnknownCountry/UnknownCity")
        );
    }

    #[tokio::test]
    async fn test_photo_without_gps_goes_to_unknown_location() -> Result<()> {
        let temp_dir = tempdir()?;
        let photo = temp_dir.path().join("IMG.jpg");
        fs::write(&photo, b"no exif here")?;
        let output = temp_dir.path().join("output");

        let geocoder = Arc::new(FixedGeocoder {
            location: Some(location("France", "Paris")),
            calls: AtomicUsize::new(0),
        });
        let processor = PhotoProcessor::new(output.clone(), geocoder.clone());

        let placed = processor.process(&photo).await?;

        let expected_date =
            CaptureDate::from_system_time(file_creation_time(&photo)?).relative_dir();
        assert_eq!(
            placed.by_date,
            output.join("ByDate").join(expected_date).join("IMG.jpg")
        );
        assert_eq!(
            placed.by_location,
            output.join("ByLocation/UnknownLocation/IMG.jpg")
        );
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(&photo)?, b"no exif here");
        Ok(())
    }

    #[tokio::test]
    async fn test_placement_failure_is_reported() -> Result<()> {
        let temp_dir = tempdir()?;
        let photo = temp_dir.path().join("IMG.jpg");
        fs::write(&photo, b"x")?;
        // a regular file where the output directory should be
        let output = temp_dir.path().join("output");
        fs::write(&output, b"in the way")?;

        let geocoder = Arc::new(FixedGeocoder {
            location: None,
            calls: AtomicUsize::new(0),
        });
        let processor = PhotoProcessor::new(output, geocoder);

        assert!(processor.process(&photo).await.is_err());
        Ok(())
    }
}
