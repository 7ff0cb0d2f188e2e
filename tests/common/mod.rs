//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the logger once per test binary
pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .is_test(true)
            .try_init();
    });
}

fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

fn rationals(tag: Tag, parts: &[(u32, u32)]) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(
            parts
                .iter()
                .map(|&(num, denom)| Rational { num, denom })
                .collect(),
        ),
    }
}

/// GPS position as two DMS triples of (numerator, denominator) and hemisphere letters
pub struct Gps {
    pub latitude: [(u32, u32); 3],
    pub latitude_ref: &'static str,
    pub longitude: [(u32, u32); 3],
    pub longitude_ref: &'static str,
}

/// 48°51'23.76"N 2°21'7.92"E, i.e. 48.8566, 2.3522
pub const PARIS: Gps = Gps {
    latitude: [(48, 1), (51, 1), (2376, 100)],
    latitude_ref: "N",
    longitude: [(2, 1), (21, 1), (792, 100)],
    longitude_ref: "E",
};

/// Bytes of a minimal JPEG whose APP1 segment carries the given EXIF tags
pub fn jpeg_bytes(date_time_original: Option<&str>, gps: Option<&Gps>) -> Vec<u8> {
    let mut fields = vec![ascii(Tag::Make, "photo-sorter tests")];
    if let Some(date) = date_time_original {
        fields.push(ascii(Tag::DateTimeOriginal, date));
    }
    if let Some(gps) = gps {
        fields.push(rationals(Tag::GPSLatitude, &gps.latitude));
        fields.push(ascii(Tag::GPSLatitudeRef, gps.latitude_ref));
        fields.push(rationals(Tag::GPSLongitude, &gps.longitude));
        fields.push(ascii(Tag::GPSLongitudeRef, gps.longitude_ref));
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).expect("failed to encode EXIF");
    let tiff = tiff.into_inner();

    let segment_len = u16::try_from(2 + 6 + tiff.len()).expect("EXIF segment too large");
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&segment_len.to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

pub fn write_jpeg(path: &Path, date_time_original: Option<&str>, gps: Option<&Gps>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, jpeg_bytes(date_time_original, gps)).unwrap();
}

pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

pub fn write_tar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, Cursor::new(data))
            .unwrap();
    }
    builder.finish().unwrap();
}
