//! Live-phase tests: files appearing under a running watcher, handled the way `run` does.

mod common;

use anyhow::Result;
use common::{init_logger, jpeg_bytes, write_jpeg};
use photo_sorter::config::Config;
use photo_sorter::geocode::create_geocoding_service;
use photo_sorter::ingest::{IngestOutcome, Ingestor};
use photo_sorter::watch::InputWatcher;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

fn setup() -> Result<(TempDir, PathBuf, PathBuf, Ingestor)> {
    init_logger();
    let temp_dir = tempdir()?;
    let input = temp_dir.path().join("input");
    let output = temp_dir.path().join("output");
    fs::create_dir_all(&input)?;

    // none of these photos carry GPS tags, so the geocoder is never called
    let config = Config {
        input_dir: input.clone(),
        output_dir: output.clone(),
        geocoder_url: "http://127.0.0.1:9".to_string(),
        geocode_interval_ms: 5,
        readable_attempts: 2,
        readable_delay_ms: 10,
        temp_dir: Some(temp_dir.path().join("tmp")),
        ..Config::default()
    };
    let geocoder = create_geocoding_service(&config)?;
    let ingestor = Ingestor::new(Arc::new(config), geocoder);

    Ok((temp_dir, input, output, ingestor))
}

/// Dispatches every reported path until the watcher stays quiet for `quiet`
async fn drain(watcher: &mut InputWatcher, ingestor: &Ingestor, quiet: Duration) -> Vec<PathBuf> {
    let mut seen = Vec::new();
    while let Ok(Some(path)) = tokio::time::timeout(quiet, watcher.next_path()).await {
        seen.push(path.clone());
        ingestor.dispatch(path).await;
    }
    seen
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_files_in_new_folder_are_placed_once() -> Result<()> {
    let (_temp_dir, input, output, ingestor) = setup()?;
    let mut watcher = InputWatcher::start(&input, Duration::from_millis(200))?;

    fs::create_dir(input.join("trip"))?;
    write_jpeg(&input.join("trip").join("IMG.jpg"), Some("2023:06:15 14:02:11"), None);

    let seen = drain(&mut watcher, &ingestor, Duration::from_secs(2)).await;

    assert_eq!(seen, vec![input.join("trip").join("IMG.jpg")]);
    assert_eq!(file_names(&output.join("ByDate/2023/06/15")), vec!["IMG.jpg"]);
    assert_eq!(
        file_names(&output.join("ByLocation/UnknownLocation")),
        vec!["IMG.jpg"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_moved_in_file_is_placed() -> Result<()> {
    let (temp_dir, input, output, ingestor) = setup()?;
    let staged = temp_dir.path().join("IMG.jpg");
    write_jpeg(&staged, Some("2023:06:15 14:02:11"), None);
    let mut watcher = InputWatcher::start(&input, Duration::from_millis(200))?;

    fs::rename(&staged, input.join("IMG.jpg"))?;

    let seen = drain(&mut watcher, &ingestor, Duration::from_secs(2)).await;

    assert_eq!(seen, vec![input.join("IMG.jpg")]);
    assert_eq!(file_names(&output.join("ByDate/2023/06/15")), vec!["IMG.jpg"]);
    Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_still_being_written_is_not_reported() -> Result<()> {
    use std::io::Write;

    let (_temp_dir, input, output, ingestor) = setup()?;
    let mut watcher = InputWatcher::start(&input, Duration::from_millis(200))?;

    let bytes = jpeg_bytes(Some("2023:06:15 14:02:11"), None);
    let (head, tail) = bytes.split_at(bytes.len() / 2);
    let photo = input.join("big.jpg");
    let mut file = fs::File::create(&photo)?;
    file.write_all(head)?;
    file.flush()?;

    let early = tokio::time::timeout(Duration::from_secs(1), watcher.next_path()).await;
    assert!(early.is_err(), "reported before the writer closed the file");

    file.write_all(tail)?;
    drop(file);

    let path = tokio::time::timeout(Duration::from_secs(5), watcher.next_path())
        .await?
        .expect("watcher closed");
    assert_eq!(path, photo);
    assert_eq!(fs::metadata(&path)?.len(), bytes.len() as u64);

    let outcome = ingestor.dispatch(path).await;
    assert!(matches!(outcome, IngestOutcome::Photo(_)));
    assert_eq!(file_names(&output.join("ByDate/2023/06/15")), vec!["big.jpg"]);
    Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_in_new_folder_waits_for_writer() -> Result<()> {
    use std::io::Write;

    let (_temp_dir, input, output, ingestor) = setup()?;
    // a settle interval longer than the pause below, so only the close can report it
    let mut watcher = InputWatcher::start(&input, Duration::from_secs(5))?;

    let bytes = jpeg_bytes(Some("2023:06:15 14:02:11"), None);
    let (head, tail) = bytes.split_at(bytes.len() / 2);
    let trip = input.join("trip");
    fs::create_dir(&trip)?;
    let photo = trip.join("big.jpg");
    let mut file = fs::File::create(&photo)?;
    file.write_all(head)?;
    file.flush()?;

    let early = tokio::time::timeout(Duration::from_secs(1), watcher.next_path()).await;
    assert!(early.is_err(), "reported before the writer closed the file");

    file.write_all(tail)?;
    drop(file);

    let path = tokio::time::timeout(Duration::from_secs(3), watcher.next_path())
        .await?
        .expect("watcher closed");
    assert_eq!(path, photo);
    assert_eq!(fs::metadata(&path)?.len(), bytes.len() as u64);

    ingestor.dispatch(path).await;
    assert_eq!(file_names(&output.join("ByDate/2023/06/15")), vec!["big.jpg"]);

    let again = tokio::time::timeout(Duration::from_secs(1), watcher.next_path()).await;
    assert!(again.is_err(), "the same file was reported twice");
    Ok(())
}
