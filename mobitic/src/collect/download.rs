use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use tempfile::{NamedTempFile, TempDir};
use url::Url;
use zip::ZipArchive;

use crate::commons::basic_functions::{find_file_with_extension, persist};

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

/// Blocking HTTP downloader for the raw inputs
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("mobitic/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Downloader { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Stream `url` into `destination`.
    ///
    /// An existing destination is kept unless `force` is set. The body goes to
    /// a temp file in the destination directory first, so an interrupted
    /// download never leaves a truncated file behind. Returns `true` when a
    /// download happened.
    pub fn fetch_to_file(&self, url: &str, destination: &Path, force: bool) -> Result<bool> {
        if destination.exists() && !force {
            log::info!(
                "{} already present, skipping download (use --force to refresh)",
                destination.display()
            );
            return Ok(false);
        }

        log::info!("Downloading {} -> {}", url, destination.display());
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to send request to {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error {} when downloading {}", response.status(), url);
        }

        let pb = match response.content_length() {
            Some(len) => {
                let pb = ProgressBar::new(len);
                pb.set_style(progress_style());
                pb
            }
            None => ProgressBar::new_spinner(),
        };
        pb.set_message(file_name_from_url(url).unwrap_or_else(|| url.to_string()));

        let parent = parent_dir(destination);
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        let mut staged = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        let mut reader = pb.wrap_read(response);
        let bytes = io::copy(&mut reader, &mut staged)
            .with_context(|| format!("Failed to read response body from {}", url))?;
        pb.finish_and_clear();

        persist(staged, destination)
            .with_context(|| format!("Failed to write {:?}", destination))?;
        log::info!("Downloaded {} bytes to {}", bytes, destination.display());
        Ok(true)
    }
}

/// Extract `archive` into a temporary directory and copy out the first file
/// whose extension is one of `extensions`. The temporary directory is removed
/// when this returns, on success or failure.
pub fn extract_first_matching(
    archive: &Path,
    extensions: &[&str],
    destination: &Path,
) -> Result<PathBuf> {
    let file = File::open(archive).with_context(|| format!("Failed to open {:?}", archive))?;
    let mut zip = ZipArchive::new(file).context("Failed to open ZIP archive")?;
    let temp_dir = TempDir::new().context("Failed to create temporary directory")?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        // entries escaping the extraction directory are skipped
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            log::warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let outpath = temp_dir.path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }

    let found = find_file_with_extension(temp_dir.path(), extensions).with_context(|| {
        format!(
            "No file with extension [{}] in archive {:?}",
            extensions.join(", "),
            archive
        )
    })?;
    fs::create_dir_all(parent_dir(destination))?;
    fs::copy(&found, destination)
        .with_context(|| format!("Failed to copy {:?} to {:?}", found, destination))?;
    log::info!(
        "Extracted {} from {}",
        found.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
        archive.display()
    );
    Ok(destination.to_path_buf())
}

/// Last path segment of a URL, when it has one
pub fn file_name_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| segment.to_string())
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::FileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://www.insee.fr/fr/statistiques/fichier/8217525/BPE24.parquet"),
            Some("BPE24.parquet".to_string())
        );
        assert_eq!(
            file_name_from_url("https://example.org/data/iris.zip?token=1"),
            Some("iris.zip".to_string())
        );
        assert_eq!(file_name_from_url("https://example.org/"), None);
        assert_eq!(file_name_from_url("not a url"), None);
    }

    #[test]
    fn test_extract_first_matching() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("iris.zip");
        write_zip(
            &archive,
            &[
                ("CONTOURS-IRIS/LISEZ-MOI.txt", "readme"),
                ("CONTOURS-IRIS/1_DONNEES/iris.geojson", "{\"type\": \"FeatureCollection\"}"),
            ],
        );

        let destination = dir.path().join("out").join("iris.geojson");
        let extracted = extract_first_matching(&archive, &["geojson", "json"], &destination).unwrap();
        assert_eq!(extracted, destination);
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "{\"type\": \"FeatureCollection\"}"
        );
    }

    #[test]
    fn test_extract_without_match_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("iris.zip");
        write_zip(&archive, &[("LISEZ-MOI.txt", "readme")]);
        let destination = dir.path().join("iris.geojson");
        assert!(extract_first_matching(&archive, &["geojson"], &destination).is_err());
        assert!(!destination.exists());
    }

    #[test]
    fn test_existing_file_is_not_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("bpe.parquet");
        fs::write(&destination, b"cached").unwrap();
        let downloader = Downloader::new(1).unwrap();
        // unreachable URL: any request would fail
        let fetched = downloader
            .fetch_to_file("http://127.0.0.1:9/bpe.parquet", &destination, false)
            .unwrap();
        assert!(!fetched);
        assert_eq!(fs::read(&destination).unwrap(), b"cached");
    }
}
