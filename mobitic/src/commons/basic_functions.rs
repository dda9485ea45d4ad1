use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use geojson::{FeatureCollection, GeoJson};
use tempfile::NamedTempFile;

use crate::error::PipelineError;

/// Fail fast when a required artifact is absent
pub fn require_exists(path: &Path) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        log::error!("File not found: {}", path.display());
        Err(PipelineError::MissingArtifact {
            path: path.to_path_buf(),
        })
    }
}

/// Lowercased extension of a path, empty when there is none
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// First file below `dir` (recursive) whose extension is one of `extensions`
pub fn find_file_with_extension(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    // read_dir order is platform dependent
    entries.sort();

    for path in &entries {
        if path.is_file() && extensions.contains(&extension_of(path).as_str()) {
            return Some(path.clone());
        }
    }
    entries
        .iter()
        .filter(|path| path.is_dir())
        .find_map(|path| find_file_with_extension(path, extensions))
}

/// Decode text that is UTF-8 or, failing that, Windows-1252 (older INSEE exports)
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded
        }
    }
}

/// Load a GeoJSON file as a feature collection (a lone Feature becomes a
/// one-element collection)
pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection, PipelineError> {
    require_exists(path)?;
    let bytes = fs::read(path)?;
    let geojson: GeoJson = decode_text(&bytes).parse()?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(feature) => Ok(FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }),
        GeoJson::Geometry(_) => Err(PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Write `contents` to a temp file next to `destination`, without publishing it.
///
/// Call `persist(destination)` on the result once every output of the step is
/// ready; dropping it removes the temp file.
pub fn stage_file(destination: &Path, contents: &[u8]) -> Result<NamedTempFile, PipelineError> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(contents)?;
    staged.flush()?;
    Ok(staged)
}

/// Publish a staged file at its final path
pub fn persist(staged: NamedTempFile, destination: &Path) -> Result<(), PipelineError> {
    staged
        .persist(destination)
        .map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}
