use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{AppError, AppResult};

use super::manifest::BackupManifest;

/// Name of the manifest entry inside the archive.
pub const MANIFEST_ENTRY: &str = "data.json";

/// Why an uploaded archive was rejected. Every variant is a malformed
/// archive as far as callers are concerned; the split exists for the
/// operator-facing message.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive could not be opened: {0}")]
    Container(String),
    #[error("data.json not found in archive")]
    ManifestMissing,
    #[error("failed to parse data.json: {0}")]
    ManifestParse(String),
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),
}

/// Build an archive from a manifest plus named binary assets.
pub fn encode(manifest: &BackupManifest, assets: &BTreeMap<String, Vec<u8>>) -> AppResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    writer
        .start_file(MANIFEST_ENTRY, options)
        .map_err(|err| map_zip_error(err, "archive_manifest_entry"))?;
    let manifest_bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|err| AppError::from(err).with_context("operation", "archive_manifest_encode"))?;
    writer
        .write_all(&manifest_bytes)
        .map_err(|err| AppError::from(err).with_context("operation", "archive_manifest_write"))?;

    for (filename, bytes) in assets {
        writer
            .start_file(filename, options)
            .map_err(|err| map_zip_error(err, "archive_asset_entry"))?;
        writer
            .write_all(bytes)
            .map_err(|err| AppError::from(err).with_context("operation", "archive_asset_write"))?;
    }

    let cursor = writer
        .finish()
        .map_err(|err| map_zip_error(err, "archive_finish"))?;
    Ok(cursor.into_inner())
}

/// Open an archive and return its manifest plus a by-filename asset lookup.
/// A manifest that names assets missing from the container is fine; those
/// assets are simply not in the lookup.
pub fn decode(bytes: &[u8]) -> Result<(BackupManifest, BTreeMap<String, Vec<u8>>), ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ArchiveError::Container(err.to_string()))?;

    let manifest: BackupManifest = {
        let mut entry = match archive.by_name(MANIFEST_ENTRY) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(ArchiveError::ManifestMissing),
            Err(err) => return Err(ArchiveError::Container(err.to_string())),
        };
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|err| ArchiveError::ManifestParse(err.to_string()))?;
        serde_json::from_slice(&raw).map_err(|err| ArchiveError::ManifestParse(err.to_string()))?
    };
    manifest.validate().map_err(ArchiveError::ManifestInvalid)?;

    let mut assets = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| ArchiveError::Container(err.to_string()))?;
        if entry.is_dir() || entry.name() == MANIFEST_ENTRY {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|err| ArchiveError::Container(err.to_string()))?;
        assets.insert(name, bytes);
    }

    Ok((manifest, assets))
}

fn map_zip_error(err: ZipError, operation: &str) -> AppError {
    AppError::from(err).with_context("operation", operation.to_string())
}
