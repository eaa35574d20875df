use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{AppError, AppResult};

pub const ERR_FILENAME_INVALID: &str = "ASSETS/FILENAME_INVALID";
pub const ERR_NAME_TOO_LONG: &str = "ASSETS/NAME_TOO_LONG";

pub const MAX_NAME_BYTES: usize = 255;

/// Flat store for uploaded binaries (violation photos, school logos), keyed
/// by the opaque filename chosen at upload time. The store never invents
/// names; it only resolves the ones it is handed.
#[derive(Debug, Clone)]
pub struct AssetStore {
    base: PathBuf,
}

impl AssetStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Validate a filename and return its absolute path inside the store.
    /// Names are single path components: separators, traversal, leading dots
    /// and control characters are refused.
    pub fn resolve(&self, filename: &str) -> AppResult<PathBuf> {
        validate_name(filename)?;
        Ok(self.base.join(filename))
    }

    pub fn exists(&self, filename: &str) -> AppResult<bool> {
        Ok(self.resolve(filename)?.is_file())
    }

    pub fn read(&self, filename: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(filename)?;
        fs::read(&path).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "asset_read")
                .with_context("path", path.display().to_string())
        })
    }

    pub fn write(&self, filename: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.resolve(filename)?;
        fs::create_dir_all(&self.base).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "asset_dir_create")
                .with_context("path", self.base.display().to_string())
        })?;
        fs::write(&path, bytes).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "asset_write")
                .with_context("path", path.display().to_string())
        })?;
        info!(
            target: "tatib",
            event = "asset_written",
            filename = filename,
            bytes = bytes.len()
        );
        Ok(())
    }
}

fn validate_name(filename: &str) -> AppResult<()> {
    if filename.is_empty() || filename.starts_with('.') {
        return Err(invalid(filename, "empty or hidden name"));
    }
    if filename.len() > MAX_NAME_BYTES {
        return Err(AppError::new(ERR_NAME_TOO_LONG, "Asset name too long")
            .with_context("limit", MAX_NAME_BYTES.to_string()));
    }
    if filename.contains(['/', '\\']) || filename.contains("..") {
        return Err(invalid(filename, "path separator or traversal"));
    }
    if filename.chars().any(|c| c.is_control()) {
        return Err(invalid(filename, "control character"));
    }
    Ok(())
}

fn invalid(filename: &str, reason: &str) -> AppError {
    AppError::new(ERR_FILENAME_INVALID, "Asset name rejected")
        .with_context("filename", filename.to_string())
        .with_context("reason", reason.to_string())
}
