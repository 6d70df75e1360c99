//! File storage for profile photos.
//!
//! Stored names are relative to the media root (`profile_photos/7_1700000000123.png`)
//! and are what the `users.profile_photo` column holds.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Upload directory below the media root.
pub const PROFILE_PHOTO_DIR: &str = "profile_photos";

/// Largest accepted profile photo.
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

/// Request body limit for routes accepting a photo, with room for the
/// multipart framing and the other form fields.
pub const MAX_UPLOAD_BODY_BYTES: usize = MAX_PHOTO_BYTES + 64 * 1024;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid storage name: {0}")]
    InvalidName(String),
}

/// Image formats accepted for profile photos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
}

impl ImageFormat {
    /// Detects the format from the leading bytes of the file.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::WebP)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::WebP => "webp",
        }
    }
}

/// Local directory storage with a public URL prefix.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of a stored name.
    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.url_prefix, name.trim_start_matches('/'))
    }

    /// Writes the bytes under `dir/file_stem.ext` and returns the stored name.
    pub async fn save(&self, dir: &str, file_stem: &str, extension: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let name = format!("{}/{}.{}", dir, file_stem, extension);
        let path = self.resolve(&name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io { path: parent.to_path_buf(), source })?;
        }

        debug!("Writing {} bytes to {}", bytes.len(), path.display());
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Io { path: path.clone(), source })?;

        Ok(name)
    }

    /// Removes a stored file. Missing files are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Stored file {} already gone", path.display());
                Ok(())
            }
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Maps a stored name to a path below the root, refusing anything that
    /// could escape it.
    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}
