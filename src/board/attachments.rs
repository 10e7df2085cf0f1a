//! Local attachment storage with an extension/MIME allow-list and a size cap.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::{BoardError, Result};

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 8] =
    ["jpeg", "jpg", "png", "gif", "pdf", "doc", "docx", "txt"];

const OCTET_STREAM: &str = "application/octet-stream";

/// Which uploads are accepted.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Lowercased extension of an uploaded file name.
fn extension_of(original_name: &str) -> Option<String> {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

impl UploadPolicy {
    /// Check an upload and return the extension and the MIME type to store.
    ///
    /// The extension must be allow-listed and a declared MIME type must be one
    /// the extension maps to. A missing or generic declared type is replaced
    /// by the extension's primary type.
    pub fn check(
        &self,
        original_name: &str,
        declared_mime: Option<&str>,
        size: u64,
    ) -> Result<(String, String)> {
        let declared = declared_mime
            .and_then(|m| m.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty() && m != OCTET_STREAM);

        let extension = extension_of(original_name)
            .filter(|ext| self.allowed_extensions.iter().any(|a| a == ext))
            .ok_or_else(|| BoardError::UnsupportedMediaType {
                mime: declared.clone().unwrap_or_else(|| OCTET_STREAM.to_string()),
            })?;

        let guesses = mime_guess::from_ext(&extension);
        let mime_type = match declared {
            None => guesses.first_or_octet_stream().essence_str().to_string(),
            Some(mime) if guesses.iter().any(|g| g.essence_str() == mime) => mime,
            Some(mime) => return Err(BoardError::UnsupportedMediaType { mime }),
        };

        if size > self.max_bytes {
            return Err(BoardError::PayloadTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok((extension, mime_type))
    }
}

/// A stored upload, ready to be recorded as an attachment.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub url: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
    policy: UploadPolicy,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>, policy: UploadPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Public URL a stored file is served under.
    pub fn url_for(filename: &str) -> String {
        format!("/uploads/{}", filename)
    }

    fn stored_filename(extension: &str) -> String {
        format!(
            "file-{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple(),
            extension
        )
    }

    /// Validate and write an upload under a generated file name.
    pub async fn save(
        &self,
        original_name: &str,
        declared_mime: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredFile> {
        let size = bytes.len() as u64;
        let (extension, mime_type) = self.policy.check(original_name, declared_mime, size)?;
        let filename = Self::stored_filename(&extension);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create uploads dir {}", self.dir.display()))?;
        tokio::fs::write(self.dir.join(&filename), bytes)
            .await
            .with_context(|| format!("Failed to write upload {}", filename))?;
        debug!(filename = %filename, size, mime_type = %mime_type, "Stored upload");

        Ok(StoredFile {
            url: Self::url_for(&filename),
            filename,
            mime_type,
            size,
        })
    }

    /// Best-effort removal of a stored file.
    pub async fn remove(&self, filename: &str) {
        if let Err(e) = tokio::fs::remove_file(self.dir.join(filename)).await {
            warn!(filename, error = %e, "Failed to remove stored upload");
        }
    }
}
