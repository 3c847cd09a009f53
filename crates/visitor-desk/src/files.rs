//! Opaque document file storage: upload bytes at a path, read them back, resolve a public URL.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mime::Mime;

use crate::workflows::confirmations::domain::{DocumentId, DocumentVersionId};

#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &Mime,
    ) -> Result<(), StorageError>;

    /// Bytes stored at `path`, or `None` when nothing was uploaded there.
    async fn download(&self, path: &str) -> Result<Option<StoredFile>, StorageError>;

    fn public_url(&self, path: &str) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),
    #[error("uploaded file is empty")]
    Empty,
    #[error("invalid storage path '{0}'")]
    InvalidPath(String),
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts PDFs, images and plain text; everything else is rejected before upload.
pub fn parse_content_type(raw: &str) -> Result<Mime, StorageError> {
    let parsed: Mime = raw
        .trim()
        .parse()
        .map_err(|_| StorageError::UnsupportedContentType(raw.to_string()))?;

    let accepted = parsed.essence_str() == mime::APPLICATION_PDF.essence_str()
        || parsed.type_() == mime::IMAGE
        || parsed.essence_str() == mime::TEXT_PLAIN.essence_str();

    if accepted {
        Ok(parsed)
    } else {
        Err(StorageError::UnsupportedContentType(raw.to_string()))
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn version_path(
    document_id: DocumentId,
    version_id: DocumentVersionId,
    file_name: &str,
) -> String {
    format!(
        "documents/{document_id}/{version_id}-{}",
        sanitize_file_name(file_name)
    )
}

/// Content type served for a stored file, guessed from its extension.
pub fn content_type_for_path(path: &str) -> Mime {
    let extension = Path::new(path)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => mime::APPLICATION_PDF,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("svg") => mime::IMAGE_SVG,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn join_public_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Files on local disk under `root`, served from `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalDocumentStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDocumentStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if path.is_empty() || !safe {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStorage for LocalDocumentStorage {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &Mime,
    ) -> Result<(), StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Option<StoredFile>, StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(StoredFile {
                bytes,
                content_type: content_type_for_path(path).to_string(),
            })),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn public_url(&self, path: &str) -> String {
        join_public_url(&self.public_base_url, path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps uploads in memory; used by tests and the CLI demo wiring.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStorage {
    files: Arc<Mutex<HashMap<String, StoredFile>>>,
    public_base_url: String,
}

impl MemoryDocumentStorage {
    pub fn with_base_url(public_base_url: impl Into<String>) -> Self {
        Self {
            files: Arc::default(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn get(&self, path: &str) -> Option<StoredFile> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(path).cloned())
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &Mime,
    ) -> Result<(), StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        let mut files = self
            .files
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("file map poisoned")))?;
        files.insert(
            path.to_string(),
            StoredFile {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Option<StoredFile>, StorageError> {
        Ok(self.get(path))
    }

    fn public_url(&self, path: &str) -> String {
        join_public_url(&self.public_base_url, path)
    }
}
