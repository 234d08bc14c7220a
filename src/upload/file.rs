//! Files staged for upload and where their bytes come from.

use bytes::Bytes;
use serde::Serialize;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Coarse media category derived from a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_mime(content_type: &str) -> Self {
        let lower = content_type.to_ascii_lowercase();
        if lower.starts_with("image/") {
            MediaKind::Image
        } else if lower.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// Raw bytes of a staged file.
#[derive(Debug, Clone)]
pub enum MediaSource {
    Path(PathBuf),
    Memory(Bytes),
}

impl MediaSource {
    /// Read the whole content.
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match self {
            MediaSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            MediaSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    /// Read one byte range without loading the rest of the file.
    pub async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        match self {
            MediaSource::Path(path) => read_file_range(path, range).await,
            MediaSource::Memory(bytes) => {
                let end = range.end as usize;
                if end > bytes.len() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("range end {} past buffer length {}", end, bytes.len()),
                    ));
                }
                Ok(bytes.slice(range.start as usize..end))
            }
        }
    }
}

async fn read_file_range(path: &Path, range: Range<u64>) -> std::io::Result<Bytes> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// One file staged for upload, with its mutable transfer state.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub kind: MediaKind,
    pub source: MediaSource,
    pub status: UploadStatus,
    /// 0..=100
    pub progress: u8,
    pub error: Option<String>,
}

impl SelectedFile {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
        source: MediaSource,
    ) -> Self {
        let content_type = content_type.into();
        Self {
            name: name.into(),
            size,
            kind: MediaKind::from_mime(&content_type),
            content_type,
            source,
            status: UploadStatus::Pending,
            progress: 0,
            error: None,
        }
    }

    /// In-memory file; size is taken from the buffer.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        let content = content.into();
        Self::new(
            name,
            content.len() as u64,
            content_type,
            MediaSource::Memory(content),
        )
    }

    /// File on disk; size and name come from the filesystem.
    pub async fn from_path(path: impl AsRef<Path>, content_type: impl Into<String>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(
            name,
            meta.len(),
            content_type,
            MediaSource::Path(path.to_path_buf()),
        ))
    }

    /// Same name and same size.
    pub fn is_duplicate_of(&self, other: &SelectedFile) -> bool {
        self.name == other.name && self.size == other.size
    }

    pub fn is_completed(&self) -> bool {
        self.status == UploadStatus::Completed
    }
}

/// Read-only view of a staged file, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnapshot {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub kind: MediaKind,
    pub status: UploadStatus,
    pub progress: u8,
    pub error: Option<String>,
}

impl From<&SelectedFile> for FileSnapshot {
    fn from(f: &SelectedFile) -> Self {
        Self {
            name: f.name.clone(),
            size: f.size,
            content_type: f.content_type.clone(),
            kind: f.kind,
            status: f.status,
            progress: f.progress,
            error: f.error.clone(),
        }
    }
}

/// Best-effort MIME type from a file extension, limited to the media types
/// the server accepts. Unknown extensions map to `application/octet-stream`.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/avi",
        "mov" => "video/mov",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
