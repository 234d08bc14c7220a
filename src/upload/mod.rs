//! Staged media files and the upload session that drives them.

pub mod file;
pub mod pipeline;
pub mod session;

pub use file::{guess_content_type, FileSnapshot, MediaKind, MediaSource, SelectedFile, UploadStatus};
pub use pipeline::{ClientSession, UploadPipeline};
pub use session::{
    NoRefresh, RefreshListener, SessionConfig, StageReport, StartOutcome, UploadSession,
};
