//! Channel types between the upload session, the sender and observers.

use crate::streaming::protocol::TransferId;
use crate::upload::file::{MediaSource, SelectedFile};
use tokio::sync::broadcast;

/// Capacity of the session event broadcast channel
pub const SESSION_EVENT_CHANNEL_SIZE: usize = 256;

// =============================================================================
// FileJob: Session -> Sender
// =============================================================================

/// Everything the sender needs to put one file on the wire.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub name: String,
    pub content_type: String,
    /// Declared size at staging time
    pub size: u64,
    pub source: MediaSource,
}

impl From<&SelectedFile> for FileJob {
    fn from(f: &SelectedFile) -> Self {
        Self {
            name: f.name.clone(),
            content_type: f.content_type.clone(),
            size: f.size,
            source: f.source.clone(),
        }
    }
}

/// What the sender did with one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendSummary {
    /// Frames handed to the sink
    pub frames: u32,
    /// Content bytes carried by those frames
    pub bytes: u64,
    /// Set for chunked transfers
    pub transfer_id: Option<TransferId>,
}

// =============================================================================
// Session events: Session -> observers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Progress of one staged file changed
    FileProgress { name: String, progress: u8 },

    /// Server stored the file
    FileCompleted { name: String },

    /// File content could not be read or encoded
    FileFailed { name: String, error: String },

    /// Every staged file completed; the staged set was cleared
    BatchFinished { files: usize },
}

pub type SessionEventSender = broadcast::Sender<SessionEvent>;
pub type SessionEventReceiver = broadcast::Receiver<SessionEvent>;

pub fn session_event_channel() -> (SessionEventSender, SessionEventReceiver) {
    broadcast::channel(SESSION_EVENT_CHANNEL_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_job_from_selected_file() {
        let file = SelectedFile::from_bytes("a.jpg", "image/jpeg", vec![0u8; 42]);
        let job = FileJob::from(&file);
        assert_eq!(job.name, "a.jpg");
        assert_eq!(job.content_type, "image/jpeg");
        assert_eq!(job.size, 42);
    }

    #[tokio::test]
    async fn test_session_event_channel() {
        let (tx, mut rx) = session_event_channel();
        tx.send(SessionEvent::FileCompleted {
            name: "a.jpg".to_string(),
        })
        .unwrap();
        drop(tx);

        match rx.recv().await.unwrap() {
            SessionEvent::FileCompleted { name } => assert_eq!(name, "a.jpg"),
            other => panic!("Expected FileCompleted, got {:?}", other),
        }
    }
}
