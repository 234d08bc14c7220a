//! Upload session - staged files and their transfer state.
//!
//! `start()` pushes every staged file through the sender without waiting
//! for replies. Progress and completion replies arrive separately through
//! [`UploadSession::run`] and drive the per-file state. When every staged
//! file is completed the batch is finished: the set is cleared and the
//! refresh listener is notified once.

use crate::error::UploadError;
use crate::streaming::channel::{
    session_event_channel, FileJob, SessionEvent, SessionEventReceiver, SessionEventSender,
};
use crate::streaming::planner::ChunkPlanner;
use crate::streaming::sender::{Sender, SenderConfig};
use crate::transport::connection::{ConnectionEvent, FrameSink};
use crate::transport::response::{CompletionResponse, ProgressResponse};
use crate::upload::file::{FileSnapshot, SelectedFile, UploadStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// Told once per finished batch that the stored listing changed.
#[async_trait]
pub trait RefreshListener: Send + Sync {
    async fn refresh(&self);
}

/// Refresh listener that does nothing.
pub struct NoRefresh;

#[async_trait]
impl RefreshListener for NoRefresh {
    async fn refresh(&self) {}
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub planner: ChunkPlanner,
    /// MIME allow-list, compared case-insensitively
    pub accepted_types: Vec<String>,
}

/// Outcome of one `stage` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub accepted: usize,
    pub duplicates: usize,
    /// Files whose MIME type is not accepted
    pub rejected: usize,
}

impl StageReport {
    /// Batch-level warning shown to the user when files were rejected.
    pub fn warning(&self) -> Option<String> {
        (self.rejected > 0).then(|| {
            format!(
                "{} file(s) were ignored. Only images and videos are allowed.",
                self.rejected
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { files: usize },
    AlreadyUploading,
    NothingStaged,
}

#[derive(Default)]
struct State {
    files: Vec<SelectedFile>,
    uploading: bool,
}

pub struct UploadSession<S: FrameSink> {
    state: Mutex<State>,
    sender: Sender,
    sink: S,
    accepted_types: Vec<String>,
    refresh: Arc<dyn RefreshListener>,
    events: SessionEventSender,
}

impl<S: FrameSink> UploadSession<S> {
    pub fn new(config: SessionConfig, sink: S, refresh: Arc<dyn RefreshListener>) -> Self {
        let (events, _) = session_event_channel();
        Self {
            state: Mutex::new(State::default()),
            sender: Sender::new(SenderConfig {
                planner: config.planner,
            }),
            sink,
            accepted_types: config
                .accepted_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            refresh,
            events,
        }
    }

    pub fn subscribe(&self) -> SessionEventReceiver {
        self.events.subscribe()
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        let lower = content_type.to_ascii_lowercase();
        self.accepted_types.iter().any(|t| *t == lower)
    }

    /// Check a single file against the allow-list.
    pub fn check_type(&self, file: &SelectedFile) -> Result<(), UploadError> {
        if self.accepts(&file.content_type) {
            Ok(())
        } else {
            Err(UploadError::UnsupportedFileType {
                name: file.name.clone(),
                content_type: file.content_type.clone(),
            })
        }
    }

    /// Add files to the staged set. Unsupported types are skipped and
    /// counted; files matching a staged entry by name and size are dropped.
    pub async fn stage(&self, files: impl IntoIterator<Item = SelectedFile>) -> StageReport {
        let mut report = StageReport::default();
        let mut state = self.state.lock().await;

        for mut file in files {
            if let Err(e) = self.check_type(&file) {
                debug!("{}", e);
                report.rejected += 1;
                continue;
            }
            if state.files.iter().any(|f| f.is_duplicate_of(&file)) {
                debug!("Skipping duplicate {} ({} bytes)", file.name, file.size);
                report.duplicates += 1;
                continue;
            }
            file.status = UploadStatus::Pending;
            file.progress = 0;
            file.error = None;
            state.files.push(file);
            report.accepted += 1;
        }

        if let Some(warning) = report.warning() {
            warn!("{}", warning);
        }
        report
    }

    /// Send every staged file. Returns once all frames are handed to the
    /// connection; completion is reported later through `run`.
    pub async fn start(&self) -> StartOutcome {
        let jobs: Vec<FileJob> = {
            let mut state = self.state.lock().await;
            if state.uploading {
                debug!("Upload already in progress");
                return StartOutcome::AlreadyUploading;
            }
            if state.files.is_empty() {
                return StartOutcome::NothingStaged;
            }
            state.uploading = true;
            for file in state.files.iter_mut() {
                file.status = UploadStatus::Uploading;
                file.error = None;
            }
            state.files.iter().map(FileJob::from).collect()
        };

        info!("Uploading {} file(s)", jobs.len());
        for job in &jobs {
            self.send_job(job).await;
        }
        StartOutcome::Started { files: jobs.len() }
    }

    async fn send_job(&self, job: &FileJob) {
        let mut dropped = 0u32;
        let result = self
            .sender
            .send_file(job, |frame| match self.sink.send(frame) {
                Err(UploadError::ConnectionNotOpen) => {
                    dropped += 1;
                    Ok(())
                }
                other => other,
            })
            .await;

        match result {
            Ok(summary) => {
                if dropped > 0 {
                    warn!(
                        "{}: {} of {} frame(s) dropped, connection not open",
                        job.name, dropped, summary.frames
                    );
                }
                debug!("{}: {} frame(s) handed off", job.name, summary.frames);
            }
            Err(e) => {
                error!("Failed to send {}: {}", job.name, e);
                self.mark_failed(job, e.to_string()).await;
            }
        }
    }

    async fn mark_failed(&self, job: &FileJob, message: String) {
        let mut state = self.state.lock().await;
        if let Some(file) = state
            .files
            .iter_mut()
            .find(|f| f.name == job.name && f.size == job.size && !f.is_completed())
        {
            file.status = UploadStatus::Failed;
            file.error = Some(message.clone());
            let _ = self.events.send(SessionEvent::FileFailed {
                name: job.name.clone(),
                error: message,
            });
        }
    }

    /// Apply a progress reply. Unknown names are ignored and progress never
    /// goes down.
    pub async fn handle_progress(&self, progress: &ProgressResponse) {
        let Some(percent) = progress.percent() else {
            debug!("Ignoring progress with zero chunks for {}", progress.filename);
            return;
        };

        let mut state = self.state.lock().await;
        let Some(idx) = find_open_entry(&state.files, &progress.filename) else {
            debug!("Progress for unknown file {}", progress.filename);
            return;
        };
        let file = &mut state.files[idx];
        if percent > file.progress {
            file.progress = percent;
            let _ = self.events.send(SessionEvent::FileProgress {
                name: file.name.clone(),
                progress: percent,
            });
        }
    }

    /// Apply a completion reply; finishes the batch when it was the last one.
    pub async fn handle_completion(&self, completion: &CompletionResponse) {
        let finished = {
            let mut state = self.state.lock().await;
            let Some(idx) = find_open_entry(&state.files, completion.filename()) else {
                debug!("Completion for unknown file {}", completion.filename());
                return;
            };
            let file = &mut state.files[idx];
            file.status = UploadStatus::Completed;
            file.progress = 100;
            file.error = None;
            let _ = self.events.send(SessionEvent::FileCompleted {
                name: file.name.clone(),
            });
            self.finish_if_complete(&mut state)
        };

        if finished {
            self.refresh.refresh().await;
        }
    }

    /// Drop every staged entry with this name. Frames already sent are not
    /// recalled. Returns how many entries were removed.
    pub async fn remove(&self, name: &str) -> usize {
        let finished;
        let removed = {
            let mut state = self.state.lock().await;
            let before = state.files.len();
            state.files.retain(|f| f.name != name);
            let removed = before - state.files.len();
            if state.files.is_empty() {
                state.uploading = false;
            }
            finished = self.finish_if_complete(&mut state);
            removed
        };
        if finished {
            self.refresh.refresh().await;
        }
        removed
    }

    /// Drop all staged entries and end the current transfer pass.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.files.clear();
        state.uploading = false;
    }

    pub async fn is_uploading(&self) -> bool {
        self.state.lock().await.uploading
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.files.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.files.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<FileSnapshot> {
        self.state
            .lock()
            .await
            .files
            .iter()
            .map(FileSnapshot::from)
            .collect()
    }

    /// Consume connection events until the connection goes away.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Progress(p)) => self.handle_progress(&p).await,
                Ok(ConnectionEvent::Completion(c)) => self.handle_completion(&c).await,
                Ok(ConnectionEvent::State(s)) => debug!("Connection is {:?}", s),
                Ok(ConnectionEvent::Text(_)) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!("Missed {} connection event(s); progress may be stale", n)
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Clears the set when every entry is completed. Caller holds the lock.
    fn finish_if_complete(&self, state: &mut State) -> bool {
        if state.files.is_empty() || !state.files.iter().all(SelectedFile::is_completed) {
            return false;
        }
        let count = state.files.len();
        state.files.clear();
        state.uploading = false;
        info!("Batch of {} file(s) finished", count);
        let _ = self.events.send(SessionEvent::BatchFinished { files: count });
        true
    }
}

/// First entry with this name that has not completed, preferring entries
/// that are currently uploading.
fn find_open_entry(files: &[SelectedFile], name: &str) -> Option<usize> {
    files
        .iter()
        .position(|f| f.name == name && f.status == UploadStatus::Uploading)
        .or_else(|| {
            files
                .iter()
                .position(|f| f.name == name && !f.is_completed())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ACCEPTED_TYPES;
    use crate::error::Result;
    use crate::streaming::protocol::Frame;
    use crate::transport::response::PhotoInfo;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        closed: AtomicBool,
        frames: StdMutex<Vec<Bytes>>,
    }

    impl FrameSink for Arc<RecordingSink> {
        fn send(&self, frame: Bytes) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(UploadError::ConnectionNotOpen);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRefresh(AtomicUsize);

    #[async_trait]
    impl RefreshListener for CountingRefresh {
        async fn refresh(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        session: UploadSession<Arc<RecordingSink>>,
        sink: Arc<RecordingSink>,
        refresh: Arc<CountingRefresh>,
    }

    fn fixture(threshold: u64) -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let refresh = Arc::new(CountingRefresh::default());
        let session = UploadSession::new(
            SessionConfig {
                planner: ChunkPlanner::new(threshold).unwrap(),
                accepted_types: DEFAULT_ACCEPTED_TYPES.iter().map(|s| s.to_string()).collect(),
            },
            sink.clone(),
            refresh.clone(),
        );
        Fixture {
            session,
            sink,
            refresh,
        }
    }

    fn jpeg(name: &str, size: usize) -> SelectedFile {
        SelectedFile::from_bytes(name, "image/jpeg", vec![0u8; size])
    }

    fn progress(name: &str, sent: u32, total: u32) -> ProgressResponse {
        ProgressResponse {
            filename: name.to_string(),
            chunks_sent: sent,
            total_chunks: total,
        }
    }

    fn completion(name: &str) -> CompletionResponse {
        CompletionResponse {
            photo: PhotoInfo {
                original_filename: name.to_string(),
                id: None,
                created_at: None,
                file_path: None,
                content_type: None,
                size: None,
            },
            message: "saved".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identical_name_and_size_staged_once() {
        let f = fixture(1024);
        let report = f.session.stage([jpeg("a.jpg", 2000), jpeg("a.jpg", 2000)]).await;

        assert_eq!(report.accepted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(f.session.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_name_different_size_staged_twice() {
        let f = fixture(1024);
        f.session.stage([jpeg("a.jpg", 2000)]).await;
        let report = f.session.stage([jpeg("a.jpg", 2001)]).await;

        assert_eq!(report.accepted, 1);
        assert_eq!(f.session.len().await, 2);
    }

    #[tokio::test]
    async fn test_unsupported_types_rejected_with_warning() {
        let f = fixture(1024);
        let report = f
            .session
            .stage([
                SelectedFile::from_bytes("doc.pdf", "application/pdf", vec![1u8; 10]),
                SelectedFile::from_bytes("b.PNG", "IMAGE/PNG", vec![1u8; 10]),
                SelectedFile::from_bytes("c.txt", "text/plain", vec![1u8; 10]),
            ])
            .await;

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(
            report.warning().unwrap(),
            "2 file(s) were ignored. Only images and videos are allowed."
        );
        let snapshot = f.session.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_check_type_error() {
        let f = fixture(1024);
        let err = f
            .session
            .check_type(&SelectedFile::from_bytes("x.bmp", "image/bmp", vec![0u8]))
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedFileType { .. }));
    }

    #[tokio::test]
    async fn test_start_with_nothing_staged() {
        let f = fixture(1024);
        assert_eq!(f.session.start().await, StartOutcome::NothingStaged);
        assert!(!f.session.is_uploading().await);
    }

    #[tokio::test]
    async fn test_start_sends_frames_and_marks_uploading() {
        let f = fixture(1000);
        f.session.stage([jpeg("small.jpg", 10), jpeg("big.jpg", 2500)]).await;

        assert_eq!(f.session.start().await, StartOutcome::Started { files: 2 });
        assert!(f.session.is_uploading().await);

        let frames = f.sink.frames.lock().unwrap().clone();
        // 1 whole-file frame + 3 chunk frames, in file order
        assert_eq!(frames.len(), 4);
        assert!(matches!(Frame::decode(frames[0].clone()).unwrap(), Frame::WholeFile(_)));
        for (i, frame) in frames[1..].iter().enumerate() {
            match Frame::decode(frame.clone()).unwrap() {
                Frame::Chunk(c) => assert_eq!(c.chunk_index as usize, i + 1),
                Frame::WholeFile(_) => panic!("Expected chunk frame"),
            }
        }

        for file in f.session.snapshot().await {
            assert_eq!(file.status, UploadStatus::Uploading);
        }
    }

    #[tokio::test]
    async fn test_start_while_uploading_is_noop() {
        let f = fixture(1024);
        f.session.stage([jpeg("a.jpg", 10)]).await;
        f.session.start().await;
        assert_eq!(f.session.start().await, StartOutcome::AlreadyUploading);
        assert_eq!(f.sink.frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_frames_dropped_when_connection_closed() {
        let f = fixture(1024);
        f.sink.closed.store(true, Ordering::SeqCst);
        f.session.stage([jpeg("a.jpg", 10)]).await;

        assert_eq!(f.session.start().await, StartOutcome::Started { files: 1 });
        assert!(f.sink.frames.lock().unwrap().is_empty());
        // no failure signal: the file just never completes
        assert_eq!(f.session.snapshot().await[0].status, UploadStatus::Uploading);
    }

    #[tokio::test]
    async fn test_unreadable_file_marked_failed() {
        let f = fixture(1024);
        let ghost = SelectedFile::new(
            "ghost.jpg",
            10,
            "image/jpeg",
            crate::upload::file::MediaSource::Path("/nonexistent/ghost.jpg".into()),
        );
        f.session.stage([ghost, jpeg("ok.jpg", 10)]).await;
        f.session.start().await;

        let snapshot = f.session.snapshot().await;
        assert_eq!(snapshot[0].status, UploadStatus::Failed);
        assert!(snapshot[0].error.is_some());
        assert_eq!(snapshot[1].status, UploadStatus::Uploading);
        assert_eq!(f.sink.frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_100() {
        let f = fixture(1024);
        f.session.stage([jpeg("v.jpg", 4000)]).await;
        f.session.start().await;

        let mut seen = Vec::new();
        for sent in 1..=4 {
            f.session.handle_progress(&progress("v.jpg", sent, 4)).await;
            seen.push(f.session.snapshot().await[0].progress);
        }
        assert_eq!(seen, vec![25, 50, 75, 100]);

        // a late, stale reply does not move progress back
        f.session.handle_progress(&progress("v.jpg", 2, 4)).await;
        assert_eq!(f.session.snapshot().await[0].progress, 100);
        assert_eq!(f.session.snapshot().await[0].status, UploadStatus::Uploading);
    }

    #[tokio::test]
    async fn test_progress_for_unknown_file_ignored() {
        let f = fixture(1024);
        f.session.stage([jpeg("a.jpg", 10)]).await;
        f.session.handle_progress(&progress("other.jpg", 1, 2)).await;
        f.session.handle_progress(&progress("a.jpg", 0, 0)).await;
        assert_eq!(f.session.snapshot().await[0].progress, 0);
    }

    #[tokio::test]
    async fn test_batch_finishes_exactly_once_after_last_completion() {
        let f = fixture(1024);
        let mut events = f.session.subscribe();
        f.session
            .stage([jpeg("a.jpg", 10), jpeg("b.jpg", 10), jpeg("c.jpg", 10)])
            .await;
        f.session.start().await;

        f.session.handle_completion(&completion("a.jpg")).await;
        f.session.handle_completion(&completion("outsider.jpg")).await;
        f.session.handle_completion(&completion("b.jpg")).await;
        // repeat for an already completed file does not count
        f.session.handle_completion(&completion("b.jpg")).await;
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 0);
        assert_eq!(f.session.len().await, 3);

        f.session.handle_completion(&completion("c.jpg")).await;
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 1);
        assert!(f.session.is_empty().await);
        assert!(!f.session.is_uploading().await);

        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::BatchFinished { files: 3 }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn test_same_name_entries_complete_one_at_a_time() {
        let f = fixture(1024);
        f.session.stage([jpeg("a.jpg", 10), jpeg("a.jpg", 20)]).await;
        f.session.start().await;

        f.session.handle_completion(&completion("a.jpg")).await;
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 0);
        f.session.handle_completion(&completion("a.jpg")).await;
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let f = fixture(1024);
        f.session.stage([jpeg("a.jpg", 10), jpeg("b.jpg", 10)]).await;
        assert_eq!(f.session.remove("a.jpg").await, 1);
        assert_eq!(f.session.remove("missing.jpg").await, 0);
        assert_eq!(f.session.len().await, 1);

        f.session.start().await;
        f.session.clear().await;
        assert!(f.session.is_empty().await);
        assert!(!f.session.is_uploading().await);
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_removing_last_pending_file_finishes_batch() {
        let f = fixture(1024);
        f.session.stage([jpeg("a.jpg", 10), jpeg("b.jpg", 10)]).await;
        f.session.start().await;
        f.session.handle_completion(&completion("a.jpg")).await;

        f.session.remove("b.jpg").await;
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 1);
        assert!(f.session.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_consumes_connection_events() {
        let f = fixture(1024);
        let refresh = f.refresh.clone();
        let session = Arc::new(f.session);
        session.stage([jpeg("a.jpg", 10)]).await;
        session.start().await;

        let (tx, rx) = broadcast::channel(16);
        let task = tokio::spawn(session.clone().run(rx));

        tx.send(ConnectionEvent::Text("hi".to_string())).unwrap();
        tx.send(ConnectionEvent::Progress(progress("a.jpg", 1, 1))).unwrap();
        tx.send(ConnectionEvent::Completion(completion("a.jpg"))).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(refresh.0.load(Ordering::SeqCst), 1);
        assert!(session.is_empty().await);
    }
}
