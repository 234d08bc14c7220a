//! Sender for media uploads.
//!
//! Takes a FileJob, asks the planner for a plan, reads the content and hands
//! encoded frames to a callback. Frames of one file are emitted in ascending
//! chunk order and all of them before the call returns; nothing waits for a
//! server reply.

use crate::error::Result;
use crate::streaming::channel::{FileJob, SendSummary};
use crate::streaming::planner::{ChunkPlan, ChunkPlanner, TransferPlan};
use crate::streaming::protocol::{ChunkFrame, WholeFileFrame};
use bytes::Bytes;
use tracing::{debug, warn};

/// Sender configuration
#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    pub planner: ChunkPlanner,
}

/// Sender state
pub struct Sender {
    config: SenderConfig,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Self {
        Self { config }
    }

    pub fn planner(&self) -> &ChunkPlanner {
        &self.config.planner
    }

    /// Encode one file into frames and pass each to `on_frame`.
    pub async fn send_file<F>(&self, job: &FileJob, mut on_frame: F) -> Result<SendSummary>
    where
        F: FnMut(Bytes) -> Result<()>,
    {
        match self.config.planner.plan(job.size) {
            TransferPlan::WholeFile => self.send_whole(job, &mut on_frame).await,
            TransferPlan::Chunked(plan) => self.send_chunked(job, &plan, &mut on_frame).await,
        }
    }

    async fn send_whole<F>(&self, job: &FileJob, on_frame: &mut F) -> Result<SendSummary>
    where
        F: FnMut(Bytes) -> Result<()>,
    {
        let content = job.source.read_all().await?;
        if content.len() as u64 != job.size {
            warn!(
                "{} changed size since staging: {} -> {} bytes",
                job.name,
                job.size,
                content.len()
            );
        }

        let frame = WholeFileFrame {
            filename: job.name.clone(),
            content_type: job.content_type.clone(),
            content,
        };
        let bytes = frame.content.len() as u64;
        on_frame(frame.encode()?)?;
        debug!("Sent whole-file frame for {} ({} bytes)", job.name, bytes);

        Ok(SendSummary {
            frames: 1,
            bytes,
            transfer_id: None,
        })
    }

    async fn send_chunked<F>(
        &self,
        job: &FileJob,
        plan: &ChunkPlan,
        on_frame: &mut F,
    ) -> Result<SendSummary>
    where
        F: FnMut(Bytes) -> Result<()>,
    {
        debug!(
            "Sending {} in {} chunks (transfer {})",
            job.name, plan.total_chunks, plan.transfer_id
        );

        let mut summary = SendSummary {
            transfer_id: Some(plan.transfer_id),
            ..Default::default()
        };

        for chunk in plan.chunks() {
            let content = job.source.read_range(chunk.range.clone()).await?;
            let frame = ChunkFrame {
                transfer_id: plan.transfer_id,
                filename: job.name.clone(),
                content_type: job.content_type.clone(),
                total_size: plan.file_size,
                chunk_index: chunk.index,
                total_chunks: plan.total_chunks,
                content,
            };
            on_frame(frame.encode()?)?;

            summary.frames += 1;
            summary.bytes += chunk.len();
            debug!(
                "{} chunk {}/{} sent ({} bytes)",
                job.name,
                chunk.index,
                plan.total_chunks,
                chunk.len()
            );
        }

        Ok(summary)
    }
}
