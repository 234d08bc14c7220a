//! Binary frame protocol for media uploads.
//!
//! Every WebSocket binary message carries exactly one frame. Files up to the
//! chunk threshold go out as a single whole-file frame; larger files are
//! split into fixed-size chunk frames that share one transfer id.
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +--------------+     +--------------+
//! |   Planner    | --> |    Sender    | --> |  FrameSink   |
//! | (chunk plan) |     | (read/encode)|     | (websocket)  |
//! +--------------+     +--------------+     +--------------+
//! ```
//!
//! All integers are big-endian and signed on the wire. There is no
//! handshake and no version field.

pub mod channel;
pub mod planner;
pub mod protocol;
pub mod sender;

pub use channel::{
    session_event_channel, FileJob, SendSummary, SessionEvent, SessionEventReceiver,
    SessionEventSender, SESSION_EVENT_CHANNEL_SIZE,
};
pub use planner::{ChunkPlan, ChunkPlanner, ChunkRange, TransferPlan};
pub use protocol::{
    ChunkFrame, Frame, FrameKind, TransferId, WholeFileFrame, CHUNK_HEADER_LEN, TRANSFER_ID_LEN,
    WHOLE_FILE_HEADER_LEN,
};
pub use sender::{Sender, SenderConfig};
