//! WebSocket transport to the media server.

pub mod connection;
pub mod response;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState,
    FrameSink, DEFAULT_RECONNECT_DELAY,
};
pub use response::{CompletionResponse, PhotoInfo, ProgressResponse, ServerMessage};
