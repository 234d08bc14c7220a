use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported file type for {name}: {content_type}")]
    UnsupportedFileType { name: String, content_type: String },

    #[error("Truncated frame: {field} needs {needed} bytes, {available} available")]
    TruncatedFrame {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame field {field} does not fit the wire width: {value}")]
    FieldTooLarge { field: &'static str, value: u64 },

    #[error("Connection is not open; frame dropped")]
    ConnectionNotOpen,

    #[error("Connection dropped: {0}")]
    ConnectionDropped(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl UploadError {
    /// Decode-side errors are logged and the frame ignored.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            UploadError::TruncatedFrame { .. } | UploadError::MalformedFrame(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_frame_message() {
        let err = UploadError::TruncatedFrame {
            field: "filename",
            needed: 12,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Truncated frame: filename needs 12 bytes, 3 available"
        );
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_connection_errors_are_not_decode_errors() {
        assert!(!UploadError::ConnectionNotOpen.is_decode_error());
        assert!(!UploadError::ConnectionDropped("reset".to_string()).is_decode_error());
    }

    #[test]
    fn test_io_conversion() {
        let err: UploadError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
