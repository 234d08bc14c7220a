pub mod config;
pub mod error;
pub mod streaming;
pub mod transport;
pub mod upload;

pub use config::Config;
pub use error::{Result, UploadError};
