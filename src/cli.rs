use clap::{Parser, Subcommand};
use snapwire::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "snapwire")]
#[command(version, about = "Upload photos and videos to a media server over WebSocket")]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/snapwire/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Server host
    #[arg(long, env = "SNAPWIRE_HOST", global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "SNAPWIRE_PORT", global = true)]
    pub port: Option<u16>,

    /// WebSocket endpoint path
    #[arg(long, global = true)]
    pub path: Option<String>,

    /// Files larger than this many megabytes are sent in chunks
    #[arg(long, global = true)]
    pub chunk_threshold_mb: Option<u64>,

    /// Seconds to wait before reconnecting after a drop
    #[arg(long, global = true)]
    pub reconnect_delay: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stage files and upload them as one batch
    Upload {
        #[arg(required = true, help = "Photos or videos to upload")]
        files: Vec<PathBuf>,

        /// Use this MIME type for every file instead of guessing from the extension
        #[arg(long)]
        content_type: Option<String>,

        /// Give up if the server cannot be reached within this many seconds
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    /// Flags win over file values.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = &self.path {
            config.server.path = path.clone();
        }
        if let Some(mb) = self.chunk_threshold_mb {
            config.upload.chunk_threshold_mb = mb;
        }
        if let Some(secs) = self.reconnect_delay {
            config.server.reconnect_delay_secs = secs;
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "snapwire=debug"
        } else {
            "snapwire=info"
        }
    }
}
