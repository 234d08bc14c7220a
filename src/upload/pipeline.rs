//! Upload pipeline.
//!
//! Wires a connection manager, an upload session and the task that feeds
//! server replies into the session.

use crate::config::Config;
use crate::error::Result;
use crate::streaming::channel::SessionEventReceiver;
use crate::transport::connection::{ConnectionHandle, ConnectionManager, ConnectionState};
use crate::upload::session::{RefreshListener, SessionConfig, UploadSession};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

pub type ClientSession = UploadSession<ConnectionHandle>;

/// Orchestrator for an upload client
pub struct UploadPipeline {
    connection: ConnectionManager,
    session: Arc<ClientSession>,
    reply_task: JoinHandle<()>,
}

impl UploadPipeline {
    /// Start connecting and listening for replies. Must be called inside a
    /// Tokio runtime.
    pub fn start(config: &Config, refresh: Arc<dyn RefreshListener>) -> Result<Self> {
        config.validate()?;
        let session_config = SessionConfig {
            planner: config.planner()?,
            accepted_types: config.upload.accepted_types.clone(),
        };

        let connection = ConnectionManager::spawn(config.connection());
        let handle = connection.handle();
        // subscribe before anything can be sent so no reply is missed
        let replies = handle.subscribe();

        let session = Arc::new(UploadSession::new(session_config, handle, refresh));
        let reply_task = tokio::spawn(session.clone().run(replies));

        debug!("Upload pipeline started for {}", config.server_url());
        Ok(Self {
            connection,
            session,
            reply_task,
        })
    }

    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.handle().state()
    }

    pub fn subscribe(&self) -> SessionEventReceiver {
        self.session.subscribe()
    }

    /// Wait until the socket is open.
    pub async fn wait_connected(&self) -> Result<()> {
        self.connection.handle().wait_open().await
    }

    /// Close the socket and stop the reply task.
    pub async fn shutdown(self) {
        self.connection.shutdown().await;
        // the session keeps a handle, so the reply stream never closes on its own
        self.reply_task.abort();
        let _ = self.reply_task.await;
    }
}
