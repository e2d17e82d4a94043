//! Common types and utilities for Projector.
//!
//! This crate defines the shared data structures and the ingest protocol used
//! between the sink daemon (`projector`) and the control client (`projctl`).
//!
//! # Ingest Protocol
//!
//! A client connects to a Unix domain socket and sends packets framed by
//! [`protocol::PacketHeader`]. Control packets carry a JSON-serialized
//! [`Command`] and are answered with one newline-terminated JSON [`Response`].
//! Access-unit packets carry one H.264 access unit in Annex-B byte-stream
//! framing and are never acknowledged.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, protocol};
//!
//! let start = protocol::encode_command(&Command::Start).unwrap();
//! let frame = protocol::encode_access_unit(0, &[0, 0, 0, 1, 0x65, 0x88]);
//! assert!(start.len() > protocol::PACKET_HEADER_LEN);
//! assert_eq!(frame.len(), protocol::PACKET_HEADER_LEN + 6);
//! ```

pub mod annexb;
pub mod protocol;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common error types shared between client and daemon.
///
/// All errors are serializable for transmission over the ingest socket.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProjectorError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Sink busy: {0}")]
    Busy(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for ProjectorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ProjectorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Control commands sent from client to daemon.
///
/// Commands travel inside control packets; see [`protocol::encode_command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Check that the daemon is alive
    Ping,
    /// Query daemon and pipeline status
    Query,
    /// Open the video output and start playback for this connection
    Start,
    /// Stop playback and tear the pipeline down
    Stop,
}

/// Responses sent from daemon to client, one per control packet.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Pong,
    Status(SinkStatus),
    Error(ProjectorError),
}

/// Lifecycle state of the decode/render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PipelineState {
    /// No pipeline exists
    #[default]
    Uninitialized,
    /// Graph constructed and both endpoints resolved
    Built,
    /// Engine accepted the Playing transition
    Playing,
    /// Torn down by the caller
    Stopped,
    /// Construction, state transition or the engine itself failed
    Failed,
}

impl PipelineState {
    /// Get the name of the state
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Built => "built",
            Self::Playing => "playing",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame counters reported by the ingestion gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounters {
    /// Frames handed to the pipeline
    pub forwarded: u64,
    /// Frames dropped because the gate was closed
    pub dropped: u64,
    /// Frames the pipeline refused
    pub rejected: u64,
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub session_active: bool,
    /// Whether the ingestion gate currently forwards frames
    pub accepting: bool,
    pub pipeline: PipelineState,
    pub frames: FrameCounters,
}

/// Ingest socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("projector.sock")
}
