//! Common types and utilities for Backdrop.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the daemon (`backdropd`) and
//! client (`bdctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages, one per line. The client sends [`Command`] variants and receives
//! [`Response`] variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::Command;
//!
//! // Ask the daemon to crossfade to the next clip right away
//! let cmd = Command::Skip;
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common error types shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum BackdropError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for BackdropError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BackdropError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Identifier of one clip in the clip library.
///
/// Holds the resolved source (a path or URI) handed to the media backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display name (last path segment)
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Commands sent from client to daemon via IPC.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Query controller status
    Query,
    /// List the clips in the clip library
    ListClips,
    /// Start a transition to the next playlist entry now.
    ///
    /// Ignored while a transition is already in flight.
    Skip,
    /// Leave the poster fallback and retry playback
    Resume,
    /// Kill the daemon
    Kill,
    /// Ping the daemon
    Ping,
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(BackdropError),
    Status(DaemonStatus),
    Clips(Vec<ClipId>),
    Pong,
}

/// Daemon status information
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub backend: String,
    pub controller: Option<ControllerStatus>,
}

/// Phase of the transition state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionPhase {
    Idle,
    Preloading,
    Transitioning,
}

impl fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preloading => "preloading",
            Self::Transitioning => "transitioning",
        };
        f.write_str(name)
    }
}

/// Snapshot of the background video controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub phase: TransitionPhase,
    pub trigger_mode: String,
    pub crossfade_secs: f32,
    pub playlist_index: usize,
    pub playlist_len: usize,
    pub current_clip: Option<ClipId>,
    pub next_clip: Option<ClipId>,
    pub completed_transitions: u64,
    pub consecutive_failures: u32,
    pub showing_poster: bool,
    pub poster: Option<String>,
    pub resident: usize,
    pub loading: usize,
    pub max_resident: usize,
    /// Holding the first clip until the preload window is loaded
    pub warming_up: bool,
    /// Opacity of a fully shown clip (below 1 when dimmed)
    pub max_opacity: f32,
    pub slots: Vec<SlotStatus>,
}

/// One of the two video surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotStatus {
    pub label: String,
    pub role: String,
    pub clip: Option<ClipId>,
    pub state: String,
    pub opacity: f32,
    pub z_index: i32,
}

/// Get the IPC socket path
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("backdrop.sock")
}
