//! Media resource primitive used by the background video controller
//!
//! The controller never talks to a decoder directly. It drives resources
//! through two traits:
//!
//! - [`MediaBackend`]: opens a hidden, muted resource for a clip and starts
//!   loading it
//! - [`MediaResource`]: readiness, play/pause/rewind, playback position,
//!   ended/error signalling, opacity and release
//!
//! Two backends exist:
//!
//! - `simulated`: virtual-clock clips with configurable timing and faults
//!   (tests and headless dry runs)
//! - `playbin`: GStreamer `playbin`-backed playback, mixed onto one output
//!   by the `stage` (requires the `video` feature)
//!
//! Every call takes the current [`Instant`] so that the whole state machine
//! can be driven deterministically.

#[cfg(feature = "video")]
pub mod playbin;
pub mod simulated;
#[cfg(feature = "video")]
mod stage;

use common::ClipId;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures of a single clip. None of them is fatal to the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("clip {clip} did not buffer enough to play through within {timeout:?}")]
    LoadTimeout { clip: ClipId, timeout: Duration },

    #[error("failed to load clip {clip}: {reason}")]
    LoadError { clip: ClipId, reason: String },

    #[error("playback of clip {clip} was rejected: {reason}")]
    PlayRejected { clip: ClipId, reason: String },
}

impl MediaError {
    pub fn clip(&self) -> &ClipId {
        match self {
            Self::LoadTimeout { clip, .. }
            | Self::LoadError { clip, .. }
            | Self::PlayRejected { clip, .. } => clip,
        }
    }
}

/// Loading progress of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// Still buffering
    Loading,
    /// Enough data is buffered to play through without stalling
    Ready,
    /// Decode or network fault while loading
    Failed(MediaError),
}

/// Events raised by a playing resource
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Natural end of the clip
    Ended,
    /// Decode or network fault during playback
    Error(MediaError),
}

/// One loaded (or loading) clip
pub trait MediaResource: Send {
    fn clip(&self) -> &ClipId;

    /// Check loading progress
    fn poll_ready(&mut self, now: Instant) -> Readiness;

    /// Start or continue playback
    fn play(&mut self, now: Instant) -> Result<(), MediaError>;

    fn pause(&mut self, now: Instant);

    /// Seek back to time zero
    fn rewind(&mut self, now: Instant);

    fn is_playing(&self) -> bool;

    /// Current playback position, if known
    fn position(&self, now: Instant) -> Option<Duration>;

    /// Real clip length, if known
    fn duration(&self) -> Option<Duration>;

    /// Pop the next playback event, if any
    fn poll_playback(&mut self, now: Instant) -> Option<PlaybackEvent>;

    fn set_opacity(&mut self, opacity: f32);

    /// Stacking order on the render surface; higher draws on top
    fn set_z_index(&mut self, z_index: i32);

    /// Stop playback, clear the source and detach from any surface.
    ///
    /// Idempotent.
    fn release(&mut self);
}

/// Factory for media resources
pub trait MediaBackend: Send {
    type Resource: MediaResource;

    /// Short backend name for status output
    fn name(&self) -> &'static str;

    /// Create a hidden resource for `clip` and begin loading it
    fn open(&mut self, clip: &ClipId, now: Instant) -> Result<Self::Resource, MediaError>;
}
