//! Virtual-clock media backend
//!
//! Clips exist only as timing profiles: how long they take to buffer, how
//! long they play and which fault (if any) they raise. Positions are derived
//! from the `Instant` values passed in by the caller, so the backend never
//! sleeps and never reads the wall clock itself.

use super::{MediaBackend, MediaError, MediaResource, PlaybackEvent, Readiness};
use common::ClipId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Timing and fault profile of a simulated clip
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClipProfile {
    /// Real clip length in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Seconds until enough data is buffered to play through
    #[serde(default = "default_load_time")]
    pub load_time: f64,

    /// Fail with a decode error once `load_time` has elapsed
    #[serde(default)]
    pub fail_load: bool,

    /// Never finish buffering
    #[serde(default)]
    pub stall: bool,

    /// Refuse to start playback
    #[serde(default)]
    pub reject_play: bool,

    /// Raise a playback fault at this position (seconds)
    #[serde(default)]
    pub fail_at: Option<f64>,
}

fn default_duration() -> f64 {
    8.0
}
fn default_load_time() -> f64 {
    0.25
}

impl Default for ClipProfile {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            load_time: default_load_time(),
            fail_load: false,
            stall: false,
            reject_play: false,
            fail_at: None,
        }
    }
}

impl ClipProfile {
    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }
}

/// Counters shared between the backend and every resource it opened
#[derive(Debug, Default)]
pub struct SimulatedStats {
    opened: AtomicUsize,
    live: AtomicUsize,
    playing: AtomicUsize,
    visible: AtomicUsize,
}

#[cfg(test)]
impl SimulatedStats {
    /// Resources ever opened
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Resources opened and not yet released
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Resources currently playing
    pub fn playing(&self) -> usize {
        self.playing.load(Ordering::Relaxed)
    }

    /// Resources with a non-zero opacity
    pub fn visible(&self) -> usize {
        self.visible.load(Ordering::Relaxed)
    }
}

/// Backend producing [`SimulatedResource`]s
pub struct SimulatedBackend {
    default: ClipProfile,
    profiles: HashMap<String, ClipProfile>,
    stats: Arc<SimulatedStats>,
}

impl SimulatedBackend {
    pub fn new(default: ClipProfile) -> Self {
        Self {
            default,
            profiles: HashMap::new(),
            stats: Arc::new(SimulatedStats::default()),
        }
    }

    /// Attach a profile to a clip, matched by full id or file name
    pub fn with_profile(mut self, clip: impl Into<String>, profile: ClipProfile) -> Self {
        self.profiles.insert(clip.into(), profile);
        self
    }

    fn profile_for(&self, clip: &ClipId) -> &ClipProfile {
        self.profiles
            .get(clip.as_str())
            .or_else(|| self.profiles.get(clip.file_name()))
            .unwrap_or(&self.default)
    }
}

#[cfg(test)]
impl SimulatedBackend {
    pub fn stats(&self) -> Arc<SimulatedStats> {
        self.stats.clone()
    }
}

impl MediaBackend for SimulatedBackend {
    type Resource = SimulatedResource;

    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open(&mut self, clip: &ClipId, now: Instant) -> Result<SimulatedResource, MediaError> {
        let profile = self.profile_for(clip).clone();
        self.stats.opened.fetch_add(1, Ordering::Relaxed);
        self.stats.live.fetch_add(1, Ordering::Relaxed);
        log::trace!("Simulated open: {} ({:?})", clip, profile);

        Ok(SimulatedResource {
            clip: clip.clone(),
            duration: Duration::try_from_secs_f64(profile.duration).unwrap_or_default(),
            load_time: Duration::try_from_secs_f64(profile.load_time).unwrap_or_default(),
            fail_at: profile
                .fail_at
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            profile,
            stats: self.stats.clone(),
            opened_at: now,
            play_started: None,
            offset: Duration::ZERO,
            ended_reported: false,
            error_reported: false,
            released: false,
            opacity: 0.0,
            z_index: 0,
        })
    }
}

/// A clip playing on the virtual clock
pub struct SimulatedResource {
    clip: ClipId,
    profile: ClipProfile,
    duration: Duration,
    load_time: Duration,
    fail_at: Option<Duration>,
    stats: Arc<SimulatedStats>,

    opened_at: Instant,
    /// Set while playing
    play_started: Option<Instant>,
    /// Position at `play_started` (or the paused position)
    offset: Duration,

    ended_reported: bool,
    error_reported: bool,
    released: bool,
    opacity: f32,
    z_index: i32,
}

#[cfg(test)]
impl SimulatedResource {
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn z_index(&self) -> i32 {
        self.z_index
    }
}

impl MediaResource for SimulatedResource {
    fn clip(&self) -> &ClipId {
        &self.clip
    }

    fn poll_ready(&mut self, now: Instant) -> Readiness {
        if self.released {
            return Readiness::Failed(MediaError::LoadError {
                clip: self.clip.clone(),
                reason: "resource released".to_string(),
            });
        }
        if self.profile.stall || now.saturating_duration_since(self.opened_at) < self.load_time {
            return Readiness::Loading;
        }
        if self.profile.fail_load {
            return Readiness::Failed(MediaError::LoadError {
                clip: self.clip.clone(),
                reason: "simulated decode error".to_string(),
            });
        }
        Readiness::Ready
    }

    fn play(&mut self, now: Instant) -> Result<(), MediaError> {
        if self.released || self.profile.reject_play {
            return Err(MediaError::PlayRejected {
                clip: self.clip.clone(),
                reason: if self.released {
                    "resource released".to_string()
                } else {
                    "simulated autoplay policy".to_string()
                },
            });
        }
        if self.play_started.is_none() {
            log::trace!("Simulated play: {} (z {})", self.clip, self.z_index);
            self.play_started = Some(now);
            self.stats.playing.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn pause(&mut self, now: Instant) {
        if let Some(started) = self.play_started.take() {
            self.offset = (self.offset + now.saturating_duration_since(started)).min(self.duration);
            self.stats.playing.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn rewind(&mut self, now: Instant) {
        self.offset = Duration::ZERO;
        self.ended_reported = false;
        self.error_reported = false;
        if self.play_started.is_some() {
            self.play_started = Some(now);
        }
    }

    fn is_playing(&self) -> bool {
        self.play_started.is_some()
    }

    fn position(&self, now: Instant) -> Option<Duration> {
        if self.released {
            return None;
        }
        let raw = match self.play_started {
            Some(started) => self.offset + now.saturating_duration_since(started),
            None => self.offset,
        };
        Some(raw.min(self.duration))
    }

    fn duration(&self) -> Option<Duration> {
        (!self.released).then_some(self.duration)
    }

    fn poll_playback(&mut self, now: Instant) -> Option<PlaybackEvent> {
        if self.play_started.is_none() {
            return None;
        }
        let position = self.position(now)?;

        if let Some(fail_at) = self.fail_at
            && !self.error_reported
            && position >= fail_at
        {
            self.error_reported = true;
            return Some(PlaybackEvent::Error(MediaError::LoadError {
                clip: self.clip.clone(),
                reason: format!("simulated playback fault at {:.2}s", fail_at.as_secs_f64()),
            }));
        }

        if !self.ended_reported && position >= self.duration {
            self.ended_reported = true;
            self.pause(now);
            return Some(PlaybackEvent::Ended);
        }

        None
    }

    fn set_opacity(&mut self, opacity: f32) {
        let was_visible = self.opacity > 0.0;
        self.opacity = opacity;
        match (was_visible, opacity > 0.0) {
            (false, true) => {
                self.stats.visible.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.stats.visible.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn set_z_index(&mut self, z_index: i32) {
        self.z_index = z_index;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        if self.play_started.take().is_some() {
            self.stats.playing.fetch_sub(1, Ordering::Relaxed);
        }
        self.stats.live.fetch_sub(1, Ordering::Relaxed);
        self.set_opacity(0.0);
        self.offset = Duration::ZERO;
        self.released = true;
    }
}

impl Drop for SimulatedResource {
    fn drop(&mut self) {
        self.release();
    }
}
