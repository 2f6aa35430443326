//! Background video controller
//!
//! Drives two render slots through a rotating playlist:
//!
//! ```text
//! Idle --trigger--> Preloading --next clip ready--> Transitioning --crossfade elapsed--> Idle
//! ```
//!
//! Only one cycle can be in flight; a trigger outside `Idle` is ignored.
//! Each completed cycle swaps the slot roles and moves the playlist pointer
//! forward by exactly one. Clip failures never escape the controller: the
//! clip is skipped, and after too many consecutive failures all media is
//! released and the poster is shown instead.

use crate::media::{MediaBackend, MediaError, MediaResource, PlaybackEvent};
use crate::playlist::Playlist;
use crate::preload::{PreloadEvent, PreloadPool, PreloadStatus};
use crate::surface::{RenderSurface, SlotState};
use crate::transition::{Crossfade, EasingFunction};
use common::{ClipId, ControllerStatus, TransitionPhase};
use std::time::{Duration, Instant};

/// When the current clip hands over to the next one
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerMode {
    /// Start once the remaining time reaches `crossfade + end_buffer`, or on
    /// natural end
    CompleteClip { end_buffer: Duration },
    /// Start once the clip has been on screen for `clip_duration`; shorter
    /// clips loop until then
    FixedDuration { clip_duration: Duration },
    /// Loop the current clip forever; only skip or an error moves on
    Loop,
}

impl TriggerMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CompleteClip { .. } => "complete-clip",
            Self::FixedDuration { .. } => "fixed-duration",
            Self::Loop => "loop",
        }
    }
}

/// Host configuration passed in at construction
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub crossfade: Duration,
    pub easing: EasingFunction,
    pub trigger: TriggerMode,
    /// Failures in a row before falling back to the poster
    pub max_consecutive_failures: u32,
    pub poster: Option<String>,
    /// Opacity of a fully shown clip; below 1 dims the backdrop
    pub max_opacity: f32,
    /// Hold the first clip until the whole preload window has loaded
    pub wait_for_window: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            crossfade: Duration::from_millis(1300),
            easing: EasingFunction::default(),
            trigger: TriggerMode::CompleteClip {
                end_buffer: Duration::from_millis(100),
            },
            max_consecutive_failures: 5,
            poster: None,
            max_opacity: 1.0,
            wait_for_window: false,
        }
    }
}

/// Why a transition was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Trigger policy threshold reached
    Threshold,
    Ended,
    Error,
    Skip,
}

/// Named inputs of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Tick,
    Ended,
    Error(MediaError),
    Skip,
}

#[derive(Debug, Clone)]
pub enum TransitionState {
    Idle,
    Preloading {
        next_index: usize,
        clip: ClipId,
        since: Instant,
    },
    Transitioning {
        next_index: usize,
        crossfade: Crossfade,
    },
}

impl TransitionState {
    pub fn phase(&self) -> TransitionPhase {
        match self {
            Self::Idle => TransitionPhase::Idle,
            Self::Preloading { .. } => TransitionPhase::Preloading,
            Self::Transitioning { .. } => TransitionPhase::Transitioning,
        }
    }
}

pub struct Controller<B: MediaBackend> {
    playlist: Playlist,
    pool: PreloadPool<B>,
    surface: RenderSurface,
    state: TransitionState,
    options: ControllerOptions,
    consecutive_failures: u32,
    completed_transitions: u64,
    showing_poster: bool,
    /// First clip is held back until the preload window is resolved
    warming_up: bool,
    torn_down: bool,
}

impl<B: MediaBackend> Controller<B> {
    pub fn new(playlist: Playlist, pool: PreloadPool<B>, options: ControllerOptions) -> Self {
        Self {
            playlist,
            pool,
            surface: RenderSurface::new(),
            state: TransitionState::Idle,
            options,
            consecutive_failures: 0,
            completed_transitions: 0,
            showing_poster: false,
            warming_up: false,
            torn_down: false,
        }
    }

    /// Bind the current playlist entry and start loading it.
    ///
    /// Playback starts as soon as the clip is ready, or once the whole
    /// preload window is ready when `wait_for_window` is set.
    pub fn start(&mut self, now: Instant) {
        if self.torn_down {
            return;
        }

        let clip = self.playlist.current().clone();
        log::info!(
            "Starting background video at {} (entry {}/{}, {}, crossfade {:.2}s)",
            clip.file_name(),
            self.playlist.current_index() + 1,
            self.playlist.len(),
            self.options.trigger.name(),
            self.options.crossfade.as_secs_f32()
        );

        self.surface.reset();
        self.state = TransitionState::Idle;
        self.warming_up = self.options.wait_for_window;
        self.surface
            .current_mut()
            .bind(clip.clone(), SlotState::Loading);

        let status = self.pool.preload(&clip, now);
        self.pool
            .preload_ahead(&self.playlist, self.playlist.current_index(), now);

        match status {
            PreloadStatus::Ready => self.on_current_ready(now),
            PreloadStatus::Pending => {}
            PreloadStatus::Failed(e) => self.mark_current_failed(e),
        }
    }

    /// Dispatch a named event
    pub fn handle(&mut self, event: ControllerEvent, now: Instant) {
        if self.torn_down || self.showing_poster {
            return;
        }

        match event {
            ControllerEvent::Tick => self.tick(now),
            ControllerEvent::Skip => {
                log::info!("Skip requested");
                self.trigger(TriggerReason::Skip, now);
            }
            ControllerEvent::Ended => match self.options.trigger {
                TriggerMode::CompleteClip { .. } => {
                    log::debug!("Clip ended naturally");
                    self.trigger(TriggerReason::Ended, now);
                }
                TriggerMode::FixedDuration { .. } | TriggerMode::Loop => self.loop_current(now),
            },
            ControllerEvent::Error(e) => {
                let current = self.surface.current().clip().cloned();
                if current.as_ref() != Some(e.clip()) {
                    log::debug!("Ignoring error for off-screen clip: {}", e);
                    return;
                }

                log::warn!("Playback error, skipping clip: {}", e);
                self.pool.release(e.clip());
                self.surface.current_mut().set_state(SlotState::Failed);
                self.record_failure();
                if !self.showing_poster {
                    self.trigger(TriggerReason::Error, now);
                }
            }
        }
    }

    /// Advance the state machine to `now`
    pub fn tick(&mut self, now: Instant) {
        if self.torn_down || self.showing_poster {
            return;
        }

        for event in self.pool.poll(now) {
            self.on_preload_event(event, now);
            if self.showing_poster {
                return;
            }
        }

        match &self.state {
            TransitionState::Idle => self.tick_idle(now),
            TransitionState::Preloading { clip, .. } => {
                if !self.pool.contains(clip) {
                    let error = MediaError::LoadError {
                        clip: clip.clone(),
                        reason: "dropped from preload pool".to_string(),
                    };
                    self.on_next_failed(error, now);
                } else {
                    self.poll_current_playback(now);
                }
            }
            TransitionState::Transitioning { crossfade, .. } => {
                let crossfade = *crossfade;
                self.apply_crossfade(&crossfade, now);
                if crossfade.is_complete(now) {
                    self.finalize(now);
                }
            }
        }
    }

    /// Request a transition to the next playlist entry.
    ///
    /// Returns false (and does nothing) unless the controller is idle.
    pub fn trigger(&mut self, reason: TriggerReason, now: Instant) -> bool {
        if self.torn_down || self.showing_poster {
            return false;
        }
        if !matches!(self.state, TransitionState::Idle) {
            match self.preload_wait(now) {
                Some(waited) => log::debug!(
                    "Ignoring {:?} trigger while preloading ({:.1}s so far)",
                    reason,
                    waited.as_secs_f32()
                ),
                None => log::debug!("Ignoring {:?} trigger while {}", reason, self.state.phase()),
            }
            return false;
        }

        self.warming_up = false;
        let next_index = self.playlist.next_index();
        let clip = self.playlist.get(next_index).clone();
        log::debug!(
            "Transition triggered ({:?}): next is {} [{}], preloaded: {}",
            reason,
            clip.file_name(),
            next_index,
            self.pool.is_ready(&clip)
        );

        if self.surface.current().clip() == Some(&clip) {
            self.restart_current(now);
            return true;
        }

        self.state = TransitionState::Preloading {
            next_index,
            clip: clip.clone(),
            since: now,
        };
        self.surface
            .next_mut()
            .bind(clip.clone(), SlotState::Loading);

        match self.pool.preload(&clip, now) {
            PreloadStatus::Ready => self.begin_transition(now),
            PreloadStatus::Pending => {}
            PreloadStatus::Failed(e) => self.on_next_failed(e, now),
        }

        true
    }

    /// Leave the poster fallback and start over at the current entry
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.torn_down || !self.showing_poster {
            return false;
        }
        log::info!("Resuming background video after poster fallback");
        self.showing_poster = false;
        self.consecutive_failures = 0;
        self.start(now);
        true
    }

    /// Stop all media and release every pooled resource.
    ///
    /// Idempotent. Every later call into the controller is a no-op.
    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        log::info!(
            "Shutting down background video ({} transition(s) completed)",
            self.completed_transitions
        );
        self.torn_down = true;
        self.warming_up = false;
        self.state = TransitionState::Idle;
        self.pool.release_all();
        self.surface.reset();
    }

    fn tick_idle(&mut self, now: Instant) {
        match self.surface.current().state() {
            SlotState::Failed => {
                self.trigger(TriggerReason::Error, now);
                return;
            }
            SlotState::Ready if self.warming_up => {
                self.on_current_ready(now);
                return;
            }
            SlotState::Playing => {}
            _ => return,
        }

        if self.poll_current_playback(now) {
            return;
        }

        if self.trigger_due(now) {
            self.trigger(TriggerReason::Threshold, now);
        }
    }

    /// Forward ended/error from the current clip. Returns true if an event fired.
    fn poll_current_playback(&mut self, now: Instant) -> bool {
        let Some(clip) = self.surface.current().clip().cloned() else {
            return false;
        };
        let Some(event) = self
            .pool
            .get_mut(&clip)
            .and_then(|resource| resource.poll_playback(now))
        else {
            return false;
        };

        match event {
            PlaybackEvent::Ended => self.handle(ControllerEvent::Ended, now),
            PlaybackEvent::Error(e) => self.handle(ControllerEvent::Error(e), now),
        }
        true
    }

    fn trigger_due(&self, now: Instant) -> bool {
        let current = self.surface.current();
        match self.options.trigger {
            TriggerMode::CompleteClip { end_buffer } => {
                let Some(resource) = current.clip().and_then(|clip| self.pool.get(clip)) else {
                    return false;
                };
                match (resource.position(now), resource.duration()) {
                    (Some(position), Some(duration)) if !duration.is_zero() => {
                        duration.saturating_sub(position) <= self.options.crossfade + end_buffer
                    }
                    _ => false,
                }
            }
            TriggerMode::FixedDuration { clip_duration } => current
                .started_at()
                .is_some_and(|started| now.saturating_duration_since(started) >= clip_duration),
            TriggerMode::Loop => false,
        }
    }

    fn on_preload_event(&mut self, event: PreloadEvent, now: Instant) {
        let clip = match &event {
            PreloadEvent::Ready(clip) => clip,
            PreloadEvent::Failed(e) => e.clip(),
        };
        let current = self.surface.current();
        let for_current = current.state() == SlotState::Loading && current.clip() == Some(clip);
        let for_pending = matches!(
            &self.state,
            TransitionState::Preloading { clip: pending, .. } if pending == clip
        );

        match event {
            PreloadEvent::Ready(_) if for_current => self.on_current_ready(now),
            PreloadEvent::Ready(_) if for_pending => self.begin_transition(now),
            PreloadEvent::Failed(e) if for_current => self.mark_current_failed(e),
            PreloadEvent::Failed(e) if for_pending => self.on_next_failed(e, now),
            // Preloaded ahead of time; nothing waits on it yet
            _ => {}
        }
    }

    /// The current clip finished loading; play it unless still warming up
    fn on_current_ready(&mut self, now: Instant) {
        if self.warming_up {
            if !self.window_resolved() {
                self.surface.current_mut().set_state(SlotState::Ready);
                log::debug!(
                    "Waiting for {} more clip(s) before starting playback",
                    self.pool.loading()
                );
                return;
            }
            self.warming_up = false;
            log::info!("Preload window ready");
        }
        self.start_current(now);
    }

    /// No clip of the preload window is still loading
    fn window_resolved(&self) -> bool {
        let index = self.playlist.current_index();
        let distance = self.pool.options().distance;
        std::iter::once(self.playlist.get(index))
            .chain(self.playlist.upcoming(index, distance).map(|(_, clip)| clip))
            .all(|clip| !self.pool.is_loading(clip))
    }

    /// Push a slot's opacity and stacking to its resource. The opacity is
    /// scaled by the dim ceiling.
    fn present(&mut self, clip: &ClipId, opacity: f32, is_current: bool) {
        let z_index = self.surface.z_index(is_current);
        if let Some(resource) = self.pool.get_mut(clip) {
            resource.set_opacity(opacity * self.options.max_opacity);
            resource.set_z_index(z_index);
        }
    }

    /// Play the current slot from time zero at full opacity
    fn start_current(&mut self, now: Instant) {
        let Some(clip) = self.surface.current().clip().cloned() else {
            return;
        };
        self.present(&clip, 1.0, true);
        let result = match self.pool.get_mut(&clip) {
            Some(resource) => {
                resource.rewind(now);
                resource.play(now)
            }
            None => Err(MediaError::LoadError {
                clip: clip.clone(),
                reason: "not resident".to_string(),
            }),
        };

        match result {
            Ok(()) => {
                let slot = self.surface.current_mut();
                slot.set_state(SlotState::Playing);
                slot.set_opacity(1.0);
                slot.mark_started(now);
                self.record_success();
                log::info!("▶ Playing {}", clip.file_name());
            }
            Err(e) => self.mark_current_failed(e),
        }
    }

    fn mark_current_failed(&mut self, error: MediaError) {
        log::warn!("Skipping clip: {}", error);
        self.surface.current_mut().set_state(SlotState::Failed);
        self.record_failure();
    }

    /// Fixed-duration and loop modes: replay a clip that ended
    fn loop_current(&mut self, now: Instant) {
        let Some(clip) = self.surface.current().clip().cloned() else {
            return;
        };
        let result = match self.pool.get_mut(&clip) {
            Some(resource) => {
                resource.rewind(now);
                resource.play(now)
            }
            None => return,
        };
        match result {
            Ok(()) => log::debug!("Looping {}", clip.file_name()),
            Err(e) => self.mark_current_failed(e),
        }
    }

    /// Next clip equals the current clip: replay it in place
    fn restart_current(&mut self, now: Instant) {
        let index = self.playlist.advance();
        self.completed_transitions += 1;
        let clip = self.playlist.current().clone();
        log::info!(
            "✓ Transition {} complete: replaying {} [{}/{}]",
            self.completed_transitions,
            clip.file_name(),
            index + 1,
            self.playlist.len()
        );

        self.surface
            .current_mut()
            .bind(clip.clone(), SlotState::Loading);
        match self.pool.preload(&clip, now) {
            PreloadStatus::Ready => self.start_current(now),
            PreloadStatus::Pending => {}
            PreloadStatus::Failed(e) => self.mark_current_failed(e),
        }

        if !self.showing_poster {
            self.housekeeping(now);
        }
    }

    /// The next clip could not be preloaded; transition to it anyway
    fn on_next_failed(&mut self, error: MediaError, now: Instant) {
        log::warn!("Next clip unavailable, transitioning best-effort: {}", error);
        self.begin_transition(now);
    }

    fn begin_transition(&mut self, now: Instant) {
        let TransitionState::Preloading {
            next_index, clip, ..
        } = &self.state
        else {
            return;
        };
        let (next_index, clip) = (*next_index, clip.clone());
        if self.pool.is_ready(&clip) {
            self.surface.next_mut().set_state(SlotState::Ready);
        }

        self.present(&clip, 0.0, false);
        let incoming = match self.pool.get_mut(&clip) {
            Some(resource) => {
                resource.rewind(now);
                resource.play(now)
            }
            None => Err(MediaError::LoadError {
                clip: clip.clone(),
                reason: "not resident".to_string(),
            }),
        };

        let (current, next) = self.surface.pair_mut();
        if current.state() == SlotState::Playing {
            current.set_state(SlotState::FadingOut);
        }
        next.set_opacity(0.0);

        match incoming {
            Ok(()) => {
                next.set_state(SlotState::FadingIn);
                next.mark_started(now);
                self.record_success();
            }
            Err(e) => {
                log::warn!("Incoming clip will not play: {}", e);
                next.set_state(SlotState::Failed);
                self.record_failure();
                if self.showing_poster {
                    return;
                }
            }
        }

        let crossfade = Crossfade::new(now, self.options.crossfade, self.options.easing);
        log::debug!(
            "Crossfading to {} over {:.2}s",
            clip.file_name(),
            crossfade.duration().as_secs_f32()
        );
        self.state = TransitionState::Transitioning {
            next_index,
            crossfade,
        };

        self.apply_crossfade(&crossfade, now);
        if crossfade.is_complete(now) {
            self.finalize(now);
        }
    }

    /// Set both slots from one progress value so they stay phase-locked
    fn apply_crossfade(&mut self, crossfade: &Crossfade, now: Instant) {
        let (outgoing, incoming) = crossfade.opacities(now);
        let (current, next) = self.surface.pair_mut();
        current.set_opacity(outgoing);
        next.set_opacity(incoming);

        let targets = [
            (current.clip().cloned(), outgoing, true),
            (next.clip().cloned(), incoming, false),
        ];
        for (clip, opacity, is_current) in targets {
            if let Some(clip) = clip {
                self.present(&clip, opacity, is_current);
            }
        }
    }

    /// Crossfade elapsed: swap roles and advance the playlist
    fn finalize(&mut self, now: Instant) {
        let TransitionState::Transitioning { next_index, .. } = self.state else {
            return;
        };

        if let Some(clip) = self.surface.current().clip().cloned()
            && let Some(resource) = self.pool.get_mut(&clip)
        {
            if resource.is_playing() {
                resource.pause(now);
            }
            resource.rewind(now);
            resource.set_opacity(0.0);
        }
        self.surface.current_mut().reset();
        self.surface.swap();

        let index = self.playlist.advance();
        debug_assert_eq!(index, next_index);
        self.completed_transitions += 1;

        let current = self.surface.current_mut();
        current.set_opacity(1.0);
        if current.state() == SlotState::FadingIn {
            current.set_state(SlotState::Playing);
        }
        if let Some(clip) = current.clip().cloned() {
            self.present(&clip, 1.0, true);
        }

        self.state = TransitionState::Idle;
        log::info!(
            "✓ Transition {} complete: now on {} [{}/{}]",
            self.completed_transitions,
            self.playlist.current().file_name(),
            index + 1,
            self.playlist.len()
        );

        self.housekeeping(now);
    }

    /// Preload what comes next and drop what is no longer needed
    fn housekeeping(&mut self, now: Instant) {
        let index = self.playlist.current_index();
        self.pool.cleanup_unused(&self.playlist, index);
        self.pool.preload_ahead(&self.playlist, index, now);

        let current = self.surface.current().clip().cloned();
        let protected: Vec<&ClipId> = current.iter().collect();
        let max_resident = self.pool.options().max_resident;
        self.pool.evict(max_resident, &protected);
    }

    fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            log::debug!(
                "Playback recovered after {} failure(s)",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.options.max_consecutive_failures {
            self.enter_poster();
        }
    }

    /// Starvation guard: stop trying and show the static poster
    fn enter_poster(&mut self) {
        log::warn!(
            "{} consecutive clip failures, showing poster {}",
            self.consecutive_failures,
            self.options.poster.as_deref().unwrap_or("(none)")
        );
        self.showing_poster = true;
        self.warming_up = false;
        self.state = TransitionState::Idle;
        self.pool.release_all();
        self.surface.reset();
    }

    pub fn status(&self) -> ControllerStatus {
        let next_index = match &self.state {
            TransitionState::Idle => self.playlist.next_index(),
            TransitionState::Preloading { next_index, .. }
            | TransitionState::Transitioning { next_index, .. } => *next_index,
        };

        ControllerStatus {
            phase: self.state.phase(),
            trigger_mode: self.options.trigger.name().to_string(),
            crossfade_secs: self.options.crossfade.as_secs_f32(),
            playlist_index: self.playlist.current_index(),
            playlist_len: self.playlist.len(),
            current_clip: (!self.showing_poster && !self.torn_down)
                .then(|| self.playlist.current().clone()),
            next_clip: (!self.showing_poster && !self.torn_down)
                .then(|| self.playlist.get(next_index).clone()),
            completed_transitions: self.completed_transitions,
            consecutive_failures: self.consecutive_failures,
            showing_poster: self.showing_poster,
            poster: self.options.poster.clone(),
            resident: self.pool.resident(),
            loading: self.pool.loading(),
            max_resident: self.pool.options().max_resident,
            warming_up: self.warming_up,
            max_opacity: self.options.max_opacity,
            slots: self.surface.snapshot(),
        }
    }

    pub fn phase(&self) -> TransitionPhase {
        self.state.phase()
    }

    pub fn is_showing_poster(&self) -> bool {
        self.showing_poster
    }

    /// How long the in-flight preload has been waiting
    pub fn preload_wait(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            TransitionState::Preloading { since, .. } => Some(now.saturating_duration_since(*since)),
            _ => None,
        }
    }
}

#[cfg(test)]
impl<B: MediaBackend> Controller<B> {
    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn pool(&self) -> &PreloadPool<B> {
        &self.pool
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn completed_transitions(&self) -> u64 {
        self.completed_transitions
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}
