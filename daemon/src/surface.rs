//! The two video surfaces mounted beneath the page content
//!
//! Slots never own media; they reference a clip whose resource lives in the
//! preload pool. Which physical slot is "current" flips after every
//! completed transition.

use common::{ClipId, SlotStatus};
use std::time::Instant;

/// Readiness of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    NotLoaded,
    Loading,
    Ready,
    Playing,
    FadingOut,
    FadingIn,
    /// Bound clip could not be loaded or played
    Failed,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLoaded => "not-loaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::FadingOut => "fading-out",
            Self::FadingIn => "fading-in",
            Self::Failed => "failed",
        }
    }
}

/// One video surface
#[derive(Debug, Clone)]
pub struct PlaybackSlot {
    label: &'static str,
    clip: Option<ClipId>,
    state: SlotState,
    opacity: f32,
    /// When the bound clip started playing on this slot
    started_at: Option<Instant>,
}

impl PlaybackSlot {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            clip: None,
            state: SlotState::NotLoaded,
            opacity: 0.0,
            started_at: None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn clip(&self) -> Option<&ClipId> {
        self.clip.as_ref()
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn bind(&mut self, clip: ClipId, state: SlotState) {
        self.clip = Some(clip);
        self.state = state;
        self.started_at = None;
    }

    pub fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn mark_started(&mut self, now: Instant) {
        self.started_at = Some(now);
    }

    /// Return to the neutral resting state: unbound, hidden
    pub fn reset(&mut self) {
        self.clip = None;
        self.state = SlotState::NotLoaded;
        self.opacity = 0.0;
        self.started_at = None;
    }
}

/// Two slots, one "current" and one "next"
#[derive(Debug, Clone)]
pub struct RenderSurface {
    slots: [PlaybackSlot; 2],
    current: usize,
}

impl Default for RenderSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface {
    /// Both slots sit below all foreground content
    pub const BASE_Z_INDEX: i32 = -1000;

    pub fn new() -> Self {
        Self {
            slots: [PlaybackSlot::new("a"), PlaybackSlot::new("b")],
            current: 0,
        }
    }

    pub fn current(&self) -> &PlaybackSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut PlaybackSlot {
        &mut self.slots[self.current]
    }

    pub fn next(&self) -> &PlaybackSlot {
        &self.slots[1 - self.current]
    }

    pub fn next_mut(&mut self) -> &mut PlaybackSlot {
        &mut self.slots[1 - self.current]
    }

    /// Both slots at once, `(current, next)`
    pub fn pair_mut(&mut self) -> (&mut PlaybackSlot, &mut PlaybackSlot) {
        let [a, b] = &mut self.slots;
        if self.current == 0 { (a, b) } else { (b, a) }
    }

    /// The "next" slot becomes "current"
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
        self.current = 0;
    }

    /// Current slot stacks above next, both below page content
    pub fn z_index(&self, is_current: bool) -> i32 {
        if is_current {
            Self::BASE_Z_INDEX + 2
        } else {
            Self::BASE_Z_INDEX + 1
        }
    }

    pub fn snapshot(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let is_current = i == self.current;
                SlotStatus {
                    label: slot.label().to_string(),
                    role: if is_current { "current" } else { "next" }.to_string(),
                    clip: slot.clip.clone(),
                    state: slot.state.as_str().to_string(),
                    opacity: slot.opacity,
                    z_index: self.z_index(is_current),
                }
            })
            .collect()
    }
}
