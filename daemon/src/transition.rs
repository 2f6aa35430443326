use std::time::{Duration, Instant};

/// Easing functions for smooth transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EasingFunction {
    /// Linear interpolation (constant speed)
    Linear,
    /// Ease in (slow start, fast end)
    EaseIn,
    /// Ease out (fast start, slow end)
    EaseOut,
    /// Ease in-out (slow start and end, fast middle)
    #[default]
    EaseInOut,
}

impl EasingFunction {
    /// Apply easing to a linear progress value (0.0 to 1.0)
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => t * (2.0 - t),
            Self::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
        }
    }

    /// Parse the config spelling (`linear`, `ease-in`, `ease-out`, `ease-in-out`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(Self::Linear),
            "ease-in" => Some(Self::EaseIn),
            "ease-out" => Some(Self::EaseOut),
            "ease-in-out" => Some(Self::EaseInOut),
            _ => None,
        }
    }
}

/// Opacity crossfade between the outgoing and incoming surface.
///
/// Both opacities are derived from one eased progress value, so the two
/// surfaces always sum to 1.0 and can never drift apart.
#[derive(Debug, Clone, Copy)]
pub struct Crossfade {
    easing: EasingFunction,
    duration: Duration,
    start_time: Instant,
}

impl Crossfade {
    pub fn new(start_time: Instant, duration: Duration, easing: EasingFunction) -> Self {
        Self {
            easing,
            duration,
            start_time,
        }
    }

    /// Get the linear progress (0.0 to 1.0)
    fn raw_progress(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.start_time);
        if elapsed >= self.duration {
            1.0
        } else {
            elapsed.as_secs_f32() / self.duration.as_secs_f32()
        }
    }

    /// Get the eased progress (0.0 to 1.0)
    pub fn progress(&self, now: Instant) -> f32 {
        self.easing.apply(self.raw_progress(now))
    }

    /// `(outgoing, incoming)` opacities at `now`
    pub fn opacities(&self, now: Instant) -> (f32, f32) {
        let incoming = self.progress(now);
        (1.0 - incoming, incoming)
    }

    /// Check if the crossfade is complete
    pub fn is_complete(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start_time) >= self.duration
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_easing_functions() {
        let linear = EasingFunction::Linear;
        assert_eq!(linear.apply(0.0), 0.0);
        assert_eq!(linear.apply(0.5), 0.5);
        assert_eq!(linear.apply(1.0), 1.0);

        let ease_in = EasingFunction::EaseIn;
        assert_eq!(ease_in.apply(0.0), 0.0);
        assert!(ease_in.apply(0.5) < 0.5); // Should be slower in the beginning
        assert_eq!(ease_in.apply(1.0), 1.0);

        let ease_out = EasingFunction::EaseOut;
        assert!(ease_out.apply(0.5) > 0.5);
        assert_eq!(ease_out.apply(1.0), 1.0);

        let ease_in_out = EasingFunction::EaseInOut;
        assert_eq!(ease_in_out.apply(0.5), 0.5);
        assert_eq!(ease_in_out.apply(1.0), 1.0);
    }

    #[test]
    fn test_easing_from_name() {
        assert_eq!(EasingFunction::from_name("linear"), Some(EasingFunction::Linear));
        assert_eq!(
            EasingFunction::from_name("ease-in-out"),
            Some(EasingFunction::EaseInOut)
        );
        assert_eq!(EasingFunction::from_name("bounce"), None);
    }

    #[test]
    fn test_crossfade_opacities_are_complementary() {
        let t0 = Instant::now();
        let fade = Crossfade::new(t0, Duration::from_millis(1300), EasingFunction::EaseInOut);

        for ms in (0..=1400).step_by(25) {
            let (outgoing, incoming) = fade.opacities(t0 + Duration::from_millis(ms));
            assert!((0.0..=1.0).contains(&outgoing));
            assert!((0.0..=1.0).contains(&incoming));
            assert!((outgoing + incoming - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_crossfade_completion() {
        let t0 = Instant::now();
        let fade = Crossfade::new(t0, Duration::from_millis(100), EasingFunction::Linear);

        assert_eq!(fade.opacities(t0), (1.0, 0.0));
        assert!(!fade.is_complete(t0 + Duration::from_millis(99)));
        assert!(fade.is_complete(t0 + Duration::from_millis(100)));
        assert_eq!(fade.opacities(t0 + Duration::from_millis(150)), (0.0, 1.0));
    }

    #[test]
    fn test_zero_duration_is_instant() {
        let t0 = Instant::now();
        let fade = Crossfade::new(t0, Duration::ZERO, EasingFunction::EaseOut);

        assert!(fade.is_complete(t0));
        assert_eq!(fade.progress(t0), 1.0);
    }
}
