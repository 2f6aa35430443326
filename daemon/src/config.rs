use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{ControllerOptions, TriggerMode};
use crate::media::simulated::ClipProfile;
use crate::preload::PreloadOptions;
use crate::transition::EasingFunction;
use crate::{ensure_setting, validate_enum};

/// Upper bound for every setting given in seconds (one day)
const MAX_SECONDS: f64 = 86_400.0;

/// Finite, non-negative (or strictly positive) and at most [`MAX_SECONDS`]
fn seconds_in_range(value: f64, allow_zero: bool) -> bool {
    value.is_finite() && value <= MAX_SECONDS && (value > 0.0 || (allow_zero && value == 0.0))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub clips: ClipSettings,

    #[serde(default)]
    pub playlist: PlaylistSettings,

    #[serde(default)]
    pub transition: TransitionSettings,

    #[serde(default)]
    pub preload: PreloadSettings,

    #[serde(default)]
    pub advanced: AdvancedSettings,

    /// Per-clip profiles for the simulated backend
    #[serde(default)]
    pub simulated: Vec<SimulatedClipConfig>,

    /// Profile for simulated clips without their own entry
    #[serde(default)]
    pub simulated_default: ClipProfile,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the clips and the poster live
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClipSettings {
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// File names, absolute paths, URIs or glob patterns
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Still image shown when no clip can be played
    #[serde(default = "default_poster")]
    pub poster: Option<String>,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            sources: default_sources(),
            poster: default_poster(),
        }
    }
}

fn default_base_path() -> String {
    "~/Videos/backdrop/".to_string()
}
fn default_sources() -> Vec<String> {
    (1..=5).map(|i| format!("bg_{:02}.mp4", i)).collect()
}
fn default_poster() -> Option<String> {
    Some("bg-poster.jpg".to_string())
}

/// Playlist generation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaylistSettings {
    /// Playlist length is `multiplier * number of clips`
    #[serde(default = "default_multiplier")]
    pub multiplier: usize,

    #[serde(default = "default_true")]
    pub shuffle: bool,

    #[serde(default = "default_true")]
    pub allow_consecutive_repeats: bool,

    /// Fixed seed for a reproducible playlist
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PlaylistSettings {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            shuffle: true,
            allow_consecutive_repeats: true,
            seed: None,
        }
    }
}

fn default_multiplier() -> usize {
    5
}
fn default_true() -> bool {
    true
}

/// Crossfade and trigger policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransitionSettings {
    /// Seconds; 0 is an instant cut
    #[serde(default = "default_crossfade_duration")]
    pub crossfade_duration: f64,

    #[serde(default = "default_easing")]
    pub easing: String,

    /// "complete-clip", "fixed-duration" or "loop"
    #[serde(default = "default_trigger")]
    pub trigger: String,

    /// Seconds each clip stays on screen in fixed-duration mode
    #[serde(default = "default_clip_duration")]
    pub clip_duration: f64,

    /// Extra lead time before the clip end in complete-clip mode
    #[serde(default = "default_end_buffer")]
    pub end_buffer: f64,

    /// Opacity of a fully shown clip; 0.3 gives the dimmed backdrop
    #[serde(default = "default_max_opacity")]
    pub max_opacity: f32,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            crossfade_duration: default_crossfade_duration(),
            easing: default_easing(),
            trigger: default_trigger(),
            clip_duration: default_clip_duration(),
            end_buffer: default_end_buffer(),
            max_opacity: default_max_opacity(),
        }
    }
}

fn default_crossfade_duration() -> f64 {
    1.3
}
fn default_easing() -> String {
    "ease-in-out".to_string()
}
fn default_trigger() -> String {
    "complete-clip".to_string()
}
fn default_clip_duration() -> f64 {
    6.0
}
fn default_end_buffer() -> f64 {
    0.1
}
fn default_max_opacity() -> f32 {
    1.0
}

/// Preload pool limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreloadSettings {
    #[serde(default = "default_max_resident")]
    pub max_resident: usize,

    #[serde(default = "default_distance")]
    pub distance: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Show nothing until the first clip and its look-ahead have loaded
    #[serde(default)]
    pub wait_for_window: bool,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            max_resident: default_max_resident(),
            distance: default_distance(),
            timeout_secs: default_timeout_secs(),
            wait_for_window: false,
        }
    }
}

fn default_max_resident() -> usize {
    3
}
fn default_distance() -> usize {
    2
}
fn default_timeout_secs() -> f64 {
    10.0
}

/// Advanced settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdvancedSettings {
    /// "simulated" or "gstreamer"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Controller ticks per second
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Output size of the gstreamer stage
    #[serde(default = "default_output_width")]
    pub output_width: u32,

    #[serde(default = "default_output_height")]
    pub output_height: u32,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            tick_rate: default_tick_rate(),
            max_consecutive_failures: default_max_consecutive_failures(),
            output_width: default_output_width(),
            output_height: default_output_height(),
        }
    }
}

fn default_backend() -> String {
    "simulated".to_string()
}
fn default_tick_rate() -> u32 {
    60
}
fn default_max_consecutive_failures() -> u32 {
    5
}
fn default_output_width() -> u32 {
    1280
}
fn default_output_height() -> u32 {
    720
}

/// Simulated clip profile keyed by clip id or file name
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatedClipConfig {
    pub clip: String,

    #[serde(flatten)]
    pub profile: ClipProfile,
}

/// Values passed by the host on the command line or environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub crossfade_duration: Option<f64>,
    pub trigger: Option<String>,
    pub clip_duration: Option<f64>,
    pub max_opacity: Option<f32>,
    pub backend: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("backdrop");

        Ok(config_dir.join("config.toml"))
    }

    /// Apply host overrides on top of the file values and re-validate
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(crossfade) = overrides.crossfade_duration {
            self.transition.crossfade_duration = crossfade;
        }
        if let Some(ref trigger) = overrides.trigger {
            self.transition.trigger = trigger.clone();
        }
        if let Some(clip_duration) = overrides.clip_duration {
            self.transition.clip_duration = clip_duration;
        }
        if let Some(max_opacity) = overrides.max_opacity {
            self.transition.max_opacity = max_opacity;
        }
        if let Some(ref backend) = overrides.backend {
            self.advanced.backend = backend.clone();
        }
        self.validate()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Self::validate_log_level(&self.general.log_level)?;
        Self::validate_easing(&self.transition.easing)?;
        Self::validate_trigger(&self.transition.trigger)?;
        Self::validate_backend(&self.advanced.backend)?;

        if self.clips.sources.is_empty() {
            anyhow::bail!("No clip sources configured");
        }

        ensure_setting!(
            self.playlist.multiplier >= 1,
            "playlist.multiplier",
            self.playlist.multiplier
        );

        let transition = &self.transition;
        ensure_setting!(
            seconds_in_range(transition.crossfade_duration, true),
            "transition.crossfade_duration",
            transition.crossfade_duration
        );
        ensure_setting!(
            seconds_in_range(transition.clip_duration, false),
            "transition.clip_duration",
            transition.clip_duration
        );
        ensure_setting!(
            seconds_in_range(transition.end_buffer, true),
            "transition.end_buffer",
            transition.end_buffer
        );
        ensure_setting!(
            transition.max_opacity > 0.0 && transition.max_opacity <= 1.0,
            "transition.max_opacity",
            transition.max_opacity
        );

        let preload = &self.preload;
        ensure_setting!(
            preload.max_resident >= 2,
            "preload.max_resident",
            preload.max_resident
        );
        ensure_setting!(preload.distance >= 1, "preload.distance", preload.distance);
        ensure_setting!(
            preload.distance < preload.max_resident,
            "preload.distance",
            preload.distance
        );
        ensure_setting!(
            seconds_in_range(preload.timeout_secs, false),
            "preload.timeout_secs",
            preload.timeout_secs
        );

        ensure_setting!(
            self.advanced.tick_rate > 0,
            "advanced.tick_rate",
            self.advanced.tick_rate
        );
        ensure_setting!(
            self.advanced.max_consecutive_failures >= 1,
            "advanced.max_consecutive_failures",
            self.advanced.max_consecutive_failures
        );
        for (name, size) in [
            ("advanced.output_width", self.advanced.output_width),
            ("advanced.output_height", self.advanced.output_height),
        ] {
            ensure_setting!(size > 0 && size <= 8192, name, size);
        }

        for profile in std::iter::once(&self.simulated_default)
            .chain(self.simulated.iter().map(|entry| &entry.profile))
        {
            ensure_setting!(
                seconds_in_range(profile.duration, false),
                "simulated.duration",
                profile.duration
            );
            ensure_setting!(
                seconds_in_range(profile.load_time, true),
                "simulated.load_time",
                profile.load_time
            );
            if let Some(fail_at) = profile.fail_at {
                ensure_setting!(
                    seconds_in_range(fail_at, true),
                    "simulated.fail_at",
                    fail_at
                );
            }
        }

        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_easing(easing: &str) -> Result<()> {
        validate_enum!(easing, "linear", "ease-in", "ease-out", "ease-in-out")
    }

    fn validate_trigger(trigger: &str) -> Result<()> {
        validate_enum!(trigger, "complete-clip", "fixed-duration", "loop")
    }

    fn validate_backend(backend: &str) -> Result<()> {
        validate_enum!(backend, "simulated", "gstreamer")
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        match self.transition.trigger.as_str() {
            "fixed-duration" => TriggerMode::FixedDuration {
                clip_duration: Duration::from_secs_f64(self.transition.clip_duration),
            },
            "loop" => TriggerMode::Loop,
            _ => TriggerMode::CompleteClip {
                end_buffer: Duration::from_secs_f64(self.transition.end_buffer),
            },
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            crossfade: Duration::from_secs_f64(self.transition.crossfade_duration),
            easing: EasingFunction::from_name(&self.transition.easing).unwrap_or_default(),
            trigger: self.trigger_mode(),
            max_consecutive_failures: self.advanced.max_consecutive_failures,
            poster: self.poster_path(),
            max_opacity: self.transition.max_opacity,
            wait_for_window: self.preload.wait_for_window,
        }
    }

    pub fn preload_options(&self) -> PreloadOptions {
        PreloadOptions {
            max_resident: self.preload.max_resident,
            distance: self.preload.distance,
            timeout: Duration::from_secs_f64(self.preload.timeout_secs),
        }
    }

    /// Poster resolved the same way as clip sources
    pub fn poster_path(&self) -> Option<String> {
        let poster = self.clips.poster.as_ref()?;
        let expanded = shellexpand::tilde(poster);
        if expanded.contains("://") || Path::new(expanded.as_ref()).is_absolute() {
            return Some(expanded.to_string());
        }
        let base = shellexpand::tilde(&self.clips.base_path);
        Some(
            Path::new(base.as_ref())
                .join(expanded.as_ref())
                .to_string_lossy()
                .to_string(),
        )
    }

    /// Interval between controller ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.advanced.tick_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.clips.sources.len(), 5);
        assert_eq!(config.clips.sources[0], "bg_01.mp4");
        assert_eq!(config.playlist.multiplier, 5);
        assert_eq!(config.transition.crossfade_duration, 1.3);
        assert_eq!(config.transition.trigger, "complete-clip");
        assert_eq!(config.preload.max_resident, 3);
        assert_eq!(config.preload.distance, 2);
        assert_eq!(config.advanced.backend, "simulated");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_enums() {
        assert!(Config::validate_trigger("fixed-duration").is_ok());
        assert!(Config::validate_trigger("on-ended").is_err());
        assert!(Config::validate_easing("ease-out").is_ok());
        assert!(Config::validate_easing("bounce").is_err());
        assert!(Config::validate_backend("gstreamer").is_ok());
        assert!(Config::validate_backend("mpv").is_err());
        assert!(Config::validate_log_level("verbose").is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = Config::default();
        config.preload.max_resident = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.preload.distance = 3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transition.crossfade_duration = -0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transition.crossfade_duration = 0.0;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.advanced.tick_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transition.max_opacity = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transition.max_opacity = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.advanced.output_width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.clips.sources.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        for contents in [
            "[transition]\ncrossfade_duration = 1e20\n",
            "[transition]\ntrigger = \"fixed-duration\"\nclip_duration = 1e20\n",
            "[transition]\nend_buffer = 1e20\n",
            "[preload]\ntimeout_secs = 1e19\n",
            "[simulated_default]\nduration = 1e20\n",
            "[[simulated]]\nclip = \"a.mp4\"\nfail_at = -1.0\n",
            "[[simulated]]\nclip = \"a.mp4\"\nfail_at = 1e20\n",
        ] {
            fs::write(&path, contents).unwrap();
            assert!(
                Config::load_from_path(&path).is_err(),
                "accepted: {}",
                contents
            );
        }

        let mut config = Config::default();
        config.transition.crossfade_duration = MAX_SECONDS;
        config.preload.timeout_secs = MAX_SECONDS;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.controller_options().crossfade,
            Duration::from_secs(86_400)
        );
        assert_eq!(config.preload_options().timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[general]
log_level = "debug"

[clips]
base_path = "/srv/backdrop"
sources = ["intro.mp4", "loops/*.webm"]
poster = "still.jpg"

[playlist]
multiplier = 3
allow_consecutive_repeats = false
seed = 42

[transition]
crossfade_duration = 0.8
trigger = "fixed-duration"
clip_duration = 6.0

[preload]
max_resident = 4
timeout_secs = 5.0

[advanced]
tick_rate = 30

[simulated_default]
duration = 12.0

[[simulated]]
clip = "intro.mp4"
duration = 4.0
fail_at = 1.5

[[simulated]]
clip = "broken.mp4"
fail_load = true
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.clips.sources.len(), 2);
        assert_eq!(config.playlist.seed, Some(42));
        assert!(!config.playlist.allow_consecutive_repeats);
        assert!(config.playlist.shuffle);
        assert_eq!(config.preload.max_resident, 4);
        assert_eq!(config.preload.distance, 2);
        assert_eq!(config.simulated_default.duration, 12.0);
        assert_eq!(config.simulated_default.load_time, 0.25);

        assert_eq!(config.simulated.len(), 2);
        assert_eq!(config.simulated[0].clip, "intro.mp4");
        assert_eq!(config.simulated[0].profile.fail_at, Some(1.5));
        assert!(config.simulated[1].profile.fail_load);
        assert_eq!(config.simulated[1].profile.duration, 8.0);

        assert_eq!(
            config.trigger_mode(),
            TriggerMode::FixedDuration {
                clip_duration: Duration::from_secs(6)
            }
        );
        assert_eq!(config.poster_path().as_deref(), Some("/srv/backdrop/still.jpg"));
        assert_eq!(config.tick_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::default();
        let overrides = Overrides {
            crossfade_duration: Some(0.0),
            trigger: Some("fixed-duration".to_string()),
            clip_duration: Some(9.5),
            max_opacity: Some(0.3),
            backend: None,
        };
        config.apply_overrides(&overrides).unwrap();

        let options = config.controller_options();
        assert_eq!(options.crossfade, Duration::ZERO);
        assert_eq!(
            options.trigger,
            TriggerMode::FixedDuration {
                clip_duration: Duration::from_secs_f64(9.5)
            }
        );
        assert_eq!(options.max_opacity, 0.3);
        assert_eq!(config.advanced.backend, "simulated");
    }

    #[test]
    fn test_store_backdrop_config() {
        let toml = r#"
[clips]
sources = ["checkered-flag.mp4"]

[transition]
trigger = "loop"
max_opacity = 0.3

[preload]
wait_for_window = true
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());

        let options = config.controller_options();
        assert_eq!(options.trigger, TriggerMode::Loop);
        assert_eq!(options.max_opacity, 0.3);
        assert!(options.wait_for_window);
        assert_eq!(config.advanced.output_width, 1280);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = Config::default();
        let overrides = Overrides {
            trigger: Some("whenever".to_string()),
            ..Default::default()
        };
        assert!(config.apply_overrides(&overrides).is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();

        let missing = Config::load_from_path(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(missing.transition.trigger, "complete-clip");

        let path = dir.path().join("config.toml");
        fs::write(&path, "[transition]\ncrossfade_duration = 2.0\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.transition.crossfade_duration, 2.0);
        assert_eq!(config.preload_options().timeout, Duration::from_secs(10));

        fs::write(&path, "[preload]\nmax_resident = 1\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());

        fs::write(&path, "[transition\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_poster_disabled() {
        let mut config = Config::default();
        config.clips.poster = None;
        assert!(config.poster_path().is_none());
        assert!(config.controller_options().poster.is_none());
    }
}
