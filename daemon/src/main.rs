mod config;
mod controller;
mod host;
mod ipc_server;
mod macros;
mod media;
mod playlist;
mod preload;
mod surface;
mod transition;

use anyhow::Result;
use clap::Parser;
use common::{ClipId, ControllerStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use config::{Config, Overrides};
use controller::Controller;
use host::ControlCommand;
use media::MediaBackend;
use media::simulated::SimulatedBackend;
use playlist::{ClipLibrary, Playlist};
use preload::PreloadPool;
use rand::SeedableRng;
use rand::rngs::StdRng;

#[derive(Parser, Debug)]
#[command(name = "backdropd")]
#[command(about = "Background video daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/backdrop/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Crossfade length in seconds (0 for an instant cut)
    #[arg(long, env = "BACKDROP_CROSSFADE_DURATION")]
    crossfade_duration: Option<f64>,

    /// Trigger policy: complete-clip, fixed-duration or loop
    #[arg(long, env = "BACKDROP_TRIGGER_MODE")]
    trigger: Option<String>,

    /// Seconds per clip in fixed-duration mode
    #[arg(long, env = "BACKDROP_CLIP_DURATION")]
    clip_duration: Option<f64>,

    /// Opacity of a fully shown clip (0.3 for a dimmed backdrop)
    #[arg(long, env = "BACKDROP_MAX_OPACITY")]
    max_opacity: Option<f32>,

    /// Media backend: simulated or gstreamer
    #[arg(long, env = "BACKDROP_BACKEND")]
    backend: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            crossfade_duration: self.crossfade_duration,
            trigger: self.trigger.clone(),
            clip_duration: self.clip_duration,
            max_opacity: self.max_opacity,
            backend: self.backend.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    config.apply_overrides(&cli.overrides())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    )
    .init();

    log::info!("Starting backdrop daemon v{}", env!("CARGO_PKG_VERSION"));
    log_config(&config);

    let library = ClipLibrary::from_sources(&config.clips.base_path, &config.clips.sources)?;
    let playlist = build_playlist(&config, &library);

    match config.advanced.backend.as_str() {
        #[cfg(feature = "video")]
        "gstreamer" => {
            let backend = media::playbin::PlaybinBackend::new(
                config.advanced.output_width,
                config.advanced.output_height,
            )?;
            launch(config, library, playlist, backend).await
        }
        #[cfg(not(feature = "video"))]
        "gstreamer" => {
            anyhow::bail!("backdropd was built without video support (rebuild with --features video)")
        }
        _ => {
            let backend = simulated_backend(&config);
            launch(config, library, playlist, backend).await
        }
    }
}

fn log_config(config: &Config) {
    log::info!("  Clips:");
    log::info!("    - Base path: {}", config.clips.base_path);
    log::info!("    - Sources: {} entr(ies)", config.clips.sources.len());
    log::info!(
        "    - Poster: {}",
        config.poster_path().as_deref().unwrap_or("none")
    );
    log::info!("  Transition:");
    log::info!("    - Trigger: {}", config.transition.trigger);
    log::info!(
        "    - Crossfade: {:.2}s ({})",
        config.transition.crossfade_duration,
        config.transition.easing
    );
    if config.transition.trigger == "fixed-duration" {
        log::info!("    - Clip duration: {:.2}s", config.transition.clip_duration);
    }
    if config.transition.max_opacity < 1.0 {
        log::info!(
            "    - Dimmed to {:.0}%",
            config.transition.max_opacity * 100.0
        );
    }
    log::info!("  Preload:");
    log::info!(
        "    - Max resident: {}, distance: {}, timeout: {:.1}s",
        config.preload.max_resident,
        config.preload.distance,
        config.preload.timeout_secs
    );
    if config.preload.wait_for_window {
        log::info!("    - Holding playback until the preload window is ready");
    }
    log::info!("  Backend: {}", config.advanced.backend);
}

fn build_playlist(config: &Config, library: &ClipLibrary) -> Playlist {
    let settings = &config.playlist;
    if !settings.shuffle {
        return Playlist::sequential(library, settings.multiplier);
    }

    match settings.seed {
        Some(seed) => Playlist::generate(
            library,
            settings.multiplier,
            settings.allow_consecutive_repeats,
            &mut StdRng::seed_from_u64(seed),
        ),
        None => Playlist::generate(
            library,
            settings.multiplier,
            settings.allow_consecutive_repeats,
            &mut rand::rng(),
        ),
    }
}

fn simulated_backend(config: &Config) -> SimulatedBackend {
    config.simulated.iter().fold(
        SimulatedBackend::new(config.simulated_default.clone()),
        |backend, entry| backend.with_profile(entry.clip.clone(), entry.profile.clone()),
    )
}

async fn launch<B: MediaBackend>(
    config: Config,
    library: ClipLibrary,
    playlist: Playlist,
    backend: B,
) -> Result<()> {
    let pool = PreloadPool::new(backend, config.preload_options());
    let backend_name = pool.backend_name();
    let controller = Controller::new(playlist, pool, config.controller_options());

    // Channel for commands from IPC and signal handlers to the playback loop
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let state = Arc::new(Mutex::new(DaemonState::new(
        backend_name,
        library.clips().to_vec(),
    )));

    let ipc_state = state.clone();
    let ipc_tx = control_tx.clone();
    let ipc_handle = tokio::spawn(async move {
        log_and_continue!(ipc_server::start(ipc_state, ipc_tx).await, "run IPC server");
    });

    // Set up signal handlers
    let signal_state = state.clone();
    let signal_tx = control_tx.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
        let _ = signal_tx.send(ControlCommand::Shutdown);
    });
    drop(control_tx);

    host::run(controller, state.clone(), control_rx, config.tick_interval()).await;

    log_and_continue!(ipc_handle.await, "stop IPC server");
    log::info!("Daemon shutting down");
    Ok(())
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    pub backend: String,
    pub clips: Vec<ClipId>,
    /// Snapshot refreshed by the playback loop every tick
    pub controller: Option<ControllerStatus>,
}

impl DaemonState {
    fn new(backend: &str, clips: Vec<ClipId>) -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
            backend: backend.to_string(),
            clips,
            controller: None,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
