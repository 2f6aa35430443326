//! GStreamer `playbin` media backend
//!
//! Each resource is one muted `playbin` element whose video goes to an
//! appsink feeding its own layer on the shared [`Stage`]. Opening a clip sets
//! it to `Paused`, which makes GStreamer preroll and buffer in the
//! background; the resource counts as ready once prerolling finished and any
//! buffering reported by the source reached 100%.

use super::stage::{LayerId, Stage, frame_caps};
use super::{MediaBackend, MediaError, MediaResource, PlaybackEvent, Readiness};
use anyhow::Context;
use common::ClipId;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Initialize GStreamer (idempotent, safe to call multiple times)
fn initialize_gstreamer() -> Result<(), gst::glib::Error> {
    static GSTREAMER_INITIALIZED: std::sync::OnceLock<Result<(), String>> =
        std::sync::OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            let result = gst::init().map_err(|e| e.to_string());
            if result.is_ok() {
                log::info!("GStreamer initialized");
            }
            result
        })
        .clone()
        .map_err(|e| gst::glib::Error::new(gst::CoreError::Failed, &e))
}

/// Turn a clip source into a URI `playbin` understands
fn clip_uri(clip: &ClipId) -> Result<String, gst::glib::Error> {
    let source = clip.as_str();
    if source.contains("://") {
        return Ok(source.to_string());
    }
    let path = Path::new(source);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    gst::glib::filename_to_uri(&absolute, None).map(|uri| uri.to_string())
}

/// Video sink of one resource: scale to the stage size and hand frames over
fn build_layer_sink(stage: &Arc<Stage>, layer: LayerId) -> anyhow::Result<gst::Element> {
    let sink = gst::parse::bin_from_description(
        "videoconvert ! videoscale ! capsfilter name=size ! appsink name=sink",
        true,
    )
    .context("Failed to create layer sink")?;

    sink.by_name("size")
        .context("Failed to get capsfilter from layer sink")?
        .set_property("caps", frame_caps(stage.width(), stage.height()));

    let app_sink = sink
        .by_name("sink")
        .context("Failed to get appsink from layer sink")?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| anyhow::anyhow!("sink is not an AppSink"))?;

    app_sink.set_property("sync", true);
    app_sink.set_property("max-buffers", 1u32);
    app_sink.set_property("drop", true);

    let stage = stage.clone();
    app_sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                stage.submit_frame(layer, map.as_slice());
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(sink.upcast())
}

/// Backend producing [`PlaybinResource`]s
pub struct PlaybinBackend {
    stage: Arc<Stage>,
}

impl PlaybinBackend {
    /// Start GStreamer and an output stage of `width` x `height`
    pub fn new(width: u32, height: u32) -> anyhow::Result<Self> {
        initialize_gstreamer()?;
        Ok(Self {
            stage: Stage::new(width, height)?,
        })
    }
}

impl Drop for PlaybinBackend {
    fn drop(&mut self) {
        self.stage.shutdown();
    }
}

impl MediaBackend for PlaybinBackend {
    type Resource = PlaybinResource;

    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open(&mut self, clip: &ClipId, _now: Instant) -> Result<PlaybinResource, MediaError> {
        let load_error = |reason: String| MediaError::LoadError {
            clip: clip.clone(),
            reason,
        };

        let uri = clip_uri(clip).map_err(|e| load_error(format!("invalid clip path: {}", e)))?;
        log::debug!("Creating playbin for {}", uri);

        let layer = self.stage.add_layer();
        let video_sink = match build_layer_sink(&self.stage, layer) {
            Ok(sink) => sink,
            Err(e) => {
                self.stage.remove_layer(layer);
                return Err(load_error(format!("{:#}", e)));
            }
        };

        let playbin = match gst::ElementFactory::make("playbin")
            .property("uri", uri.as_str())
            .property("video-sink", video_sink)
            .build()
        {
            Ok(playbin) => playbin,
            Err(e) => {
                self.stage.remove_layer(layer);
                return Err(load_error(format!("failed to create playbin: {}", e)));
            }
        };

        // Background clips never carry sound
        playbin.set_property("mute", true);

        if let Err(e) = playbin.set_state(gst::State::Paused) {
            let _ = playbin.set_state(gst::State::Null);
            self.stage.remove_layer(layer);
            return Err(load_error(format!("failed to start prerolling: {}", e)));
        }

        Ok(PlaybinResource {
            clip: clip.clone(),
            playbin,
            stage: self.stage.clone(),
            layer,
            prerolled: false,
            buffering: None,
            load_failure: None,
            events: VecDeque::new(),
            playing: false,
            released: false,
        })
    }
}

/// One clip loaded into a `playbin`
pub struct PlaybinResource {
    clip: ClipId,
    playbin: gst::Element,
    stage: Arc<Stage>,
    layer: LayerId,
    prerolled: bool,
    /// Last buffering percentage reported by the source
    buffering: Option<i32>,
    load_failure: Option<MediaError>,
    events: VecDeque<PlaybackEvent>,
    playing: bool,
    released: bool,
}

impl PlaybinResource {
    /// Drain the bus into resource state
    fn drain_bus(&mut self) {
        let Some(bus) = self.playbin.bus() else {
            return;
        };

        while let Some(msg) = bus.pop() {
            match msg.view() {
                gst::MessageView::AsyncDone(_) => {
                    self.prerolled = true;
                }
                gst::MessageView::Buffering(buffering) => {
                    self.buffering = Some(buffering.percent());
                }
                gst::MessageView::Eos(_) => {
                    self.playing = false;
                    self.events.push_back(PlaybackEvent::Ended);
                }
                gst::MessageView::Error(err) => {
                    let error = MediaError::LoadError {
                        clip: self.clip.clone(),
                        reason: err.error().to_string(),
                    };
                    log::debug!(
                        "GStreamer error for {}: {} ({:?})",
                        self.clip,
                        err.error(),
                        err.debug()
                    );
                    if self.prerolled {
                        self.events.push_back(PlaybackEvent::Error(error));
                    } else {
                        self.load_failure = Some(error);
                    }
                }
                _ => {}
            }
        }
    }
}

impl MediaResource for PlaybinResource {
    fn clip(&self) -> &ClipId {
        &self.clip
    }

    fn poll_ready(&mut self, _now: Instant) -> Readiness {
        if self.released {
            return Readiness::Failed(MediaError::LoadError {
                clip: self.clip.clone(),
                reason: "resource released".to_string(),
            });
        }
        self.drain_bus();

        if let Some(err) = &self.load_failure {
            return Readiness::Failed(err.clone());
        }
        if self.prerolled && self.buffering.is_none_or(|percent| percent >= 100) {
            Readiness::Ready
        } else {
            Readiness::Loading
        }
    }

    fn play(&mut self, _now: Instant) -> Result<(), MediaError> {
        self.playbin
            .set_state(gst::State::Playing)
            .map_err(|e| MediaError::PlayRejected {
                clip: self.clip.clone(),
                reason: e.to_string(),
            })?;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self, _now: Instant) {
        if let Err(e) = self.playbin.set_state(gst::State::Paused) {
            log::warn!("Failed to pause {}: {}", self.clip, e);
        }
        self.playing = false;
    }

    fn rewind(&mut self, _now: Instant) {
        if let Err(e) = self.playbin.seek_simple(
            gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
            gst::ClockTime::ZERO,
        ) {
            log::warn!("Failed to rewind {}: {}", self.clip, e);
        }
        self.events.clear();
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn position(&self, _now: Instant) -> Option<Duration> {
        self.playbin
            .query_position::<gst::ClockTime>()
            .map(|t| Duration::from_nanos(t.nseconds()))
    }

    fn duration(&self) -> Option<Duration> {
        self.playbin
            .query_duration::<gst::ClockTime>()
            .map(|t| Duration::from_nanos(t.nseconds()))
    }

    fn poll_playback(&mut self, _now: Instant) -> Option<PlaybackEvent> {
        if self.released {
            return None;
        }
        self.drain_bus();
        self.events.pop_front()
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.stage.set_opacity(self.layer, opacity);
    }

    fn set_z_index(&mut self, z_index: i32) {
        self.stage.set_z_index(self.layer, z_index);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.playbin.set_state(gst::State::Null) {
            log::warn!("Failed to set {} to Null state: {}", self.clip, e);
        }
        if let Some(bus) = self.playbin.bus() {
            while bus.pop().is_some() {}
        }
        self.stage.remove_layer(self.layer);
        self.events.clear();
        self.playing = false;
        self.released = true;
        log::debug!("Released playbin for {}", self.clip);
    }
}

impl Drop for PlaybinResource {
    fn drop(&mut self) {
        self.release();
    }
}
