//! Output stage for the `playbin` backend
//!
//! Every resource renders into its own appsink. The stage keeps the latest
//! frame of each resource as a layer, mixes the visible layers bottom to top
//! by z-index with their opacity, and pushes the result into a single output
//! pipeline. Both render slots therefore share one surface.

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

#[derive(Debug, Default)]
struct Layer {
    opacity: f32,
    z_index: i32,
    /// Latest BGRA frame, `width * height * 4` bytes
    frame: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Layers {
    next_id: u64,
    entries: HashMap<LayerId, Layer>,
}

impl Layers {
    /// Mix every visible layer over black
    fn compose(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        for pixel in out.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel[3] = u8::MAX;
        }

        let mut visible: Vec<&Layer> = self
            .entries
            .values()
            .filter(|layer| layer.opacity > 0.0 && layer.frame.is_some())
            .collect();
        visible.sort_by_key(|layer| layer.z_index);

        for layer in visible {
            let Some(frame) = &layer.frame else {
                continue;
            };
            let weight = (layer.opacity.clamp(0.0, 1.0) * 255.0).round() as u16;
            for (dst, src) in out
                .chunks_exact_mut(BYTES_PER_PIXEL)
                .zip(frame.chunks_exact(BYTES_PER_PIXEL))
            {
                for (d, s) in dst[..3].iter_mut().zip(&src[..3]) {
                    *d = blend(*d, *s, weight);
                }
            }
        }

        out
    }
}

/// `src` over `dst` with an 8-bit weight
fn blend(dst: u8, src: u8, weight: u16) -> u8 {
    ((u16::from(src) * weight + u16::from(dst) * (255 - weight) + 127) / 255) as u8
}

pub struct Stage {
    width: u32,
    height: u32,
    layers: Mutex<Layers>,
    output: Option<(gst::Pipeline, gst_app::AppSrc)>,
}

impl Stage {
    /// Start the output pipeline at `width` x `height`
    pub fn new(width: u32, height: u32) -> Result<Arc<Self>> {
        let pipeline = gst::parse::launch("appsrc name=stage ! videoconvert ! autovideosink sync=false")
            .context("Failed to create output pipeline")?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("Output is not a gst::Pipeline"))?;

        let app_src = pipeline
            .by_name("stage")
            .context("Failed to get appsrc from output pipeline")?
            .dynamic_cast::<gst_app::AppSrc>()
            .map_err(|_| anyhow::anyhow!("stage is not an AppSrc"))?;

        app_src.set_caps(Some(&frame_caps(width, height)));
        app_src.set_format(gst::Format::Time);
        app_src.set_is_live(true);
        app_src.set_do_timestamp(true);

        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start output pipeline")?;
        log::info!("Output stage running at {}x{}", width, height);

        Ok(Arc::new(Self {
            width,
            height,
            layers: Mutex::new(Layers::default()),
            output: Some((pipeline, app_src)),
        }))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Layers hold plain data, so a panicked holder leaves them usable
    fn layers(&self) -> MutexGuard<'_, Layers> {
        self.layers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// New hidden layer
    pub fn add_layer(&self) -> LayerId {
        let mut layers = self.layers();
        let id = LayerId(layers.next_id);
        layers.next_id += 1;
        layers.entries.insert(id, Layer::default());
        id
    }

    pub fn remove_layer(&self, id: LayerId) {
        self.layers().entries.remove(&id);
    }

    pub fn set_opacity(&self, id: LayerId, opacity: f32) {
        if let Some(layer) = self.layers().entries.get_mut(&id) {
            layer.opacity = opacity;
        }
    }

    pub fn set_z_index(&self, id: LayerId, z_index: i32) {
        if let Some(layer) = self.layers().entries.get_mut(&id) {
            layer.z_index = z_index;
        }
    }

    /// Store a decoded frame; a frame of a visible layer refreshes the output
    pub fn submit_frame(&self, id: LayerId, data: &[u8]) {
        if data.len() != self.frame_len() {
            log::trace!(
                "Dropping frame of {} bytes (expected {})",
                data.len(),
                self.frame_len()
            );
            return;
        }

        let composed = {
            let mut layers = self.layers();
            let Some(layer) = layers.entries.get_mut(&id) else {
                return;
            };
            layer
                .frame
                .get_or_insert_with(|| vec![0; data.len()])
                .copy_from_slice(data);
            if layer.opacity <= 0.0 {
                return;
            }
            layers.compose(self.frame_len())
        };

        self.push(composed);
    }

    fn push(&self, frame: Vec<u8>) {
        let Some((_, app_src)) = &self.output else {
            return;
        };
        if let Err(e) = app_src.push_buffer(gst::Buffer::from_mut_slice(frame)) {
            log::trace!("Output stage rejected frame: {:?}", e);
        }
    }

    /// Stop the output pipeline
    pub fn shutdown(&self) {
        if let Some((pipeline, _)) = &self.output
            && let Err(e) = pipeline.set_state(gst::State::Null)
        {
            log::warn!("Failed to stop output pipeline: {}", e);
        }
    }
}

/// Raw BGRA caps every layer is scaled to
pub fn frame_caps(width: u32, height: u32) -> gst::Caps {
    gst_video::VideoCapsBuilder::new()
        .format(gst_video::VideoFormat::Bgra)
        .width(width as i32)
        .height(height as i32)
        .pixel_aspect_ratio(gst::Fraction::new(1, 1))
        .build()
}

#[cfg(test)]
impl Stage {
    fn detached(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Mutex::new(Layers::default()),
            output: None,
        }
    }

    fn compose(&self) -> Vec<u8> {
        self.layers().compose(self.frame_len())
    }
}
