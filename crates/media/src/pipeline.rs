use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use lumamix_state::playback::{DesiredState, PlaybackParams};
use lumamix_state::timeline::{Time, TIME_NONE};

use crate::frame::{FrameRing, FrameStatus, N_SLOTS};
use crate::gst_util::{init_once, make_element};
use crate::info::MediaInfo;
use crate::probe::{PendingProbe, ProbeSlots, PROBE_TIMEOUT_S};

/// Above this rate magnitude seeks trade frame accuracy for speed.
pub const FAST_RATE_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenProgress {
    Idle,
    Probing,
    Opened,
    Failed,
}

/// Owns the decode pipeline: builds it from probe results, issues state
/// transitions, seeks and rate changes, and mediates between the requested
/// state and the pipeline's asynchronous acknowledgement. The appsink
/// callbacks it installs are the sole producer into the frame ring.
pub struct PipelineController {
    path: String,
    uri: String,
    probe_slots: Arc<ProbeSlots>,
    pending_probe: Option<PendingProbe>,
    media: MediaInfo,
    pipeline: Option<gst::Pipeline>,
    ring: Arc<FrameRing>,
    params: PlaybackParams,
    opened: bool,
    failed: bool,
    force_software_decode: bool,
    pub rewind_on_disable: bool,
}

impl PipelineController {
    pub fn new(probe_slots: Arc<ProbeSlots>) -> Self {
        Self {
            path: String::new(),
            uri: String::new(),
            probe_slots,
            pending_probe: None,
            media: MediaInfo::invalid(),
            pipeline: None,
            ring: Arc::new(FrameRing::new()),
            params: PlaybackParams::default(),
            opened: false,
            failed: false,
            force_software_decode: false,
            rewind_on_disable: false,
        }
    }

    pub fn ring(&self) -> Arc<FrameRing> {
        self.ring.clone()
    }

    pub fn media(&self) -> &MediaInfo {
        &self.media
    }

    pub fn params(&self) -> &PlaybackParams {
        &self.params
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn software_decoding(&self) -> bool {
        self.force_software_decode
    }

    /// Record the source identity and start the asynchronous probe. The
    /// pipeline itself is built later, once `poll_open` sees the result.
    pub fn open(&mut self, path: &str, uri: &str) {
        self.path = path.to_string();
        self.uri = uri.to_string();
        self.failed = false;
        self.pending_probe = Some(PendingProbe::spawn(
            self.probe_slots.clone(),
            uri.to_string(),
            gst::ClockTime::from_seconds(PROBE_TIMEOUT_S),
        ));
    }

    /// Called once per tick while opening; never blocks.
    pub fn poll_open(&mut self) -> OpenProgress {
        if self.failed {
            return OpenProgress::Failed;
        }
        if self.opened {
            return OpenProgress::Opened;
        }
        let Some(probe) = &self.pending_probe else {
            return OpenProgress::Idle;
        };
        let Some(result) = probe.try_result() else {
            return OpenProgress::Probing;
        };
        self.pending_probe = None;

        if !result.valid {
            warn!("Could not probe {}", self.uri);
            self.failed = true;
            return OpenProgress::Failed;
        }
        self.media = result;

        match self.execute_open() {
            Ok(()) => {
                info!(
                    "Opened {} ({}, {}x{})",
                    self.uri, self.media.codec, self.media.width, self.media.height
                );
                self.opened = true;
                OpenProgress::Opened
            }
            Err(e) => {
                warn!("Failed to open {}: {e}", self.uri);
                self.failed = true;
                OpenProgress::Failed
            }
        }
    }

    fn execute_open(&mut self) -> Result<(), String> {
        init_once();

        let pipeline = gst::Pipeline::new();

        let decoder = gst::ElementFactory::make("uridecodebin")
            .property("uri", self.uri.as_str())
            .property("force-sw-decoders", self.force_software_decode)
            .build()
            .map_err(|e| format!("Failed to create uridecodebin: {e}"))?;
        pipeline
            .add(&decoder)
            .map_err(|e| format!("Failed to add decoder: {e}"))?;

        let mut chain: Vec<gst::Element> = Vec::new();
        if self.media.interlaced {
            chain.push(make_element("deinterlace")?);
        }
        chain.push(make_element("videoconvert")?);
        chain.push(make_element("videoscale")?);
        if needs_rate_correction(&self.media.codec) {
            chain.push(make_element("videorate")?);
        }

        let caps = build_video_caps(self.media.width, self.media.height);
        let appsink = gst_app::AppSink::builder()
            .caps(&caps)
            .max_buffers(N_SLOTS as u32)
            .drop(true)
            .sync(true)
            .build();

        let elements: Vec<&gst::Element> = chain
            .iter()
            .chain(std::iter::once(appsink.upcast_ref::<gst::Element>()))
            .collect();
        pipeline
            .add_many(elements.iter().copied())
            .map_err(|e| format!("Failed to add video elements: {e}"))?;
        gst::Element::link_many(elements.iter().copied())
            .map_err(|e| format!("Failed to link video chain: {e}"))?;

        connect_video_pad(&decoder, &chain[0]);

        self.ring
            .configure(self.media.width as usize * self.media.height as usize * 4);
        install_ring_callbacks(&appsink, self.ring.clone());

        let target = self.target_state();
        pipeline
            .set_state(target)
            .map_err(|e| format!("Failed to set {target:?}: {e}"))?;

        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Flush, wait for the pipeline to actually reach Null, and release
    /// every frame slot. Safe to call when not open; an in-flight probe is
    /// waited out so no stale result lands afterwards.
    pub fn close(&mut self) {
        if let Some(probe) = self.pending_probe.take() {
            let _ = probe.wait();
        }
        if let Some(pipeline) = self.pipeline.take() {
            let at = if self.params.position == TIME_NONE {
                0
            } else {
                self.params.position
            };
            let _ = pipeline.seek_simple(gst::SeekFlags::FLUSH, gst::ClockTime::from_nseconds(at));
            let _ = pipeline.set_state(gst::State::Null);
            loop {
                let (_, current, _) = pipeline.state(gst::ClockTime::from_mseconds(100));
                if current == gst::State::Null {
                    break;
                }
            }
        }
        self.ring.reset();
        self.opened = false;
        self.params.position = TIME_NONE;
    }

    /// Request playing or paused. A refused transition is fatal for this
    /// media instance. While disabled, the request only updates the state
    /// to resume with.
    pub fn play(&mut self, on: bool) {
        let want = if on {
            DesiredState::Playing
        } else {
            DesiredState::Paused
        };
        if !self.params.enabled {
            self.params.resume = want;
            return;
        }
        self.params.desired = want;
        self.apply_state();
    }

    /// Suspend or resume output consumption. Disabling remembers the
    /// desired state so enabling restores it exactly; calling with the
    /// current value is a no-op.
    pub fn enable(&mut self, on: bool) {
        if on == self.params.enabled {
            return;
        }
        if on {
            self.params.enabled = true;
            self.params.desired = self.params.resume;
            self.apply_state();
        } else {
            if self.rewind_on_disable && self.params.desired == DesiredState::Playing {
                self.seek(0);
            }
            self.params.resume = self.params.desired;
            self.params.desired = DesiredState::Paused;
            self.apply_state();
            self.params.enabled = false;
        }
    }

    fn apply_state(&mut self) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        let target = self.target_state();
        if pipeline.set_state(target).is_err() {
            warn!("{} refused {target:?}", self.uri);
            self.failed = true;
        }
    }

    fn target_state(&self) -> gst::State {
        if self.params.enabled && self.params.desired == DesiredState::Playing {
            gst::State::Playing
        } else {
            gst::State::Paused
        }
    }

    /// Flushing seek to `to`, frame-accurate at normal rates and trick-mode
    /// beyond the fast threshold. A refused seek is logged, not fatal; the
    /// state machine retries on a later tick.
    pub fn seek(&mut self, to: Time) -> bool {
        let Some(pipeline) = &self.pipeline else {
            return false;
        };
        let rate = self.params.rate;
        let flags = seek_flags_for_rate(rate);
        let to = gst::ClockTime::from_nseconds(to);
        let result = if rate >= 0.0 {
            pipeline.seek(
                rate,
                flags,
                gst::SeekType::Set,
                to,
                gst::SeekType::End,
                gst::ClockTime::ZERO,
            )
        } else {
            pipeline.seek(
                rate,
                flags,
                gst::SeekType::Set,
                gst::ClockTime::ZERO,
                gst::SeekType::Set,
                to,
            )
        };
        match result {
            Ok(()) => {
                debug!("Seek {} to {to}", self.uri);
                true
            }
            Err(e) => {
                warn!("Seek failed for {}: {e}", self.uri);
                false
            }
        }
    }

    /// Change the playback rate in place; takes effect through a seek at
    /// the current position.
    pub fn set_rate(&mut self, rate: f64) -> bool {
        if !self.params.set_rate(rate) {
            debug!("Ignoring rate {rate}");
            return false;
        }
        if self.pipeline.is_some() {
            let position = self.query_position();
            let at = if position != TIME_NONE { position } else { 0 };
            return self.seek(at);
        }
        true
    }

    /// Resynchronize with the decode thread after an asynchronous seek; a
    /// bounded state query, issued once per qualifying tick.
    pub fn sync_state(&self) {
        if let Some(pipeline) = &self.pipeline {
            let _ = pipeline.state(gst::ClockTime::from_mseconds(10));
        }
    }

    pub fn query_position(&self) -> Time {
        self.pipeline
            .as_ref()
            .and_then(|p| p.query_position::<gst::ClockTime>())
            .map(|t| t.nseconds())
            .unwrap_or(TIME_NONE)
    }

    pub fn set_position(&mut self, position: Time) {
        self.params.position = position;
    }

    pub fn set_loop_mode(&mut self, mode: lumamix_state::playback::LoopMode) {
        self.params.loop_mode = mode;
    }

    /// Decoder preference cannot be hot-swapped on a live pipeline; a
    /// change while open forces a rebuild.
    pub fn set_software_decoding(&mut self, on: bool) {
        if on == self.force_software_decode {
            return;
        }
        self.force_software_decode = on;
        if self.opened {
            info!(
                "Rebuilding {} with {} decoding",
                self.uri,
                if on { "software" } else { "hardware" }
            );
            self.close();
            match self.execute_open() {
                Ok(()) => self.opened = true,
                Err(e) => {
                    warn!("Failed to reopen {}: {e}", self.uri);
                    self.failed = true;
                }
            }
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn seek_flags_for_rate(rate: f64) -> gst::SeekFlags {
    if rate.abs() > FAST_RATE_THRESHOLD {
        gst::SeekFlags::FLUSH | gst::SeekFlags::TRICKMODE
    } else {
        gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE
    }
}

/// Containers that omit per-frame timestamps (still-image sequences) need
/// a rate-correction stage to produce a usable clock.
pub fn needs_rate_correction(codec: &str) -> bool {
    codec.starts_with("image/") || codec.contains("gif")
}

fn build_video_caps(width: u32, height: u32) -> gst::Caps {
    gst_video::VideoCapsBuilder::new()
        .format(gst_video::VideoFormat::Rgba)
        .width(width as i32)
        .height(height as i32)
        .build()
}

fn connect_video_pad(decoder: &gst::Element, head: &gst::Element) {
    let head_weak = head.downgrade();
    decoder.connect_pad_added(move |_dbin, src_pad| {
        let caps = match src_pad.current_caps() {
            Some(c) => c,
            None => src_pad.query_caps(None),
        };
        let Some(structure) = caps.structure(0) else {
            return;
        };
        if structure.name().as_str().starts_with("video/") {
            if let Some(head) = head_weak.upgrade() {
                let sink_pad = head.static_pad("sink").expect("chain head has sink");
                if !sink_pad.is_linked() {
                    let _ = src_pad.link(&sink_pad);
                }
            }
        }
    });
}

fn install_ring_callbacks(appsink: &gst_app::AppSink, ring: Arc<FrameRing>) {
    let preroll_ring = ring.clone();
    let sample_ring = ring.clone();
    let eos_ring = ring;
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_preroll(move |sink| {
                let sample = sink.pull_preroll().map_err(|_| gst::FlowError::Eos)?;
                push_sample(&preroll_ring, &sample, FrameStatus::Preroll);
                Ok(gst::FlowSuccess::Ok)
            })
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                push_sample(&sample_ring, &sample, FrameStatus::Sample);
                Ok(gst::FlowSuccess::Ok)
            })
            .eos(move |_| {
                eos_ring.push(None, TIME_NONE, FrameStatus::Eos);
            })
            .build(),
    );
}

fn push_sample(ring: &FrameRing, sample: &gst::Sample, status: FrameStatus) {
    let Some(buffer) = sample.buffer() else {
        ring.push(None, TIME_NONE, FrameStatus::Invalid);
        return;
    };
    let pts = buffer.pts().map(|t| t.nseconds()).unwrap_or(TIME_NONE);
    let Ok(map) = buffer.map_readable() else {
        ring.push(None, pts, FrameStatus::Invalid);
        return;
    };
    ring.push(Some(map.as_slice()), pts, status);
}
