use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

use gst_pbutils::prelude::DiscovererStreamInfoExt;
use gstreamer as gst;
use gstreamer_pbutils as gst_pbutils;
use tracing::{info, warn};

use lumamix_state::timeline::TIME_NONE;

use crate::gst_util::init_once;
use crate::info::{frame_duration_ns, MediaInfo, DEFAULT_FPS};

pub const PROBE_TIMEOUT_S: u64 = 10;

/// System-wide cap on concurrent probes: a primary and a secondary slot.
/// One instance is shared (via `Arc`) by every pipeline controller, so a
/// burst of opens cannot spawn unbounded prober threads. A third caller
/// blocks on the primary slot until one frees.
pub struct ProbeSlots {
    primary: Mutex<()>,
    secondary: Mutex<()>,
}

impl ProbeSlots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            primary: Mutex::new(()),
            secondary: Mutex::new(()),
        })
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        if let Ok(guard) = self.primary.try_lock() {
            return guard;
        }
        if let Ok(guard) = self.secondary.try_lock() {
            return guard;
        }
        self.primary.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Synchronous one-shot probe of `uri`. Any failure returns an invalid
/// `MediaInfo` rather than an error; the caller decides whether to retry.
pub fn probe_uri(uri: &str, timeout: gst::ClockTime) -> MediaInfo {
    init_once();

    let mut media = MediaInfo::invalid();

    let discoverer = match gst_pbutils::Discoverer::new(timeout) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to create discoverer: {e}");
            return media;
        }
    };

    let stream_info = match discoverer.discover_uri(uri) {
        Ok(i) => i,
        Err(e) => {
            warn!("Failed to discover {uri}: {e}");
            return media;
        }
    };

    let Some(video) = stream_info.video_streams().into_iter().next() else {
        warn!("No video stream in {uri}");
        return media;
    };

    media.width = video.width();
    media.height = video.height();
    media.par_width = media.width;
    if video.par().numer() > 0 && video.par().denom() > 0 {
        media.par_width =
            (media.width as u64 * video.par().numer() as u64 / video.par().denom() as u64) as u32;
    }
    media.bitrate = video.bitrate();
    media.interlaced = video.is_interlaced();
    media.single_image = video.is_image();

    if video.framerate().numer() > 0 && video.framerate().denom() > 0 {
        media.framerate_n = video.framerate().numer() as i32;
        media.framerate_d = video.framerate().denom() as i32;
    } else {
        media.framerate_n = DEFAULT_FPS.0;
        media.framerate_d = DEFAULT_FPS.1;
        info!("Undetermined framerate for {uri}, defaulting to 30/1");
    }
    media.frame_duration = frame_duration_ns(media.framerate_n, media.framerate_d);

    media.end = stream_info
        .duration()
        .map(|d| d.nseconds())
        .unwrap_or(TIME_NONE);
    media.seekable = stream_info.is_seekable();

    if let Some(caps) = DiscovererStreamInfoExt::caps(&video) {
        if let Some(structure) = caps.structure(0) {
            media.codec = structure.name().as_str().to_string();
        }
    }

    media.valid = media.width > 0 && media.height > 0;
    media.classify();
    media
}

/// A probe running on its own detached thread, polled by the tick loop.
pub struct PendingProbe {
    rx: mpsc::Receiver<MediaInfo>,
}

impl PendingProbe {
    pub fn spawn(slots: Arc<ProbeSlots>, uri: String, timeout: gst::ClockTime) -> Self {
        Self::spawn_with(slots, move || probe_uri(&uri, timeout))
    }

    fn spawn_with(
        slots: Arc<ProbeSlots>,
        probe: impl FnOnce() -> MediaInfo + Send + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("media-probe".into())
            .spawn(move || {
                let result = {
                    let _slot = slots.acquire();
                    probe()
                };
                let _ = tx.send(result);
            })
            .ok();
        Self { rx }
    }

    /// Non-blocking poll, called once per tick.
    pub fn try_result(&self) -> Option<MediaInfo> {
        self.rx.try_recv().ok()
    }

    /// Blocking wait, used by close so no stale probe result can land
    /// after teardown.
    pub fn wait(self) -> Option<MediaInfo> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn a_third_probe_blocks_until_a_slot_frees() {
        let slots = ProbeSlots::new();
        let first = slots.acquire();
        let second = slots.acquire();

        let (tx, rx) = mpsc::channel();
        let slots2 = slots.clone();
        let waiter = std::thread::spawn(move || {
            let _slot = slots2.acquire();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(first);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        drop(second);
        waiter.join().unwrap();
    }

    #[test]
    fn failed_probe_releases_its_slot() {
        let slots = ProbeSlots::new();
        let pending = PendingProbe::spawn_with(slots.clone(), MediaInfo::invalid);
        let result = pending.wait().unwrap();
        assert!(!result.valid);

        // both slots must be free again: two immediate acquires succeed
        let a = slots.primary.try_lock();
        let b = slots.secondary.try_lock();
        assert!(a.is_ok() && b.is_ok());
    }

    #[test]
    fn pending_probe_is_polled_without_blocking() {
        let slots = ProbeSlots::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let pending = PendingProbe::spawn_with(slots, move || {
            release_rx.recv().ok();
            MediaInfo::invalid()
        });

        assert!(pending.try_result().is_none());
        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(result) = pending.try_result() {
                assert!(!result.valid);
                break;
            }
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
