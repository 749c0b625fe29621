use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use lumamix_state::timeline::{Time, TIME_NONE};

/// Number of frame slots. Three is enough for one slot being written, one
/// being read and one in flight between the two.
pub const N_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    #[default]
    Invalid,
    Preroll,
    Sample,
    Eos,
}

#[derive(Default)]
struct FrameSlot {
    pixels: Vec<u8>,
    pts: Time,
    status: FrameStatus,
    full: bool,
}

/// What the consumer got out of the ring this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    None,
    /// An end-of-stream marker; the caller decides how to loop.
    Eos,
    /// A picture was handed to the upload callback. `forced` requests a
    /// double upload (preroll and just-seeked frames).
    Frame { pts: Time, forced: bool },
}

/// Fixed ring of independently lockable frame slots. The decode callbacks
/// are the sole producer, the tick loop the sole consumer; the only shared
/// lock is the short-held published-index lock, so neither side ever waits
/// for the other to finish a whole decode or a whole tick.
pub struct FrameRing {
    slots: [Mutex<FrameSlot>; N_SLOTS],
    last_index: Mutex<usize>,
    write_index: AtomicUsize,
    expected_len: AtomicUsize,
    first_pts: AtomicU64,
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRing {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            last_index: Mutex::new(0),
            write_index: AtomicUsize::new(0),
            expected_len: AtomicUsize::new(0),
            first_pts: AtomicU64::new(TIME_NONE),
        }
    }

    /// Byte length a valid frame must have (width * height * 4). Set while
    /// building the pipeline, before any callback can fire.
    pub fn configure(&self, expected_len: usize) {
        self.expected_len.store(expected_len, Ordering::Release);
    }

    /// PTS of the first valid frame ever pushed, `TIME_NONE` until then.
    /// Read from the tick thread to anchor the timeline.
    pub fn first_pts(&self) -> Time {
        self.first_pts.load(Ordering::Acquire)
    }

    fn lock_slot(&self, index: usize) -> MutexGuard<'_, FrameSlot> {
        self.slots[index].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Producer side, called from the decode and EOS callbacks. `pixels`
    /// is `None` for an EOS marker.
    pub fn push(&self, pixels: Option<&[u8]>, pts: Time, status: FrameStatus) {
        let mut index = self.write_index.load(Ordering::Relaxed);

        // never overwrite an end-of-stream the consumer has not seen yet
        let mut blocked = true;
        for _ in 0..N_SLOTS {
            let slot = self.lock_slot(index);
            if slot.full && slot.status == FrameStatus::Eos {
                index = (index + 1) % N_SLOTS;
            } else {
                blocked = false;
                break;
            }
        }
        if blocked {
            // every slot holds an unread EOS; drop the incoming frame
            // instead of destroying one
            return;
        }

        {
            let mut slot = self.lock_slot(index);
            match status {
                FrameStatus::Eos => {
                    slot.pixels.clear();
                    slot.status = FrameStatus::Eos;
                }
                FrameStatus::Preroll | FrameStatus::Sample => {
                    let expected = self.expected_len.load(Ordering::Acquire);
                    match pixels {
                        Some(data) if data.len() == expected && expected > 0 => {
                            slot.pixels.clear();
                            slot.pixels.extend_from_slice(data);
                            slot.status = status;
                            if pts != TIME_NONE {
                                let _ = self.first_pts.compare_exchange(
                                    TIME_NONE,
                                    pts,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                );
                            }
                        }
                        _ => {
                            slot.pixels.clear();
                            slot.status = FrameStatus::Invalid;
                        }
                    }
                }
                FrameStatus::Invalid => {
                    slot.pixels.clear();
                    slot.status = FrameStatus::Invalid;
                }
            }
            slot.pts = pts;
            slot.full = slot.status != FrameStatus::Invalid;
        }

        {
            let mut last = self.last_index.lock().unwrap_or_else(|e| e.into_inner());
            *last = index;
        }
        self.write_index.store((index + 1) % N_SLOTS, Ordering::Relaxed);
    }

    /// Consumer side, called once per tick. Newest published frame wins and
    /// older unread samples are skipped, but an unread EOS is always
    /// delivered before anything newer. `upload` runs under the slot lock,
    /// so it must stay bounded to the copy/upload itself.
    pub fn consume<F>(&self, mut upload: F) -> Consumed
    where
        F: FnMut(&[u8], Time, bool),
    {
        for index in 0..N_SLOTS {
            let mut slot = self.lock_slot(index);
            if slot.full && slot.status == FrameStatus::Eos {
                slot.full = false;
                slot.status = FrameStatus::Invalid;
                return Consumed::Eos;
            }
        }

        let index = *self.last_index.lock().unwrap_or_else(|e| e.into_inner());
        let mut slot = self.lock_slot(index);
        if !slot.full {
            return Consumed::None;
        }
        let forced = slot.status == FrameStatus::Preroll;
        let pts = slot.pts;
        upload(&slot.pixels, pts, forced);
        slot.full = false;
        slot.status = FrameStatus::Invalid;
        Consumed::Frame { pts, forced }
    }

    /// Drop all slot contents and rewind the indices; used on close.
    pub fn reset(&self) {
        for index in 0..N_SLOTS {
            let mut slot = self.lock_slot(index);
            slot.pixels = Vec::new();
            slot.pts = TIME_NONE;
            slot.status = FrameStatus::Invalid;
            slot.full = false;
        }
        *self.last_index.lock().unwrap_or_else(|e| e.into_inner()) = 0;
        self.write_index.store(0, Ordering::Relaxed);
        self.first_pts.store(TIME_NONE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn ring_4px() -> FrameRing {
        let ring = FrameRing::new();
        ring.configure(4);
        ring
    }

    #[test]
    fn newest_published_frame_wins() {
        let ring = ring_4px();
        ring.push(Some(&[1; 4]), 100, FrameStatus::Sample);
        ring.push(Some(&[2; 4]), 200, FrameStatus::Sample);
        ring.push(Some(&[3; 4]), 300, FrameStatus::Sample);

        let consumed = ring.consume(|pixels, pts, _| {
            assert_eq!(pixels, &[3; 4]);
            assert_eq!(pts, 300);
        });
        assert_eq!(
            consumed,
            Consumed::Frame {
                pts: 300,
                forced: false
            }
        );
    }

    #[test]
    fn consumed_frame_is_not_redisplayed() {
        let ring = ring_4px();
        ring.push(Some(&[1; 4]), 100, FrameStatus::Sample);
        assert!(matches!(ring.consume(|_, _, _| {}), Consumed::Frame { .. }));
        assert_eq!(ring.consume(|_, _, _| {}), Consumed::None);
    }

    #[test]
    fn preroll_frames_request_a_forced_upload() {
        let ring = ring_4px();
        ring.push(Some(&[9; 4]), 0, FrameStatus::Preroll);
        assert_eq!(
            ring.consume(|_, _, forced| assert!(forced)),
            Consumed::Frame {
                pts: 0,
                forced: true
            }
        );
    }

    #[test]
    fn wrong_sized_payload_is_rejected() {
        let ring = ring_4px();
        ring.push(Some(&[1; 7]), 100, FrameStatus::Sample);
        assert_eq!(ring.consume(|_, _, _| {}), Consumed::None);
    }

    #[test]
    fn first_pts_is_recorded_once() {
        let ring = ring_4px();
        assert_eq!(ring.first_pts(), TIME_NONE);
        ring.push(Some(&[1; 4]), 500, FrameStatus::Sample);
        ring.push(Some(&[1; 4]), 600, FrameStatus::Sample);
        assert_eq!(ring.first_pts(), 500);
    }

    #[test]
    fn eos_survives_a_full_producer_lap() {
        let ring = ring_4px();
        ring.push(None, TIME_NONE, FrameStatus::Eos);
        for i in 0..2 * N_SLOTS {
            ring.push(Some(&[i as u8; 4]), i as Time, FrameStatus::Sample);
        }
        assert_eq!(ring.consume(|_, _, _| {}), Consumed::Eos);
        assert!(matches!(ring.consume(|_, _, _| {}), Consumed::Frame { .. }));
    }

    #[test]
    fn eos_is_observed_exactly_once_per_stream_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let ring = Arc::new(ring_4px());
        let eos_seen = Arc::new(AtomicUsize::new(0));
        const ROUNDS: usize = 200;

        // one EOS outstanding at a time, like a real decode run: samples
        // race the consumer freely, the next run starts only after the
        // previous EOS was observed
        let producer = {
            let ring = ring.clone();
            let eos_seen = eos_seen.clone();
            std::thread::spawn(move || {
                for round in 0..ROUNDS {
                    for i in 0..(round % (2 * N_SLOTS) + 1) {
                        ring.push(Some(&[i as u8; 4]), i as Time, FrameStatus::Sample);
                    }
                    ring.push(None, TIME_NONE, FrameStatus::Eos);
                    while eos_seen.load(Ordering::Acquire) <= round {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while eos_seen.load(Ordering::Acquire) < ROUNDS {
            if ring.consume(|_, _, _| {}) == Consumed::Eos {
                eos_seen.fetch_add(1, Ordering::Release);
            }
            assert!(std::time::Instant::now() < deadline, "lost an EOS marker");
        }
        producer.join().unwrap();
        assert_eq!(eos_seen.load(Ordering::Acquire), ROUNDS);
        assert_ne!(ring.consume(|_, _, _| {}), Consumed::Eos);
    }

    #[test]
    fn reset_clears_slots_and_indices() {
        let ring = ring_4px();
        ring.push(Some(&[1; 4]), 100, FrameStatus::Sample);
        ring.push(None, TIME_NONE, FrameStatus::Eos);
        ring.reset();
        assert_eq!(ring.consume(|_, _, _| {}), Consumed::None);
        assert_eq!(ring.first_pts(), TIME_NONE);
    }
}
