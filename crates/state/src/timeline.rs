use serde::{Deserialize, Serialize};

/// Timestamps and durations are nanoseconds, matching the decode clock.
pub type Time = u64;

/// Sentinel for "not yet known", same bit pattern as the decode clock's NONE.
pub const TIME_NONE: Time = u64::MAX;

pub const SECOND: Time = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub begin: Time,
    pub end: Time,
}

impl TimeInterval {
    pub fn new(begin: Time, end: Time) -> Self {
        Self { begin, end }
    }

    pub fn none() -> Self {
        Self {
            begin: TIME_NONE,
            end: TIME_NONE,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.begin != TIME_NONE && self.end != TIME_NONE && self.begin < self.end
    }

    pub fn duration(&self) -> Time {
        if self.is_valid() {
            self.end - self.begin
        } else {
            0
        }
    }

    /// Half-open containment: `begin` is inside, `end` is not.
    pub fn includes(&self, t: Time) -> bool {
        self.is_valid() && t >= self.begin && t < self.end
    }

    fn overlaps_or_touches(&self, other: &TimeInterval) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

impl Default for TimeInterval {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FadingCurve {
    #[default]
    Linear,
    Quadratic,
}

/// Valid playback range of a media source plus the sections the user cut
/// out of it. Gaps are kept sorted, pairwise disjoint and inside
/// `[begin, end)`; the fade array holds one weight per frame step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    begin: Time,
    end: Time,
    step: Time,
    first: Time,
    gaps: Vec<TimeInterval>,
    fading: Vec<f32>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            begin: 0,
            end: TIME_NONE,
            step: 0,
            first: TIME_NONE,
            gaps: Vec::new(),
            fading: Vec::new(),
        }
    }
}

impl Timeline {
    pub fn new(end: Time, step: Time) -> Self {
        let mut tl = Self::default();
        tl.set_end(end);
        tl.set_step(step);
        tl
    }

    pub fn begin(&self) -> Time {
        self.begin
    }

    pub fn end(&self) -> Time {
        self.end
    }

    pub fn step(&self) -> Time {
        self.step
    }

    pub fn first(&self) -> Time {
        self.first
    }

    pub fn duration(&self) -> Time {
        if self.end == TIME_NONE || self.end <= self.begin {
            0
        } else {
            self.end - self.begin
        }
    }

    pub fn set_end(&mut self, end: Time) {
        if end == TIME_NONE || end <= self.begin {
            return;
        }
        self.end = end;
        self.truncate_gaps();
        self.resize_fading();
    }

    pub fn set_step(&mut self, step: Time) {
        if step == 0 || step == TIME_NONE || step > self.duration() {
            return;
        }
        self.step = step;
        self.resize_fading();
    }

    /// First presentation time actually observed from the decoder, used to
    /// correct sources that do not start exactly at zero.
    pub fn set_first(&mut self, first: Time) {
        if first == TIME_NONE || (self.end != TIME_NONE && first >= self.end) {
            return;
        }
        self.first = first;
    }

    pub fn num_frames(&self) -> u64 {
        if self.step == 0 {
            return 0;
        }
        self.duration() / self.step
    }

    pub fn num_gaps(&self) -> usize {
        self.gaps.len()
    }

    pub fn gaps(&self) -> &[TimeInterval] {
        &self.gaps
    }

    pub fn gap_at(&self, t: Time) -> Option<TimeInterval> {
        self.gaps.iter().find(|g| g.includes(t)).copied()
    }

    /// Nearest valid (non-gap) time at or after `t`.
    pub fn next(&self, t: Time) -> Time {
        match self.gap_at(t) {
            Some(gap) => gap.end,
            None => t,
        }
    }

    /// Nearest valid (non-gap) time at or before `t`. Rounds down to the
    /// frame just before the gap; a gap starting at `begin` has no earlier
    /// valid time, so `begin` is returned and the caller treats it as the
    /// timeline edge.
    pub fn previous(&self, t: Time) -> Time {
        match self.gap_at(t) {
            Some(gap) if gap.begin > self.begin => {
                gap.begin.saturating_sub(self.step).max(self.begin)
            }
            Some(_) => self.begin,
            None => t,
        }
    }

    /// Exclude `interval` from playback. Overlapping and touching gaps are
    /// merged so the list stays disjoint and sorted.
    pub fn cut(&mut self, interval: TimeInterval) {
        if !interval.is_valid() || interval.begin >= self.end || interval.end <= self.begin {
            return;
        }
        let clamped = TimeInterval::new(
            interval.begin.max(self.begin),
            interval.end.min(self.end),
        );
        let mut merged = clamped;
        self.gaps.retain(|g| {
            if g.overlaps_or_touches(&merged) {
                merged.begin = merged.begin.min(g.begin);
                merged.end = merged.end.max(g.end);
                false
            } else {
                true
            }
        });
        self.gaps.push(merged);
        self.gaps.sort_by_key(|g| g.begin);
    }

    /// Remove the gap containing `t`, restoring that section.
    pub fn restore(&mut self, t: Time) -> bool {
        let before = self.gaps.len();
        self.gaps.retain(|g| !g.includes(t));
        self.gaps.len() != before
    }

    pub fn clear_gaps(&mut self) {
        self.gaps.clear();
    }

    /// Wholesale gap replacement for session restore; the list is
    /// sanitized through `cut` so invariants hold for arbitrary input.
    pub fn set_gaps(&mut self, gaps: Vec<TimeInterval>) {
        self.gaps.clear();
        for g in gaps {
            self.cut(g);
        }
    }

    pub fn fading(&self) -> &[f32] {
        &self.fading
    }

    pub fn set_fading(&mut self, fading: Vec<f32>) {
        self.fading = fading;
        self.resize_fading();
    }

    /// Sampled fade weight at `t`, 1.0 when fully visible.
    pub fn fading_at(&self, t: Time) -> f32 {
        if self.fading.is_empty() || self.step == 0 {
            return 1.0;
        }
        let index = (t.saturating_sub(self.begin) / self.step) as usize;
        let index = index.min(self.fading.len() - 1);
        self.fading[index].clamp(0.0, 1.0)
    }

    /// Box-filter pass over the fade array; `iterations` controls strength.
    pub fn smooth_fading(&mut self, iterations: u32) {
        if self.fading.len() < 3 {
            return;
        }
        for _ in 0..iterations {
            let prev = self.fading.clone();
            for i in 1..prev.len() - 1 {
                self.fading[i] = (prev[i - 1] + prev[i] + prev[i + 1]) / 3.0;
            }
        }
    }

    /// Replace the fade array with a ramp-in / ramp-out envelope of
    /// `duration` at each end of the timeline.
    pub fn auto_fading(&mut self, duration: Time, curve: FadingCurve) {
        let n = self.num_frames() as usize;
        if n == 0 || self.step == 0 {
            return;
        }
        let ramp = ((duration / self.step) as usize).min(n / 2).max(1);
        self.fading = vec![1.0; n];
        for i in 0..ramp {
            let x = i as f32 / ramp as f32;
            let w = match curve {
                FadingCurve::Linear => x,
                FadingCurve::Quadratic => x * x,
            };
            self.fading[i] = w;
            self.fading[n - 1 - i] = w;
        }
    }

    fn truncate_gaps(&mut self) {
        let end = self.end;
        let begin = self.begin;
        self.gaps.retain(|g| g.begin < end && g.end > begin);
        for g in &mut self.gaps {
            g.begin = g.begin.max(begin);
            g.end = g.end.min(end);
        }
    }

    fn resize_fading(&mut self) {
        let n = self.num_frames() as usize;
        if n == 0 {
            return;
        }
        self.fading.resize(n, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline_10s_30fps() -> Timeline {
        Timeline::new(10 * SECOND, SECOND / 30)
    }

    #[test]
    fn empty_timeline_has_no_frames() {
        let tl = Timeline::default();
        assert_eq!(tl.num_frames(), 0);
        assert_eq!(tl.duration(), 0);
    }

    #[test]
    fn num_frames_matches_duration_over_step() {
        let tl = timeline_10s_30fps();
        assert_eq!(tl.num_frames(), 300);
    }

    #[test]
    fn invalid_bounds_are_ignored() {
        let mut tl = timeline_10s_30fps();
        tl.set_end(0);
        tl.set_end(TIME_NONE);
        tl.set_step(0);
        tl.set_step(20 * SECOND);
        assert_eq!(tl.end(), 10 * SECOND);
        assert_eq!(tl.step(), SECOND / 30);
    }

    #[test]
    fn set_first_rejects_out_of_range() {
        let mut tl = timeline_10s_30fps();
        tl.set_first(11 * SECOND);
        assert_eq!(tl.first(), TIME_NONE);
        tl.set_first(SECOND / 60);
        assert_eq!(tl.first(), SECOND / 60);
    }

    #[test]
    fn gaps_stay_sorted_and_disjoint() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(6 * SECOND, 7 * SECOND));
        tl.cut(TimeInterval::new(2 * SECOND, 3 * SECOND));
        tl.cut(TimeInterval::new(SECOND, 2 * SECOND + SECOND / 2));
        tl.cut(TimeInterval::new(8 * SECOND, 9 * SECOND));

        assert_eq!(tl.num_gaps(), 3);
        let gaps = tl.gaps();
        for pair in gaps.windows(2) {
            assert!(pair[0].end < pair[1].begin);
        }
        for g in gaps {
            assert!(g.begin >= tl.begin() && g.end <= tl.end());
        }
        assert_eq!(gaps[0], TimeInterval::new(SECOND, 3 * SECOND));
    }

    #[test]
    fn cut_outside_range_is_ignored() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(11 * SECOND, 12 * SECOND));
        tl.cut(TimeInterval::none());
        assert_eq!(tl.num_gaps(), 0);
    }

    #[test]
    fn gap_at_respects_half_open_bounds() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(4 * SECOND, 6 * SECOND));
        assert!(tl.gap_at(4 * SECOND).is_some());
        assert!(tl.gap_at(5 * SECOND).is_some());
        assert!(tl.gap_at(6 * SECOND).is_none());
        assert!(tl.gap_at(3 * SECOND).is_none());
    }

    #[test]
    fn next_and_previous_skip_gaps() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(4 * SECOND, 6 * SECOND));

        assert_eq!(tl.next(5 * SECOND), 6 * SECOND);
        assert_eq!(tl.next(3 * SECOND), 3 * SECOND);
        assert_eq!(tl.previous(5 * SECOND), 4 * SECOND - SECOND / 30);
        assert_eq!(tl.previous(7 * SECOND), 7 * SECOND);
    }

    #[test]
    fn previous_inside_leading_gap_returns_begin() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(0, SECOND));
        assert_eq!(tl.previous(SECOND / 2), 0);
    }

    #[test]
    fn restore_removes_only_containing_gap() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(SECOND, 2 * SECOND));
        tl.cut(TimeInterval::new(4 * SECOND, 6 * SECOND));
        assert!(tl.restore(5 * SECOND));
        assert!(!tl.restore(5 * SECOND));
        assert_eq!(tl.num_gaps(), 1);
        assert!(tl.gap_at(SECOND).is_some());
    }

    #[test]
    fn shrinking_end_truncates_gaps() {
        let mut tl = timeline_10s_30fps();
        tl.cut(TimeInterval::new(3 * SECOND, 5 * SECOND));
        tl.cut(TimeInterval::new(8 * SECOND, 10 * SECOND));
        tl.set_end(4 * SECOND);
        assert_eq!(tl.num_gaps(), 1);
        assert_eq!(tl.gaps()[0], TimeInterval::new(3 * SECOND, 4 * SECOND));
    }

    #[test]
    fn fading_at_samples_per_frame() {
        let mut tl = timeline_10s_30fps();
        let mut fading = vec![1.0; tl.num_frames() as usize];
        fading[0] = 0.0;
        fading[1] = 0.5;
        tl.set_fading(fading);

        assert_eq!(tl.fading_at(0), 0.0);
        assert_eq!(tl.fading_at(SECOND / 30), 0.5);
        assert_eq!(tl.fading_at(5 * SECOND), 1.0);
        // past the last frame clamps to the final weight
        assert_eq!(tl.fading_at(20 * SECOND), 1.0);
    }

    #[test]
    fn fading_defaults_to_visible() {
        let tl = Timeline::default();
        assert_eq!(tl.fading_at(123), 1.0);
    }

    #[test]
    fn auto_fading_ramps_both_ends() {
        let mut tl = timeline_10s_30fps();
        tl.auto_fading(SECOND, FadingCurve::Linear);
        let f = tl.fading();
        assert_eq!(f.len(), 300);
        assert_eq!(f[0], 0.0);
        assert!(f[15] > 0.0 && f[15] < 1.0);
        assert_eq!(f[150], 1.0);
        assert_eq!(f[299], 0.0);
    }

    #[test]
    fn smooth_fading_relaxes_hard_edges() {
        let mut tl = timeline_10s_30fps();
        let mut fading = vec![1.0; tl.num_frames() as usize];
        fading[100] = 0.0;
        tl.set_fading(fading);
        tl.smooth_fading(2);
        let f = tl.fading();
        assert!(f[100] > 0.0);
        assert!(f[99] < 1.0);
    }
}
