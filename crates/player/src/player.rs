use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use lumamix_media::frame::Consumed;
use lumamix_media::pipeline::{OpenProgress, PipelineController};
use lumamix_media::probe::ProbeSlots;
use lumamix_state::playback::{DesiredState, LoopMode};
use lumamix_state::session::SourceSettings;
use lumamix_state::timeline::{Time, Timeline, TIME_NONE};

use crate::command::{Command, PendingCommands, Scheduler, SyncMode};
use crate::upload::TextureUploader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Uninitialized,
    Opening,
    Ready,
    Failed,
    Closed,
}

/// What the state machine decided to do about the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    None,
    Seek(Time),
    Loop,
}

/// Gap-skipping decision for one tick, kept free of pipeline state so the
/// seek targets are testable. Forward rate jumps to the first frame
/// boundary at or after the gap end; reverse rate to the last boundary
/// strictly before the gap begin. A target at or beyond the timeline edge
/// means the end was reached and the loop policy applies instead.
pub fn plan_tick(timeline: &Timeline, position: Time, rate: f64) -> TickAction {
    let Some(gap) = timeline.gap_at(position) else {
        return TickAction::None;
    };
    let step = timeline.step();
    if step == 0 {
        return TickAction::None;
    }
    if rate >= 0.0 {
        let offset = gap.end - timeline.begin();
        let target = timeline.begin() + offset.div_ceil(step) * step;
        if target < timeline.end() {
            TickAction::Seek(target)
        } else {
            TickAction::Loop
        }
    } else {
        let offset = gap.begin.saturating_sub(timeline.begin());
        let mut target = timeline.begin() + (offset / step) * step;
        if target >= gap.begin {
            target = target.saturating_sub(step);
        }
        if target > timeline.begin() {
            TickAction::Seek(target)
        } else {
            TickAction::Loop
        }
    }
}

/// Where the loop policy restarts playback: the first valid time for
/// forward rates, the last valid frame for reverse.
pub fn loop_target(timeline: &Timeline, rate: f64) -> Time {
    if rate >= 0.0 {
        timeline.next(timeline.begin())
    } else {
        let last = timeline.end().saturating_sub(timeline.step());
        timeline.previous(last)
    }
}

/// Per-source playback engine: one decode pipeline, one editable timeline,
/// one texture output. Driven once per tick from the render thread.
pub struct MediaPlayer {
    id: Uuid,
    controller: PipelineController,
    timeline: Timeline,
    uploader: TextureUploader,
    scheduler: Option<Arc<dyn Scheduler>>,
    pending: PendingCommands,
    state: PlayerState,
    seeking: bool,
    force_next_upload: bool,
    first_applied: bool,
}

impl MediaPlayer {
    pub fn new(probe_slots: Arc<ProbeSlots>) -> Self {
        Self {
            id: Uuid::new_v4(),
            controller: PipelineController::new(probe_slots),
            timeline: Timeline::default(),
            uploader: TextureUploader::new(),
            scheduler: None,
            pending: PendingCommands::default(),
            state: PlayerState::Uninitialized,
            seeking: false,
            force_next_upload: false,
            first_applied: false,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn failed(&self) -> bool {
        self.state == PlayerState::Failed
    }

    pub fn media(&self) -> &lumamix_media::info::MediaInfo {
        self.controller.media()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Timeline edits (cut/restore/fade) happen on the tick thread only.
    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    pub fn position(&self) -> Time {
        self.controller.params().position
    }

    pub fn rate(&self) -> f64 {
        self.controller.params().rate
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.controller.params().loop_mode
    }

    pub fn is_playing(&self) -> bool {
        self.controller.params().desired == DesiredState::Playing
    }

    pub fn open(&mut self, path: &str, uri: &str) {
        if self.state == PlayerState::Ready {
            self.close();
        }
        self.controller.open(path, uri);
        self.state = PlayerState::Opening;
        self.first_applied = false;
        info!("Opening {uri}");
    }

    pub fn close(&mut self) {
        self.controller.close();
        self.uploader.reset();
        self.state = PlayerState::Closed;
        self.seeking = false;
    }

    /// One tick of the engine, called from the render loop.
    pub fn update(&mut self, ctx: &egui::Context) {
        match self.state {
            PlayerState::Uninitialized | PlayerState::Failed | PlayerState::Closed => return,
            PlayerState::Opening => {
                match self.controller.poll_open() {
                    OpenProgress::Opened => {
                        let end = self.controller.media().end;
                        let step = self.controller.media().frame_duration;
                        self.timeline.set_end(end);
                        self.timeline.set_step(step);
                        self.state = PlayerState::Ready;
                    }
                    OpenProgress::Failed => self.state = PlayerState::Failed,
                    _ => {}
                }
                return;
            }
            PlayerState::Ready => {}
        }
        if self.controller.failed() {
            self.state = PlayerState::Failed;
            return;
        }

        match self.consume_frame(ctx) {
            Consumed::Frame { pts, .. } => {
                self.force_next_upload = false;
                if !self.first_applied {
                    let first = self.controller.ring().first_pts();
                    if first != TIME_NONE {
                        self.timeline.set_first(first);
                        self.first_applied = true;
                    }
                }
                if pts != TIME_NONE {
                    self.controller.set_position(pts);
                }
            }
            Consumed::Eos => {
                self.apply_loop_policy();
                return;
            }
            Consumed::None => {}
        }

        if self.seeking {
            // one state query to resynchronize; never a second seek this tick
            self.controller.sync_state();
            self.seeking = false;
            return;
        }

        let params = self.controller.params();
        if params.desired != DesiredState::Playing || !params.enabled {
            return;
        }
        let position = params.position;
        if position == TIME_NONE {
            return;
        }
        match plan_tick(&self.timeline, position, params.rate) {
            TickAction::None => {}
            TickAction::Seek(target) => self.request_seek(target),
            TickAction::Loop => self.apply_loop_policy(),
        }
    }

    fn consume_frame(&mut self, ctx: &egui::Context) -> Consumed {
        let width = self.controller.media().width as usize;
        let height = self.controller.media().height as usize;
        let force = self.force_next_upload;
        let ring = self.controller.ring();
        let uploader = &mut self.uploader;
        ring.consume(|pixels, _pts, forced| {
            uploader.upload(ctx, width, height, pixels, forced || force);
        })
    }

    fn request_seek(&mut self, target: Time) {
        if self.controller.seek(target) {
            self.controller.set_position(target);
            self.seeking = true;
            self.force_next_upload = true;
        }
    }

    fn apply_loop_policy(&mut self) {
        match self.controller.params().loop_mode {
            LoopMode::None => self.controller.play(false),
            LoopMode::Rewind => {
                let target = loop_target(&self.timeline, self.controller.params().rate);
                self.controller.set_position(target);
                if self.controller.seek(target) {
                    self.seeking = true;
                    self.force_next_upload = true;
                }
            }
            LoopMode::Bidirectional => {
                let flipped = -self.controller.params().rate;
                if self.controller.set_rate(flipped) {
                    self.seeking = true;
                    self.force_next_upload = true;
                }
            }
        }
    }

    /// Start or pause playback. A play request sitting at the end of the
    /// valid range rewinds first; otherwise it would show one stale frame
    /// and stop again.
    pub fn play(&mut self, on: bool) {
        if on && self.state == PlayerState::Ready {
            let position = self.controller.params().position;
            let step = self.timeline.step();
            if position != TIME_NONE && step > 0 {
                let forward = self.controller.params().rate >= 0.0;
                let past_end = forward && position.saturating_add(step) >= self.timeline.end();
                let before_begin =
                    !forward && position <= self.timeline.next(self.timeline.begin());
                if past_end || before_begin {
                    self.rewind();
                }
            }
        }
        self.controller.play(on);
    }

    pub fn rewind(&mut self) {
        if self.state != PlayerState::Ready {
            return;
        }
        let target = loop_target(&self.timeline, self.controller.params().rate);
        self.controller.set_position(target);
        if self.controller.seek(target) {
            self.seeking = true;
            self.force_next_upload = true;
        }
    }

    /// Advance a single frame in the direction of the current rate,
    /// skipping across gaps.
    pub fn step(&mut self) {
        if self.state != PlayerState::Ready {
            return;
        }
        let step = self.timeline.step();
        let position = self.controller.params().position;
        if step == 0 || position == TIME_NONE {
            return;
        }
        let forward = self.controller.params().rate >= 0.0;
        let target = if forward {
            self.timeline.next(position.saturating_add(step))
        } else {
            self.timeline.previous(position.saturating_sub(step))
        };
        if target >= self.timeline.end() || (!forward && target <= self.timeline.begin()) {
            self.apply_loop_policy();
            return;
        }
        self.request_seek(target);
    }

    pub fn set_rate(&mut self, rate: f64) -> bool {
        let changed = self.controller.set_rate(rate);
        if changed && self.controller.is_open() {
            self.seeking = true;
            self.force_next_upload = true;
        }
        changed
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.controller.set_loop_mode(mode);
    }

    pub fn enable(&mut self, on: bool) {
        self.controller.enable(on);
    }

    pub fn set_rewind_on_disable(&mut self, on: bool) {
        self.controller.rewind_on_disable = on;
    }

    pub fn set_software_decoding(&mut self, on: bool) {
        self.controller.set_software_decoding(on);
    }

    // --- deferred command surface -------------------------------------

    pub fn play_deferred(&mut self, on: bool, sync: SyncMode) {
        self.submit(Command::Play(on), sync);
    }

    pub fn rewind_deferred(&mut self, sync: SyncMode) {
        self.submit(Command::Rewind, sync);
    }

    pub fn step_deferred(&mut self, sync: SyncMode) {
        self.submit(Command::Step, sync);
    }

    fn submit(&mut self, cmd: Command, sync: SyncMode) {
        if self.pending.is_pending(cmd.family()) {
            return;
        }
        if sync != SyncMode::Immediate {
            if let Some(scheduler) = self.scheduler.clone() {
                self.pending.set(cmd.family());
                scheduler.defer(cmd, sync);
                return;
            }
        }
        self.execute(cmd);
    }

    /// Callback edge for the scheduler: runs the deferred command and
    /// releases its family slot.
    pub fn execute(&mut self, cmd: Command) {
        self.pending.clear(cmd.family());
        match cmd {
            Command::Play(on) => self.play(on),
            Command::Rewind => self.rewind(),
            Command::Step => self.step(),
        }
    }

    // --- session surface ----------------------------------------------

    pub fn settings(&self) -> SourceSettings {
        SourceSettings {
            id: self.id,
            uri: self.controller.uri().to_string(),
            software_decode: self.controller.software_decoding(),
            loop_mode: self.controller.params().loop_mode,
            rate: self.controller.params().rate,
            timeline: self.timeline.clone(),
        }
    }

    pub fn apply_settings(&mut self, settings: &SourceSettings) {
        self.id = settings.id;
        self.controller.set_software_decoding(settings.software_decode);
        self.controller.set_loop_mode(settings.loop_mode);
        let _ = self.controller.set_rate(settings.rate);
        self.timeline = settings.timeline.clone();
    }

    // --- texture surface ----------------------------------------------

    pub fn texture(&mut self, ctx: &egui::Context) -> egui::TextureHandle {
        self.uploader.texture(ctx)
    }

    pub fn has_frame(&self) -> bool {
        self.uploader.has_frame()
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.controller.media().width, self.controller.media().height)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.controller.media().aspect_ratio()
    }
}
