use serde::{Deserialize, Serialize};

use crate::timeline::{Time, TIME_NONE};

/// What happens when playback reaches the end of the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopMode {
    None,
    #[default]
    Rewind,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesiredState {
    #[default]
    Paused,
    Playing,
}

/// Requested playback configuration, owned by the pipeline controller and
/// read by the per-tick state machine. The decode pipeline acknowledges
/// state changes asynchronously; this is the requested side.
#[derive(Debug, Clone)]
pub struct PlaybackParams {
    pub desired: DesiredState,
    pub rate: f64,
    pub position: Time,
    pub loop_mode: LoopMode,
    pub enabled: bool,
    /// State to restore when a disabled output is re-enabled.
    pub resume: DesiredState,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            desired: DesiredState::Paused,
            rate: 1.0,
            position: TIME_NONE,
            loop_mode: LoopMode::default(),
            enabled: true,
            resume: DesiredState::Paused,
        }
    }
}

impl PlaybackParams {
    pub fn is_forward(&self) -> bool {
        self.rate > 0.0
    }

    /// Rate 0 would stall the pipeline clock; "not advancing" is expressed
    /// as Paused instead, so zero is rejected here.
    pub fn set_rate(&mut self, rate: f64) -> bool {
        if rate == 0.0 || !rate.is_finite() {
            return false;
        }
        self.rate = rate;
        true
    }
}
