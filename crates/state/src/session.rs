use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::playback::LoopMode;
use crate::timeline::Timeline;

/// Everything an external serializer needs to persist and restore a media
/// source verbatim: identity, decode preference, playback configuration
/// and the edited timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub id: Uuid,
    pub uri: String,
    pub software_decode: bool,
    pub loop_mode: LoopMode,
    pub rate: f64,
    pub timeline: Timeline,
}

impl SourceSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
            software_decode: false,
            loop_mode: LoopMode::default(),
            rate: 1.0,
            timeline: Timeline::default(),
        }
    }
}
