/// Playback command that can be executed now or handed to an external
/// beat-aligned scheduler for deferred execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play(bool),
    Rewind,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    Play,
    Rewind,
    Step,
}

impl Command {
    pub fn family(self) -> CommandFamily {
        match self {
            Command::Play(_) => CommandFamily::Play,
            Command::Rewind => CommandFamily::Rewind,
            Command::Step => CommandFamily::Step,
        }
    }
}

/// Execution granularity for a deferred command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Immediate,
    Beat,
    Phase,
}

/// Boundary to the external metronome. The scheduler holds the submitted
/// command until the requested beat or phase and then feeds it back through
/// `MediaPlayer::execute`.
pub trait Scheduler: Send + Sync {
    fn defer(&self, cmd: Command, sync: SyncMode);
}

/// At most one deferred invocation per command family may be outstanding;
/// while a family is pending, new submissions of that family are dropped so
/// command storms cannot queue faster than the scheduler executes.
#[derive(Debug, Default)]
pub struct PendingCommands {
    play: bool,
    rewind: bool,
    step: bool,
}

impl PendingCommands {
    pub fn is_pending(&self, family: CommandFamily) -> bool {
        match family {
            CommandFamily::Play => self.play,
            CommandFamily::Rewind => self.rewind,
            CommandFamily::Step => self.step,
        }
    }

    pub fn set(&mut self, family: CommandFamily) {
        match family {
            CommandFamily::Play => self.play = true,
            CommandFamily::Rewind => self.rewind = true,
            CommandFamily::Step => self.step = true,
        }
    }

    pub fn clear(&mut self, family: CommandFamily) {
        match family {
            CommandFamily::Play => self.play = false,
            CommandFamily::Rewind => self.rewind = false,
            CommandFamily::Step => self.step = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_are_tracked_independently() {
        let mut pending = PendingCommands::default();
        pending.set(Command::Play(true).family());
        assert!(pending.is_pending(CommandFamily::Play));
        assert!(!pending.is_pending(CommandFamily::Rewind));

        pending.set(CommandFamily::Step);
        pending.clear(CommandFamily::Play);
        assert!(!pending.is_pending(CommandFamily::Play));
        assert!(pending.is_pending(CommandFamily::Step));
    }
}
