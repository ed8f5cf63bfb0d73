use tracing::warn;

pub const QUEUE_CAP_VAR: &str = "GAME_STATE_QUEUE_CAP";
pub const QUEUE_OVERFLOW_VAR: &str = "GAME_STATE_QUEUE_OVERFLOW";
pub const STRICT_SINK_VAR: &str = "GAME_STATE_STRICT_SINK";

/// What `enqueue` does when a bounded queue is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Refuse the incoming patch.
    #[default]
    RejectNew,
    /// Discard the oldest queued patch to make room.
    DropOldest,
}

/// What happens to validated patches while no sink is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingSinkPolicy {
    /// Accept and validate, then drop with a logged error.
    #[default]
    FailOpen,
    /// Refuse patches at `enqueue` until a sink is set.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatorConfig {
    /// `None` leaves the queue unbounded.
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    pub missing_sink: MissingSinkPolicy,
}

impl ValidatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same parsing as [`ValidatorConfig::from_env`] against any key source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let queue_capacity = match lookup(QUEUE_CAP_VAR) {
            None => defaults.queue_capacity,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(cap) if cap > 0 => Some(cap),
                _ => {
                    warn!(var = QUEUE_CAP_VAR, value = %raw, "ignoring invalid queue capacity");
                    defaults.queue_capacity
                }
            },
        };

        let overflow = match lookup(QUEUE_OVERFLOW_VAR).as_deref().map(str::trim) {
            None => defaults.overflow,
            Some("reject_new") => OverflowPolicy::RejectNew,
            Some("drop_oldest") => OverflowPolicy::DropOldest,
            Some(other) => {
                warn!(var = QUEUE_OVERFLOW_VAR, value = other, "ignoring unknown overflow policy");
                defaults.overflow
            }
        };

        let missing_sink = match lookup(STRICT_SINK_VAR).as_deref().map(str::trim) {
            None => defaults.missing_sink,
            Some("1" | "true") => MissingSinkPolicy::Strict,
            Some("0" | "false") => MissingSinkPolicy::FailOpen,
            Some(other) => {
                warn!(var = STRICT_SINK_VAR, value = other, "ignoring unknown strict sink flag");
                defaults.missing_sink
            }
        };

        Self {
            queue_capacity,
            overflow,
            missing_sink,
        }
    }

    pub fn with_capacity(mut self, capacity: usize, overflow: OverflowPolicy) -> Self {
        self.queue_capacity = Some(capacity).filter(|cap| *cap > 0);
        self.overflow = overflow;
        self
    }

    pub fn strict_sink(mut self) -> Self {
        self.missing_sink = MissingSinkPolicy::Strict;
        self
    }
}
