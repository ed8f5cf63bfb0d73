use crate::protocol::{OutboundEnvelope, state_envelope};
use game_state_runtime::{Patch, SinkError, StateSink, StateStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use tracing::warn;

pub const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;

/// Sink that merges into the live store and forwards the new state to the
/// renderer. Frames are dropped, not blocked on, when the renderer lags.
pub struct PublishingSink {
    store: StateStore,
    tx: SyncSender<OutboundEnvelope>,
    dropped: AtomicU64,
    queue_capacity: usize,
}

impl PublishingSink {
    pub fn new(store: StateStore, tx: SyncSender<OutboundEnvelope>, queue_capacity: usize) -> Self {
        Self {
            store,
            tx,
            dropped: AtomicU64::new(0),
            queue_capacity,
        }
    }
}

impl StateSink for PublishingSink {
    fn apply(&self, patch: Patch) -> Result<(), SinkError> {
        self.store.merge(patch);

        match self.tx.try_send(state_envelope(self.store.snapshot())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped.is_power_of_two() {
                    warn!(
                        capacity = self.queue_capacity,
                        dropped, "outbound state queue full; dropped frame(s)"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_envelope)) => {
                Err(SinkError::new("outbound state writer disconnected"))
            }
        }
    }
}

const OUTBOUND_QUEUE_CAP_VAR: &str = "GAME_STATE_OUTBOUND_QUEUE_CAP";

pub fn parse_outbound_queue_capacity() -> usize {
    outbound_queue_capacity_from(|name| std::env::var(name).ok())
}

/// Falls back to [`DEFAULT_OUTBOUND_QUEUE_CAP`] when the variable is unset,
/// warning if it was set to something other than a positive integer.
fn outbound_queue_capacity_from<F>(lookup: F) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(OUTBOUND_QUEUE_CAP_VAR) else {
        return DEFAULT_OUTBOUND_QUEUE_CAP;
    };

    match raw.trim().parse::<usize>() {
        Ok(cap) if cap > 0 => cap,
        _ => {
            warn!(
                var = OUTBOUND_QUEUE_CAP_VAR,
                value = %raw,
                default = DEFAULT_OUTBOUND_QUEUE_CAP,
                "ignoring invalid outbound queue capacity"
            );
            DEFAULT_OUTBOUND_QUEUE_CAP
        }
    }
}
