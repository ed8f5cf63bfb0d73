use crate::error::SinkError;
use crate::patch::Patch;

/// Downstream consumer of validated patches.
///
/// Called once per accepted patch, in enqueue order, from the drain loop.
/// The loop moves on as soon as `apply` returns; work the sink schedules
/// elsewhere may finish out of order.
pub trait StateSink: Send + Sync {
    fn apply(&self, patch: Patch) -> Result<(), SinkError>;
}

impl<F> StateSink for F
where
    F: Fn(Patch) + Send + Sync,
{
    fn apply(&self, patch: Patch) -> Result<(), SinkError> {
        self(patch);
        Ok(())
    }
}
