//! Sequential, schema-checked application of state patches.
//!
//! Producers call [`StateQueueValidator::enqueue`] and return immediately.
//! A single drain loop pops patches in FIFO order, validates each against
//! the schema and hands the accepted ones to the registered sink. A patch
//! that fails validation is logged and dropped on its own; the rest of the
//! queue is unaffected.
//!
//! At most one drain loop runs per validator. The `draining` flag is
//! claimed with a compare-and-swap, so concurrent `enqueue` calls only add
//! to the queue the running loop is already consuming.

use crate::config::{MissingSinkPolicy, OverflowPolicy, ValidatorConfig};
use crate::error::{EnqueueError, ValidationError};
use crate::patch::Patch;
use crate::schema::Schema;
use crate::sink::StateSink;
use crate::validation::validate_field;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidatorStats {
    pub enqueued: u64,
    pub applied: u64,
    pub rejected: u64,
    pub dropped_without_sink: u64,
    pub overflowed: u64,
    pub sink_failures: u64,
    pub drain_sessions: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    applied: AtomicU64,
    rejected: AtomicU64,
    dropped_without_sink: AtomicU64,
    overflowed: AtomicU64,
    sink_failures: AtomicU64,
    drain_sessions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> ValidatorStats {
        ValidatorStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped_without_sink: self.dropped_without_sink.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            drain_sessions: self.drain_sessions.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    schema: Arc<Schema>,
    config: ValidatorConfig,
    queue: Mutex<VecDeque<Patch>>,
    sink: RwLock<Option<Arc<dyn StateSink>>>,
    draining: AtomicBool,
    idle: Notify,
    counters: Counters,
}

/// Clonable handle; every clone feeds the same queue.
#[derive(Clone)]
pub struct StateQueueValidator {
    inner: Arc<Inner>,
}

impl StateQueueValidator {
    pub fn new(schema: Arc<Schema>, config: ValidatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                config,
                queue: Mutex::new(VecDeque::new()),
                sink: RwLock::new(None),
                draining: AtomicBool::new(false),
                idle: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn with_defaults(schema: Arc<Schema>) -> Self {
        Self::new(schema, ValidatorConfig::default())
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.inner.config
    }

    /// Registers the single downstream consumer, replacing any previous one.
    pub fn set_sink<S>(&self, sink: S)
    where
        S: StateSink + 'static,
    {
        *self.inner.sink.write() = Some(Arc::new(sink));
    }

    pub fn clear_sink(&self) {
        *self.inner.sink.write() = None;
    }

    pub fn has_sink(&self) -> bool {
        self.inner.sink.read().is_some()
    }

    /// Queues `patch` and starts a drain if none is running.
    ///
    /// With the default configuration this always succeeds. Inside a Tokio
    /// runtime the drain runs as a spawned task; without one it runs on the
    /// calling thread before this returns.
    pub fn enqueue(&self, patch: Patch) -> Result<(), EnqueueError> {
        let inner = &self.inner;

        if inner.config.missing_sink == MissingSinkPolicy::Strict && !self.has_sink() {
            return Err(EnqueueError::NoSink);
        }

        {
            let mut queue = inner.queue.lock();

            if let Some(capacity) = inner.config.queue_capacity {
                if queue.len() >= capacity {
                    let overflowed = Counters::bump(&inner.counters.overflowed);
                    match inner.config.overflow {
                        OverflowPolicy::RejectNew => {
                            if should_report(overflowed) {
                                warn!(capacity, overflowed, "state queue full; rejecting patch");
                            }
                            return Err(EnqueueError::QueueFull { capacity });
                        }
                        OverflowPolicy::DropOldest => {
                            queue.pop_front();
                            if should_report(overflowed) {
                                warn!(capacity, overflowed, "state queue full; dropped oldest patch");
                            }
                        }
                    }
                }
            }

            queue.push_back(patch);
        }

        Counters::bump(&inner.counters.enqueued);
        self.schedule_drain();
        Ok(())
    }

    /// Checks every entry of `patch` against the schema and returns the
    /// patch as it should be applied. The first failing field aborts the
    /// whole patch.
    pub fn validate(&self, patch: &Patch) -> Result<Patch, ValidationError> {
        validate_patch(&self.inner.schema, patch)
    }

    pub fn is_valid(&self, patch: &Patch) -> bool {
        self.validate(patch).is_ok()
    }

    /// Discards queued patches without processing them. A patch already
    /// popped by the drain loop still completes.
    pub fn clear(&self) {
        let discarded = {
            let mut queue = self.inner.queue.lock();
            let discarded = queue.len();
            queue.clear();
            discarded
        };

        if discarded > 0 {
            debug!(discarded, "cleared state queue");
        }

        self.inner.idle.notify_waiters();
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ValidatorStats {
        self.inner.counters.snapshot()
    }

    /// Resolves once the queue is empty and no drain loop is running.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();

            if self.inner.is_idle() {
                return;
            }

            notified.await;
        }
    }

    fn schedule_drain(&self) {
        if !self.inner.claim_drain() {
            return;
        }

        let session = Counters::bump(&self.inner.counters.drain_sessions);
        let inner = self.inner.clone();

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { inner.drain(session).await });
            }
            Err(_) => inner.drain_inline(session),
        }
    }
}

impl Inner {
    fn claim_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_idle(&self) -> bool {
        !self.draining.load(Ordering::Acquire) && self.queue.lock().is_empty()
    }

    async fn drain(self: Arc<Self>, session: u64) {
        debug!(session, "state drain started");
        loop {
            while self.process_next() {
                tokio::task::yield_now().await;
            }
            if !self.release_or_resume() {
                break;
            }
        }
        debug!(session, "state drain finished");
        self.idle.notify_waiters();
    }

    fn drain_inline(&self, session: u64) {
        debug!(session, "state drain started inline");
        loop {
            while self.process_next() {}
            if !self.release_or_resume() {
                break;
            }
        }
        self.idle.notify_waiters();
    }

    /// Drops the drain claim. Returns `true` if a patch arrived between the
    /// last pop and the release and this loop re-claimed the drain for it.
    fn release_or_resume(&self) -> bool {
        self.draining.store(false, Ordering::Release);
        let pending = !self.queue.lock().is_empty();
        pending && self.claim_drain()
    }

    fn process_next(&self) -> bool {
        let next = self.queue.lock().pop_front();
        let Some(patch) = next else {
            return false;
        };

        match validate_patch(&self.schema, &patch) {
            Ok(validated) => self.dispatch(validated),
            Err(err) => {
                Counters::bump(&self.counters.rejected);
                warn!(field = err.field(), error = %err, "discarding invalid state patch");
            }
        }

        true
    }

    fn dispatch(&self, patch: Patch) {
        let sink = self.sink.read().clone();

        let Some(sink) = sink else {
            let dropped = Counters::bump(&self.counters.dropped_without_sink);
            if should_report(dropped) {
                error!(dropped, "no state sink registered; dropped validated patch(es)");
            }
            return;
        };

        match sink.apply(patch) {
            Ok(()) => {
                Counters::bump(&self.counters.applied);
            }
            Err(err) => {
                Counters::bump(&self.counters.sink_failures);
                error!(error = %err, "state sink failed to apply patch");
            }
        }
    }
}

fn validate_patch(schema: &Schema, patch: &Patch) -> Result<Patch, ValidationError> {
    let mut validated = Patch::new();

    for (field, value) in patch.iter() {
        let Some(spec) = schema.lookup(field) else {
            return Err(ValidationError::UnknownField {
                field: field.to_string(),
                allowed: schema.field_names(),
            });
        };

        validated.insert(field, validate_field(spec, value)?);
    }

    Ok(validated)
}

fn should_report(count: u64) -> bool {
    count == 1 || count.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::schema::{FieldSpec, SemanticType, game_state_schema};
    use crate::value::Value;

    /// The two-field table used throughout the scenarios below.
    fn scenario_schema() -> Arc<Schema> {
        Arc::new(
            Schema::from_fields([
                FieldSpec::new("turnNumber", SemanticType::Integer)
                    .min(0.0)
                    .default_value(0),
                FieldSpec::new("status", SemanticType::String)
                    .allowed(["active", "inactive"])
                    .default_value("inactive"),
                FieldSpec::new("playerCount", SemanticType::Integer)
                    .range(2.0, 12.0)
                    .default_value(2),
                FieldSpec::new("userId", SemanticType::String).required(),
                FieldSpec::new("myDrawnCard", SemanticType::Map).nullable(),
            ])
            .expect("scenario schema"),
        )
    }

    fn spy() -> (Arc<Mutex<Vec<Patch>>>, impl Fn(Patch) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        (seen, move |patch: Patch| sink_seen.lock().push(patch))
    }

    fn validator_with_spy() -> (StateQueueValidator, Arc<Mutex<Vec<Patch>>>) {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let (seen, sink) = spy();
        validator.set_sink(sink);
        (validator, seen)
    }

    #[test]
    fn unknown_field_fails_the_whole_patch() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let patch = Patch::new().with("turnNumber", 3).with("cardAnimations", true);

        let err = validator.validate(&patch).expect_err("unknown field");
        match err {
            ValidationError::UnknownField { field, allowed } => {
                assert_eq!(field, "cardAnimations");
                assert_eq!(
                    allowed,
                    vec!["myDrawnCard", "playerCount", "status", "turnNumber", "userId"]
                );
            }
            other => panic!("expected unknown field, got {other:?}"),
        }
    }

    #[test]
    fn first_failing_field_in_patch_order_is_reported() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let patch = Patch::new()
            .with("status", "paused")
            .with("turnNumber", -4);

        let err = validator.validate(&patch).expect_err("invalid");
        assert_eq!(err.field(), "status");
    }

    #[test]
    fn non_finite_timer_progress_is_refused() {
        let validator = StateQueueValidator::with_defaults(Arc::new(
            game_state_schema().expect("game schema"),
        ));

        for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = validator
                .validate(&Patch::new().with("timerProgress", x))
                .expect_err("non-finite progress");
            assert_eq!(err.field(), "timerProgress");
        }
        assert!(validator.is_valid(&Patch::new().with("timerProgress", 1.0)));
    }

    #[test]
    fn is_valid_swallows_detail() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        assert!(validator.is_valid(&Patch::new().with("turnNumber", 1)));
        assert!(!validator.is_valid(&Patch::new().with("turnNumber", "one")));
        assert!(validator.is_valid(&Patch::new()));
    }

    #[test]
    fn type_mismatch_names_expected_and_actual() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let err = validator
            .validate(&Patch::new().with("status", true))
            .expect_err("type mismatch");

        assert_eq!(err.to_string(), "field 'status' expected string, got boolean");
    }

    #[tokio::test]
    async fn scenario_turn_number_and_status() {
        let (validator, seen) = validator_with_spy();

        validator
            .enqueue(Patch::new().with("turnNumber", 5).with("status", "active"))
            .expect("enqueue");
        validator
            .enqueue(Patch::new().with("turnNumber", -1).with("status", "active"))
            .expect("enqueue");
        validator
            .enqueue(Patch::new().with("status", "paused"))
            .expect("enqueue");
        validator
            .enqueue(Patch::new().with("turnNumber", Value::Null))
            .expect("enqueue");
        validator.wait_idle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            Patch::new().with("turnNumber", 5).with("status", "active")
        );
        assert_eq!(seen[1], Patch::new().with("turnNumber", 0));

        let stats = validator.stats();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.rejected, 2);
    }

    #[tokio::test]
    async fn required_null_never_reaches_sink() {
        let (validator, seen) = validator_with_spy();

        validator
            .enqueue(Patch::new().with("userId", Value::Null))
            .expect("enqueue");
        validator.wait_idle().await;

        assert!(seen.lock().is_empty());
        assert_eq!(validator.stats().rejected, 1);
    }

    #[tokio::test]
    async fn nullable_null_passes_through_unchanged() {
        let (validator, seen) = validator_with_spy();

        validator
            .enqueue(Patch::new().with("myDrawnCard", Value::Null))
            .expect("enqueue");
        validator.wait_idle().await;

        assert_eq!(*seen.lock(), vec![Patch::new().with("myDrawnCard", Value::Null)]);
    }

    #[tokio::test]
    async fn range_bounds_are_inclusive() {
        let (validator, seen) = validator_with_spy();

        for count in [1, 2, 7, 12, 13] {
            validator
                .enqueue(Patch::new().with("playerCount", count))
                .expect("enqueue");
        }
        validator.wait_idle().await;

        let counts: Vec<Value> = seen
            .lock()
            .iter()
            .filter_map(|patch| patch.get("playerCount").cloned())
            .collect();
        assert_eq!(counts, vec![Value::Int(2), Value::Int(7), Value::Int(12)]);
    }

    #[tokio::test]
    async fn patches_reach_sink_in_enqueue_order() {
        let (validator, seen) = validator_with_spy();

        for turn in 1..=3 {
            validator
                .enqueue(Patch::new().with("turnNumber", turn))
                .expect("enqueue");
        }
        validator.wait_idle().await;

        let turns: Vec<Value> = seen
            .lock()
            .iter()
            .filter_map(|patch| patch.get("turnNumber").cloned())
            .collect();
        assert_eq!(turns, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test]
    async fn invalid_patch_does_not_block_the_next_one() {
        let (validator, seen) = validator_with_spy();

        validator
            .enqueue(Patch::new().with("bogus", 1))
            .expect("enqueue");
        validator
            .enqueue(Patch::new().with("status", "active"))
            .expect("enqueue");
        validator.wait_idle().await;

        assert_eq!(*seen.lock(), vec![Patch::new().with("status", "active")]);
    }

    #[tokio::test]
    async fn enqueue_while_draining_reuses_the_running_loop() {
        let (validator, seen) = validator_with_spy();

        validator.enqueue(Patch::new().with("turnNumber", 1)).expect("enqueue");
        assert!(validator.is_processing());
        validator.enqueue(Patch::new().with("turnNumber", 2)).expect("enqueue");
        validator.enqueue(Patch::new().with("turnNumber", 3)).expect("enqueue");

        assert_eq!(validator.stats().drain_sessions, 1);
        assert_eq!(validator.queue_size(), 3);

        validator.wait_idle().await;

        assert!(!validator.is_processing());
        assert_eq!(validator.stats().drain_sessions, 1);
        assert_eq!(seen.lock().len(), 3);

        validator.enqueue(Patch::new().with("turnNumber", 4)).expect("enqueue");
        validator.wait_idle().await;
        assert_eq!(validator.stats().drain_sessions, 2);
    }

    #[tokio::test]
    async fn sink_can_enqueue_follow_up_patches() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producer = validator.clone();
        let sink_seen = seen.clone();
        validator.set_sink(move |patch: Patch| {
            if patch.get("status") == Some(&Value::from("active")) {
                let _ = producer.enqueue(Patch::new().with("turnNumber", 1));
            }
            sink_seen.lock().push(patch);
        });

        validator
            .enqueue(Patch::new().with("status", "active"))
            .expect("enqueue");
        validator.wait_idle().await;

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(validator.stats().drain_sessions, 1);

        // Break the validator -> sink -> validator cycle.
        validator.clear_sink();
    }

    #[tokio::test]
    async fn clear_before_drain_discards_everything() {
        let (validator, seen) = validator_with_spy();

        for turn in 1..=3 {
            validator
                .enqueue(Patch::new().with("turnNumber", turn))
                .expect("enqueue");
        }
        validator.clear();
        assert_eq!(validator.queue_size(), 0);

        validator.wait_idle().await;

        assert!(seen.lock().is_empty());
        assert_eq!(validator.queue_size(), 0);
    }

    #[tokio::test]
    async fn missing_sink_fails_open() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());

        validator
            .enqueue(Patch::new().with("turnNumber", 1))
            .expect("enqueue without sink");
        validator.wait_idle().await;

        let stats = validator.stats();
        assert_eq!(stats.dropped_without_sink, 1);
        assert_eq!(stats.applied, 0);
    }

    #[tokio::test]
    async fn strict_sink_refuses_until_registered() {
        let validator = StateQueueValidator::new(
            scenario_schema(),
            ValidatorConfig::default().strict_sink(),
        );

        assert_eq!(
            validator.enqueue(Patch::new().with("turnNumber", 1)),
            Err(EnqueueError::NoSink)
        );

        let (seen, sink) = spy();
        validator.set_sink(sink);
        validator
            .enqueue(Patch::new().with("turnNumber", 1))
            .expect("enqueue with sink");
        validator.wait_idle().await;

        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn set_sink_replaces_previous_handler() {
        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let (first, first_sink) = spy();
        let (second, second_sink) = spy();

        validator.set_sink(first_sink);
        validator.set_sink(second_sink);
        validator
            .enqueue(Patch::new().with("turnNumber", 9))
            .expect("enqueue");
        validator.wait_idle().await;

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
    }

    #[tokio::test]
    async fn bounded_queue_rejects_new_patches() {
        let validator = StateQueueValidator::new(
            scenario_schema(),
            ValidatorConfig::default().with_capacity(2, OverflowPolicy::RejectNew),
        );
        let (seen, sink) = spy();
        validator.set_sink(sink);

        validator.enqueue(Patch::new().with("turnNumber", 1)).expect("first");
        validator.enqueue(Patch::new().with("turnNumber", 2)).expect("second");
        assert_eq!(
            validator.enqueue(Patch::new().with("turnNumber", 3)),
            Err(EnqueueError::QueueFull { capacity: 2 })
        );
        validator.wait_idle().await;

        let turns: Vec<Value> = seen
            .lock()
            .iter()
            .filter_map(|patch| patch.get("turnNumber").cloned())
            .collect();
        assert_eq!(turns, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(validator.stats().overflowed, 1);
    }

    #[tokio::test]
    async fn bounded_queue_can_drop_oldest() {
        let validator = StateQueueValidator::new(
            scenario_schema(),
            ValidatorConfig::default().with_capacity(2, OverflowPolicy::DropOldest),
        );
        let (seen, sink) = spy();
        validator.set_sink(sink);

        for turn in 1..=3 {
            validator
                .enqueue(Patch::new().with("turnNumber", turn))
                .expect("enqueue");
        }
        validator.wait_idle().await;

        let turns: Vec<Value> = seen
            .lock()
            .iter()
            .filter_map(|patch| patch.get("turnNumber").cloned())
            .collect();
        assert_eq!(turns, vec![Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test]
    async fn sink_failure_is_counted_and_loop_continues() {
        struct FlakySink {
            applied: Arc<Mutex<Vec<Patch>>>,
        }

        impl StateSink for FlakySink {
            fn apply(&self, patch: Patch) -> Result<(), SinkError> {
                if patch.get("turnNumber") == Some(&Value::Int(1)) {
                    return Err(SinkError::new("render surface gone"));
                }
                self.applied.lock().push(patch);
                Ok(())
            }
        }

        let validator = StateQueueValidator::with_defaults(scenario_schema());
        let applied = Arc::new(Mutex::new(Vec::new()));
        validator.set_sink(FlakySink {
            applied: applied.clone(),
        });

        validator.enqueue(Patch::new().with("turnNumber", 1)).expect("enqueue");
        validator.enqueue(Patch::new().with("turnNumber", 2)).expect("enqueue");
        validator.wait_idle().await;

        assert_eq!(applied.lock().len(), 1);
        let stats = validator.stats();
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.applied, 1);
    }

    #[test]
    fn drains_inline_without_a_runtime() {
        let (validator, seen) = validator_with_spy();

        validator
            .enqueue(Patch::new().with("turnNumber", 2))
            .expect("enqueue");

        assert!(!validator.is_processing());
        assert_eq!(validator.queue_size(), 0);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_never_lose_patches() {
        let validator = StateQueueValidator::with_defaults(Arc::new(
            game_state_schema().expect("game schema"),
        ));
        let (seen, sink) = spy();
        validator.set_sink(sink);

        let mut handles = Vec::new();
        for producer in 0..4 {
            let validator = validator.clone();
            handles.push(tokio::spawn(async move {
                for turn in 0..50 {
                    validator
                        .enqueue(Patch::new().with("turnNumber", producer * 100 + turn))
                        .expect("enqueue");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("producer task");
        }
        validator.wait_idle().await;

        assert_eq!(seen.lock().len(), 200);
        assert_eq!(validator.stats().applied, 200);
    }
}
