mod protocol;
mod publish;
mod telemetry;

use crate::protocol::{InboundEnvelope, reader_loop, writer_loop};
use crate::publish::{PublishingSink, parse_outbound_queue_capacity};
use game_state_runtime::{StateQueueValidator, StateStore, ValidatorConfig, game_state_schema};
use std::process;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use tokio::sync::mpsc as async_mpsc;
use tracing::{error, info, warn};

fn main() {
    telemetry::init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "game_state_host fatal error");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Arc::new(game_state_schema()?);
    let config = ValidatorConfig::from_env();
    info!(
        fields = schema.len(),
        queue_capacity = ?config.queue_capacity,
        overflow = ?config.overflow,
        missing_sink = ?config.missing_sink,
        "starting game state host"
    );

    let validator = StateQueueValidator::new(schema, config);
    let store = StateStore::new();

    let outbound_queue_cap = parse_outbound_queue_capacity();
    let (out_tx, out_rx) = mpsc::sync_channel(outbound_queue_cap);
    validator.set_sink(PublishingSink::new(store.clone(), out_tx, outbound_queue_cap));

    let writer_handle = thread::spawn(move || writer_loop(out_rx));

    let (in_tx, mut in_rx) = async_mpsc::unbounded_channel();
    let reader_handle = thread::spawn(move || {
        let read_result = reader_loop(|envelope| {
            if in_tx.send(envelope).is_err() {
                warn!("event loop gone; dropping inbound frame");
            }
        });

        if let Err(err) = &read_result {
            error!(error = %err, "reader loop terminated with error");
        }

        read_result
    });

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(async {
        while let Some(envelope) = in_rx.recv().await {
            match envelope {
                InboundEnvelope::Patch { fields } => {
                    if let Err(err) = validator.enqueue(fields) {
                        warn!(error = %err, "state patch not queued");
                    }
                }
                InboundEnvelope::Clear => validator.clear(),
                InboundEnvelope::Reset => {
                    validator.clear();
                    validator.wait_idle().await;
                    store.reset();
                }
            }
        }

        validator.wait_idle().await;
    });

    let stats = validator.stats();
    info!(
        applied = stats.applied,
        rejected = stats.rejected,
        sink_failures = stats.sink_failures,
        "input closed; shutting down"
    );

    // Releases the sink's sender so the writer loop can finish.
    validator.clear_sink();
    drop(validator);

    match reader_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "reader thread returned error"),
        Err(err) => error!("reader thread join failed: {err:?}"),
    }

    match writer_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "writer thread returned error"),
        Err(err) => error!("writer thread join failed: {err:?}"),
    }

    Ok(())
}
