use game_state_runtime::{Patch, StateSnapshot, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;
use tracing::warn;

pub const INBOUND_CAP: usize = 1_048_576;
pub const OUTBOUND_CAP: usize = 1_048_576;

/// Frames received from the game server relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
pub enum InboundEnvelope {
    #[serde(rename = "patch")]
    Patch { fields: Patch },

    /// Drop patches not yet applied.
    #[serde(rename = "clear")]
    Clear,

    /// Drop queued patches and the live state (leaving a game session).
    #[serde(rename = "reset")]
    Reset,
}

/// Frames emitted to the renderer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum OutboundEnvelope {
    #[serde(rename = "state")]
    State {
        rev: u64,
        fields: BTreeMap<String, Value>,
    },
}

pub fn state_envelope(snapshot: StateSnapshot) -> OutboundEnvelope {
    OutboundEnvelope::State {
        rev: snapshot.rev,
        fields: snapshot.fields,
    }
}

/// Each frame is a big-endian `u32` byte count followed by a JSON payload.
const LEN_PREFIX: usize = 4;

pub fn writer_loop(rx: Receiver<OutboundEnvelope>) -> io::Result<()> {
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    write_envelopes(&mut writer, rx, OUTBOUND_CAP).map(|_| ())
}

/// Writes one frame per envelope and returns how many were skipped. A
/// snapshot that encodes past `cap` is logged and dropped; the next one may
/// fit again.
fn write_envelopes(
    writer: &mut impl Write,
    envelopes: impl IntoIterator<Item = OutboundEnvelope>,
    cap: usize,
) -> io::Result<u64> {
    let mut skipped = 0_u64;

    for envelope in envelopes {
        let payload = encode_outbound(&envelope)?;
        if payload.len() > cap {
            skipped += 1;
            warn!(bytes = payload.len(), cap, skipped, "state frame over cap; not sent");
            continue;
        }

        put_frame(writer, &payload)?;
        writer.flush()?;
    }

    Ok(skipped)
}

/// Reads frames until EOF. A frame that is not a valid envelope is logged
/// and skipped; framing errors end the loop.
pub fn reader_loop<F>(mut on_envelope: F) -> io::Result<()>
where
    F: FnMut(InboundEnvelope),
{
    let stdin = io::stdin();
    let mut reader = stdin.lock();

    loop {
        let payload = match take_frame(&mut reader, INBOUND_CAP) {
            Ok(payload) => payload,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };

        match decode_inbound(&payload) {
            Ok(envelope) => on_envelope(envelope),
            Err(err) => warn!(error = %err, bytes = payload.len(), "skipping undecodable frame"),
        }
    }
}

fn encode_outbound(envelope: &OutboundEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(invalid_json)
}

fn decode_inbound(payload: &[u8]) -> io::Result<InboundEnvelope> {
    serde_json::from_slice(payload).map_err(invalid_json)
}

fn take_frame(reader: &mut impl Read, cap: usize) -> io::Result<Vec<u8>> {
    let mut prefix = [0_u8; LEN_PREFIX];
    reader.read_exact(&mut prefix)?;

    let declared = u32::from_be_bytes(prefix) as usize;
    if declared > cap {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("declared frame of {declared} bytes is over the {cap}-byte cap"),
        ));
    }

    let mut payload = Vec::with_capacity(declared);
    reader.by_ref().take(declared as u64).read_to_end(&mut payload)?;
    if payload.len() < declared {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame ended after {} of {declared} bytes", payload.len()),
        ));
    }

    Ok(payload)
}

fn put_frame(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let declared = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}-byte payload has no u32 length", payload.len()),
        )
    })?;

    writer.write_all(&declared.to_be_bytes())?;
    writer.write_all(payload)
}

fn invalid_json(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
