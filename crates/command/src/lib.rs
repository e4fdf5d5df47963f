//! Wire format for replicated log records.
//!
//! Every committed log entry is an envelope `{ kind, sub, compressed }`
//! encoded with bincode. The `kind` tag selects how the sub-command bytes are
//! parsed; the sub-command may be zstd-compressed. The layout is fixed for
//! compatibility: identical bytes are delivered to every replica, and every
//! replica must decode them identically.
//!
//! Decode failures are deliberately unforgiving. Peers all see the same
//! bytes, so a record that fails to parse means this binary has diverged from
//! the cluster, and the replica must stop (`DbError::Decode`). The one
//! exception is an unrecognized `kind` tag, which decodes to
//! [`Command::Unknown`] so the dispatcher can surface an error result and
//! keep advancing the log.

#[cfg(test)]
mod tests;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};

/// Wire tag for a read-only query batch.
pub const KIND_QUERY: u8 = 1;
/// Wire tag for a write batch.
pub const KIND_EXECUTE: u8 = 2;
/// Wire tag for a mixed read/write batch.
pub const KIND_EXECUTE_QUERY: u8 = 3;
/// Wire tag for a whole database file image.
pub const KIND_LOAD: u8 = 4;
/// Wire tag for one chunk of a streamed database file.
pub const KIND_LOAD_CHUNK: u8 = 5;
/// Wire tag for a no-op entry that only advances the log.
pub const KIND_NOOP: u8 = 6;

/// A single parameter or column value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

/// One SQL statement with its bound parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// A batch of statements. With `transaction` set, the batch runs inside a
/// single SQL transaction and rolls back on the first error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub transaction: bool,
    pub statements: Vec<Statement>,
}

/// Sub-command for the read path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request: Request,
    pub timings: bool,
}

/// Sub-command for the write path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub request: Request,
    pub timings: bool,
}

/// Sub-command for the mixed path: each statement is routed to the read or
/// write path by its read-only probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteQueryRequest {
    pub request: Request,
    pub timings: bool,
}

/// A complete database file image embedded in one record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub data: Vec<u8>,
}

/// One chunk of a multi-record database file stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadChunkRequest {
    pub stream_id: String,
    pub sequence_num: u64,
    pub is_last: bool,
    pub abort: bool,
    pub data: Vec<u8>,
}

/// Result of one write statement. A mutation is any result with
/// `rows_affected > 0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub last_insert_id: i64,
    pub rows_affected: i64,
    pub error: Option<String>,
    pub time: f64,
}

/// Result of one read statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub types: Vec<String>,
    pub values: Vec<Vec<Value>>,
    pub time: f64,
}

/// Per-statement result of a mixed batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StatementResult {
    Rows(QueryRows),
    Execute(ExecuteResult),
    Error(String),
}

/// A decoded log record.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Query(QueryRequest),
    Execute(ExecuteRequest),
    ExecuteQuery(ExecuteQueryRequest),
    Load(LoadRequest),
    LoadChunk(LoadChunkRequest),
    Noop,
    /// A tag this binary does not recognize. Carried through so the
    /// dispatcher can return an error result without halting the log.
    Unknown(u8),
}

impl Command {
    /// Wire tag for this record.
    pub fn kind(&self) -> u8 {
        match self {
            Command::Query(_) => KIND_QUERY,
            Command::Execute(_) => KIND_EXECUTE,
            Command::ExecuteQuery(_) => KIND_EXECUTE_QUERY,
            Command::Load(_) => KIND_LOAD,
            Command::LoadChunk(_) => KIND_LOAD_CHUNK,
            Command::Noop => KIND_NOOP,
            Command::Unknown(kind) => *kind,
        }
    }
}

/// Outer envelope of every log entry.
#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: u8,
    sub: Vec<u8>,
    compressed: bool,
}

/// Get the bincode configuration for record encoding.
///
/// Fixed-width little-endian integers keep the byte layout identical across
/// platforms and versions.
fn bincode_config() -> impl Config {
    config::legacy()
}

/// Decode one log entry.
///
/// # Errors
///
/// Returns `DbError::Decode` if the envelope or a recognized sub-command
/// fails to parse. This is the unrecoverable class: the caller must stop the
/// replica rather than diverge from its peers.
pub fn decode(data: &[u8]) -> DbResult<Command> {
    let (envelope, _): (Envelope, usize) = decode_from_slice(data, bincode_config())
        .map_err(|e| DbError::Decode(format!("bad command envelope: {e}")))?;

    let sub = if envelope.compressed {
        zstd::stream::decode_all(envelope.sub.as_slice())
            .map_err(|e| DbError::Decode(format!("decompress sub-command: {e}")))?
    } else {
        envelope.sub
    };

    match envelope.kind {
        KIND_QUERY => Ok(Command::Query(decode_sub(&sub, "query")?)),
        KIND_EXECUTE => Ok(Command::Execute(decode_sub(&sub, "execute")?)),
        KIND_EXECUTE_QUERY => Ok(Command::ExecuteQuery(decode_sub(&sub, "execute-query")?)),
        KIND_LOAD => Ok(Command::Load(decode_load(sub))),
        KIND_LOAD_CHUNK => Ok(Command::LoadChunk(decode_load_chunk(&sub)?)),
        KIND_NOOP => Ok(Command::Noop),
        other => Ok(Command::Unknown(other)),
    }
}

/// Decode a load sub-command.
///
/// The sub-command bytes ARE the database image; there is no inner framing,
/// so the image is never copied through an intermediate buffer.
pub fn decode_load(sub: Vec<u8>) -> LoadRequest {
    LoadRequest { data: sub }
}

/// Decode a load-chunk sub-command.
///
/// # Errors
///
/// Returns `DbError::Decode` on a malformed payload; fatal for the same
/// reason as the envelope.
pub fn decode_load_chunk(sub: &[u8]) -> DbResult<LoadChunkRequest> {
    decode_sub(sub, "load-chunk")
}

fn decode_sub<T: for<'de> Deserialize<'de>>(sub: &[u8], what: &str) -> DbResult<T> {
    let (payload, _) = decode_from_slice(sub, bincode_config())
        .map_err(|e| DbError::Decode(format!("bad {what} sub-command: {e}")))?;
    Ok(payload)
}

/// Encode a record into log-entry bytes.
///
/// Re-encoding a decoded record with the same `compress` flag yields
/// identical bytes.
///
/// # Errors
///
/// Returns `DbError::Decode` if serialization or compression fails.
pub fn encode(cmd: &Command, compress: bool) -> DbResult<Vec<u8>> {
    let sub = match cmd {
        Command::Query(q) => encode_sub(q)?,
        Command::Execute(e) => encode_sub(e)?,
        Command::ExecuteQuery(eq) => encode_sub(eq)?,
        Command::Load(l) => l.data.clone(),
        Command::LoadChunk(c) => encode_sub(c)?,
        Command::Noop | Command::Unknown(_) => Vec::new(),
    };

    let (sub, compressed) = if compress {
        let packed = zstd::stream::encode_all(sub.as_slice(), 0)
            .map_err(|e| DbError::Decode(format!("compress sub-command: {e}")))?;
        (packed, true)
    } else {
        (sub, false)
    };

    let envelope = Envelope {
        kind: cmd.kind(),
        sub,
        compressed,
    };
    encode_to_vec(&envelope, bincode_config())
        .map_err(|e| DbError::Decode(format!("encode command envelope: {e}")))
}

fn encode_sub<T: Serialize>(payload: &T) -> DbResult<Vec<u8>> {
    encode_to_vec(payload, bincode_config())
        .map_err(|e| DbError::Decode(format!("encode sub-command: {e}")))
}
