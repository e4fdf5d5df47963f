//! Reassembly of chunked database-file streams.
//!
//! A leader ships a large database image as a sequence of `LoadChunkRequest`
//! records sharing a `stream_id`. Each stream owns one [`Dechunker`] session
//! accumulating chunks into a temp file; the [`DechunkerManager`] keys the
//! sessions and reaps the ones whose leader died mid-stream.
//!
//! Ownership of the temp file follows the session: dropping a session
//! removes its file, while [`Dechunker::close`] hands the path out to the
//! caller (still self-deleting until persisted elsewhere).


use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use command::LoadChunkRequest;
use common::{DbError, DbResult};
use tempfile::{NamedTempFile, TempPath};
use tracing::info;

/// One in-progress reassembly session.
#[derive(Debug)]
pub struct Dechunker {
    stream_id: String,
    file: NamedTempFile,
    last_seq: Option<u64>,
    created: Instant,
}

impl Dechunker {
    fn new(stream_id: &str, dir: &Path) -> DbResult<Self> {
        let file = tempfile::Builder::new()
            .prefix("reassembly-")
            .suffix(".sqlite")
            .tempfile_in(dir)
            .map_err(|e| DbError::Chunk(format!("create reassembly temp file: {e}")))?;
        Ok(Self {
            stream_id: stream_id.to_string(),
            file,
            last_seq: None,
            created: Instant::now(),
        })
    }

    /// Append one chunk. Returns `true` when the chunk marks the end of the
    /// stream.
    ///
    /// Chunks arrive in log order, so the sequence number is verified rather
    /// than trusted. The first chunk of a session may carry any starting
    /// number: a snapshot can truncate the head of a stream, and the garbage
    /// that reassembles from the tail is caught by the file probe, not here.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Chunk` on a sequence gap or a write failure.
    pub fn write_chunk(&mut self, chunk: &LoadChunkRequest) -> DbResult<bool> {
        if let Some(last) = self.last_seq {
            let expected = last.saturating_add(1);
            if chunk.sequence_num != expected {
                return Err(DbError::Chunk(format!(
                    "stream {}: expected sequence {}, got {}",
                    self.stream_id, expected, chunk.sequence_num
                )));
            }
        }
        self.file
            .write_all(&chunk.data)
            .map_err(|e| DbError::Chunk(format!("append chunk: {e}")))?;
        self.last_seq = Some(chunk.sequence_num);
        Ok(chunk.is_last)
    }

    /// Flush the session and hand its temp path out. The file keeps deleting
    /// itself on drop until the caller persists it elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Chunk` if the flush fails.
    pub fn close(mut self) -> DbResult<TempPath> {
        self.file
            .flush()
            .map_err(|e| DbError::Chunk(format!("flush reassembly file: {e}")))?;
        Ok(self.file.into_temp_path())
    }

    /// The stream this session belongs to.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Where this session is accumulating bytes.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

/// The set of in-progress sessions, keyed by stream id. Sessions for
/// distinct streams are independent; all access runs under the caller's
/// single-writer discipline.
#[derive(Debug)]
pub struct DechunkerManager {
    dir: PathBuf,
    sessions: HashMap<String, Dechunker>,
}

impl DechunkerManager {
    /// Sessions write their temp files under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sessions: HashMap::new(),
        }
    }

    /// Return the session for `stream_id`, creating one on first sight.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Chunk` if a fresh temp file cannot be created.
    pub fn get(&mut self, stream_id: &str) -> DbResult<&mut Dechunker> {
        match self.sessions.entry(stream_id.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(Dechunker::new(stream_id, &self.dir)?)),
        }
    }

    /// Forget the session, transferring ownership out. Dropping the returned
    /// session removes its temp file; `close` keeps the file for the caller.
    pub fn remove(&mut self, stream_id: &str) -> Option<Dechunker> {
        self.sessions.remove(stream_id)
    }

    /// Number of in-progress sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no stream is in progress.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict sessions older than `ttl`, deleting their temp files, and
    /// return how many were reaped. Expiry is not an error: the next chunk
    /// for an evicted stream simply opens a fresh session.
    pub fn reap(&mut self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.age() < ttl);
        let reaped = before - self.sessions.len();
        if reaped > 0 {
            info!(reaped, "evicted expired reassembly sessions");
        }
        reaped
    }
}

impl Default for DechunkerManager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}
