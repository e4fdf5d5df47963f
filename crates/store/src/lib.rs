//! Application of committed log entries to the local database.
//!
//! The consensus layer hands each committed entry to
//! [`CommandProcessor::process`] serially, in log order. Every replica runs
//! an identical processor over identical bytes and must end in
//! byte-equivalent database state, so the dispatch below is strictly
//! deterministic: no retries, no clocks in control flow, no tolerated decode
//! slack.
//!
//! Each apply yields the decoded record, a mutation flag, and a typed
//! result. The flag tells the consensus layer whether durable state changed;
//! it gates read-index and lease advancement, which is why load operations
//! report `true` even when they fail: a failed load must conservatively
//! invalidate any lease.

use std::path::Path;
use std::time::Duration;

use chunking::DechunkerManager;
use command::{Command, ExecuteResult, LoadChunkRequest, QueryRows, StatementResult};
use common::{Config, DbError, DbResult};
use db::Db;
use tracing::warn;

/// Open the replica's database with the options carried in `config`.
///
/// # Errors
///
/// Returns `DbError::Engine` if the database cannot be opened.
pub fn open_db(config: &Config, path: impl AsRef<Path>) -> DbResult<Db> {
    Db::open(path, config.fk_enabled, config.wal_enabled)
}

/// True if any statement in a write batch changed rows.
pub fn execute_results_mutated(results: &[ExecuteResult]) -> bool {
    results.iter().any(|r| r.rows_affected > 0)
}

/// True if any statement in a mixed batch changed rows.
pub fn statement_results_mutated(results: &[StatementResult]) -> bool {
    results
        .iter()
        .any(|r| matches!(r, StatementResult::Execute(e) if e.rows_affected > 0))
}

/// Result of applying a query record.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResponse {
    pub rows: Vec<QueryRows>,
    pub error: Option<String>,
}

/// Result of applying an execute record.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteResponse {
    pub results: Vec<ExecuteResult>,
    pub error: Option<String>,
}

/// Result of applying a mixed execute-query record.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteQueryResponse {
    pub results: Vec<StatementResult>,
    pub error: Option<String>,
}

/// Result of applying a record that carries no statement results.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericResponse {
    pub error: Option<String>,
}

/// Typed result of one apply, one variant per record family.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyResponse {
    Query(QueryResponse),
    Execute(ExecuteResponse),
    ExecuteQuery(ExecuteQueryResponse),
    Generic(GenericResponse),
}

/// Applies decoded commands to the database, swapping the underlying file in
/// place for load operations.
///
/// Single-writer: the consensus layer serializes calls to
/// [`CommandProcessor::process`], so the processor holds no locks of its own.
#[derive(Debug)]
pub struct CommandProcessor {
    dechunkers: DechunkerManager,
    reassembly_ttl: Duration,
}

impl CommandProcessor {
    pub fn new(config: &Config) -> Self {
        let dir = config
            .reassembly_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Self {
            dechunkers: DechunkerManager::new(dir),
            reassembly_ttl: config.reassembly_ttl,
        }
    }

    /// Apply one committed log entry to `db`.
    ///
    /// Returns the decoded record, whether durable state changed, and the
    /// typed result. Engine, swap, and chunk failures are carried inside the
    /// result object and do not abort the apply.
    ///
    /// # Errors
    ///
    /// The only `Err` is `DbError::Decode`: a record these bytes cannot
    /// produce on this binary. Every peer sees identical bytes, so the
    /// caller must stop the replica rather than diverge.
    pub fn process(&mut self, data: &[u8], db: &mut Db) -> DbResult<(Command, bool, ApplyResponse)> {
        let cmd = command::decode(data)?;
        match &cmd {
            Command::Query(qr) => {
                let response = match db.query(&qr.request, qr.timings) {
                    Ok(rows) => QueryResponse { rows, error: None },
                    Err(e) => QueryResponse {
                        rows: Vec::new(),
                        error: Some(e.to_string()),
                    },
                };
                Ok((cmd, false, ApplyResponse::Query(response)))
            }
            Command::Execute(er) => {
                let (mutated, response) = match db.execute(&er.request, er.timings) {
                    Ok(results) => (
                        execute_results_mutated(&results),
                        ExecuteResponse {
                            results,
                            error: None,
                        },
                    ),
                    Err(e) => (
                        false,
                        ExecuteResponse {
                            results: Vec::new(),
                            error: Some(e.to_string()),
                        },
                    ),
                };
                Ok((cmd, mutated, ApplyResponse::Execute(response)))
            }
            Command::ExecuteQuery(eqr) => {
                let (mutated, response) = match db.request(&eqr.request, eqr.timings) {
                    Ok(results) => (
                        statement_results_mutated(&results),
                        ExecuteQueryResponse {
                            results,
                            error: None,
                        },
                    ),
                    Err(e) => (
                        false,
                        ExecuteQueryResponse {
                            results: Vec::new(),
                            error: Some(e.to_string()),
                        },
                    ),
                };
                Ok((cmd, mutated, ApplyResponse::ExecuteQuery(response)))
            }
            Command::Load(lr) => {
                let response = generic(db.replace_from_bytes(&lr.data));
                Ok((cmd, true, ApplyResponse::Generic(response)))
            }
            Command::LoadChunk(lcr) => {
                let response = generic(self.load_chunk(lcr, db));
                Ok((cmd, true, ApplyResponse::Generic(response)))
            }
            Command::Noop => Ok((
                cmd,
                false,
                ApplyResponse::Generic(GenericResponse { error: None }),
            )),
            Command::Unknown(kind) => {
                let response = GenericResponse {
                    error: Some(format!("unhandled command: {kind}")),
                };
                Ok((cmd, false, ApplyResponse::Generic(response)))
            }
        }
    }

    /// Evict reassembly sessions whose stream never completed (the leader
    /// died mid-load). Call between applies; the processor is single-writer.
    pub fn reap_expired(&mut self) -> usize {
        self.dechunkers.reap(self.reassembly_ttl)
    }

    fn load_chunk(&mut self, req: &LoadChunkRequest, db: &mut Db) -> DbResult<()> {
        if req.abort {
            // Dropping the session removes its temp file.
            self.dechunkers.remove(&req.stream_id);
            return Ok(());
        }

        let session = self.dechunkers.get(&req.stream_id)?;
        if !session.write_chunk(req)? {
            return Ok(());
        }

        let session = self
            .dechunkers
            .remove(&req.stream_id)
            .ok_or_else(|| DbError::Chunk(format!("no session for stream {}", req.stream_id)))?;
        let tmp_path = session.close()?;

        // A snapshot may have truncated the head of this stream, leaving
        // only its tail in the log. The reassembled file is then garbage and
        // the load must be skipped: a later entry has already produced the
        // correct state.
        if !db::is_valid_file(&tmp_path) {
            warn!(stream_id = %req.stream_id, "invalid chunked database file - ignoring");
            return Err(DbError::Chunk(
                "invalid chunked database file - ignoring".to_string(),
            ));
        }

        db.replace_from_file(&tmp_path)
        // On any failure path `tmp_path` still removes the reassembled file
        // when it drops; after a successful rename there is nothing left for
        // it to remove.
    }
}

fn generic(result: DbResult<()>) -> GenericResponse {
    GenericResponse {
        error: result.err().map(|e| e.to_string()),
    }
}
