//! Engine handle over the embedded SQLite database.
//!
//! [`Db`] owns the live connection plus the on-disk path and open options
//! `(fk_enabled, wal_enabled)`. Exactly one handle is live per replica; the
//! apply dispatcher holds it through a mutable reference and may replace the
//! backing file in place via the swap primitives
//! ([`Db::replace_from_bytes`], [`Db::replace_from_file`]).
//!
//! The connection lives in an `Option` slot so `close` can consume it while
//! the handle itself stays addressable through the caller's `&mut Db`.
//! Operations on a closed handle return `DbError::Engine`.


use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use command::{ExecuteResult, QueryRows, Request, Statement, StatementResult, Value};
use common::{DbError, DbResult};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// First bytes of every SQLite database file.
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// The live database handle.
#[derive(Debug)]
pub struct Db {
    path: PathBuf,
    fk_enabled: bool,
    wal_enabled: bool,
    conn: Option<Connection>,
}

impl Db {
    /// Open (or create) the database at `path` with the given options.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Engine` if the file cannot be opened or the pragmas
    /// cannot be applied.
    pub fn open(path: impl AsRef<Path>, fk_enabled: bool, wal_enabled: bool) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path, fk_enabled, wal_enabled)?;
        Ok(Self {
            path,
            fk_enabled,
            wal_enabled,
            conn: Some(conn),
        })
    }

    /// Path of the main database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether foreign-key enforcement is enabled.
    pub fn fk_enabled(&self) -> bool {
        self.fk_enabled
    }

    /// Whether the database runs in write-ahead-log journal mode.
    pub fn wal_enabled(&self) -> bool {
        self.wal_enabled
    }

    /// Execute a read-only batch.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Engine` for the first statement that fails,
    /// including any statement that would change the database.
    pub fn query(&self, req: &Request, timings: bool) -> DbResult<Vec<QueryRows>> {
        let conn = self.conn()?;
        let mut out = Vec::with_capacity(req.statements.len());
        for stmt in &req.statements {
            out.push(query_one(conn, stmt, timings)?);
        }
        Ok(out)
    }

    /// Execute a write batch.
    ///
    /// Statement failures are recorded in that statement's result and
    /// processing continues. With `req.transaction` set, the first failure
    /// rolls the batch back and stops.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Engine` only for batch-level failures (closed
    /// handle, transaction control).
    pub fn execute(&self, req: &Request, timings: bool) -> DbResult<Vec<ExecuteResult>> {
        let conn = self.conn()?;
        if req.transaction {
            begin(conn)?;
        }
        let mut results = Vec::with_capacity(req.statements.len());
        for stmt in &req.statements {
            match execute_one(conn, stmt, timings) {
                Ok(r) => results.push(r),
                Err(e) => {
                    results.push(ExecuteResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                        error: Some(e.to_string()),
                        time: 0.0,
                    });
                    if req.transaction {
                        rollback(conn);
                        return Ok(results);
                    }
                }
            }
        }
        if req.transaction {
            commit(conn)?;
        }
        Ok(results)
    }

    /// Execute a mixed batch, routing each statement to the read or write
    /// path by its read-only probe.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Engine` only for batch-level failures; statement
    /// failures become [`StatementResult::Error`] entries.
    pub fn request(&self, req: &Request, timings: bool) -> DbResult<Vec<StatementResult>> {
        let conn = self.conn()?;
        if req.transaction {
            begin(conn)?;
        }
        let mut results = Vec::with_capacity(req.statements.len());
        for stmt in &req.statements {
            let outcome: DbResult<StatementResult> = (|| {
                let mut prepared = conn.prepare(&stmt.sql).map_err(engine_err)?;
                if prepared.readonly() {
                    run_query(&mut prepared, stmt, timings).map(StatementResult::Rows)
                } else {
                    run_execute(conn, &mut prepared, stmt, timings).map(StatementResult::Execute)
                }
            })();
            match outcome {
                Ok(r) => results.push(r),
                Err(e) => {
                    results.push(StatementResult::Error(e.to_string()));
                    if req.transaction {
                        rollback(conn);
                        return Ok(results);
                    }
                }
            }
        }
        if req.transaction {
            commit(conn)?;
        }
        Ok(results)
    }

    /// Close the handle. Closing an already-closed handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Engine` if the engine refuses to close; the
    /// connection is restored and the handle left untouched.
    pub fn close(&mut self) -> DbResult<()> {
        self.close_conn()
            .map_err(|e| DbError::Engine(format!("close database: {e}")))
    }

    /// Swap the backing file for a new image supplied as raw bytes.
    ///
    /// Close old handle, remove the old files (sidecars included), write the
    /// image at the same path, reopen with the same options, publish. A
    /// failure after the close leaves the handle in an indeterminate closed
    /// state; the caller must shut the replica down.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Swap` naming the step that failed.
    pub fn replace_from_bytes(&mut self, data: &[u8]) -> DbResult<()> {
        self.close_for_swap()?;
        remove_files(&self.path)
            .map_err(|e| DbError::Swap(format!("remove existing database files: {e}")))?;
        let new = create_on_disk(data, &self.path, self.fk_enabled, self.wal_enabled)
            .map_err(|e| DbError::Swap(format!("create on-disk database: {e}")))?;
        *self = new;
        Ok(())
    }

    /// Swap the backing file for a reassembled file, consuming it by rename.
    ///
    /// Same protocol as [`Db::replace_from_bytes`], with the image
    /// materialized by renaming `tmp_path` into place.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Swap` naming the step that failed.
    pub fn replace_from_file(&mut self, tmp_path: &Path) -> DbResult<()> {
        self.close_for_swap()?;
        remove_files(&self.path)
            .map_err(|e| DbError::Swap(format!("remove existing database files: {e}")))?;
        fs::rename(tmp_path, &self.path)
            .map_err(|e| DbError::Swap(format!("rename temporary database file: {e}")))?;
        let new = Db::open(&self.path, self.fk_enabled, self.wal_enabled)
            .map_err(|e| DbError::Swap(format!("open new on-disk database: {e}")))?;
        *self = new;
        Ok(())
    }

    fn conn(&self) -> DbResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::Engine("database is closed".to_string()))
    }

    fn close_conn(&mut self) -> Result<(), rusqlite::Error> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(conn, e)| {
                self.conn = Some(conn);
                e
            }),
            None => Ok(()),
        }
    }

    fn close_for_swap(&mut self) -> DbResult<()> {
        self.close_conn()
            .map_err(|e| DbError::Swap(format!("close database pre-swap: {e}")))
    }
}

/// Materialize `data` at `path` and open a handle over it.
///
/// # Errors
///
/// Returns `DbError::Io` if the file cannot be written, `DbError::Engine`
/// if the result cannot be opened as a database.
pub fn create_on_disk(
    data: &[u8],
    path: impl AsRef<Path>,
    fk_enabled: bool,
    wal_enabled: bool,
) -> DbResult<Db> {
    fs::write(path.as_ref(), data)?;
    Db::open(path, fk_enabled, wal_enabled)
}

/// Remove the database file and its WAL/SHM sidecars. Missing files are not
/// an error.
///
/// # Errors
///
/// Returns `DbError::Io` if a file exists but cannot be removed.
pub fn remove_files(path: impl AsRef<Path>) -> DbResult<()> {
    let path = path.as_ref();
    for p in [path.to_path_buf(), sidecar(path, "-wal"), sidecar(path, "-shm")] {
        match fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DbError::Io(e)),
        }
    }
    Ok(())
}

/// Probe the 16-byte magic header that starts every SQLite database file.
/// Anything unreadable or too short is not a valid file.
pub fn is_valid_file(path: impl AsRef<Path>) -> bool {
    let mut header = [0u8; 16];
    match fs::File::open(path.as_ref()).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => &header == SQLITE_MAGIC,
        Err(_) => false,
    }
}

fn open_connection(path: &Path, fk_enabled: bool, wal_enabled: bool) -> DbResult<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| DbError::Engine(format!("open database at {}: {e}", path.display())))?;
    conn.pragma_update(None, "foreign_keys", fk_enabled)
        .map_err(|e| DbError::Engine(format!("set foreign-key enforcement: {e}")))?;
    let mode = if wal_enabled { "wal" } else { "delete" };
    conn.query_row(&format!("PRAGMA journal_mode = {mode}"), [], |row| {
        row.get::<_, String>(0)
    })
    .map_err(|e| DbError::Engine(format!("set journal mode: {e}")))?;
    // The engine opens lazily; force a header read so an invalid file fails
    // here instead of on the first statement.
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
        .map_err(|e| DbError::Engine(format!("read schema version: {e}")))?;
    Ok(conn)
}

fn query_one(conn: &Connection, stmt: &Statement, timings: bool) -> DbResult<QueryRows> {
    let mut prepared = conn.prepare(&stmt.sql).map_err(engine_err)?;
    if !prepared.readonly() {
        return Err(DbError::Engine(
            "attempt to change database via query operation".to_string(),
        ));
    }
    run_query(&mut prepared, stmt, timings)
}

fn execute_one(conn: &Connection, stmt: &Statement, timings: bool) -> DbResult<ExecuteResult> {
    let mut prepared = conn.prepare(&stmt.sql).map_err(engine_err)?;
    run_execute(conn, &mut prepared, stmt, timings)
}

fn run_query(
    prepared: &mut rusqlite::Statement<'_>,
    stmt: &Statement,
    timings: bool,
) -> DbResult<QueryRows> {
    let start = Instant::now();
    let columns: Vec<String> = prepared.column_names().iter().map(|c| c.to_string()).collect();
    let types: Vec<String> = prepared
        .columns()
        .iter()
        .map(|c| c.decl_type().unwrap_or("").to_lowercase())
        .collect();

    let params = bind_params(&stmt.parameters);
    let mut rows = prepared
        .query(rusqlite::params_from_iter(params))
        .map_err(engine_err)?;
    let mut values = Vec::new();
    while let Some(row) = rows.next().map_err(engine_err)? {
        let mut out = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            out.push(value_from_sql(row.get_ref(idx).map_err(engine_err)?));
        }
        values.push(out);
    }

    Ok(QueryRows {
        columns,
        types,
        values,
        time: elapsed(start, timings),
    })
}

fn run_execute(
    conn: &Connection,
    prepared: &mut rusqlite::Statement<'_>,
    stmt: &Statement,
    timings: bool,
) -> DbResult<ExecuteResult> {
    let start = Instant::now();
    let params = bind_params(&stmt.parameters);
    let rows_affected = prepared
        .execute(rusqlite::params_from_iter(params))
        .map_err(engine_err)? as i64;
    Ok(ExecuteResult {
        last_insert_id: conn.last_insert_rowid(),
        rows_affected,
        error: None,
        time: elapsed(start, timings),
    })
}

fn bind_params(params: &[Value]) -> Vec<rusqlite::types::Value> {
    params
        .iter()
        .map(|v| match v {
            Value::Null => rusqlite::types::Value::Null,
            Value::Integer(i) => rusqlite::types::Value::Integer(*i),
            Value::Real(f) => rusqlite::types::Value::Real(*f),
            Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
            Value::Boolean(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        })
        .collect()
}

fn value_from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn elapsed(start: Instant, timings: bool) -> f64 {
    if timings {
        start.elapsed().as_secs_f64()
    } else {
        0.0
    }
}

fn begin(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("BEGIN")
        .map_err(|e| DbError::Engine(format!("begin transaction: {e}")))
}

fn commit(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("COMMIT")
        .map_err(|e| DbError::Engine(format!("commit transaction: {e}")))
}

fn rollback(conn: &Connection) {
    let _ = conn.execute_batch("ROLLBACK");
}

fn engine_err(e: rusqlite::Error) -> DbError {
    DbError::Engine(e.to_string())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
