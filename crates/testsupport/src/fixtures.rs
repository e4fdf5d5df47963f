//! Common fixtures for exercising the command processor.

use command::{
    Command, ExecuteQueryRequest, ExecuteRequest, LoadChunkRequest, LoadRequest, QueryRequest,
    Request, Statement,
};
use db::Db;
use tempfile::TempDir;

/// Build a request of plain statements with no parameters.
pub fn request(sql: &[&str]) -> Request {
    Request {
        transaction: false,
        statements: sql
            .iter()
            .map(|s| Statement {
                sql: s.to_string(),
                parameters: Vec::new(),
            })
            .collect(),
    }
}

pub fn query_command(sql: &[&str]) -> Command {
    Command::Query(QueryRequest {
        request: request(sql),
        timings: false,
    })
}

pub fn execute_command(sql: &[&str]) -> Command {
    Command::Execute(ExecuteRequest {
        request: request(sql),
        timings: false,
    })
}

pub fn execute_query_command(sql: &[&str]) -> Command {
    Command::ExecuteQuery(ExecuteQueryRequest {
        request: request(sql),
        timings: false,
    })
}

pub fn load_command(data: Vec<u8>) -> Command {
    Command::Load(LoadRequest { data })
}

pub fn chunk_command(stream_id: &str, sequence_num: u64, is_last: bool, data: &[u8]) -> Command {
    Command::LoadChunk(LoadChunkRequest {
        stream_id: stream_id.to_string(),
        sequence_num,
        is_last,
        abort: false,
        data: data.to_vec(),
    })
}

pub fn abort_command(stream_id: &str) -> Command {
    Command::LoadChunk(LoadChunkRequest {
        stream_id: stream_id.to_string(),
        sequence_num: 0,
        is_last: false,
        abort: true,
        data: Vec::new(),
    })
}

/// Encode a command the way the consensus log stores it.
pub fn log_entry(cmd: &Command) -> Vec<u8> {
    command::encode(cmd, false).unwrap()
}

/// A single-file database image containing the given statements' effects.
pub fn db_image(sql: &[&str]) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.db");
    let mut db = Db::open(&path, false, false).unwrap();
    let results = db.execute(&request(sql), false).unwrap();
    assert!(
        results.iter().all(|r| r.error.is_none()),
        "image statements failed: {results:?}"
    );
    db.close().unwrap();
    std::fs::read(&path).unwrap()
}
