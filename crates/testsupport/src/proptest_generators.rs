//! Property-based generators for wire records.

use command::{
    Command, ExecuteQueryRequest, ExecuteRequest, LoadChunkRequest, LoadRequest, QueryRequest,
    Request, Statement, Value,
};
use proptest::prelude::*;

/// Strategy for generating parameter values of every kind.
///
/// Reals are kept finite: NaN breaks equality-based round-trip assertions.
pub fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Real),
        "[a-z0-9 ]{0,20}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..24).prop_map(Value::Blob),
        any::<bool>().prop_map(Value::Boolean),
    ]
}

/// Strategy for generating statements. The SQL is not necessarily valid;
/// the engine's reaction to garbage is part of what gets exercised.
pub fn arb_statement() -> impl Strategy<Value = Statement> {
    ("[A-Za-z0-9 =*,()?]{1,48}", prop::collection::vec(arb_value(), 0..4))
        .prop_map(|(sql, parameters)| Statement { sql, parameters })
}

/// Strategy for generating statement batches.
pub fn arb_request() -> impl Strategy<Value = Request> {
    (any::<bool>(), prop::collection::vec(arb_statement(), 0..4)).prop_map(
        |(transaction, statements)| Request {
            transaction,
            statements,
        },
    )
}

/// Strategy for generating whole decodable records of every kind.
pub fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (arb_request(), any::<bool>())
            .prop_map(|(request, timings)| Command::Query(QueryRequest { request, timings })),
        (arb_request(), any::<bool>())
            .prop_map(|(request, timings)| Command::Execute(ExecuteRequest { request, timings })),
        (arb_request(), any::<bool>()).prop_map(|(request, timings)| {
            Command::ExecuteQuery(ExecuteQueryRequest { request, timings })
        }),
        prop::collection::vec(any::<u8>(), 0..256)
            .prop_map(|data| Command::Load(LoadRequest { data })),
        arb_load_chunk().prop_map(Command::LoadChunk),
        Just(Command::Noop),
    ]
}

/// Strategy for generating load-chunk sub-commands.
pub fn arb_load_chunk() -> impl Strategy<Value = LoadChunkRequest> {
    (
        "[a-z0-9]{1,10}",
        any::<u64>(),
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(stream_id, sequence_num, is_last, abort, data)| LoadChunkRequest {
            stream_id,
            sequence_num,
            is_last,
            abort,
            data,
        })
}
