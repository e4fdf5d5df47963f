use super::*;
use proptest::prelude::*;

fn sample_request() -> Request {
    Request {
        transaction: false,
        statements: vec![
            Statement {
                sql: "SELECT * FROM t WHERE x = ?".to_string(),
                parameters: vec![Value::Integer(1)],
            },
            Statement {
                sql: "SELECT count(*) FROM t".to_string(),
                parameters: Vec::new(),
            },
        ],
    }
}

#[test]
fn query_round_trip() {
    let cmd = Command::Query(QueryRequest {
        request: sample_request(),
        timings: true,
    });
    let bytes = encode(&cmd, false).unwrap();
    assert_eq!(decode(&bytes).unwrap(), cmd);
}

#[test]
fn execute_round_trip_all_value_kinds() {
    let cmd = Command::Execute(ExecuteRequest {
        request: Request {
            transaction: true,
            statements: vec![Statement {
                sql: "INSERT INTO t VALUES (?, ?, ?, ?, ?, ?)".to_string(),
                parameters: vec![
                    Value::Null,
                    Value::Integer(-7),
                    Value::Real(2.5),
                    Value::Text("alice".to_string()),
                    Value::Blob(vec![0xde, 0xad]),
                    Value::Boolean(true),
                ],
            }],
        },
        timings: false,
    });
    let bytes = encode(&cmd, false).unwrap();
    assert_eq!(decode(&bytes).unwrap(), cmd);
}

#[test]
fn load_round_trip_keeps_raw_image() {
    let image = vec![0x53u8; 4096];
    let cmd = Command::Load(LoadRequest { data: image.clone() });
    let bytes = encode(&cmd, false).unwrap();
    match decode(&bytes).unwrap() {
        Command::Load(lr) => assert_eq!(lr.data, image),
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn load_chunk_round_trip() {
    let cmd = Command::LoadChunk(LoadChunkRequest {
        stream_id: "s1".to_string(),
        sequence_num: 5,
        is_last: true,
        abort: false,
        data: vec![1, 2, 3],
    });
    let bytes = encode(&cmd, false).unwrap();
    assert_eq!(decode(&bytes).unwrap(), cmd);
}

#[test]
fn noop_round_trip() {
    let bytes = encode(&Command::Noop, false).unwrap();
    assert_eq!(decode(&bytes).unwrap(), Command::Noop);
}

#[test]
fn compressed_sub_command_is_transparent() {
    let cmd = Command::Load(LoadRequest {
        data: vec![0u8; 8192],
    });
    let plain = encode(&cmd, false).unwrap();
    let packed = encode(&cmd, true).unwrap();
    assert!(packed.len() < plain.len());
    assert_eq!(decode(&packed).unwrap(), cmd);
}

#[test]
fn unknown_tag_decodes_without_error() {
    let bytes = encode(&Command::Unknown(99), false).unwrap();
    assert_eq!(decode(&bytes).unwrap(), Command::Unknown(99));
}

#[test]
fn unrecognized_tag_in_envelope_maps_to_unknown() {
    let envelope = Envelope {
        kind: 200,
        sub: vec![1, 2, 3],
        compressed: false,
    };
    let bytes = encode_to_vec(&envelope, bincode_config()).unwrap();
    assert_eq!(decode(&bytes).unwrap(), Command::Unknown(200));
}

#[test]
fn garbage_envelope_is_a_decode_error() {
    let err = decode(&[0xff, 0xff, 0xff]).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn truncated_envelope_is_a_decode_error() {
    let bytes = encode(&Command::Noop, false).unwrap();
    let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn garbage_sub_command_is_a_decode_error() {
    let envelope = Envelope {
        kind: KIND_LOAD_CHUNK,
        sub: vec![0xff; 4],
        compressed: false,
    };
    let bytes = encode_to_vec(&envelope, bincode_config()).unwrap();
    let err = decode(&bytes).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("load-chunk"));
}

#[test]
fn bad_compressed_payload_is_a_decode_error() {
    let envelope = Envelope {
        kind: KIND_LOAD,
        sub: vec![0xde, 0xad, 0xbe, 0xef],
        compressed: true,
    };
    let bytes = encode_to_vec(&envelope, bincode_config()).unwrap();
    assert!(decode(&bytes).unwrap_err().is_fatal());
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        // Finite reals only: NaN breaks the equality half of the round trip.
        (-1.0e9f64..1.0e9).prop_map(Value::Real),
        "[a-z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
        any::<bool>().prop_map(Value::Boolean),
    ]
}

fn arb_statement() -> impl Strategy<Value = Statement> {
    ("[A-Za-z0-9 =*,()?]{1,48}", prop::collection::vec(arb_value(), 0..4))
        .prop_map(|(sql, parameters)| Statement { sql, parameters })
}

fn arb_request() -> impl Strategy<Value = Request> {
    (any::<bool>(), prop::collection::vec(arb_statement(), 0..3)).prop_map(
        |(transaction, statements)| Request {
            transaction,
            statements,
        },
    )
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (arb_request(), any::<bool>())
            .prop_map(|(request, timings)| Command::Query(QueryRequest { request, timings })),
        (arb_request(), any::<bool>())
            .prop_map(|(request, timings)| Command::Execute(ExecuteRequest { request, timings })),
        (arb_request(), any::<bool>()).prop_map(|(request, timings)| {
            Command::ExecuteQuery(ExecuteQueryRequest { request, timings })
        }),
        prop::collection::vec(any::<u8>(), 0..128)
            .prop_map(|data| Command::Load(LoadRequest { data })),
        (
            "[a-z0-9]{1,8}",
            any::<u64>(),
            any::<bool>(),
            any::<bool>(),
            prop::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(stream_id, sequence_num, is_last, abort, data)| {
                Command::LoadChunk(LoadChunkRequest {
                    stream_id,
                    sequence_num,
                    is_last,
                    abort,
                    data,
                })
            }),
        Just(Command::Noop),
    ]
}

proptest! {
    /// Encoding, decoding, and re-encoding any record yields identical bytes.
    #[test]
    fn encode_decode_encode_is_identity(cmd in arb_command(), compress in any::<bool>()) {
        let first = encode(&cmd, compress).unwrap();
        let decoded = decode(&first).unwrap();
        prop_assert_eq!(&decoded, &cmd);
        let second = encode(&decoded, compress).unwrap();
        prop_assert_eq!(first, second);
    }
}
