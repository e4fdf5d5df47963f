use super::*;

#[test]
fn only_decode_failures_are_fatal() {
    assert!(DbError::Decode("bad envelope".into()).is_fatal());
    assert!(!DbError::Engine("syntax error".into()).is_fatal());
    assert!(!DbError::Swap("rename failed".into()).is_fatal());
    assert!(!DbError::Chunk("sequence gap".into()).is_fatal());
}

#[test]
fn error_display_names_the_subsystem() {
    assert_eq!(
        DbError::Chunk("invalid chunked database file - ignoring".into()).to_string(),
        "chunk: invalid chunked database file - ignoring"
    );
    assert_eq!(
        DbError::Swap("close failed".into()).to_string(),
        "swap: close failed"
    );
}

#[test]
fn config_builder_defaults() {
    let config = Config::builder().build();
    assert!(!config.fk_enabled);
    assert!(config.wal_enabled);
    assert!(config.reassembly_dir.is_none());
    assert_eq!(config.reassembly_ttl, Duration::from_secs(300));
}

#[test]
fn config_builder_overrides() {
    let config = Config::builder()
        .fk_enabled(true)
        .wal_enabled(false)
        .reassembly_dir(PathBuf::from("/tmp/reassembly"))
        .reassembly_ttl(Duration::from_secs(5))
        .build();
    assert!(config.fk_enabled);
    assert!(!config.wal_enabled);
    assert_eq!(config.reassembly_dir, Some(PathBuf::from("/tmp/reassembly")));
    assert_eq!(config.reassembly_ttl, Duration::from_secs(5));
}
