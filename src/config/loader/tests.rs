use super::*;

#[test]
fn test_load_config_missing_file_returns_default() {
    let path = std::path::Path::new("/tmp/nonexistent_kalma_config_test.json");
    let config = load_config(Some(path)).unwrap();
    assert_eq!(config.gateway.host, "127.0.0.1");
    assert_eq!(config.store.backend, "sqlite");
}

#[test]
fn test_load_config_minimal_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"gateway": {"port": 8088}, "store": {"backend": "memory"}}"#,
    )
    .unwrap();
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.gateway.port, 8088);
    assert_eq!(config.store.backend, "memory");
}

#[test]
fn test_load_config_invalid_json_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{not json").unwrap();
    let err = load_config(Some(&path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config JSON"));
}

#[test]
fn test_load_config_runs_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"gateway": {"port": 0}}"#).unwrap();
    let err = load_config(Some(&path)).unwrap_err();
    assert!(format!("{:#}", err).contains("gateway.port"));
}

#[test]
fn test_load_config_alongside_other_shared_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"gateway": {"port": 8090}}"#).unwrap();

    let reader = fs::File::open(&path).unwrap();
    FileExt::lock_shared(&reader).unwrap();
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.gateway.port, 8090);
    FileExt::unlock(&reader).unwrap();
}
