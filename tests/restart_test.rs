//! Restart tests: state written by one server must be recovered verbatim by
//! the next one attached to the same root.

use std::fs;
use std::sync::Arc;

use patchlog::{FilePatchStore, IdentityRegistry, PatchStore, Version};
use tempfile::TempDir;

mod common;
use common::test_server::{list_tree, start_server, test_config};

#[test]
fn test_restart_empty_root() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());

    let server = start_server(temp_dir.path(), &registry);
    assert!(server.list_logs().is_empty());
    server.release();

    let server = start_server(temp_dir.path(), &registry);
    assert!(server.list_logs().is_empty());
}

#[test]
fn test_restart_recovers_identity() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());

    let server = start_server(temp_dir.path(), &registry);
    let id = server.create_log("XYZ", "http://example/XYZ").unwrap();
    server.release();
    drop(server);

    let server = start_server(temp_dir.path(), &registry);
    let dsd = server.describe_by_name("XYZ").unwrap();
    assert_eq!(dsd.id, id);
    assert_eq!(dsd.uri, "http://example/XYZ");
}

#[test]
fn test_restart_with_fresh_registry() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;

    let id = {
        let registry = Arc::new(IdentityRegistry::new());
        let server = start_server(temp_dir.path(), &registry);
        let id = server.create_log("XYZ", "http://example/XYZ")?;
        let log = server.connect(id)?;
        log.append(b"one")?;
        log.append(b"two")?;
        id
    }; // Server dropped here, as in a process exit.

    let registry = Arc::new(IdentityRegistry::new());
    let server = start_server(temp_dir.path(), &registry);
    assert_eq!(server.list_identities(), vec![id]);

    let log = server.connect("XYZ")?;
    assert_eq!(log.head_version(), Version::new(2));
    assert_eq!(log.read(Version::new(2))?, b"two");
    assert_eq!(log.append(b"three")?, Version::new(3));

    let info = server.log_info(id)?;
    assert_eq!(info.min_version, Version::FIRST);
    assert_eq!(info.max_version, Version::new(3));
    Ok(())
}

#[test]
fn test_restart_after_delete() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());

    let server = start_server(temp_dir.path(), &registry);
    server.create_log("gone", "http://example/gone").unwrap();
    server.delete_log("gone").unwrap();
    server.release();

    let server = start_server(temp_dir.path(), &registry);
    assert!(server.list_logs().is_empty());
    server.create_log("gone", "http://example/gone").unwrap();
}

#[test]
fn test_attach_is_read_only() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());

    let server = start_server(temp_dir.path(), &registry);
    server.create_log("A", "http://x/a").unwrap();
    server.connect("A").unwrap().append(b"1").unwrap();
    server.release();

    let before = list_tree(temp_dir.path());
    let server = start_server(temp_dir.path(), &registry);
    server.release();
    let _again = start_server(temp_dir.path(), &registry);
    assert_eq!(list_tree(temp_dir.path()), before);
}

#[test]
fn test_discovery_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());
    let server = start_server(temp_dir.path(), &registry);
    for name in ["c", "a", "b"] {
        server.create_log(name, &format!("http://example/{}", name)).unwrap();
    }
    server.release();

    let store = FilePatchStore::initialize(&test_config(temp_dir.path()), registry.clone()).unwrap();
    let first = store.discover_existing().unwrap();
    let second = store.discover_existing().unwrap();
    assert_eq!(first, second);
    let names: Vec<&str> = first.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    // Discovery alone builds no indexes.
    assert!(registry.is_empty());
}

#[test]
fn test_restart_after_interrupted_append() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());

    let server = start_server(temp_dir.path(), &registry);
    let id = server.create_log("XYZ", "http://example/XYZ").unwrap();
    server.connect(id).unwrap().append(b"one").unwrap();
    server.release();

    // A crash between writing the next segment and renaming it into place.
    let log_dir = temp_dir.path().join("XYZ");
    fs::write(log_dir.join("patch.0002.tmp"), b"half written").unwrap();

    let server = start_server(temp_dir.path(), &registry);
    let log = server.connect(id).unwrap();
    assert_eq!(log.head_version(), Version::FIRST);
    assert!(!log_dir.join("patch.0002.tmp").exists());
    assert_eq!(log.append(b"two").unwrap(), Version::new(2));
}

#[test]
fn test_restart_recomputes_head_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(IdentityRegistry::new());

    let server = start_server(temp_dir.path(), &registry);
    let id = server.create_log("XYZ", "http://example/XYZ").unwrap();
    let log = server.connect(id).unwrap();
    for i in 0..3u8 {
        log.append(&[i]).unwrap();
    }
    server.release();

    // The last segment vanished while the server was down.
    fs::remove_file(temp_dir.path().join("XYZ").join("patch.0003")).unwrap();

    let server = start_server(temp_dir.path(), &registry);
    let log = server.connect(id).unwrap();
    assert_eq!(log.head_version(), Version::new(2));
}
