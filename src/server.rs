//! The local server: the set of named patch logs under one storage root.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{PatchLogError, StoreResult};
use crate::storage::{IdentityRegistry, PatchLog, create_patch_store, validate_log_name};
use crate::traits::PatchStore;
use crate::types::{Id, LogDescriptor, LogRef, PatchLogInfo};

pub struct LocalServer {
    config: ServerConfig,
    store: Arc<dyn PatchStore>,
    descriptors: RwLock<HashMap<Id, LogDescriptor>>,
    // Makes the name check and the allocation of a new log one step.
    create_lock: Mutex<()>,
    released: AtomicBool,
}

impl LocalServer {
    /// Bind to `config.root` and discover the logs already there. Reads the
    /// disk only.
    pub fn attach(config: ServerConfig, registry: Arc<IdentityRegistry>) -> StoreResult<Self> {
        config.validate()?;
        let store = create_patch_store(&config, registry)?;
        let discovered = store.discover_existing()?;

        info!(
            "Local server attached to {:?} ({} provider): {} logs",
            config.root,
            store.provider(),
            discovered.len()
        );

        let descriptors = discovered.into_iter().map(|d| (d.id, d)).collect();

        Ok(Self {
            config,
            store,
            descriptors: RwLock::new(descriptors),
            create_lock: Mutex::new(()),
            released: AtomicBool::new(false),
        })
    }

    /// Like [`attach`](Self::attach), taking settings from `root/delta.cfg`
    /// if it exists.
    pub fn attach_root<P: AsRef<Path>>(
        root: P,
        registry: Arc<IdentityRegistry>,
    ) -> StoreResult<Self> {
        let config = ServerConfig::load(root)?;
        Self::attach(config, registry)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(PatchLogError::Released(format!(
                "local server for {:?}",
                self.config.root
            )));
        }
        Ok(())
    }

    /// Create a new log and return its identity.
    pub fn create_log(&self, name: &str, uri: &str) -> StoreResult<Id> {
        self.ensure_active()?;
        validate_log_name(name)?;

        let _create = self.create_lock.lock();
        if self.describe_by_name(name).is_some() {
            return Err(PatchLogError::AlreadyExists(name.to_string()));
        }
        if self.store.exists(name) {
            warn!("Refusing to create {:?}: storage already present", name);
            return Err(PatchLogError::AlreadyExists(name.to_string()));
        }

        let descriptor = LogDescriptor::new(Id::new(), name, uri);
        self.store.create_log(&descriptor)?;
        let id = descriptor.id;
        self.descriptors.write().insert(id, descriptor);
        Ok(id)
    }

    /// All known logs, ordered by name.
    pub fn list_logs(&self) -> Vec<LogDescriptor> {
        let mut logs: Vec<LogDescriptor> = self.descriptors.read().values().cloned().collect();
        logs.sort_by(|a, b| a.name.cmp(&b.name));
        logs
    }

    pub fn list_identities(&self) -> Vec<Id> {
        self.list_logs().into_iter().map(|d| d.id).collect()
    }

    pub fn describe(&self, id: &Id) -> Option<LogDescriptor> {
        self.descriptors.read().get(id).cloned()
    }

    pub fn describe_by_name(&self, name: &str) -> Option<LogDescriptor> {
        self.descriptors
            .read()
            .values()
            .find(|d| d.name == name)
            .cloned()
    }

    fn resolve(&self, log: &LogRef) -> StoreResult<LogDescriptor> {
        let found = match log {
            LogRef::Name(name) => self.describe_by_name(name),
            LogRef::Id(id) => self.describe(id),
        };
        found.ok_or_else(|| PatchLogError::NotFound(log.to_string()))
    }

    /// Handle for appending to and reading from a log.
    pub fn connect(&self, log: impl Into<LogRef>) -> StoreResult<PatchLog> {
        self.ensure_active()?;
        let descriptor = self.resolve(&log.into())?;
        self.store.connect(&descriptor)
    }

    pub fn log_info(&self, log: impl Into<LogRef>) -> StoreResult<PatchLogInfo> {
        Ok(self.connect(log)?.info())
    }

    /// Delete a log and its data. The name becomes free for a new log.
    pub fn delete_log(&self, log: impl Into<LogRef>) -> StoreResult<()> {
        self.ensure_active()?;
        let descriptor = self.resolve(&log.into())?;
        self.store.delete_log(&descriptor)?;
        self.descriptors.write().remove(&descriptor.id);
        Ok(())
    }

    /// Take a log out of service, keeping its data. Its name stays taken.
    pub fn disable_log(&self, log: impl Into<LogRef>) -> StoreResult<()> {
        self.ensure_active()?;
        let descriptor = self.resolve(&log.into())?;
        self.store.disable_log(&descriptor)?;
        self.descriptors.write().remove(&descriptor.id);
        Ok(())
    }

    /// Detach from the backend without deleting anything. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store.shutdown();
        self.descriptors.write().clear();
        info!("Local server for {:?} released", self.config.root);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;
    use tempfile::TempDir;

    fn create_test_server(temp_dir: &TempDir) -> LocalServer {
        let mut config = ServerConfig::with_root(temp_dir.path());
        config.sync_on_write = false;
        LocalServer::attach(config, Arc::new(IdentityRegistry::new())).unwrap()
    }

    #[test]
    fn test_empty_root() {
        let temp_dir = TempDir::new().unwrap();
        let server = create_test_server(&temp_dir);
        assert!(server.list_logs().is_empty());
        assert_eq!(fs_entries(&temp_dir), 0);
    }

    #[test]
    fn test_create_and_describe() {
        let temp_dir = TempDir::new().unwrap();
        let server = create_test_server(&temp_dir);
        let id = server.create_log("ABC", "http://example/abc").unwrap();

        let dsd = server.describe(&id).unwrap();
        assert_eq!(dsd.name, "ABC");
        assert_eq!(dsd.uri, "http://example/abc");
        assert_eq!(server.describe_by_name("ABC"), Some(dsd));
        assert_eq!(server.list_identities(), vec![id]);
    }

    #[test]
    fn test_invalid_names() {
        let temp_dir = TempDir::new().unwrap();
        let server = create_test_server(&temp_dir);
        assert!(matches!(
            server.create_log("../escape", "http://x"),
            Err(PatchLogError::InvalidName(_))
        ));
        assert!(matches!(
            server.create_log("", "http://x"),
            Err(PatchLogError::InvalidName(_))
        ));
    }

    #[test]
    fn test_log_info_tracks_versions() {
        let temp_dir = TempDir::new().unwrap();
        let server = create_test_server(&temp_dir);
        let id = server.create_log("ABC", "http://example/abc").unwrap();

        let info = server.log_info(id).unwrap();
        assert_eq!(info.min_version, Version::INIT);
        assert_eq!(info.max_version, Version::INIT);

        let log = server.connect("ABC").unwrap();
        log.append(b"1").unwrap();
        log.append(b"2").unwrap();

        let info = server.log_info(id).unwrap();
        assert_eq!(info.min_version, Version::FIRST);
        assert_eq!(info.max_version, Version::new(2));
    }

    #[test]
    fn test_operations_after_release() {
        let temp_dir = TempDir::new().unwrap();
        let server = create_test_server(&temp_dir);
        server.create_log("ABC", "http://example/abc").unwrap();
        server.release();
        server.release();

        assert!(server.is_released());
        assert!(server.list_logs().is_empty());
        assert!(matches!(
            server.create_log("XYZ", "http://x"),
            Err(PatchLogError::Released(_))
        ));
        assert!(temp_dir.path().join("ABC").exists());
    }

    fn fs_entries(temp_dir: &TempDir) -> usize {
        std::fs::read_dir(temp_dir.path()).unwrap().count()
    }
}
