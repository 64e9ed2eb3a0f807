//! File backend: one directory per log under the server root.
//!
//! ```text
//! {root}/
//! ├── delta.cfg            # optional server config
//! └── {log name}/
//!     ├── source.cfg       # metadata record (id, name, uri)
//!     ├── patch.0001       # segments
//!     ├── patch.0002
//!     └── disabled         # optional soft-delete marker
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{LogProvider, SERVER_CONFIG_FILE, ServerConfig};
use crate::error::{PatchLogError, StoreResult};
use crate::traits::PatchStore;
use crate::types::{Id, LogDescriptor};

use super::index::LogIndex;
use super::metadata;
use super::patch_log::PatchLog;
use super::registry::IdentityRegistry;
use super::segment::SegmentStoreOptions;

/// Basename shared by every segment file of a log.
pub const PATCH_BASENAME: &str = "patch";

/// Prefix of a log directory that is being removed.
const DELETED_PREFIX: &str = ".deleted-";

/// Check that `name` can be used as a log directory name.
pub fn validate_log_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name == SERVER_CONFIG_FILE;
    if invalid {
        return Err(PatchLogError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct FilePatchStore {
    root: PathBuf,
    options: SegmentStoreOptions,
    registry: Arc<IdentityRegistry>,
    // Logs this store has discovered, created or connected.
    tracked: Mutex<HashMap<Id, LogDescriptor>>,
    // Identities this store counts as a registry holder of.
    held: Mutex<HashSet<Id>>,
}

impl FilePatchStore {
    /// Bind to the root named by `config`. Does not look at existing logs.
    pub fn initialize(config: &ServerConfig, registry: Arc<IdentityRegistry>) -> StoreResult<Self> {
        config.validate()?;
        if config.provider()? != LogProvider::File {
            return Err(PatchLogError::InvalidConfiguration(format!(
                "file store cannot serve provider {}",
                config.log_type
            )));
        }

        info!("File patch store initialized at {:?}", config.root);

        Ok(Self {
            root: config.root.clone(),
            options: config.segment_options(),
            registry,
            tracked: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    fn log_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        validate_log_name(name).is_ok() && metadata::is_disabled(&self.log_dir(name))
    }

    /// Registry index for `descriptor`, built on first use. Only a fresh log
    /// may have its segment store created; existing logs are attached.
    /// Callers hold the shared lifecycle lock.
    fn index_for(&self, descriptor: &LogDescriptor, fresh: bool) -> StoreResult<Arc<LogIndex>> {
        let dir = self.log_dir(&descriptor.name);
        let options = self.options.clone();
        let index = self.registry.get_or_init(descriptor.id, || {
            if fresh {
                LogIndex::attach_or_create(descriptor.id, &dir, PATCH_BASENAME, options)
            } else {
                LogIndex::attach(descriptor.id, &dir, PATCH_BASENAME, options)
            }
        })?;
        self.hold(descriptor.id);
        Ok(index)
    }

    fn hold(&self, id: Id) {
        let mut held = self.held.lock();
        if !held.contains(&id) && self.registry.hold(&id) {
            held.insert(id);
        }
    }

    /// Check that the directory for `descriptor` exists and belongs to it.
    fn verify_on_disk(&self, descriptor: &LogDescriptor) -> StoreResult<PathBuf> {
        validate_log_name(&descriptor.name)?;
        let dir = self.log_dir(&descriptor.name);
        if !dir.is_dir() {
            return Err(PatchLogError::NotFound(descriptor.name.clone()));
        }
        match metadata::read_descriptor(&dir)? {
            Some(record) if record.id == descriptor.id => Ok(dir),
            Some(record) => {
                warn!(
                    "Directory {:?} belongs to {}, not {}",
                    dir, record.id, descriptor.id
                );
                Err(PatchLogError::NotFound(descriptor.to_string()))
            }
            None => Err(PatchLogError::NotFound(descriptor.to_string())),
        }
    }

    /// Evict and release the log's index for every holder. Rejected while an
    /// append is running. Callers hold the exclusive lifecycle lock.
    fn evict(&self, descriptor: &LogDescriptor) -> StoreResult<()> {
        let current = self.registry.get(&descriptor.id);
        let _in_flight = match &current {
            Some(index) => Some(index.try_exclusive()?),
            None => None,
        };
        if let Some(index) = self.registry.remove(&descriptor.id) {
            index.release();
        }
        self.held.lock().remove(&descriptor.id);
        self.tracked.lock().remove(&descriptor.id);
        Ok(())
    }
}

impl PatchStore for FilePatchStore {
    fn provider(&self) -> LogProvider {
        LogProvider::File
    }

    fn discover_existing(&self) -> StoreResult<Vec<LogDescriptor>> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 directory {:?}", path);
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if metadata::is_disabled(&path) {
                info!("Skipping disabled log {}", name);
                continue;
            }

            match metadata::read_descriptor(&path) {
                Ok(Some(descriptor)) if descriptor.name != name => {
                    warn!(
                        "Metadata in {:?} names {:?}; skipping",
                        path, descriptor.name
                    );
                }
                Ok(Some(descriptor)) => {
                    if seen.insert(descriptor.id) {
                        found.push(descriptor);
                    } else {
                        warn!("Duplicate identity {} in {:?}; skipping", descriptor.id, path);
                    }
                }
                Ok(None) => debug!("No metadata record in {:?}", path),
                Err(e) => warn!("Unreadable log directory {:?}: {}", path, e),
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));

        let mut tracked = self.tracked.lock();
        for descriptor in &found {
            tracked.insert(descriptor.id, descriptor.clone());
        }

        Ok(found)
    }

    fn exists(&self, name: &str) -> bool {
        validate_log_name(name).is_ok() && self.log_dir(name).exists()
    }

    fn create_log(&self, descriptor: &LogDescriptor) -> StoreResult<PatchLog> {
        validate_log_name(&descriptor.name)?;
        let _lifecycle = self.registry.shared_lifecycle();
        if self.tracked.lock().contains_key(&descriptor.id) {
            return Err(PatchLogError::AlreadyExists(descriptor.to_string()));
        }

        // The directory decides whether the name is taken.
        let dir = self.log_dir(&descriptor.name);
        if dir.exists() {
            warn!("Storage for {:?} already exists at {:?}", descriptor.name, dir);
            return Err(PatchLogError::AlreadyExists(descriptor.name.clone()));
        }
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PatchLogError::AlreadyExists(descriptor.name.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        let index = match metadata::write_descriptor(&dir, descriptor, self.options.sync_on_write)
            .and_then(|()| self.index_for(descriptor, true))
        {
            Ok(index) => index,
            Err(e) => {
                warn!("Failed to create log {}: {}", descriptor, e);
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!("Failed to clean up {:?}: {}", dir, cleanup);
                }
                return Err(e);
            }
        };

        {
            let mut tracked = self.tracked.lock();
            tracked.retain(|_, d| d.name != descriptor.name);
            tracked.insert(descriptor.id, descriptor.clone());
        }
        info!("Created patch log {}", descriptor);
        Ok(PatchLog::new(descriptor.clone(), index))
    }

    fn connect(&self, descriptor: &LogDescriptor) -> StoreResult<PatchLog> {
        let _lifecycle = self.registry.shared_lifecycle();
        if let Some(index) = self.registry.get(&descriptor.id) {
            self.hold(descriptor.id);
            return Ok(PatchLog::new(descriptor.clone(), index));
        }

        let dir = self.verify_on_disk(descriptor)?;
        if metadata::is_disabled(&dir) {
            return Err(PatchLogError::NotFound(format!("{} (disabled)", descriptor.name)));
        }

        let index = self.index_for(descriptor, false)?;
        self.tracked.lock().insert(descriptor.id, descriptor.clone());
        Ok(PatchLog::new(descriptor.clone(), index))
    }

    fn delete_log(&self, descriptor: &LogDescriptor) -> StoreResult<()> {
        let _lifecycle = self.registry.exclusive_lifecycle();
        let dir = self.verify_on_disk(descriptor)?;
        self.evict(descriptor)?;

        // Move the directory out of the name first so the name is free even
        // if the recursive removal is interrupted.
        let trash = self.root.join(format!(
            "{}{}-{}",
            DELETED_PREFIX,
            descriptor.name,
            Id::new().as_uuid().simple()
        ));
        fs::rename(&dir, &trash)?;
        if let Err(e) = fs::remove_dir_all(&trash) {
            warn!("Failed to remove {:?}: {}", trash, e);
        }

        info!("Deleted patch log {}", descriptor);
        Ok(())
    }

    fn disable_log(&self, descriptor: &LogDescriptor) -> StoreResult<()> {
        let _lifecycle = self.registry.exclusive_lifecycle();
        let dir = self.verify_on_disk(descriptor)?;
        self.evict(descriptor)?;
        metadata::mark_disabled(&dir)?;
        info!("Disabled patch log {}", descriptor);
        Ok(())
    }

    fn shutdown(&self) {
        let _lifecycle = self.registry.exclusive_lifecycle();
        self.tracked.lock().clear();
        let held: Vec<Id> = self.held.lock().drain().collect();
        let mut released = 0;
        for id in &held {
            if let Some(index) = self.registry.unhold(id) {
                index.release();
                released += 1;
            }
        }
        info!(
            "File patch store at {:?} shut down ({} held, {} released)",
            self.root,
            held.len(),
            released
        );
    }
}
