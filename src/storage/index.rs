//! In-memory index of one patch log.
//!
//! The index wraps the log's [`SegmentStore`] and caches the head and the
//! version to segment mapping so reads never rescan the directory. There is at
//! most one `LogIndex` per [`Id`] in a process; see
//! [`IdentityRegistry`](super::IdentityRegistry).

use std::ops::RangeBounds;
use std::path::Path;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info};

use crate::{
    error::{PatchLogError, StoreResult},
    types::{Id, Version},
};

use super::segment::{SegmentIter, SegmentStore, SegmentStoreOptions, clamp_range};

#[derive(Debug)]
struct IndexState {
    head: Version,
    /// segments[i] holds version FIRST + i
    segments: Vec<String>,
}

impl IndexState {
    fn is_valid_version(&self, version: Version) -> bool {
        version >= Version::FIRST && version <= self.head
    }
}

pub struct LogIndex {
    id: Id,
    store: SegmentStore,
    state: RwLock<IndexState>,
    // Serializes appends and excludes deletion while one is running.
    append_lock: Mutex<()>,
}

impl LogIndex {
    /// Build the index for the log stored in `dir`, attaching to existing
    /// segments or initializing an empty store.
    pub fn attach_or_create<P: AsRef<Path>>(
        id: Id,
        dir: P,
        basename: &str,
        options: SegmentStoreOptions,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref();
        let store = if SegmentStore::has_segments(dir, basename)? {
            SegmentStore::attach(dir, basename, options)?
        } else {
            SegmentStore::create(dir, basename, options)?
        };
        Ok(Self::over(id, store))
    }

    /// Build the index for an existing log. Never creates `dir`; fails
    /// `NotFound` if it is gone.
    pub fn attach<P: AsRef<Path>>(
        id: Id,
        dir: P,
        basename: &str,
        options: SegmentStoreOptions,
    ) -> StoreResult<Self> {
        let store = SegmentStore::attach(dir, basename, options)?;
        Ok(Self::over(id, store))
    }

    fn over(id: Id, store: SegmentStore) -> Self {
        let head = store.head();
        let segments = (Version::FIRST.value()..=head.value())
            .map(|v| store.segment_name(Version::new(v)))
            .collect();

        info!("Log index for {} ready: head={}", id, head);

        Self {
            id,
            store,
            state: RwLock::new(IndexState { head, segments }),
            append_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn directory(&self) -> &Path {
        self.store.directory()
    }

    /// Highest version in the log, or [`Version::INIT`] if it is empty.
    pub fn head_version(&self) -> Version {
        self.state.read().head
    }

    /// Lowest version in the log, or [`Version::INIT`] if it is empty.
    pub fn min_version(&self) -> Version {
        if self.head_version().is_init() {
            Version::INIT
        } else {
            Version::FIRST
        }
    }

    /// Segment identifier that holds `version`.
    pub fn version_to_segment(&self, version: Version) -> StoreResult<String> {
        let state = self.state.read();
        if !state.is_valid_version(version) {
            return Err(self.version_not_found(version));
        }
        let offset = (version.value() - Version::FIRST.value()) as usize;
        state
            .segments
            .get(offset)
            .cloned()
            .ok_or_else(|| self.version_not_found(version))
    }

    /// Publish a durably written segment. Head and mapping change together.
    pub fn record_append(&self, version: Version, segment: String) -> StoreResult<()> {
        let mut state = self.state.write();
        if version != state.head.next() {
            error!(
                "Out of order append for {}: got {}, head is {}",
                self.id, version, state.head
            );
            return Err(PatchLogError::corrupt(
                self.store.directory(),
                format!("append of {} after head {}", version, state.head),
            ));
        }
        state.segments.push(segment);
        state.head = version;
        Ok(())
    }

    /// Append `payload` as the next version of this log.
    pub fn append(&self, payload: &[u8]) -> StoreResult<Version> {
        let _guard = self.append_lock.lock();
        let version = self.store.append(payload)?;
        self.record_append(version, self.store.segment_name(version))?;
        debug!("Appended version {} to {}", version, self.id);
        Ok(version)
    }

    pub fn read(&self, version: Version) -> StoreResult<Vec<u8>> {
        self.version_to_segment(version)?;
        self.store.read(version)
    }

    /// Iterate `(version, payload)` pairs over `range` as of the current head.
    pub fn enumerate<R: RangeBounds<Version>>(&self, range: R) -> SegmentIter<'_> {
        let (start, end) = clamp_range(range, self.head_version());
        if start > end {
            return self.store.enumerate(Version::FIRST..Version::FIRST);
        }
        self.store.enumerate(Version::new(start)..=Version::new(end))
    }

    /// Take the append lock without waiting. Fails with `Busy` if an append
    /// is in flight.
    pub fn try_exclusive(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.append_lock
            .try_lock()
            .ok_or(PatchLogError::Busy(self.id))
    }

    pub fn release(&self) {
        self.store.release();
    }

    pub fn is_released(&self) -> bool {
        self.store.is_released()
    }

    fn version_not_found(&self, version: Version) -> PatchLogError {
        PatchLogError::VersionNotFound {
            log: self.id.to_string(),
            version,
        }
    }
}

impl std::fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIndex")
            .field("id", &self.id)
            .field("dir", &self.store.directory())
            .field("head", &self.head_version())
            .finish()
    }
}
