use std::ops::RangeBounds;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::types::{Id, LogDescriptor, PatchLogInfo, Version};

use super::index::LogIndex;
use super::segment::SegmentIter;

/// Handle on one patch log. Cheap to clone; all clones for the same identity
/// share one [`LogIndex`].
#[derive(Clone, Debug)]
pub struct PatchLog {
    descriptor: LogDescriptor,
    index: Arc<LogIndex>,
}

impl PatchLog {
    pub(crate) fn new(descriptor: LogDescriptor, index: Arc<LogIndex>) -> Self {
        Self { descriptor, index }
    }

    pub fn id(&self) -> Id {
        self.descriptor.id
    }

    pub fn descriptor(&self) -> &LogDescriptor {
        &self.descriptor
    }

    pub fn append(&self, payload: &[u8]) -> StoreResult<Version> {
        self.index.append(payload)
    }

    pub fn read(&self, version: Version) -> StoreResult<Vec<u8>> {
        self.index.read(version)
    }

    pub fn enumerate<R: RangeBounds<Version>>(&self, range: R) -> SegmentIter<'_> {
        self.index.enumerate(range)
    }

    pub fn head_version(&self) -> Version {
        self.index.head_version()
    }

    pub fn info(&self) -> PatchLogInfo {
        PatchLogInfo {
            descriptor: self.descriptor.clone(),
            min_version: self.index.min_version(),
            max_version: self.index.head_version(),
        }
    }

    /// True if both handles share the same index.
    pub fn same_index(&self, other: &PatchLog) -> bool {
        Arc::ptr_eq(&self.index, &other.index)
    }
}
