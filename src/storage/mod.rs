//! Storage layer for patch logs.
//!
//! - `segment`: numbered segment files in one directory
//! - `index`: per-log in-memory index over a segment store
//! - `registry`: process-wide identity to index map
//! - `file_store`: file backend creating, discovering and deleting logs
//! - `metadata`: per-log metadata record and markers

mod file_store;
mod header;
mod index;
mod metadata;
mod patch_log;
mod registry;
mod segment;

use std::sync::Arc;

use crate::config::{LogProvider, ServerConfig};
use crate::error::StoreResult;
use crate::traits::PatchStore;

pub use file_store::{FilePatchStore, PATCH_BASENAME, validate_log_name};
pub use header::{MAX_PAYLOAD_SIZE, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC_NUM, SegmentHeader};
pub use index::LogIndex;
pub use metadata::{DISABLED_MARKER, SOURCE_CONFIG_FILE};
pub use patch_log::PatchLog;
pub use registry::IdentityRegistry;
pub use segment::{SegmentIter, SegmentStore, SegmentStoreOptions};

/// Build the backend selected by `config`.
pub fn create_patch_store(
    config: &ServerConfig,
    registry: Arc<IdentityRegistry>,
) -> StoreResult<Arc<dyn PatchStore>> {
    match config.provider()? {
        LogProvider::File => Ok(Arc::new(FilePatchStore::initialize(config, registry)?)),
    }
}
