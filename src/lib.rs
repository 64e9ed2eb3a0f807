//! Versioned patch-log store.
//!
//! A [`LocalServer`] manages named, append-only patch logs under one storage
//! root. Each log lives in its own directory as a run of numbered segment
//! files; a process-wide [`IdentityRegistry`] guarantees a single in-memory
//! [`LogIndex`] per log no matter how many stores or servers ask for it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use patchlog::{IdentityRegistry, LocalServer};
//!
//! # fn main() -> patchlog::StoreResult<()> {
//! let registry = Arc::new(IdentityRegistry::new());
//! let server = LocalServer::attach_root("./data/patches", registry)?;
//! let id = server.create_log("ABC", "http://example/abc")?;
//! let log = server.connect(id)?;
//! let version = log.append(b"patch bytes")?;
//! assert_eq!(log.read(version)?, b"patch bytes");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod traits;
pub mod types;

pub use config::{LogProvider, ServerConfig};
pub use error::{ErrorHandler, ErrorSeverity, PatchLogError, StoreResult};
pub use server::LocalServer;
pub use storage::{
    FilePatchStore, IdentityRegistry, LogIndex, PatchLog, SegmentStore, SegmentStoreOptions,
};
pub use traits::PatchStore;
pub use types::{Id, LogDescriptor, LogRef, PatchLogInfo, Version};
