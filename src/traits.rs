use crate::config::LogProvider;
use crate::error::StoreResult;
use crate::storage::PatchLog;
use crate::types::LogDescriptor;

/// A storage backend that creates, discovers and deletes patch logs.
///
/// Implementations share an [`IdentityRegistry`](crate::storage::IdentityRegistry)
/// so that every handle for one log, from any store in the process, resolves
/// to the same index.
pub trait PatchStore: Send + Sync {
    fn provider(&self) -> LogProvider;

    /// Descriptors of the logs present in the backend's storage. Does not
    /// build their indexes.
    fn discover_existing(&self) -> StoreResult<Vec<LogDescriptor>>;

    /// Whether backend storage for `name` exists, live or left over.
    fn exists(&self, name: &str) -> bool;

    /// Allocate storage for a brand-new log.
    fn create_log(&self, descriptor: &LogDescriptor) -> StoreResult<PatchLog>;

    /// Handle on an existing log, building its index on first use.
    fn connect(&self, descriptor: &LogDescriptor) -> StoreResult<PatchLog>;

    /// Remove a log and its data.
    fn delete_log(&self, descriptor: &LogDescriptor) -> StoreResult<()>;

    /// Take a log out of service, keeping its data on disk.
    fn disable_log(&self, descriptor: &LogDescriptor) -> StoreResult<()>;

    /// Release everything held for this backend's logs. Data is kept.
    fn shutdown(&self);
}
