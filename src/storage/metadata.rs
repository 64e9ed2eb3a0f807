//! Per-log metadata record and markers.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{PatchLogError, StoreResult};
use crate::types::LogDescriptor;

/// Metadata record holding the log's identity, name and URI.
pub const SOURCE_CONFIG_FILE: &str = "source.cfg";
/// Marker file that keeps a log on disk but out of service.
pub const DISABLED_MARKER: &str = "disabled";

/// Atomically write the metadata record for `descriptor` into `dir`.
pub fn write_descriptor(dir: &Path, descriptor: &LogDescriptor, sync: bool) -> StoreResult<()> {
    let path = dir.join(SOURCE_CONFIG_FILE);
    let tmp_path = path.with_extension("cfg.tmp");
    let json = serde_json::to_string_pretty(descriptor)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    if sync {
        file.sync_all()?;
    }
    drop(file);

    fs::rename(&tmp_path, &path)?;
    debug!("Wrote metadata record {:?}", path);
    Ok(())
}

/// Read the metadata record in `dir`. `Ok(None)` if there is none.
pub fn read_descriptor(dir: &Path) -> StoreResult<Option<LogDescriptor>> {
    let path = dir.join(SOURCE_CONFIG_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    let descriptor: LogDescriptor = serde_json::from_str(&text)
        .map_err(|e| PatchLogError::corrupt(&path, format!("bad metadata record: {}", e)))?;
    Ok(Some(descriptor))
}

pub fn is_disabled(dir: &Path) -> bool {
    dir.join(DISABLED_MARKER).exists()
}

pub fn mark_disabled(dir: &Path) -> StoreResult<()> {
    fs::write(dir.join(DISABLED_MARKER), b"")?;
    Ok(())
}
