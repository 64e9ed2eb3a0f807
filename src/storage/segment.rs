//! Segment store: one directory of immutable, sequentially numbered files.
//!
//! Segment files are named `<basename>.<NNNN>` (zero padded to at least four
//! digits). The head is never persisted separately; it is recomputed from the
//! directory listing whenever a store is attached.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    ops::{Bound, RangeBounds},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    error::{PatchLogError, StoreResult},
    types::Version,
};

use super::header::{check_payload_len, decode_segment, encode_segment};

/// Suffix of a segment file that has not been renamed into place yet.
const TMP_SUFFIX: &str = ".tmp";

#[derive(Clone, Debug)]
pub struct SegmentStoreOptions {
    /// Whether to fsync each segment file and the directory on append
    pub sync_on_write: bool,
    /// Extra attempts for a failed segment write, reusing the same version
    pub write_retries: u32,
}

impl Default for SegmentStoreOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            write_retries: 2,
        }
    }
}

struct SegmentState {
    head: Version,
    // Directory handle used to persist renames. `None` once released.
    dir_handle: Option<File>,
    released: bool,
}

pub struct SegmentStore {
    dir: PathBuf,
    basename: String,
    options: SegmentStoreOptions,
    state: Mutex<SegmentState>,
    #[cfg(test)]
    write_faults: Mutex<std::collections::VecDeque<io::ErrorKind>>,
}

impl SegmentStore {
    /// Initialize an empty store, creating `dir` if needed.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        basename: &str,
        options: SegmentStoreOptions,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let existing = Self::scan(&dir, basename)?;
        if !existing.is_empty() {
            return Err(PatchLogError::AlreadyExists(format!(
                "{} segment file(s) {}.* under {:?}",
                existing.len(),
                basename,
                dir
            )));
        }

        let store = Self::open(dir, basename, options, Version::INIT)?;
        info!("Created segment store {:?} ({})", store.dir, basename);
        Ok(store)
    }

    /// Open an existing store and recover its head from the directory listing.
    pub fn attach<P: AsRef<Path>>(
        dir: P,
        basename: &str,
        options: SegmentStoreOptions,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(PatchLogError::NotFound(format!(
                "segment directory {:?}",
                dir
            )));
        }

        let versions = Self::scan(&dir, basename)?;
        for (offset, version) in versions.iter().enumerate() {
            let expected = Version::new(Version::FIRST.value() + offset as u64);
            if *version != expected {
                error!(
                    "Segment gap under {:?}: found {}.{:04}, expected {:04}",
                    dir,
                    basename,
                    version.value(),
                    expected.value()
                );
                return Err(PatchLogError::corrupt(
                    &dir,
                    format!("segment {} missing (next found is {})", expected, version),
                ));
            }
        }

        let head = versions.last().copied().unwrap_or(Version::INIT);
        let store = Self::open(dir, basename, options, head)?;
        info!(
            "Attached segment store {:?} ({}): head={}",
            store.dir, basename, head
        );
        Ok(store)
    }

    /// True if `dir` holds any segment files for `basename`.
    pub fn has_segments<P: AsRef<Path>>(dir: P, basename: &str) -> StoreResult<bool> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(false);
        }
        Ok(!Self::scan(dir, basename)?.is_empty())
    }

    fn open(
        dir: PathBuf,
        basename: &str,
        options: SegmentStoreOptions,
        head: Version,
    ) -> StoreResult<Self> {
        let dir_handle = File::open(&dir)?;
        Ok(Self {
            dir,
            basename: basename.to_string(),
            options,
            state: Mutex::new(SegmentState {
                head,
                dir_handle: Some(dir_handle),
                released: false,
            }),
            #[cfg(test)]
            write_faults: Mutex::new(std::collections::VecDeque::new()),
        })
    }

    /// List segment versions in ascending order, removing leftovers of
    /// interrupted appends on the way.
    fn scan(dir: &Path, basename: &str) -> StoreResult<Vec<Version>> {
        let mut versions = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(suffix) = name
                .strip_prefix(basename)
                .and_then(|rest| rest.strip_prefix('.'))
            else {
                continue;
            };

            if let Some(number) = suffix.strip_suffix(TMP_SUFFIX) {
                if is_sequence_number(number) {
                    warn!("Removing incomplete segment {:?}", entry.path());
                    if let Err(e) = fs::remove_file(entry.path()) {
                        warn!("Failed to remove {:?}: {}", entry.path(), e);
                    }
                }
                continue;
            }

            if is_sequence_number(suffix) {
                match suffix.parse::<u64>() {
                    Ok(n) => versions.push(Version::new(n)),
                    Err(e) => warn!("Ignoring segment {:?}: {}", entry.path(), e),
                }
            }
        }

        versions.sort();
        Ok(versions)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn head(&self) -> Version {
        self.state.lock().head
    }

    /// File name of the segment holding `version`.
    pub fn segment_name(&self, version: Version) -> String {
        format!("{}.{:04}", self.basename, version.value())
    }

    pub fn segment_path(&self, version: Version) -> PathBuf {
        self.dir.join(self.segment_name(version))
    }

    /// Write `payload` as the next segment and return its version.
    ///
    /// The head only moves after the file is in place under its final name.
    pub fn append(&self, payload: &[u8]) -> StoreResult<Version> {
        check_payload_len(payload.len())?;
        let mut state = self.state.lock();
        if state.released {
            return Err(self.released_error());
        }

        let version = state.head.next();
        let path = self.segment_path(version);
        if path.exists() {
            return Err(PatchLogError::corrupt(
                &path,
                format!("segment already present beyond head {}", state.head),
            ));
        }

        let data = encode_segment(version, payload);
        let mut attempt = 0;
        loop {
            match self.write_segment(&path, &data, state.dir_handle.as_ref()) {
                Ok(()) => break,
                Err(e) if attempt < self.options.write_retries && is_transient(&e) => {
                    attempt += 1;
                    warn!(
                        "Retrying write of {:?} (attempt {}): {}",
                        path, attempt, e
                    );
                }
                Err(e) => {
                    warn!("Failed to write segment {:?}: {}", path, e);
                    return Err(e.into());
                }
            }
        }

        state.head = version;
        debug!("Appended segment {:?} ({} bytes)", path, payload.len());
        Ok(version)
    }

    fn write_segment(&self, path: &Path, data: &[u8], dir_handle: Option<&File>) -> io::Result<()> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(TMP_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);

        let result = (|| -> io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(data)?;
            #[cfg(test)]
            if let Some(kind) = self.write_faults.lock().pop_front() {
                return Err(io::Error::new(kind, "injected write fault"));
            }
            if self.options.sync_on_write {
                file.sync_all()?;
            }
            drop(file);

            fs::rename(&tmp_path, path)?;
            if self.options.sync_on_write {
                if let Some(dir) = dir_handle {
                    dir.sync_all()?;
                }
            }
            Ok(())
        })();

        if result.is_err() && tmp_path.exists() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Read the payload of `version`.
    pub fn read(&self, version: Version) -> StoreResult<Vec<u8>> {
        let head = {
            let state = self.state.lock();
            if state.released {
                return Err(self.released_error());
            }
            state.head
        };

        if version < Version::FIRST || version > head {
            return Err(PatchLogError::VersionNotFound {
                log: self.dir.display().to_string(),
                version,
            });
        }

        let path = self.segment_path(version);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                error!("Segment {:?} missing below head {}", path, head);
                return Err(PatchLogError::corrupt(&path, "segment file missing"));
            }
            Err(e) => return Err(e.into()),
        };

        decode_segment(&path, version, data).inspect_err(|e| {
            error!("Unreadable segment: {}", e);
        })
    }

    /// Iterate `(version, payload)` pairs in ascending order over `range`,
    /// clamped to the versions present when this is called.
    pub fn enumerate<R: RangeBounds<Version>>(&self, range: R) -> SegmentIter<'_> {
        let (start, end) = clamp_range(range, self.head());
        SegmentIter {
            store: self,
            start,
            next: start,
            end,
        }
    }

    /// Give up the directory handle. Data stays on disk. Safe to call twice.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        state.released = true;
        state.dir_handle = None;
        info!("Released segment store {:?}", self.dir);
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Fail the next segment writes with `kinds`, one per attempt.
    #[cfg(test)]
    fn inject_write_faults(&self, kinds: &[io::ErrorKind]) {
        self.write_faults.lock().extend(kinds.iter().copied());
    }

    fn released_error(&self) -> PatchLogError {
        PatchLogError::Released(format!("segment store {:?}", self.dir))
    }
}

/// Lazy iterator over a range of segments. Clone it, or call `restart`, to
/// walk the same range again.
#[derive(Clone)]
pub struct SegmentIter<'a> {
    store: &'a SegmentStore,
    start: u64,
    next: u64,
    end: u64,
}

impl SegmentIter<'_> {
    pub fn restart(&mut self) {
        self.next = self.start;
    }
}

impl Iterator for SegmentIter<'_> {
    type Item = StoreResult<(Version, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let version = Version::new(self.next);
        self.next += 1;
        Some(self.store.read(version).map(|payload| (version, payload)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

/// Inclusive `[start, end]` bounds of `range` within `[FIRST, head]`. An empty
/// result has `start > end`.
pub(crate) fn clamp_range<R: RangeBounds<Version>>(range: R, head: Version) -> (u64, u64) {
    let start = match range.start_bound() {
        Bound::Included(v) => v.value(),
        Bound::Excluded(v) => v.value().saturating_add(1),
        Bound::Unbounded => Version::FIRST.value(),
    }
    .max(Version::FIRST.value());

    let end = match range.end_bound() {
        Bound::Included(v) => v.value(),
        Bound::Excluded(v) => match v.value().checked_sub(1) {
            Some(end) => end,
            None => return (start, 0),
        },
        Bound::Unbounded => head.value(),
    }
    .min(head.value());

    (start, end)
}

fn is_sequence_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
