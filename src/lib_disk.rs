#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OccupyError, OccupyResult};

/// Every padding file starts with this prefix and ends with [`PAD_SUFFIX`].
/// Cleanup relies on it to recognise files from any earlier run.
pub const PAD_PREFIX: &str = "chimp_occupy_pad_";
pub const PAD_SUFFIX: &str = ".dat";

/// Matches exactly `<prefix><millis>_<pid>_<index><suffix>`, the shape
/// [`DiskPadding`] writes. Anything else in the directory is not ours.
pub fn is_padding_file(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix(PAD_PREFIX)
        .and_then(|rest| rest.strip_suffix(PAD_SUFFIX))
    else {
        return false;
    };
    let mut parts = 0;
    for part in stem.split('_') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DiskGrowReport {
    pub files: Vec<PathBuf>,
    pub bytes_written: u64,
    pub failed_files: usize,
}

/// Fills a working directory with padding files and removes them again.
pub struct DiskPadding {
    dir: PathBuf,
    // `<millis>_<pid>`, fixed for the lifetime of the manager
    stamp: String,
    write_chunk: u64,
    file_cap: u64,
    next_index: AtomicU64,
    owned: Mutex<BTreeMap<PathBuf, u64>>,
    // Held for a whole grow and by shrink_all, so a sweep never races a
    // file that is still being written.
    writing: Mutex<()>,
}

impl DiskPadding {
    pub fn new(dir: impl Into<PathBuf>, write_chunk: u64, file_cap: u64) -> Self {
        Self {
            dir: dir.into(),
            stamp: format!(
                "{}_{}",
                chrono::Utc::now().timestamp_millis(),
                std::process::id()
            ),
            write_chunk: write_chunk.max(1),
            file_cap: file_cap.max(1),
            next_index: AtomicU64::new(0),
            owned: Mutex::new(BTreeMap::new()),
            writing: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the `index`-th padding file this manager writes.
    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{PAD_PREFIX}{}_{index}{PAD_SUFFIX}", self.stamp))
    }

    fn next_path(&self) -> PathBuf {
        self.path_for(self.next_index.fetch_add(1, Ordering::Relaxed))
    }

    /// Writes `bytes` of padding split into files of at most the file cap.
    ///
    /// A file that fails to write is removed and skipped; the remaining
    /// files are still attempted. Cancellation removes the file in progress
    /// and returns [`OccupyError::Cancelled`]; files finished before that
    /// stay tracked until [`DiskPadding::shrink_all`].
    pub fn grow(&self, bytes: u64, cancel: &CancellationToken) -> OccupyResult<DiskGrowReport> {
        let mut report = DiskGrowReport::default();
        if bytes == 0 {
            return Ok(report);
        }
        let _writing = self.writing.lock();
        fs::create_dir_all(&self.dir).map_err(|e| OccupyError::io(&self.dir, e))?;

        let mut remaining = bytes;
        while remaining > 0 {
            if cancel.is_cancelled() {
                info!(written = report.bytes_written, "padding interrupted by stop");
                return Err(OccupyError::Cancelled);
            }
            let size = remaining.min(self.file_cap);
            let path = self.next_path();
            match self.write_file(&path, size, cancel) {
                Ok(()) => {
                    self.owned.lock().insert(path.clone(), size);
                    info!(file = %path.display(), bytes = size, "padding file created");
                    report.files.push(path);
                    report.bytes_written += size;
                }
                Err(OccupyError::Cancelled) => {
                    info!(written = report.bytes_written, "padding interrupted by stop");
                    return Err(OccupyError::Cancelled);
                }
                Err(e) => {
                    warn!(error = %e, "padding file failed, continuing");
                    report.failed_files += 1;
                }
            }
            remaining -= size;
        }
        Ok(report)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_file(&self, path: &Path, size: u64, cancel: &CancellationToken) -> OccupyResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| OccupyError::io(path, e))?;
        let chunk = usize::try_from(self.write_chunk.min(size)).unwrap_or(usize::MAX);
        let mut buf = vec![0u8; chunk];
        let mut written = 0u64;
        let outcome = loop {
            if written >= size {
                break file.sync_all().map_err(|e| OccupyError::io(path, e));
            }
            if cancel.is_cancelled() {
                break Err(OccupyError::Cancelled);
            }
            let n = usize::try_from((size - written).min(self.write_chunk)).unwrap_or(chunk);
            for (j, b) in buf[..n].iter_mut().enumerate() {
                *b = (written as usize).wrapping_add(j) as u8;
            }
            if let Err(e) = file.write_all(&buf[..n]) {
                break Err(OccupyError::io(path, e));
            }
            written += n as u64;
        };
        if outcome.is_err() {
            drop(file);
            Self::remove_quietly(path);
        }
        outcome
    }

    fn remove_quietly(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(file = %path.display(), "removed partial padding file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(file = %path.display(), error = %e, "could not remove partial padding file"),
        }
    }

    /// Deletes every padding file this manager created plus any file in the
    /// directory that follows the padding naming pattern. Other files are
    /// left alone.
    pub fn shrink_all(&self) -> OccupyResult<usize> {
        let _writing = self.writing.lock();
        let mut removed = 0usize;

        let tracked = std::mem::take(&mut *self.owned.lock());
        let mut kept = BTreeMap::new();
        for (path, size) in tracked {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "could not remove padding file");
                    kept.insert(path, size);
                }
            }
        }

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.owned.lock().extend(kept);
                return Ok(removed);
            }
            Err(e) => {
                self.owned.lock().extend(kept);
                return Err(OccupyError::io(&self.dir, e));
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_padding_file(name) || kept.contains_key(&entry.path()) {
                continue;
            }
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(file = name, error = %e, "could not remove stray padding file"),
            }
        }
        self.owned.lock().extend(kept);

        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "padding files removed");
        }
        Ok(removed)
    }

    pub fn file_count(&self) -> usize {
        self.owned.lock().len()
    }

    pub fn padded_bytes(&self) -> u64 {
        self.owned.lock().values().sum()
    }
}
