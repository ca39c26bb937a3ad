#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OccupyError, OccupyResult};

#[derive(Default)]
struct Chunks {
    held: Vec<Vec<u8>>,
    total: u64,
}

impl Chunks {
    /// Drops chunks newest-first, truncating the one that straddles `bytes`.
    fn release(&mut self, bytes: u64) -> u64 {
        let mut released = 0u64;
        while released < bytes {
            let Some(last) = self.held.last_mut() else { break };
            let len = last.len() as u64;
            let need = bytes - released;
            if len <= need {
                self.held.pop();
                released += len;
            } else {
                // need < len <= chunk size, so this fits in usize
                let keep = usize::try_from(len - need).unwrap_or(last.len());
                last.truncate(keep);
                last.shrink_to_fit();
                released += need;
            }
        }
        self.total -= released;
        self.held.shrink_to_fit();
        released
    }
}

/// Holds committed memory in fixed-size chunks.
///
/// Every chunk is written once after allocation so the OS has to back it
/// with real pages.
pub struct MemoryPool {
    chunk_size: u64,
    chunks: Mutex<Chunks>,
}

impl MemoryPool {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunks: Mutex::new(Chunks::default()),
        }
    }

    /// Adds `bytes` of committed memory. On allocation failure the chunks
    /// already appended by this call are kept.
    pub fn grow(&self, bytes: u64) -> OccupyResult<u64> {
        if bytes == 0 {
            return Ok(0);
        }
        let mut chunks = self.chunks.lock();
        let mut appended = 0u64;
        while appended < bytes {
            let len = (bytes - appended).min(self.chunk_size);
            let chunk = Self::allocate(len).map_err(|source| {
                warn!(requested = bytes, appended, "memory allocation refused");
                OccupyError::Allocation {
                    requested: bytes,
                    appended,
                    source,
                }
            })?;
            debug!(chunk_bytes = len, "allocated memory chunk");
            chunks.held.push(chunk);
            chunks.total += len;
            appended += len;
        }
        info!(
            grown_bytes = appended,
            held_bytes = chunks.total,
            chunks = chunks.held.len(),
            "memory pool grown"
        );
        Ok(appended)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn allocate(len: u64) -> Result<Vec<u8>, std::collections::TryReserveError> {
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let mut chunk = Vec::new();
        chunk.try_reserve_exact(len)?;
        chunk.resize(len, 0u8);
        for (i, b) in chunk.iter_mut().enumerate() {
            *b = i as u8;
        }
        Ok(chunk)
    }

    /// Releases up to `bytes`, most recent chunks first. Returns what was
    /// actually released.
    pub fn shrink(&self, bytes: u64) -> u64 {
        let mut chunks = self.chunks.lock();
        let released = chunks.release(bytes);
        if released > 0 {
            info!(released_bytes = released, held_bytes = chunks.total, "memory pool shrunk");
        }
        released
    }

    /// Releases `ratio` (0.0..=1.0) of what is currently held.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn release_fraction(&self, ratio: f64) -> u64 {
        let mut chunks = self.chunks.lock();
        let bytes = (chunks.total as f64 * ratio.clamp(0.0, 1.0)).round() as u64;
        let released = chunks.release(bytes);
        info!(
            ratio,
            released_bytes = released,
            held_bytes = chunks.total,
            "released share of held memory"
        );
        released
    }

    pub fn release_all(&self) -> u64 {
        let mut chunks = self.chunks.lock();
        let released = chunks.total;
        chunks.held = Vec::new();
        chunks.total = 0;
        if released > 0 {
            info!(released_bytes = released, "memory pool emptied");
        }
        released
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.lock().total
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().held.len()
    }
}
