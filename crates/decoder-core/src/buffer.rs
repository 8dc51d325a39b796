//! Bounded pool of chunk storage.
//!
//! The pool size is the backpressure limit of the whole pipeline: once every
//! chunk is either queued in the pipe or held by the player, the decoder has
//! to wait until one is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};

use crate::chunk::MusicChunk;

/// Fixed number of fixed-size chunk buffers, allocated lazily.
///
/// Free buffers live in a bounded crossbeam channel; a dropped
/// [`MusicChunk`] sends its storage back, so allocation and release never
/// take a lock.
pub struct MusicBuffer {
    free_tx: Sender<Box<[u8]>>,
    free_rx: Receiver<Box<[u8]>>,
    num_chunks: usize,
    chunk_size: usize,
    allocated: AtomicUsize,
}

impl MusicBuffer {
    pub fn new(num_chunks: usize, chunk_size: usize) -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(num_chunks);
        Self {
            free_tx,
            free_rx,
            num_chunks,
            chunk_size,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Maximum number of chunks in circulation.
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Capacity of every chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunks currently owned by the decoder, the pipe or the player.
    pub fn in_use(&self) -> usize {
        self.allocated
            .load(Ordering::Acquire)
            .saturating_sub(self.free_rx.len())
    }

    pub fn is_full(&self) -> bool {
        self.in_use() >= self.num_chunks
    }

    /// Take an empty chunk, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<MusicChunk> {
        if let Ok(data) = self.free_rx.try_recv() {
            return Some(self.wrap(data));
        }

        let reserved = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.num_chunks).then_some(n + 1)
            })
            .is_ok();
        if reserved {
            return Some(self.wrap(vec![0u8; self.chunk_size].into_boxed_slice()));
        }

        // A chunk may have come back while we were reserving.
        self.free_rx.try_recv().ok().map(|data| self.wrap(data))
    }

    fn wrap(&self, data: Box<[u8]>) -> MusicChunk {
        MusicChunk::new(data, Some(self.free_tx.clone()))
    }
}
