//! Ordered hand-off of filled chunks from the decoder to the player.
//!
//! The decoder pushes, the player shifts. The pipe itself never blocks the
//! producer: its length is bounded by the [`MusicBuffer`](crate::buffer::MusicBuffer)
//! the chunks come from, and waiting for free space happens on the
//! [`DecoderControl`](crate::control::DecoderControl) so that a STOP command
//! can interrupt it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chunk::MusicChunk;

/// Thread-safe FIFO of [`MusicChunk`]s.
///
/// ## Design
/// - One producer (the decode worker) and one consumer (the player).
/// - A single [`Condvar`] signals "a chunk was pushed" to a waiting consumer.
/// - Clearing drops the queued chunks, which returns them to their pool.
pub struct MusicPipe {
    inner: Mutex<VecDeque<MusicChunk>>,
    cv: Condvar,
    max_chunks: usize,
    high_watermark_ms: AtomicU64,
}

impl MusicPipe {
    /// `max_chunks` is the size of the pool feeding this pipe.
    pub fn new(max_chunks: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max_chunks)),
            cv: Condvar::new(),
            max_chunks,
            high_watermark_ms: AtomicU64::new(0),
        }
    }

    /// Queued chunks (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Append a chunk and wake a waiting consumer.
    pub fn push(&self, chunk: MusicChunk) {
        let mut g = self.inner.lock().unwrap();
        debug_assert!(!chunk.is_empty());
        debug_assert!(
            g.back()
                .is_none_or(|last| chunk.audio().is_empty()
                    || last.audio().is_empty()
                    || last.audio_format() == chunk.audio_format())
        );
        g.push_back(chunk);
        let queued = g.len();
        drop(g);
        self.cv.notify_all();
        self.log_high_watermark(queued);
    }

    /// Take the oldest chunk without blocking.
    pub fn shift(&self) -> Option<MusicChunk> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Wait up to `timeout` for a chunk and take it.
    pub fn wait_for_chunk(&self, timeout: Duration) -> Option<MusicChunk> {
        let g = self.inner.lock().unwrap();
        let (mut g, _timeout) = self
            .cv
            .wait_timeout_while(g, timeout, |queue| queue.is_empty())
            .unwrap();
        g.pop_front()
    }

    /// Time stamp of the oldest queued chunk.
    pub fn peek_time(&self) -> Option<f64> {
        self.inner.lock().unwrap().front().map(|chunk| chunk.time)
    }

    /// Drop every queued chunk; returns how many were discarded.
    pub fn clear(&self) -> usize {
        let drained: Vec<MusicChunk> = self.inner.lock().unwrap().drain(..).collect();
        // Dropped outside the lock; each drop hands the storage back to the pool.
        drained.len()
    }

    fn log_high_watermark(&self, queued: usize) {
        if queued < self.max_chunks {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_millis(0))
            .as_millis() as u64;
        let last = self.high_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.high_watermark_ms.store(now, Ordering::Relaxed);
            tracing::debug!(
                queued_chunks = queued,
                max_chunks = self.max_chunks,
                "music pipe full"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MusicBuffer;
    use decoder_types::{AudioFormat, SampleFormat};
    use std::sync::Arc;
    use std::thread;

    fn filled(buffer: &MusicBuffer, time: f64) -> MusicChunk {
        let af = AudioFormat::new(44_100, SampleFormat::S16, 2);
        let mut chunk = buffer.allocate().unwrap();
        let n = chunk.write(af, time, 0).len().min(8);
        chunk.expand(af, n);
        chunk
    }

    #[test]
    fn shift_is_fifo() {
        let buffer = MusicBuffer::new(4, 64);
        let pipe = MusicPipe::new(4);
        pipe.push(filled(&buffer, 0.0));
        pipe.push(filled(&buffer, 1.0));

        assert_eq!(pipe.len(), 2);
        assert_eq!(pipe.peek_time(), Some(0.0));
        assert_eq!(pipe.shift().unwrap().time, 0.0);
        assert_eq!(pipe.shift().unwrap().time, 1.0);
        assert!(pipe.shift().is_none());
    }

    #[test]
    fn clear_returns_chunks_to_pool() {
        let buffer = MusicBuffer::new(3, 64);
        let pipe = MusicPipe::new(3);
        for t in 0..3 {
            pipe.push(filled(&buffer, t as f64));
        }
        assert!(buffer.is_full());

        assert_eq!(pipe.clear(), 3);
        assert!(pipe.is_empty());
        assert_eq!(buffer.in_use(), 0);
    }

    #[test]
    fn wait_for_chunk_returns_when_pushed() {
        let buffer = Arc::new(MusicBuffer::new(2, 64));
        let pipe = Arc::new(MusicPipe::new(2));
        let (tx, rx) = std::sync::mpsc::channel();

        let producer = {
            let buffer = buffer.clone();
            let pipe = pipe.clone();
            thread::spawn(move || {
                let _ = rx.recv();
                pipe.push(filled(&buffer, 0.5));
            })
        };

        let _ = tx.send(());
        let chunk = pipe.wait_for_chunk(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.time, 0.5);
        producer.join().unwrap();
    }

    #[test]
    fn wait_for_chunk_times_out() {
        let pipe = MusicPipe::new(2);
        assert!(pipe.wait_for_chunk(Duration::from_millis(10)).is_none());
    }
}
