//! Blocking queue between the audio producer and the audio encoder.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use sr_common::{PtsMicros, SessionClock};

/// Number of sub-chunks a pushed buffer is split into.
///
/// The split sizes each piece for one encoder input buffer. Division
/// is integral; up to `SUB_CHUNKS - 1` trailing bytes of every pushed
/// buffer are dropped.
pub const SUB_CHUNKS: usize = 8;

/// One encoder-sized piece of PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    /// Set on the final chunk of the final buffer.
    pub end_of_stream: bool,
    /// Queue-ingest time. The encoder re-stamps output samples, so
    /// this is informational.
    pub pts: PtsMicros,
}

#[derive(Debug, Default)]
struct Inner {
    chunks: VecDeque<AudioChunk>,
    closed: bool,
}

/// Unbounded blocking FIFO of [`AudioChunk`]s.
///
/// The producer side never blocks; the consumer blocks in
/// [`AudioFrameQueue::dequeue`] until a chunk arrives or the queue is
/// closed.
#[derive(Debug)]
pub struct AudioFrameQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    clock: SessionClock,
}

impl AudioFrameQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: Condvar::new(),
            clock: SessionClock::start(),
        }
    }

    /// Split `data` into [`SUB_CHUNKS`] equal pieces and queue them.
    ///
    /// `end_of_stream` marks only the last piece; the consumer treats
    /// it as the signal to wind down after encoding that piece.
    pub fn enqueue(&self, data: &[u8], end_of_stream: bool) {
        let chunk_size = data.len() / SUB_CHUNKS;
        let pts = self.clock.now_micros();

        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        for i in 0..SUB_CHUNKS {
            let start = i * chunk_size;
            let chunk = AudioChunk {
                data: data[start..start + chunk_size].to_vec(),
                end_of_stream: end_of_stream && i == SUB_CHUNKS - 1,
                pts,
            };
            inner.chunks.push_back(chunk);
        }
        trace!(
            bytes = data.len(),
            chunk_size,
            end_of_stream,
            "audio buffer enqueued"
        );
        drop(inner);
        self.available.notify_all();
    }

    /// Block until a chunk is available. Returns `None` once the queue
    /// is closed and drained.
    pub fn dequeue(&self) -> Option<AudioChunk> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(chunk) = inner.chunks.pop_front() {
                return Some(chunk);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Stop accepting input and wake all blocked consumers. Chunks
    /// already queued remain dequeueable.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }
}

impl Default for AudioFrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn buffer_splits_into_eight_chunks() {
        let queue = AudioFrameQueue::new();
        queue.enqueue(&[7u8; 800], false);
        assert_eq!(queue.len(), SUB_CHUNKS);
        for _ in 0..SUB_CHUNKS {
            let chunk = queue.dequeue().unwrap();
            assert_eq!(chunk.data.len(), 100);
            assert!(!chunk.end_of_stream);
        }
    }

    #[test]
    fn split_truncates_remainder() {
        let queue = AudioFrameQueue::new();
        // 805 bytes: 8 * 100 kept, 5 dropped.
        queue.enqueue(&[1u8; 805], false);
        let total: usize = (0..SUB_CHUNKS)
            .map(|_| queue.dequeue().unwrap().data.len())
            .sum();
        assert_eq!(total, 800);
    }

    #[test]
    fn eos_marks_only_last_chunk() {
        let queue = AudioFrameQueue::new();
        queue.enqueue(&[0u8; 80], true);
        for i in 0..SUB_CHUNKS {
            let chunk = queue.dequeue().unwrap();
            assert_eq!(chunk.end_of_stream, i == SUB_CHUNKS - 1);
        }
    }

    #[test]
    fn tiny_buffer_yields_empty_chunks() {
        let queue = AudioFrameQueue::new();
        queue.enqueue(&[0u8; 5], true);
        assert_eq!(queue.len(), SUB_CHUNKS);
        let mut last = None;
        for _ in 0..SUB_CHUNKS {
            let chunk = queue.dequeue().unwrap();
            assert!(chunk.data.is_empty());
            last = Some(chunk);
        }
        assert!(last.unwrap().end_of_stream);
    }

    #[test]
    fn dequeue_blocks_until_enqueue() {
        let queue = Arc::new(AudioFrameQueue::new());
        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.enqueue(&[9u8; 16], false);
        });
        let chunk = queue.dequeue().unwrap();
        assert_eq!(chunk.data.len(), 2);
        handle.join().unwrap();
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(AudioFrameQueue::new());
        let closer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            closer.close();
        });
        assert!(queue.dequeue().is_none());
        handle.join().unwrap();
    }

    #[test]
    fn close_drains_remaining_chunks_first() {
        let queue = AudioFrameQueue::new();
        queue.enqueue(&[0u8; 16], false);
        queue.close();
        for _ in 0..SUB_CHUNKS {
            assert!(queue.dequeue().is_some());
        }
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn enqueue_after_close_is_dropped() {
        let queue = AudioFrameQueue::new();
        queue.close();
        queue.enqueue(&[0u8; 16], false);
        assert!(queue.is_empty());
    }

    #[test]
    fn chunk_pts_is_monotonic() {
        let queue = AudioFrameQueue::new();
        queue.enqueue(&[0u8; 16], false);
        let first = queue.dequeue().unwrap().pts;
        queue.enqueue(&[0u8; 16], false);
        // Drain remaining chunks of the first buffer.
        for _ in 0..SUB_CHUNKS - 1 {
            queue.dequeue().unwrap();
        }
        let second = queue.dequeue().unwrap().pts;
        assert!(second >= first);
    }
}
