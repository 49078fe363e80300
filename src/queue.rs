//! Bounded frame queue with drop-oldest eviction.
//!
//! A [`FrameQueue`] hands finalized frames from a producer stage to a
//! consumer stage. It never blocks: a full queue evicts its oldest frame to
//! make room, and an empty one returns [`Error::QueueEmpty`]. Consumers
//! learn about new frames through the queue's [`WakeSignal`] and then drain
//! with [`pop`](FrameQueue::pop) until empty, since the signal carries no
//! count.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediabuf::queue::{FrameQueue, QueueConfig};
//!
//! let queue = FrameQueue::new(QueueConfig::new(4).with_name("decoder-out"))?;
//! queue.push(&frame)?;
//!
//! // Consumer, once queue.signal() fires
//! while let Ok(frame) = queue.pop() {
//!     render(&frame);
//! }
//! ```

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameKind};
use crate::memory::defaults::{DEFAULT_QUEUE_CAPACITY, DEFAULT_QUEUE_NAME};
use crate::signal::WakeSignal;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of queued frames (0 = unbounded).
    pub max_frames: usize,
    /// Name used in logs.
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_QUEUE_CAPACITY,
            name: DEFAULT_QUEUE_NAME.to_owned(),
        }
    }
}

impl QueueConfig {
    /// Configuration for a queue of at most `max_frames` frames.
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames,
            ..Default::default()
        }
    }

    /// Set the maximum number of frames (0 = unbounded).
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Set the queue name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames accepted by `push`.
    pub pushed: u64,
    /// Frames removed by `pop`.
    pub popped: u64,
    /// Frames evicted to make room.
    pub dropped: u64,
    /// Frames refused by the filter.
    pub rejected: u64,
}

type Filter<K> = Box<dyn Fn(&Frame<K>) -> bool + Send + Sync>;

struct QueueState<K: FrameKind> {
    frames: VecDeque<Frame<K>>,
    stats: QueueStats,
}

/// Bounded FIFO of frame references.
pub struct FrameQueue<K: FrameKind> {
    config: QueueConfig,
    state: Mutex<QueueState<K>>,
    filter: Option<Filter<K>>,
    signal: WakeSignal,
}

impl<K: FrameKind> FrameQueue<K> {
    /// Create an empty queue.
    pub fn new(config: QueueConfig) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(config.max_frames.min(64)),
                stats: QueueStats::default(),
            }),
            config,
            filter: None,
            signal: WakeSignal::new()?,
        })
    }

    /// Only accept frames for which `filter` returns `true`.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Frame<K>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a reference to `frame`, evicting the oldest entry if full.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFinalized`] if the frame is still being built.
    /// - [`Error::Rejected`] if the filter refuses it.
    /// - A system error if the wake signal cannot be set. The queue is left
    ///   unchanged.
    pub fn push(&self, frame: &Frame<K>) -> Result<()> {
        if !frame.is_finalized() {
            return Err(Error::NotFinalized);
        }
        if let Some(filter) = &self.filter {
            if !filter(frame) {
                self.lock().stats.rejected += 1;
                return Err(Error::Rejected);
            }
        }

        let evicted = {
            let mut state = self.lock();
            // Signal first so a failed wake leaves the queue untouched
            self.signal.signal()?;
            let max = self.config.max_frames;
            let evicted = if max > 0 && state.frames.len() >= max {
                state.stats.dropped += 1;
                state.frames.pop_front()
            } else {
                None
            };
            state.frames.push_back(frame.clone());
            state.stats.pushed += 1;
            evicted
        };
        if evicted.is_some() {
            trace!("queue {}: dropped oldest frame", self.config.name);
        }
        // Evicted frame is released outside the lock.
        drop(evicted);
        Ok(())
    }

    /// The oldest frame, left in place.
    pub fn peek(&self) -> Result<Frame<K>> {
        self.peek_at(0)
    }

    /// The frame at `index` (0 = oldest), left in place.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueEmpty`] if the queue is empty.
    /// - [`Error::IndexOutOfRange`] if `index` is past the last frame.
    pub fn peek_at(&self, index: usize) -> Result<Frame<K>> {
        let state = self.lock();
        if state.frames.is_empty() {
            return Err(Error::QueueEmpty);
        }
        state
            .frames
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: state.frames.len(),
            })
    }

    /// Remove and return the oldest frame.
    ///
    /// Clears the wake signal when the queue becomes empty.
    pub fn pop(&self) -> Result<Frame<K>> {
        let mut state = self.lock();
        let frame = state.frames.pop_front().ok_or(Error::QueueEmpty)?;
        state.stats.popped += 1;
        if state.frames.is_empty() {
            if let Err(e) = self.signal.clear() {
                // Flag is already clear; only the fd drain failed
                warn!("queue {}: failed to drain wake signal: {}", self.config.name, e);
            }
        }
        Ok(frame)
    }

    /// Release every queued frame and clear the wake signal.
    pub fn flush(&self) -> Result<()> {
        let frames = {
            let mut state = self.lock();
            self.signal.clear()?;
            std::mem::take(&mut state.frames)
        };
        drop(frames);
        Ok(())
    }

    /// Number of queued frames.
    pub fn count(&self) -> usize {
        self.lock().frames.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Maximum number of frames (0 = unbounded).
    pub fn max_frames(&self) -> usize {
        self.config.max_frames
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Counters since creation.
    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    /// Wake signal, set while frames are queued.
    pub fn signal(&self) -> &WakeSignal {
        &self.signal
    }
}

impl<K: FrameKind> Drop for FrameQueue<K> {
    fn drop(&mut self) {
        let count = self.count();
        if count > 0 {
            warn!(
                "queue {}: destroying a non-empty queue ({} frames)",
                self.config.name, count
            );
            if let Err(e) = self.flush() {
                warn!("queue {}: flush on destroy failed: {}", self.config.name, e);
            }
        }
    }
}

impl<K: FrameKind> fmt::Debug for FrameQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("name", &self.config.name)
            .field("kind", &K::NAME)
            .field("count", &self.count())
            .field("max_frames", &self.config.max_frames)
            .field("signal", &self.signal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AudioFormat, AudioFrameInfo, SampleFormat};
    use crate::frame::AudioFrame;
    use crate::memory::MemoryChunk;
    use std::time::Duration;

    fn frame(index: u64) -> AudioFrame {
        let mut info = AudioFrameInfo::new(AudioFormat::new(48000, 1, SampleFormat::S16));
        info.index = index;
        let frame = AudioFrame::new(info);
        frame
            .set_buffer(MemoryChunk::new_unpooled(4).unwrap(), 0, 4)
            .unwrap();
        frame.finalize().unwrap();
        frame
    }

    #[test]
    fn test_fifo_and_signal() {
        let queue = FrameQueue::new(QueueConfig::default()).unwrap();
        assert!(!queue.signal().is_signalled());

        queue.push(&frame(1)).unwrap();
        queue.push(&frame(2)).unwrap();
        assert!(queue.signal().is_signalled());
        assert_eq!(queue.count(), 2);

        assert_eq!(queue.pop().unwrap().frame_info().index, 1);
        assert!(queue.signal().is_signalled());
        assert_eq!(queue.pop().unwrap().frame_info().index, 2);
        assert!(!queue.signal().is_signalled());
        assert!(matches!(queue.pop(), Err(Error::QueueEmpty)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_wake_leaves_queue_untouched() {
        let queue = FrameQueue::new(QueueConfig::new(1)).unwrap();
        let kept = frame(2);
        queue.push(&kept).unwrap();
        queue.signal().clear().unwrap();

        // Park the eventfd counter at its ceiling so the next wake write fails
        rustix::io::write(queue.signal(), &(u64::MAX - 1).to_ne_bytes()).unwrap();

        let err = queue.push(&frame(3)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::System);
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.peek().unwrap().frame_info().index, 2);
        assert_eq!(kept.refcount(), 2);
        assert!(!queue.signal().is_signalled());
        let stats = queue.stats();
        assert_eq!((stats.pushed, stats.dropped), (1, 0));

        // Once drained, pushes go through again
        queue.signal().clear().unwrap();
        queue.push(&frame(4)).unwrap();
        assert_eq!(queue.peek().unwrap().frame_info().index, 4);
        assert!(queue.signal().is_signalled());
    }

    #[test]
    fn test_drop_oldest() {
        let queue = FrameQueue::new(QueueConfig::new(1)).unwrap();
        let a = frame(1);
        let b = frame(2);

        queue.push(&a).unwrap();
        assert_eq!(a.refcount(), 2);
        queue.push(&b).unwrap();
        assert_eq!(a.refcount(), 1);
        assert_eq!(queue.count(), 1);
        assert!(queue.peek().unwrap().ptr_eq(&b));
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn test_unfinalized_refused() {
        let queue = FrameQueue::new(QueueConfig::default()).unwrap();
        let building = AudioFrame::new(AudioFrameInfo::default());
        let err = queue.push(&building).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Busy);
        assert_eq!(building.refcount(), 1);
    }

    #[test]
    fn test_filter() {
        let queue = FrameQueue::new(QueueConfig::default())
            .unwrap()
            .with_filter(|f: &AudioFrame| f.frame_info().index % 2 == 0);
        assert!(matches!(queue.push(&frame(1)), Err(Error::Rejected)));
        queue.push(&frame(2)).unwrap();
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[test]
    fn test_peek_at() {
        let queue = FrameQueue::new(QueueConfig::default()).unwrap();
        assert!(matches!(queue.peek(), Err(Error::QueueEmpty)));
        for i in 0..3 {
            queue.push(&frame(i)).unwrap();
        }
        assert_eq!(queue.peek_at(2).unwrap().frame_info().index, 2);
        assert!(matches!(
            queue.peek_at(3),
            Err(Error::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(queue.count(), 3);
    }

    #[test]
    fn test_flush_releases() {
        let queue = FrameQueue::new(QueueConfig::default()).unwrap();
        let a = frame(0);
        queue.push(&a).unwrap();
        queue.push(&a).unwrap();
        assert_eq!(a.refcount(), 3);
        queue.flush().unwrap();
        assert_eq!(a.refcount(), 1);
        assert!(!queue.signal().is_signalled());
    }

    #[test]
    fn test_drop_non_empty_releases() {
        let a = frame(0);
        {
            let queue = FrameQueue::new(QueueConfig::new(2)).unwrap();
            queue.push(&a).unwrap();
        }
        assert_eq!(a.refcount(), 1);
    }

    #[test]
    fn test_producer_consumer_threads() {
        let queue = std::sync::Arc::new(FrameQueue::new(QueueConfig::new(8)).unwrap());
        let producer = {
            let queue = std::sync::Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..200 {
                    queue.push(&frame(i)).unwrap();
                }
            })
        };

        let mut last = None;
        let mut received = 0;
        while received < 200 {
            match queue.pop() {
                Ok(frame) => {
                    let index = frame.frame_info().index;
                    assert!(last.is_none_or(|l| index > l));
                    last = Some(index);
                    received += 1;
                }
                Err(Error::QueueEmpty) if producer.is_finished() => break,
                Err(_) => std::thread::sleep(Duration::from_micros(50)),
            }
        }
        producer.join().unwrap();
        let stats = queue.stats();
        assert_eq!(stats.pushed, 200);
        assert_eq!(stats.popped + stats.dropped + queue.count() as u64, 200);
    }
}
