use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::frame::EncodedFrame;

/// Destination for frames produced by the capture loop.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: EncodedFrame);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// How concurrent readers of a [`FrameBuffer`] share its frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Every reader sees every retained frame through its own cursor.
    #[default]
    Broadcast,
    /// Readers compete for frames; each frame goes to exactly one reader.
    Shared,
}

struct Slot {
    index: u64,
    frame: Arc<EncodedFrame>,
}

struct Ring {
    slots: VecDeque<Slot>,
    /// Index the next published frame will get. Indices are contiguous.
    next_index: u64,
}

/// Bounded FIFO of recently encoded frames.
///
/// One producer calls [`publish`](Self::publish); at capacity the oldest
/// frame is evicted first. Consumers either dequeue destructively with
/// [`try_take`](Self::try_take) or read through a [`FrameReader`].
pub struct FrameBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
    published: watch::Sender<u64>,
}

impl FrameBuffer {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (published, _) = watch::channel(0);
        Self {
            ring: Mutex::new(Ring {
                slots: VecDeque::with_capacity(capacity),
                next_index: 0,
            }),
            capacity,
            published,
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, frame: EncodedFrame) {
        let next_index = {
            let mut ring = self.ring();
            if ring.slots.len() >= self.capacity {
                if let Some(evicted) = ring.slots.pop_front() {
                    debug!(seq = evicted.frame.seq, "frame buffer full, evicted oldest frame");
                }
            }
            let index = ring.next_index;
            ring.slots.push_back(Slot {
                index,
                frame: Arc::new(frame),
            });
            ring.next_index += 1;
            ring.next_index
        };
        self.published.send_replace(next_index);
    }

    /// Removes and returns the oldest frame, if any.
    pub fn try_take(&self) -> Option<Arc<EncodedFrame>> {
        self.ring().slots.pop_front().map(|slot| slot.frame)
    }

    pub fn size(&self) -> usize {
        self.ring().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reader(self: &Arc<Self>, mode: DeliveryMode, poll_interval: Duration) -> FrameReader {
        let published = self.published.subscribe();
        let cursor = match mode {
            DeliveryMode::Shared => None,
            DeliveryMode::Broadcast => {
                let ring = self.ring();
                Some(ring.slots.back().map_or(ring.next_index, |slot| slot.index))
            }
        };
        FrameReader {
            buffer: Arc::clone(self),
            cursor,
            published,
            poll_interval,
            skipped: 0,
        }
    }

    /// Oldest retained frame at or after `*next`, advancing `*next` past it.
    /// Also returns how many frames between `*next` and that frame were evicted.
    fn read_from(&self, next: &mut u64) -> Option<(Arc<EncodedFrame>, u64)> {
        let ring = self.ring();
        let front = ring.slots.front()?.index;
        let skipped = front.saturating_sub(*next);
        let start = (*next).max(front);
        let slot = ring.slots.get((start - front) as usize)?;
        *next = slot.index + 1;
        Some((Arc::clone(&slot.frame), skipped))
    }
}

impl FrameSink for FrameBuffer {
    fn publish(&self, frame: EncodedFrame) {
        FrameBuffer::publish(self, frame);
    }

    fn name(&self) -> &str {
        "frame-buffer"
    }
}

/// A consumer handle on a [`FrameBuffer`].
pub struct FrameReader {
    buffer: Arc<FrameBuffer>,
    /// `None` in shared mode.
    cursor: Option<u64>,
    published: watch::Receiver<u64>,
    poll_interval: Duration,
    skipped: u64,
}

impl FrameReader {
    pub fn mode(&self) -> DeliveryMode {
        match self.cursor {
            Some(_) => DeliveryMode::Broadcast,
            None => DeliveryMode::Shared,
        }
    }

    /// Frames this reader never saw because they were evicted first.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn try_next(&mut self) -> Option<Arc<EncodedFrame>> {
        match &mut self.cursor {
            None => self.buffer.try_take(),
            Some(next) => {
                let (frame, skipped) = self.buffer.read_from(next)?;
                if skipped > 0 {
                    self.skipped += skipped;
                    debug!(skipped, "reader fell behind, skipped evicted frames");
                }
                Some(frame)
            }
        }
    }

    /// Waits for the next frame. Wakes on every publish and at least once
    /// per poll interval. Cancel-safe.
    pub async fn next(&mut self) -> Arc<EncodedFrame> {
        loop {
            if let Some(frame) = self.try_next() {
                return frame;
            }
            match tokio::time::timeout(self.poll_interval, self.published.changed()).await {
                Ok(Ok(())) | Err(_) => {}
                Ok(Err(_)) => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

/// Single-slot holder for the most recent frame.
#[derive(Default)]
pub struct LatestFrameCell {
    slot: RwLock<Option<Arc<EncodedFrame>>>,
}

impl LatestFrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_frame(&self, frame: EncodedFrame) {
        let frame = Arc::new(frame);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn latest(&self) -> Option<Arc<EncodedFrame>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FrameSink for LatestFrameCell {
    fn publish(&self, frame: EncodedFrame) {
        self.update_frame(frame);
    }

    fn name(&self) -> &str {
        "latest-frame"
    }
}
