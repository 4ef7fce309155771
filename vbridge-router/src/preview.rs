//! Preview fan-out
//!
//! Subscribers get a bounded channel. Publishing never blocks: a full
//! subscriber misses the frame and a dropped receiver is pruned on the next
//! publish, so the router never keeps a subscriber alive.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vbridge_video::FrameBuffer;

pub struct PreviewHub {
    depth: usize,
    subscribers: Mutex<Vec<Sender<Arc<FrameBuffer>>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl PreviewHub {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            subscribers: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Receiver<Arc<FrameBuffer>> {
        let (tx, rx) = channel::bounded(self.depth);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, frame: &Arc<FrameBuffer>) {
        let mut subscribers = self.subscribers.lock();

        subscribers.retain(|tx| match tx.try_send(Arc::clone(frame)) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbridge_video::Bgr8;

    fn frame() -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::solid(2, 2, Bgr8::WHITE).unwrap())
    }

    #[test]
    fn test_slow_subscriber_drops() {
        let hub = PreviewHub::new(1);
        let rx = hub.subscribe();

        hub.publish(&frame());
        hub.publish(&frame());

        assert_eq!(hub.delivered(), 1);
        assert_eq!(hub.dropped(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let hub = PreviewHub::new(1);
        let kept = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(&frame());
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap().bgr_at(1, 1), Some(Bgr8::WHITE));
    }
}
