//! Frame-ready event shared by both source variants

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vbridge_video::FrameBuffer;

/// Receives each canonical frame on the thread that produced it
pub type FrameHandler = Box<dyn FnMut(FrameBuffer) + Send + 'static>;

/// Single subscriber slot; emission and (un)subscription are serialized
#[derive(Clone, Default)]
pub struct FrameEmitter {
    handler: Arc<Mutex<Option<FrameHandler>>>,
    emitted: Arc<AtomicU64>,
    unheard: Arc<AtomicU64>,
}

impl FrameEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current handler
    pub fn subscribe(&self, handler: FrameHandler) {
        *self.handler.lock() = Some(handler);
    }

    /// Detach the handler, waiting for an in-flight emission to finish
    ///
    /// Once this returns the old handler will not be called again.
    pub fn unsubscribe(&self) -> bool {
        self.handler.lock().take().is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Hand `frame` to the handler, if any
    pub fn emit(&self, frame: FrameBuffer) -> bool {
        let mut handler = self.handler.lock();
        match handler.as_mut() {
            Some(handler) => {
                handler(frame);
                self.emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.unheard.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Frames produced while nobody was subscribed
    pub fn unheard(&self) -> u64 {
        self.unheard.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::{Duration, Instant};
    use vbridge_video::Bgr8;

    #[test]
    fn test_emit_without_handler() {
        let emitter = FrameEmitter::new();
        assert!(!emitter.emit(FrameBuffer::solid(2, 1, Bgr8::BLACK).unwrap()));
        assert_eq!(emitter.unheard(), 1);
        assert!(!emitter.unsubscribe());
    }

    #[test]
    fn test_unsubscribe_waits_for_in_flight() {
        let emitter = FrameEmitter::new();
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
        emitter.subscribe(Box::new(move |_| {
            e.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            f.store(true, Ordering::SeqCst);
        }));

        let producer = emitter.clone();
        let worker = thread::spawn(move || {
            producer.emit(FrameBuffer::solid(2, 1, Bgr8::BLACK).unwrap());
        });

        let deadline = Instant::now() + Duration::from_secs(1);
        while !entered.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::yield_now();
        }

        assert!(emitter.unsubscribe());
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();

        assert!(!emitter.emit(FrameBuffer::solid(2, 1, Bgr8::BLACK).unwrap()));
        assert_eq!(emitter.emitted(), 1);
    }
}
