use crate::error::NativeError;
use crate::frame::{NativeVideoFrame, OutgoingVideoFrame};
use crate::loopback::Journal;
use crate::network::{
    CaptureStatus, NetworkFinder, NetworkLibrary, NetworkReceiver, NetworkSender, SourceDescriptor,
};
use crate::runtime::NativeRuntime;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use vbridge_video::PixelFormat;

/// Frames buffered per receiver; the oldest is evicted when full
const RECEIVE_QUEUE_DEPTH: usize = 2;

struct WireFrame {
    width: u32,
    height: u32,
    row_bytes: usize,
    format: PixelFormat,
    timecode: Option<i64>,
    data: Vec<u8>,
}

/// One connected receiver's queue
struct Subscriber {
    tx: Sender<Arc<WireFrame>>,
    /// Second handle on the queue so a full one can shed its oldest frame
    evict: Receiver<Arc<WireFrame>>,
    /// Dead once the receiver is dropped
    alive: Weak<()>,
}

struct Endpoint {
    id: u64,
    name: String,
    subscribers: Vec<Subscriber>,
}

impl Endpoint {
    fn url(&self) -> String {
        format!("loopback://{}", self.id)
    }
}

#[derive(Default)]
struct Registry {
    endpoints: Vec<Endpoint>,
    /// Bumped whenever an endpoint appears or disappears
    generation: u64,
    next_id: u64,
}

struct Fabric {
    registry: Mutex<Registry>,
    changed: Condvar,
    journal: Journal,
    epoch: Instant,

    initialized: AtomicBool,
    fail_initialize: AtomicBool,
    fail_sends: AtomicBool,

    initialize_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    live_handles: AtomicUsize,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_released: AtomicU64,
}

impl Fabric {
    fn ensure_initialized(&self, call: &'static str) -> Result<(), NativeError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NativeError::call(call, "runtime not initialized"))
        }
    }
}

/// Counts one live native handle and journals its lifetime
struct HandleGuard {
    fabric: Arc<Fabric>,
    label: String,
}

impl HandleGuard {
    fn open(fabric: &Arc<Fabric>, label: String) -> Self {
        fabric.live_handles.fetch_add(1, Ordering::SeqCst);
        fabric.journal.record(format!("{label}:create"));
        Self {
            fabric: Arc::clone(fabric),
            label,
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.fabric.live_handles.fetch_sub(1, Ordering::SeqCst);
        self.fabric.journal.record(format!("{}:destroy", self.label));
    }
}

/// In-process network video fabric
#[derive(Clone)]
pub struct LoopbackNetwork {
    fabric: Arc<Fabric>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            fabric: Arc::new(Fabric {
                registry: Mutex::new(Registry::default()),
                changed: Condvar::new(),
                journal,
                epoch: Instant::now(),
                initialized: AtomicBool::new(false),
                fail_initialize: AtomicBool::new(false),
                fail_sends: AtomicBool::new(false),
                initialize_calls: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                live_handles: AtomicUsize::new(0),
                frames_sent: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                frames_released: AtomicU64::new(0),
            }),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.fabric.journal
    }

    /// Make the next initialize calls fail
    pub fn set_fail_initialize(&self, fail: bool) {
        self.fabric.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Make every send fail until cleared
    pub fn set_fail_sends(&self, fail: bool) {
        self.fabric.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.fabric.initialized.load(Ordering::SeqCst)
    }

    pub fn initialize_count(&self) -> usize {
        self.fabric.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.fabric.destroy_calls.load(Ordering::SeqCst)
    }

    /// Finders, receivers and senders currently alive
    pub fn live_handles(&self) -> usize {
        self.fabric.live_handles.load(Ordering::SeqCst)
    }

    /// Frames accepted by any sender
    pub fn frames_sent(&self) -> u64 {
        self.fabric.frames_sent.load(Ordering::Relaxed)
    }

    /// Queued frames evicted by newer ones
    pub fn frames_dropped(&self) -> u64 {
        self.fabric.frames_dropped.load(Ordering::Relaxed)
    }

    /// Received frames handed back to the fabric after capture
    pub fn frames_released(&self) -> u64 {
        self.fabric.frames_released.load(Ordering::SeqCst)
    }

    /// Names currently announced
    pub fn announced(&self) -> Vec<String> {
        self.fabric
            .registry
            .lock()
            .endpoints
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }
}

impl NativeRuntime for LoopbackNetwork {
    fn name(&self) -> &str {
        "loopback network"
    }

    fn initialize(&self) -> Result<(), NativeError> {
        if self.fabric.fail_initialize.load(Ordering::SeqCst) {
            return Err(NativeError::LibraryUnavailable(
                "loopback network initialization disabled".into(),
            ));
        }
        self.fabric.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.fabric.initialized.store(true, Ordering::SeqCst);
        self.fabric.journal.record("network:initialize");
        Ok(())
    }

    fn destroy(&self) {
        self.fabric.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.fabric.initialized.store(false, Ordering::SeqCst);
        self.fabric.journal.record("network:destroy");
    }
}

impl NetworkLibrary for LoopbackNetwork {
    fn create_finder(&self, show_local_sources: bool) -> Result<Box<dyn NetworkFinder>, NativeError> {
        self.fabric.ensure_initialized("find_create")?;

        Ok(Box::new(LoopbackFinder {
            guard: HandleGuard::open(&self.fabric, "finder".into()),
            show_local_sources,
            seen_generation: 0,
        }))
    }

    fn create_receiver(&self, source: &SourceDescriptor) -> Result<Box<dyn NetworkReceiver>, NativeError> {
        self.fabric.ensure_initialized("recv_create")?;

        let (tx, rx) = bounded(RECEIVE_QUEUE_DEPTH);
        let alive = Arc::new(());
        {
            let mut registry = self.fabric.registry.lock();
            let endpoint = registry
                .endpoints
                .iter_mut()
                .find(|e| e.name == source.name)
                .ok_or_else(|| NativeError::EndpointNotFound(source.name.clone()))?;
            endpoint.subscribers.push(Subscriber {
                tx,
                evict: rx.clone(),
                alive: Arc::downgrade(&alive),
            });
        }

        Ok(Box::new(LoopbackReceiver {
            guard: HandleGuard::open(&self.fabric, format!("receiver {}", source.name)),
            source: source.name.clone(),
            frames: rx,
            reported_connection: false,
            _alive: alive,
        }))
    }

    fn create_sender(&self, name: &str) -> Result<Box<dyn NetworkSender>, NativeError> {
        self.fabric.ensure_initialized("send_create")?;

        let id = {
            let mut registry = self.fabric.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.endpoints.push(Endpoint {
                id,
                name: name.to_string(),
                subscribers: Vec::new(),
            });
            registry.generation += 1;
            id
        };
        self.fabric.changed.notify_all();

        Ok(Box::new(LoopbackSender {
            guard: HandleGuard::open(&self.fabric, format!("sender {name}")),
            id,
        }))
    }
}

struct LoopbackFinder {
    guard: HandleGuard,
    show_local_sources: bool,
    seen_generation: u64,
}

impl NetworkFinder for LoopbackFinder {
    fn wait_for_sources(&mut self, timeout: Duration) -> bool {
        let fabric = &self.guard.fabric;
        let deadline = Instant::now() + timeout;
        let mut registry = fabric.registry.lock();

        while registry.generation == self.seen_generation {
            if fabric.changed.wait_until(&mut registry, deadline).timed_out() {
                break;
            }
        }

        let changed = registry.generation != self.seen_generation;
        self.seen_generation = registry.generation;
        changed
    }

    fn current_sources(&mut self) -> Vec<SourceDescriptor> {
        // Every loopback endpoint lives on this machine
        if !self.show_local_sources {
            return Vec::new();
        }

        self.guard
            .fabric
            .registry
            .lock()
            .endpoints
            .iter()
            .map(|e| SourceDescriptor {
                name: e.name.clone(),
                url_address: Some(e.url()),
            })
            .collect()
    }
}

struct LoopbackReceiver {
    guard: HandleGuard,
    source: String,
    frames: Receiver<Arc<WireFrame>>,
    reported_connection: bool,
    _alive: Arc<()>,
}

impl NetworkReceiver for LoopbackReceiver {
    fn capture_video(
        &mut self,
        timeout: Duration,
        on_frame: &mut dyn FnMut(NativeVideoFrame<'_>),
    ) -> Result<CaptureStatus, NativeError> {
        // A fresh connection reports its status once before any video
        if !self.reported_connection {
            self.reported_connection = true;
            return Ok(CaptureStatus::StatusChange);
        }

        match self.frames.recv_timeout(timeout) {
            Ok(frame) => {
                on_frame(NativeVideoFrame {
                    width: frame.width,
                    height: frame.height,
                    row_bytes: frame.row_bytes,
                    format: frame.format,
                    data: &frame.data,
                    timecode: frame.timecode,
                });
                drop(frame);
                self.guard.fabric.frames_released.fetch_add(1, Ordering::SeqCst);
                Ok(CaptureStatus::Video)
            }
            Err(RecvTimeoutError::Timeout) => Ok(CaptureStatus::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(NativeError::call(
                "recv_capture",
                format!("{} stopped announcing", self.source),
            )),
        }
    }
}

struct LoopbackSender {
    guard: HandleGuard,
    id: u64,
}

impl NetworkSender for LoopbackSender {
    fn send_video(&mut self, frame: &OutgoingVideoFrame<'_>) -> Result<(), NativeError> {
        let fabric = &self.guard.fabric;
        if fabric.fail_sends.load(Ordering::SeqCst) {
            return Err(NativeError::call("send_video", "injected send failure"));
        }

        let row = frame.format.min_stride(frame.width);
        let height = frame.height as usize;
        let required = frame.row_bytes * height.saturating_sub(1) + row;
        if frame.row_bytes < row || frame.data.len() < required {
            return Err(NativeError::call(
                "send_video",
                format!("{} bytes cannot hold a {}x{} {} frame", frame.data.len(), frame.width, frame.height, frame.format),
            ));
        }

        let mut data = Vec::with_capacity(row * height);
        for y in 0..height {
            let start = y * frame.row_bytes;
            data.extend_from_slice(&frame.data[start..start + row]);
        }

        let synthesized = fabric.epoch.elapsed().as_nanos() / 100;
        let wire = Arc::new(WireFrame {
            width: frame.width,
            height: frame.height,
            row_bytes: row,
            format: frame.format,
            timecode: frame.timecode.or(Some(synthesized as i64)),
            data,
        });

        let mut registry = fabric.registry.lock();
        if let Some(endpoint) = registry.endpoints.iter_mut().find(|e| e.id == self.id) {
            endpoint.subscribers.retain(|sub| sub.alive.strong_count() > 0);

            for sub in &endpoint.subscribers {
                let Err(TrySendError::Full(wire)) = sub.tx.try_send(Arc::clone(&wire)) else {
                    continue;
                };
                // Latest wins: shed the oldest queued frame to make room
                if sub.evict.try_recv().is_ok() {
                    fabric.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
                if sub.tx.try_send(wire).is_err() {
                    fabric.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        fabric.frames_sent.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

impl Drop for LoopbackSender {
    fn drop(&mut self) {
        let fabric = &self.guard.fabric;
        {
            let mut registry = fabric.registry.lock();
            registry.endpoints.retain(|e| e.id != self.id);
            registry.generation += 1;
        }
        fabric.changed.notify_all();
    }
}
