//! Network receive source
//!
//! Owns one loop thread per running session. Each iteration blocks in the
//! receiver for at most the configured timeout and copies the library buffer
//! into a canonical frame, which is emitted once the buffer is released. The receiver is moved into the thread
//! and handed back when the thread is joined.

use crate::config::NetworkConfig;
use crate::emitter::FrameEmitter;
use crate::error::{BridgeError, Result};
use crate::events::EventReporter;
use crate::identity::EndpointIdentity;
use crate::session::{DeviceSession, SessionState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use vbridge_native::{
    CaptureStatus, LibraryLease, NativeError, NativeVideoFrame, NetworkLibrary, NetworkReceiver,
    SharedNetwork, SourceDescriptor,
};

/// Receive loop tuning
#[derive(Debug, Clone, Copy)]
pub struct ReceiveSettings {
    pub timeout: Duration,
    pub idle_sleep: Duration,
    pub core: Option<usize>,
}

impl From<&NetworkConfig> for ReceiveSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            timeout: config.receive_timeout(),
            idle_sleep: config.idle_sleep(),
            core: config.receive_thread_core,
        }
    }
}

/// Everything the loop thread needs besides the receiver
#[derive(Clone)]
struct LoopContext {
    name: String,
    settings: ReceiveSettings,
    emitter: FrameEmitter,
    events: EventReporter,
    captured: Arc<AtomicU64>,
}

struct ReceiverHandle {
    /// `None` while the loop thread owns it
    receiver: Option<Box<dyn NetworkReceiver>>,
    thread: Option<JoinHandle<Box<dyn NetworkReceiver>>>,
    running: Arc<AtomicBool>,
    _lease: LibraryLease<dyn NetworkLibrary>,
}

impl ReceiverHandle {
    fn spawn(&mut self, context: LoopContext) -> Result<()> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| BridgeError::Initialization(format!("{}: receiver lost", context.name)))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("vbridge-receive".to_string())
            .spawn(move || receive_loop(receiver, running, context))
            .map_err(|e| BridgeError::Initialization(format!("spawn receive thread: {e}")))?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Signal the loop and wait for it to exit
    fn join(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(receiver) => {
                self.receiver = Some(receiver);
                Ok(())
            }
            Err(_) => Err(BridgeError::Transport("receive thread panicked".into())),
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            log::warn!("{e}");
        }
    }
}

fn receive_loop(
    mut receiver: Box<dyn NetworkReceiver>,
    running: Arc<AtomicBool>,
    context: LoopContext,
) -> Box<dyn NetworkReceiver> {
    let LoopContext {
        name,
        settings,
        emitter,
        events,
        captured,
    } = context;

    if let Some(core) = settings.core {
        if !core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
            log::warn!("could not pin receive thread to core {core}");
        }
    }

    log::info!("receive loop for {} started", name);

    while running.load(Ordering::Acquire) {
        // Converted inside the capture call, emitted after the library
        // buffer has been released
        let mut pending = None;
        let status = receiver.capture_video(settings.timeout, &mut |native: NativeVideoFrame<'_>| {
            pending = Some(native.to_canonical());
        });

        match pending {
            Some(Ok(frame)) => {
                captured.fetch_add(1, Ordering::Relaxed);
                emitter.emit(frame);
            }
            Some(Err(e)) => {
                log::debug!("dropping frame from {name}: {e}");
                events.error(BridgeError::Conversion(e));
            }
            None => {}
        }

        match status {
            Ok(CaptureStatus::Video) => {}
            Ok(CaptureStatus::Timeout) | Ok(CaptureStatus::StatusChange) => {
                thread::sleep(settings.idle_sleep);
            }
            Err(NativeError::UnsupportedFormat(code)) => {
                events.error(BridgeError::Transport(format!(
                    "{name}: unsupported FourCC {code:#010x}"
                )));
                thread::sleep(settings.idle_sleep);
            }
            Err(e) => {
                log::error!("receive from {} failed: {}", name, e);
                events.error(BridgeError::transport(&name, e));
                break;
            }
        }
    }

    log::info!("receive loop for {} exiting", name);
    receiver
}

pub struct NetworkSource {
    identity: EndpointIdentity,
    descriptor: SourceDescriptor,
    network: Arc<SharedNetwork>,
    settings: ReceiveSettings,
    session: DeviceSession<ReceiverHandle>,
    emitter: FrameEmitter,
    events: EventReporter,
    captured: Arc<AtomicU64>,
}

impl NetworkSource {
    pub fn new(
        network: Arc<SharedNetwork>,
        identity: EndpointIdentity,
        settings: ReceiveSettings,
        events: EventReporter,
    ) -> Result<Self> {
        let descriptor = identity.descriptor().ok_or_else(|| {
            BridgeError::Initialization(format!("{identity} is not a network endpoint"))
        })?;

        Ok(Self {
            session: DeviceSession::new(format!("receive {}", descriptor.name)),
            identity,
            descriptor,
            network,
            settings,
            emitter: FrameEmitter::new(),
            events,
            captured: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn start(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Uninitialized {
            let (network, descriptor) = (&self.network, &self.descriptor);

            self.session.initialize(|| {
                let lease = network
                    .acquire()
                    .map_err(|e| BridgeError::initialization("network runtime", e))?;
                let receiver = lease
                    .create_receiver(descriptor)
                    .map_err(|e| BridgeError::connection(&descriptor.name, e))?;

                Ok(ReceiverHandle {
                    receiver: Some(receiver),
                    thread: None,
                    running: Arc::new(AtomicBool::new(false)),
                    _lease: lease,
                })
            })?;
        }

        let context = LoopContext {
            name: self.descriptor.name.clone(),
            settings: self.settings,
            emitter: self.emitter.clone(),
            events: self.events.clone(),
            captured: Arc::clone(&self.captured),
        };
        self.session.start(|handle| handle.spawn(context))?;

        log::info!("receiving from {}", self.descriptor);
        Ok(())
    }

    /// Returns once the loop thread has exited
    pub fn stop(&mut self) -> Result<()> {
        self.session.stop(|handle| handle.join())
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn emitter(&self) -> &FrameEmitter {
        &self.emitter
    }

    pub fn frames_captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RouterEvent;
    use vbridge_native::loopback::LoopbackNetwork;
    use vbridge_native::{OutgoingVideoFrame, SharedLibrary};
    use vbridge_video::{bgr_to_bgra, Bgr8, FrameBuffer, FrameRate};

    fn settings() -> ReceiveSettings {
        ReceiveSettings {
            timeout: Duration::from_millis(10),
            idle_sleep: Duration::from_millis(1),
            core: None,
        }
    }

    fn identity(name: &str) -> EndpointIdentity {
        EndpointIdentity::Network {
            name: name.into(),
            address: None,
        }
    }

    #[test]
    fn test_receive_converts_to_canonical() {
        let network = LoopbackNetwork::new();
        let shared = SharedLibrary::<dyn NetworkLibrary>::new(Arc::new(network.clone()));
        let lease = shared.acquire().unwrap();
        let mut sender = lease.create_sender("Camera").unwrap();

        let (events, _rx) = EventReporter::channel(8);
        let mut source = NetworkSource::new(Arc::clone(&shared), identity("Camera"), settings(), events).unwrap();

        let (tx, rx) = crossbeam::channel::unbounded();
        source.emitter().subscribe(Box::new(move |frame| {
            let _ = tx.send(frame);
        }));
        source.start().unwrap();

        let color = Bgr8::new(10, 20, 30);
        let wire = bgr_to_bgra(&FrameBuffer::solid(8, 2, color).unwrap()).unwrap();
        let mut received = None;
        for _ in 0..100 {
            sender
                .send_video(&OutgoingVideoFrame::progressive(&wire, FrameRate::NTSC_60))
                .unwrap();
            if let Ok(frame) = rx.recv_timeout(Duration::from_millis(20)) {
                received = Some(frame);
                break;
            }
        }

        let frame = received.unwrap();
        assert_eq!(frame.bgr_at(7, 1), Some(color));

        source.stop().unwrap();
        assert!(!source.is_running());
        drop(source);
        drop(sender);
        drop(lease);
        assert_eq!(network.live_handles(), 0);
        assert_eq!(shared.users(), 0);
    }

    #[test]
    fn test_library_buffer_released_before_emit() {
        let network = LoopbackNetwork::new();
        let shared = SharedLibrary::<dyn NetworkLibrary>::new(Arc::new(network.clone()));
        let lease = shared.acquire().unwrap();
        let mut sender = lease.create_sender("Camera").unwrap();

        let (events, _rx) = EventReporter::channel(8);
        let mut source = NetworkSource::new(Arc::clone(&shared), identity("Camera"), settings(), events).unwrap();

        // At each emit, every frame captured so far must already be released
        let (tx, rx) = crossbeam::channel::unbounded();
        let fabric = network.clone();
        let mut emitted = 0u64;
        source.emitter().subscribe(Box::new(move |_frame| {
            emitted += 1;
            let _ = tx.send((emitted, fabric.frames_released()));
        }));
        source.start().unwrap();

        let wire = bgr_to_bgra(&FrameBuffer::solid(8, 2, Bgr8::WHITE).unwrap()).unwrap();
        let mut seen = Vec::new();
        for _ in 0..200 {
            sender
                .send_video(&OutgoingVideoFrame::progressive(&wire, FrameRate::NTSC_60))
                .unwrap();
            seen.extend(rx.recv_timeout(Duration::from_millis(10)).ok());
            if seen.len() >= 3 {
                break;
            }
        }
        source.stop().unwrap();

        assert!(seen.len() >= 3);
        for (emitted, released) in seen {
            assert!(released >= emitted, "frame {emitted} emitted with {released} released");
        }
    }

    #[test]
    fn test_unknown_source_is_connection_error() {
        let network = LoopbackNetwork::new();
        let shared = SharedLibrary::<dyn NetworkLibrary>::new(Arc::new(network.clone()));
        let (events, _rx) = EventReporter::channel(8);
        let mut source = NetworkSource::new(Arc::clone(&shared), identity("TestSource"), settings(), events).unwrap();

        let err = source.start().unwrap_err();
        assert!(matches!(err, BridgeError::Connection { ref endpoint, .. } if endpoint == "TestSource"));
        assert_eq!(shared.users(), 0);
        assert_eq!(network.destroy_count(), 1);
    }

    #[test]
    fn test_sender_loss_ends_loop() {
        let network = LoopbackNetwork::new();
        let shared = SharedLibrary::<dyn NetworkLibrary>::new(Arc::new(network.clone()));
        let lease = shared.acquire().unwrap();
        let sender = lease.create_sender("Remote").unwrap();

        let (events, rx) = EventReporter::channel(8);
        let mut source = NetworkSource::new(Arc::clone(&shared), identity("Remote"), settings(), events).unwrap();
        source.start().unwrap();

        drop(sender);
        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(event, RouterEvent::Error(BridgeError::Transport(_))));

        // The session stays running until stopped
        assert!(source.is_running());
        source.stop().unwrap();
    }

    #[test]
    fn test_hardware_identity_rejected() {
        let shared = SharedLibrary::<dyn NetworkLibrary>::new(Arc::new(LoopbackNetwork::new()));
        let (events, _rx) = EventReporter::channel(1);
        let identity = EndpointIdentity::Hardware {
            device_index: 0,
            mode: Default::default(),
        };
        assert!(NetworkSource::new(shared, identity, settings(), events).is_err());
    }
}
