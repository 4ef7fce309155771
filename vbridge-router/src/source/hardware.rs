//! Capture card input
//!
//! Frames arrive on a driver-owned thread. The callback only copies the
//! native YUY2 buffer into an owned canonical frame and emits it.

use crate::emitter::FrameEmitter;
use crate::error::{BridgeError, Result};
use crate::events::EventReporter;
use crate::identity::EndpointIdentity;
use crate::session::{DeviceSession, SessionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vbridge_native::{
    FrameCallback, HardwareDriver, HardwareInput, LibraryLease, NativeVideoFrame, SharedHardware,
};
use vbridge_video::VideoMode;

struct InputHandle {
    input: Box<dyn HardwareInput>,
    // Released after the input is disabled
    _lease: LibraryLease<dyn HardwareDriver>,
}

pub struct HardwareSource {
    identity: EndpointIdentity,
    device: u32,
    mode: VideoMode,
    driver: Arc<SharedHardware>,
    session: DeviceSession<InputHandle>,
    emitter: FrameEmitter,
    events: EventReporter,
    captured: Arc<AtomicU64>,
}

impl HardwareSource {
    pub fn new(driver: Arc<SharedHardware>, device: u32, mode: VideoMode, events: EventReporter) -> Self {
        Self {
            identity: EndpointIdentity::Hardware {
                device_index: device,
                mode,
            },
            device,
            mode,
            driver,
            session: DeviceSession::new(format!("capture hw:{device}")),
            emitter: FrameEmitter::new(),
            events,
            captured: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Uninitialized {
            let (driver, device, mode) = (&self.driver, self.device, self.mode);
            let callback = self.callback();

            self.session.initialize(|| {
                let lease = driver
                    .acquire()
                    .map_err(|e| BridgeError::initialization("capture driver", e))?;
                let mut input = lease
                    .open_input(device, &mode)
                    .map_err(|e| BridgeError::initialization(&format!("hw:{device} input"), e))?;
                input
                    .set_callback(callback)
                    .map_err(|e| BridgeError::initialization(&format!("hw:{device} callback"), e))?;

                Ok(InputHandle { input, _lease: lease })
            })?;
        }

        let device = self.device;
        self.session.start(|handle| {
            handle
                .input
                .start_streams()
                .map_err(|e| BridgeError::initialization(&format!("hw:{device} streams"), e))
        })?;

        log::info!("capturing from hw:{} ({}x{})", device, self.mode.width, self.mode.height);
        Ok(())
    }

    /// Returns once the driver has stopped calling back
    pub fn stop(&mut self) -> Result<()> {
        let device = self.device;
        self.session.stop(|handle| {
            handle
                .input
                .stop_streams()
                .map_err(|e| BridgeError::transport(&format!("hw:{device} stop"), e))
        })
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

    fn callback(&self) -> FrameCallback {
        let emitter = self.emitter.clone();
        let events = self.events.clone();
        let captured = Arc::clone(&self.captured);

        Box::new(move |native: NativeVideoFrame<'_>| match native.to_canonical() {
            Ok(frame) => {
                captured.fetch_add(1, Ordering::Relaxed);
                emitter.emit(frame);
            }
            Err(e) => {
                log::debug!("dropping capture frame: {e}");
                events.error(BridgeError::Conversion(e));
            }
        })
    }
}
