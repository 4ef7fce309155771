//! Capture sources
//!
//! Both variants funnel into one [`FrameEmitter`], so the router subscribes
//! the same way whether frames come from a driver callback or a receive loop.

mod hardware;
mod network;

pub use hardware::HardwareSource;
pub use network::{NetworkSource, ReceiveSettings};

use crate::emitter::{FrameEmitter, FrameHandler};
use crate::error::Result;
use crate::identity::EndpointIdentity;

/// The active capture endpoint, fixed for the lifetime of one session
pub enum CaptureSource {
    Hardware(HardwareSource),
    Network(NetworkSource),
}

impl CaptureSource {
    pub fn start(&mut self) -> Result<()> {
        match self {
            CaptureSource::Hardware(source) => source.start(),
            CaptureSource::Network(source) => source.start(),
        }
    }

    /// Blocks until no frame can be delivered any more
    pub fn stop(&mut self) -> Result<()> {
        match self {
            CaptureSource::Hardware(source) => source.stop(),
            CaptureSource::Network(source) => source.stop(),
        }
    }

    pub fn subscribe(&self, handler: FrameHandler) {
        self.emitter().subscribe(handler);
    }

    /// Waits for an in-flight frame to finish
    pub fn unsubscribe(&self) {
        self.emitter().unsubscribe();
    }

    pub fn identity(&self) -> &EndpointIdentity {
        match self {
            CaptureSource::Hardware(source) => source.identity(),
            CaptureSource::Network(source) => source.identity(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            CaptureSource::Hardware(source) => source.is_running(),
            CaptureSource::Network(source) => source.is_running(),
        }
    }

    pub fn frames_captured(&self) -> u64 {
        match self {
            CaptureSource::Hardware(source) => source.frames_captured(),
            CaptureSource::Network(source) => source.frames_captured(),
        }
    }

    fn emitter(&self) -> &FrameEmitter {
        match self {
            CaptureSource::Hardware(source) => source.emitter(),
            CaptureSource::Network(source) => source.emitter(),
        }
    }
}
