//! Output sinks

mod hardware;
mod network;

pub use hardware::HardwareSink;
pub use network::NetworkSink;

use crate::error::Result;
use crate::identity::EndpointIdentity;
use vbridge_video::FrameBuffer;

/// The active output endpoint, fixed for the lifetime of one session
pub enum OutputSink {
    Network(NetworkSink),
    Hardware(HardwareSink),
}

impl OutputSink {
    pub fn start(&mut self) -> Result<()> {
        match self {
            OutputSink::Network(sink) => sink.start(),
            OutputSink::Hardware(sink) => sink.start(),
        }
    }

    pub fn stop(&mut self) -> Result<()> {
        match self {
            OutputSink::Network(sink) => sink.stop(),
            OutputSink::Hardware(sink) => sink.stop(),
        }
    }

    /// Convert and hand one canonical frame to the native side
    ///
    /// `frame` is borrowed for the whole call. A failure leaves the sink
    /// running.
    pub fn send(&mut self, frame: &FrameBuffer) -> Result<()> {
        match self {
            OutputSink::Network(sink) => sink.send(frame),
            OutputSink::Hardware(sink) => sink.send(frame),
        }
    }

    pub fn identity(&self) -> &EndpointIdentity {
        match self {
            OutputSink::Network(sink) => sink.identity(),
            OutputSink::Hardware(sink) => sink.identity(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            OutputSink::Network(sink) => sink.is_running(),
            OutputSink::Hardware(sink) => sink.is_running(),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        match self {
            OutputSink::Network(sink) => sink.frames_sent(),
            OutputSink::Hardware(sink) => sink.frames_sent(),
        }
    }
}
