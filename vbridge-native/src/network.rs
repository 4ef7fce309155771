//! Network video boundary (NDI-style discovery, receive and send)

use crate::error::NativeError;
use crate::frame::{NativeVideoFrame, OutgoingVideoFrame};
use crate::runtime::{NativeRuntime, SharedLibrary};
use std::fmt;
use std::time::Duration;

pub type SharedNetwork = SharedLibrary<dyn NetworkLibrary>;

/// An endpoint as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor {
    pub name: String,
    pub url_address: Option<String>,
}

impl SourceDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_address: None,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url_address {
            Some(url) => write!(f, "{} ({})", self.name, url),
            None => f.write_str(&self.name),
        }
    }
}

/// Outcome of one non-failing capture call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// A video frame was handed to the callback
    Video,
    /// Nothing arrived before the timeout
    Timeout,
    /// Connection metadata changed; no frame
    StatusChange,
}

pub trait NetworkLibrary: NativeRuntime {
    fn create_finder(&self, show_local_sources: bool) -> Result<Box<dyn NetworkFinder>, NativeError>;

    /// Connect to `source`, asking for BGRX/BGRA frames at the highest bandwidth
    fn create_receiver(&self, source: &SourceDescriptor) -> Result<Box<dyn NetworkReceiver>, NativeError>;

    /// Announce a sender under `name`
    fn create_sender(&self, name: &str) -> Result<Box<dyn NetworkSender>, NativeError>;
}

pub trait NetworkFinder: Send {
    /// Block until the source list changes or `timeout` passes
    ///
    /// Returns `true` when the list changed.
    fn wait_for_sources(&mut self, timeout: Duration) -> bool;

    fn current_sources(&mut self) -> Vec<SourceDescriptor>;
}

pub trait NetworkReceiver: Send {
    /// Wait up to `timeout` for the next frame
    ///
    /// The frame is only valid inside `on_frame`; it is released as soon as
    /// the callback returns.
    fn capture_video(
        &mut self,
        timeout: Duration,
        on_frame: &mut dyn FnMut(NativeVideoFrame<'_>),
    ) -> Result<CaptureStatus, NativeError>;
}

pub trait NetworkSender: Send {
    fn send_video(&mut self, frame: &OutgoingVideoFrame<'_>) -> Result<(), NativeError>;
}
