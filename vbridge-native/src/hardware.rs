//! Capture/playback card boundary
//!
//! Mirrors the shape of a DeckLink-style SDK: a driver that enumerates
//! devices, inputs that push frames into a callback on a driver-owned thread,
//! and outputs that schedule frames against a playback clock. Dropping an
//! input or output disables it and releases the device.

use crate::error::NativeError;
use crate::frame::{DeviceFrame, NativeVideoFrame};
use crate::runtime::{NativeRuntime, SharedLibrary};
use vbridge_video::{PixelFormat, VideoMode};

/// Invoked by the driver once per arrived frame
pub type FrameCallback = Box<dyn FnMut(NativeVideoFrame<'_>) + Send + 'static>;

pub type SharedHardware = SharedLibrary<dyn HardwareDriver>;

pub trait HardwareDriver: NativeRuntime {
    fn device_count(&self) -> u32;

    /// Open and enable video input on `device` in `mode`
    fn open_input(&self, device: u32, mode: &VideoMode) -> Result<Box<dyn HardwareInput>, NativeError>;

    /// Open and enable video output on `device` in `mode`
    fn open_output(&self, device: u32, mode: &VideoMode) -> Result<Box<dyn HardwareOutput>, NativeError>;
}

pub trait HardwareInput: Send {
    /// Replace the frame callback
    fn set_callback(&mut self, callback: FrameCallback) -> Result<(), NativeError>;

    fn start_streams(&mut self) -> Result<(), NativeError>;

    /// Stop delivering frames
    ///
    /// Must not return while the callback is executing, and the callback must
    /// not run again afterwards.
    fn stop_streams(&mut self) -> Result<(), NativeError>;
}

pub trait HardwareOutput: Send {
    fn start_playback(&mut self, start_time: i64, time_scale: i64) -> Result<(), NativeError>;

    fn create_frame(
        &mut self,
        width: u32,
        height: u32,
        row_bytes: usize,
        format: PixelFormat,
    ) -> Result<Box<dyn DeviceFrame>, NativeError>;

    fn schedule_frame(
        &mut self,
        frame: Box<dyn DeviceFrame>,
        display_time: i64,
        duration: i64,
        time_scale: i64,
    ) -> Result<(), NativeError>;

    fn stop_playback(&mut self) -> Result<(), NativeError>;
}
