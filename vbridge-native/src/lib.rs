//! Native SDK boundary for vbridge
//!
//! Capture cards and network video runtimes are reached through the traits in
//! [`hardware`] and [`network`]. Runtimes are process-wide and reference
//! counted through [`runtime::SharedLibrary`]. Frame memory handed out by a
//! native library is only ever seen as a borrowed [`NativeVideoFrame`].
//!
//! Backends:
//! - [`loopback`]: in-process card and network fabric, always available
//! - `ndi`: the NDI runtime, behind the `ndi-sdk` feature

pub mod error;
pub mod frame;
pub mod hardware;
pub mod loopback;
pub mod network;
pub mod runtime;

#[cfg(feature = "ndi-sdk")]
pub mod ndi;

pub use error::NativeError;
pub use frame::{DeviceFrame, NativeVideoFrame, OutgoingVideoFrame};
pub use hardware::{FrameCallback, HardwareDriver, HardwareInput, HardwareOutput, SharedHardware};
pub use network::{
    CaptureStatus, NetworkFinder, NetworkLibrary, NetworkReceiver, NetworkSender, SharedNetwork,
    SourceDescriptor,
};
pub use runtime::{LibraryLease, NativeRuntime, SharedLibrary};
