use thiserror::Error;

/// Failure reported by a native SDK call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("native library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("device {0} is not present")]
    DeviceNotFound(u32),

    #[error("device {0} is already open")]
    DeviceBusy(u32),

    #[error("no endpoint named {0:?} is announcing")]
    EndpointNotFound(String),

    #[error("native frame has unsupported FourCC {0:#010x}")]
    UnsupportedFormat(u32),

    #[error("{call} failed: {reason}")]
    CallFailed { call: &'static str, reason: String },
}

impl NativeError {
    pub fn call(call: &'static str, reason: impl Into<String>) -> Self {
        NativeError::CallFailed {
            call,
            reason: reason.into(),
        }
    }
}
