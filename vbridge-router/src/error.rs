use std::time::Duration;
use thiserror::Error;
use vbridge_native::NativeError;
use vbridge_video::ConversionError;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Failure surfaced by the routing core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A native library or device could not be brought up
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// A named endpoint could not be reached or bound
    #[error("cannot connect to {endpoint:?}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Nothing announced within the discovery budget
    #[error("no endpoints announced within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// A native send, receive or schedule call failed
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Error category without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Initialization,
    Connection,
    DiscoveryTimeout,
    Conversion,
    Transport,
    Config,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Initialization(_) => ErrorKind::Initialization,
            BridgeError::Connection { .. } => ErrorKind::Connection,
            BridgeError::DiscoveryTimeout(_) => ErrorKind::DiscoveryTimeout,
            BridgeError::Conversion(_) => ErrorKind::Conversion,
            BridgeError::Transport(_) => ErrorKind::Transport,
            BridgeError::Config(_) => ErrorKind::Config,
        }
    }

    /// Acquiring a runtime or opening a device failed
    pub(crate) fn initialization(context: &str, err: NativeError) -> Self {
        BridgeError::Initialization(format!("{context}: {err}"))
    }

    /// Connecting to or announcing `endpoint` failed
    pub(crate) fn connection(endpoint: &str, err: NativeError) -> Self {
        BridgeError::Connection {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }

    /// A steady-state native call failed
    pub(crate) fn transport(context: &str, err: NativeError) -> Self {
        BridgeError::Transport(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbridge_video::PixelFormat;

    #[test]
    fn test_kind_and_from() {
        let err: BridgeError = ConversionError::Unsupported {
            from: PixelFormat::Yuy2,
            to: PixelFormat::Bgra,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conversion);

        let err = BridgeError::connection("TestSource", NativeError::EndpointNotFound("TestSource".into()));
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("TestSource"));
    }
}
