//! What the controller selects, and what that resolves to

use crate::error::BridgeError;
use std::fmt;
use std::str::FromStr;
use vbridge_native::SourceDescriptor;
use vbridge_video::VideoMode;

/// Capture endpoint picked by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSelection {
    /// Capture card input by device index
    Hardware(u32),
    /// Announced network source by name
    Network(String),
}

/// Output endpoint picked by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSelection {
    /// Announce a network sender under this name
    Network(String),
    /// Play out on a card output by device index
    Hardware(u32),
}

/// A resolved endpoint, immutable for the session that uses it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointIdentity {
    Hardware { device_index: u32, mode: VideoMode },
    Network { name: String, address: Option<String> },
}

impl EndpointIdentity {
    pub fn name(&self) -> String {
        match self {
            EndpointIdentity::Hardware { device_index, .. } => format!("hw:{device_index}"),
            EndpointIdentity::Network { name, .. } => name.clone(),
        }
    }

    /// The descriptor a network receiver connects with
    pub fn descriptor(&self) -> Option<SourceDescriptor> {
        match self {
            EndpointIdentity::Network { name, address } => Some(SourceDescriptor {
                name: name.clone(),
                url_address: address.clone(),
            }),
            EndpointIdentity::Hardware { .. } => None,
        }
    }
}

impl From<SourceDescriptor> for EndpointIdentity {
    fn from(source: SourceDescriptor) -> Self {
        EndpointIdentity::Network {
            name: source.name,
            address: source.url_address,
        }
    }
}

impl fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointIdentity::Hardware { device_index, mode } => write!(
                f,
                "hw:{} ({}x{} @ {:.2} fps)",
                device_index,
                mode.width,
                mode.height,
                mode.frame_rate.fps()
            ),
            EndpointIdentity::Network {
                name,
                address: Some(address),
            } => write!(f, "ndi:{name} ({address})"),
            EndpointIdentity::Network { name, address: None } => write!(f, "ndi:{name}"),
        }
    }
}

impl fmt::Display for EndpointSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSelection::Hardware(device) => write!(f, "hw:{device}"),
            EndpointSelection::Network(name) => write!(f, "ndi:{name}"),
        }
    }
}

impl fmt::Display for SinkSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkSelection::Network(name) => write!(f, "ndi:{name}"),
            SinkSelection::Hardware(device) => write!(f, "hw:{device}"),
        }
    }
}

enum Endpoint {
    Hardware(u32),
    Network(String),
}

/// Parse `hw:<index>` or `ndi:<name>`
fn parse_endpoint(text: &str) -> Result<Endpoint, BridgeError> {
    let invalid = || BridgeError::Config(format!("expected hw:<index> or ndi:<name>, got {text:?}"));

    let (kind, rest) = text.split_once(':').ok_or_else(invalid)?;
    match kind {
        "hw" => rest.parse().map(Endpoint::Hardware).map_err(|_| invalid()),
        "ndi" if !rest.is_empty() => Ok(Endpoint::Network(rest.to_string())),
        _ => Err(invalid()),
    }
}

impl FromStr for EndpointSelection {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match parse_endpoint(s)? {
            Endpoint::Hardware(device) => EndpointSelection::Hardware(device),
            Endpoint::Network(name) => EndpointSelection::Network(name),
        })
    }
}

impl FromStr for SinkSelection {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match parse_endpoint(s)? {
            Endpoint::Hardware(device) => SinkSelection::Hardware(device),
            Endpoint::Network(name) => SinkSelection::Network(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selections() {
        assert_eq!("hw:1".parse::<EndpointSelection>().unwrap(), EndpointSelection::Hardware(1));
        assert_eq!(
            "ndi:Cam: Left".parse::<EndpointSelection>().unwrap(),
            EndpointSelection::Network("Cam: Left".into())
        );
        assert_eq!(
            "ndi:Out".parse::<SinkSelection>().unwrap(),
            SinkSelection::Network("Out".into())
        );

        assert!("hw:x".parse::<EndpointSelection>().is_err());
        assert!("ndi:".parse::<SinkSelection>().is_err());
        assert!("sdi0".parse::<SinkSelection>().is_err());
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let source = SourceDescriptor {
            name: "Desk".into(),
            url_address: Some("10.0.0.4:5961".into()),
        };
        let identity = EndpointIdentity::from(source.clone());
        assert_eq!(identity.descriptor(), Some(source));
        assert_eq!(identity.to_string(), "ndi:Desk (10.0.0.4:5961)");
    }
}
