//! Bridge configuration, loaded from TOML

use crate::error::{BridgeError, Result};
use crate::identity::{EndpointSelection, SinkSelection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vbridge_video::{FrameRate, PixelFormat, VideoMode};

/// Name the network sink announces when none is given
pub const DEFAULT_SENDER_NAME: &str = "SDI-NDI Converter";

/// Network source picked when the controller names none
pub const DEFAULT_RECEIVER_NAME: &str = "NDI-SDI Converter Input";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub hardware: HardwareConfig,
    pub network: NetworkConfig,
    pub router: RouterConfig,
}

/// Capture/playback card settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Device used when the controller selects hardware capture
    pub input_device: u32,
    /// Device used when the controller selects hardware playback
    pub output_device: u32,
    /// Fixed for the lifetime of a session
    pub mode: VideoMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub sender_name: String,
    pub default_receiver_name: String,
    /// Attached to every outgoing frame
    pub frame_rate: FrameRate,
    pub discovery_timeout_ms: u64,
    /// Upper bound for one blocking receive call
    pub receive_timeout_ms: u64,
    /// Pause after an iteration that produced no frame
    pub idle_sleep_ms: u64,
    pub show_local_sources: bool,
    /// Pin the receive loop to this CPU core
    pub receive_thread_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Frames buffered per preview subscriber before new ones are dropped
    pub preview_depth: usize,
    /// Events buffered before new ones are dropped
    pub event_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareConfig::default(),
            network: NetworkConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            input_device: 0,
            output_device: 0,
            mode: VideoMode::HD1080P5994,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            sender_name: DEFAULT_SENDER_NAME.into(),
            default_receiver_name: DEFAULT_RECEIVER_NAME.into(),
            frame_rate: FrameRate::NTSC_60,
            discovery_timeout_ms: 5000,
            receive_timeout_ms: 1000,
            idle_sleep_ms: 1,
            show_local_sources: true,
            receive_thread_core: None,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            preview_depth: 1,
            event_depth: 64,
        }
    }
}

impl NetworkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve a source argument against the configured defaults
    ///
    /// `None` and `hw` pick the configured input device, `ndi` the default
    /// receiver name; anything else must be `hw:<n>` or `ndi:<name>`.
    pub fn source_selection(&self, arg: Option<&str>) -> Result<EndpointSelection> {
        match arg {
            None | Some("hw") => Ok(EndpointSelection::Hardware(self.hardware.input_device)),
            Some("ndi") => Ok(EndpointSelection::Network(
                self.network.default_receiver_name.clone(),
            )),
            Some(other) => other.parse(),
        }
    }

    /// Resolve a sink argument against the configured defaults
    ///
    /// `None` bridges to the other kind of endpoint: card capture goes out as
    /// the configured sender, network sources play out on the configured
    /// output device. `none` runs preview only.
    pub fn sink_selection(
        &self,
        arg: Option<&str>,
        source: &EndpointSelection,
    ) -> Result<Option<SinkSelection>> {
        let sender = || SinkSelection::Network(self.network.sender_name.clone());
        let output = || SinkSelection::Hardware(self.hardware.output_device);

        match arg {
            None => Ok(Some(match source {
                EndpointSelection::Hardware(_) => sender(),
                EndpointSelection::Network(_) => output(),
            })),
            Some("none") => Ok(None),
            Some("ndi") => Ok(Some(sender())),
            Some("hw") => Ok(Some(output())),
            Some(other) => other.parse().map(Some),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Reject values no session could run with
    pub fn validate(&self) -> Result<()> {
        let mode = &self.hardware.mode;
        if mode.width == 0 || mode.height == 0 {
            return Err(BridgeError::Config("hardware mode has zero area".into()));
        }
        if mode.format != PixelFormat::Yuy2 {
            return Err(BridgeError::Config(format!(
                "hardware mode format must be YUY2, got {}",
                mode.format
            )));
        }
        if mode.width % 2 != 0 {
            return Err(BridgeError::Config("hardware mode width must be even".into()));
        }
        if mode.frame_rate.num == 0 || mode.frame_rate.den == 0 {
            return Err(BridgeError::Config("hardware frame rate must be non-zero".into()));
        }
        if self.network.frame_rate.num == 0 || self.network.frame_rate.den == 0 {
            return Err(BridgeError::Config("network frame rate must be non-zero".into()));
        }
        if self.network.sender_name.is_empty() || self.network.default_receiver_name.is_empty() {
            return Err(BridgeError::Config("endpoint names must not be empty".into()));
        }
        if self.network.receive_timeout_ms == 0 && self.network.idle_sleep_ms == 0 {
            return Err(BridgeError::Config(
                "receive_timeout_ms and idle_sleep_ms cannot both be 0".into(),
            ));
        }
        if self.router.preview_depth == 0 || self.router.event_depth == 0 {
            return Err(BridgeError::Config("channel depths must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.network.sender_name, "SDI-NDI Converter");
        assert_eq!(config.network.default_receiver_name, "NDI-SDI Converter Input");
        assert_eq!(config.network.frame_rate, FrameRate::new(60000, 1001));
        assert_eq!(config.network.discovery_timeout(), Duration::from_secs(5));
        assert_eq!(config.network.receive_timeout(), Duration::from_secs(1));
        assert_eq!(config.hardware.mode, VideoMode::HD1080P5994);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [network]
            sender_name = "Studio B"
            discovery_timeout_ms = 250
            receive_thread_core = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.network.sender_name, "Studio B");
        assert_eq!(config.network.discovery_timeout_ms, 250);
        assert_eq!(config.network.receive_thread_core, Some(3));
        assert_eq!(config.network.receive_timeout_ms, 1000);
        assert_eq!(config.router.event_depth, 64);
    }

    #[test]
    fn test_roundtrip() {
        let config = BridgeConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = BridgeConfig::from_toml_str("[router]\npreview_depth = 0\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));

        let err = BridgeConfig::from_toml_str("[network]\nidle_sleep_ms = \"soon\"\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_rejects_spinning_receive_loop() {
        let err = BridgeConfig::from_toml_str("[network]\nreceive_timeout_ms = 0\nidle_sleep_ms = 0\n")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));

        // Either one alone still bounds the loop
        assert!(BridgeConfig::from_toml_str("[network]\nreceive_timeout_ms = 0\n").is_ok());
        assert!(BridgeConfig::from_toml_str("[network]\nidle_sleep_ms = 0\n").is_ok());
    }

    #[test]
    fn test_default_selections() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [hardware]
            input_device = 2
            output_device = 3

            [network]
            sender_name = "Truck Out"
            default_receiver_name = "Truck In"
            "#,
        )
        .unwrap();

        let card = config.source_selection(None).unwrap();
        assert_eq!(card, EndpointSelection::Hardware(2));
        assert_eq!(
            config.sink_selection(None, &card).unwrap(),
            Some(SinkSelection::Network("Truck Out".into()))
        );

        let feed = config.source_selection(Some("ndi")).unwrap();
        assert_eq!(feed, EndpointSelection::Network("Truck In".into()));
        assert_eq!(
            config.sink_selection(None, &feed).unwrap(),
            Some(SinkSelection::Hardware(3))
        );

        assert_eq!(config.source_selection(Some("hw")).unwrap(), card);
        assert_eq!(
            config.sink_selection(Some("hw"), &card).unwrap(),
            Some(SinkSelection::Hardware(3))
        );
        assert_eq!(config.sink_selection(Some("none"), &feed).unwrap(), None);
        assert_eq!(
            config.source_selection(Some("ndi:Other")).unwrap(),
            EndpointSelection::Network("Other".into())
        );
        assert!(config.source_selection(Some("sdi")).is_err());
        assert!(config.sink_selection(Some("ndi:"), &card).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load(Path::new("/nonexistent/vbridge.toml")).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
