use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{MULTICAST_HOST, MULTICAST_PORT, RECEIVE_TIMEOUT, SEARCH_TARGET};

/// Device identifier, assigned by the device itself
pub type DeviceId = String;

/// Attribute map parsed from one discovery response
pub type DeviceInfo = BTreeMap<String, String>;

/// Known bulb models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    Mono,
    Color,
    Stripe,
    Ceiling,
    Ceiling1,
    Ceiling3,
    CtBulb,
    Desklamp,
    Bslamp,
}

impl DeviceModel {
    /// The model string as it appears in discovery responses
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceModel::Mono => "mono",
            DeviceModel::Color => "color",
            DeviceModel::Stripe => "stripe",
            DeviceModel::Ceiling => "ceiling",
            DeviceModel::Ceiling1 => "ceiling1",
            DeviceModel::Ceiling3 => "ceiling3",
            DeviceModel::CtBulb => "ct_bulb",
            DeviceModel::Desklamp => "desklamp",
            DeviceModel::Bslamp => "bslamp",
        }
    }

    /// Product name used when a device has no user-assigned name
    pub fn default_name(&self) -> &'static str {
        match self {
            DeviceModel::Ceiling | DeviceModel::Ceiling1 | DeviceModel::Ceiling3 => {
                "Yeelight LED Ceiling"
            }
            DeviceModel::Color => "Yeelight Color LED Bulb",
            DeviceModel::Mono => "Yeelight White LED Bulb",
            DeviceModel::CtBulb => "Yeelight White LED Bulb v2",
            DeviceModel::Stripe => "Yeelight Color LED Stripe",
            DeviceModel::Desklamp => "Yeelight Mi LED Desk Lamp",
            DeviceModel::Bslamp => "",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a model string names no known model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown device model: {0}")]
pub struct UnknownModel(pub String);

impl FromStr for DeviceModel {
    type Err = UnknownModel;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mono" => Ok(DeviceModel::Mono),
            "color" => Ok(DeviceModel::Color),
            "stripe" => Ok(DeviceModel::Stripe),
            "ceiling" => Ok(DeviceModel::Ceiling),
            "ceiling1" => Ok(DeviceModel::Ceiling1),
            "ceiling3" => Ok(DeviceModel::Ceiling3),
            "ct_bulb" => Ok(DeviceModel::CtBulb),
            "desklamp" => Ok(DeviceModel::Desklamp),
            "bslamp" => Ok(DeviceModel::Bslamp),
            other => Err(UnknownModel(other.to_string())),
        }
    }
}

/// Last known light status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Red channel (0-255)
    pub r: u8,
    /// Green channel (0-255)
    pub g: u8,
    /// Blue channel (0-255)
    pub b: u8,

    /// Color temperature in Kelvin (range is model specific)
    pub ct: u32,

    /// Hue (0-359)
    pub hue: u16,

    /// Saturation (0-100)
    pub sat: u8,
}

impl DeviceStatus {
    /// Set the color channels from a packed `0xRRGGBB` value
    pub fn set_rgb(&mut self, rgb: u32) {
        self.r = ((rgb >> 16) & 0xff) as u8;
        self.g = ((rgb >> 8) & 0xff) as u8;
        self.b = (rgb & 0xff) as u8;
    }

    /// Packed `0xRRGGBB` color value
    pub fn rgb(&self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }
}

/// Shortest receive wait a discovery transport will use
pub const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Multicast group the search request is sent to
    pub multicast_addr: Ipv4Addr,

    /// Multicast port, also the local port each transport binds
    pub port: u16,

    /// `ST` header of the search request
    pub search_target: String,

    /// Upper bound of a single receive, and so of shutdown latency
    #[serde(with = "duration_ms", rename = "receive_timeout_ms")]
    pub receive_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_addr: MULTICAST_HOST,
            port: MULTICAST_PORT,
            search_target: SEARCH_TARGET.to_string(),
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }
}

impl DiscoveryConfig {
    /// Set the multicast group and port
    pub fn with_group(mut self, addr: Ipv4Addr, port: u16) -> Self {
        self.multicast_addr = addr;
        self.port = port;
        self
    }

    /// Set the search target
    pub fn with_search_target(mut self, target: impl Into<String>) -> Self {
        self.search_target = target.into();
        self
    }

    /// Set the receive timeout
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Receive timeout as used by transports, never below [`MIN_RECEIVE_TIMEOUT`]
    pub fn receive_wait(&self) -> Duration {
        self.receive_timeout.max(MIN_RECEIVE_TIMEOUT)
    }
}

mod duration_ms {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match u64::deserialize(d)? {
            0 => Err(D::Error::custom("receive_timeout_ms must be greater than zero")),
            ms => Ok(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_round_trips_wire_names() {
        for name in [
            "mono", "color", "stripe", "ceiling", "ceiling1", "ceiling3", "ct_bulb", "desklamp",
            "bslamp",
        ] {
            let model: DeviceModel = name.parse().unwrap();
            assert_eq!(model.as_str(), name);
        }
        let err = "lamp9".parse::<DeviceModel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown device model: lamp9");
    }

    #[test]
    fn test_default_names() {
        assert_eq!(DeviceModel::Ceiling3.default_name(), "Yeelight LED Ceiling");
        assert_eq!(DeviceModel::Mono.default_name(), "Yeelight White LED Bulb");
        assert_eq!(DeviceModel::Bslamp.default_name(), "");
    }

    #[test]
    fn test_status_rgb_unpacks_channels() {
        let mut status = DeviceStatus::default();
        status.set_rgb(16711680);
        assert_eq!((status.r, status.g, status.b), (255, 0, 0));

        status.set_rgb(0x12_34_56);
        assert_eq!((status.r, status.g, status.b), (0x12, 0x34, 0x56));
        assert_eq!(status.rgb(), 0x12_34_56);
    }

    #[test]
    fn test_config_from_json() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{"port": 1983, "receive_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.port, 1983);
        assert_eq!(config.receive_timeout, Duration::from_millis(250));
        assert_eq!(config.multicast_addr, MULTICAST_HOST);
        assert_eq!(config.search_target, "wifi_bulb");
    }

    #[test]
    fn test_zero_receive_timeout_rejected() {
        let err = serde_json::from_str::<DiscoveryConfig>(r#"{"receive_timeout_ms": 0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("receive_timeout_ms"));
    }

    #[test]
    fn test_receive_wait_is_never_zero() {
        let config = DiscoveryConfig::default().with_receive_timeout(Duration::ZERO);
        assert_eq!(config.receive_wait(), MIN_RECEIVE_TIMEOUT);

        let config = DiscoveryConfig::default().with_receive_timeout(Duration::from_secs(2));
        assert_eq!(config.receive_wait(), Duration::from_secs(2));
    }
}
