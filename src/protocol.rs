use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{LanLightError, Result};
use crate::types::{DeviceInfo, DiscoveryConfig};

/// SSDP-style multicast group bulbs listen on
pub const MULTICAST_HOST: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Discovery port
pub const MULTICAST_PORT: u16 = 1982;

/// Search target answered by bulbs
pub const SEARCH_TARGET: &str = "wifi_bulb";

/// Default bound on a single discovery receive
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Leading marker of a search request
const SEARCH_REQUEST_MARKER: &str = "M-SEARCH";

/// Build the search request datagram
pub fn search_request(config: &DiscoveryConfig) -> String {
    format!(
        "{} * HTTP/1.1\r\nHOST:{}:{}\r\nMAN:\"ssdp:discover\"\r\nST:{}\r\n",
        SEARCH_REQUEST_MARKER, config.multicast_addr, config.port, config.search_target
    )
}

/// Parse a discovery datagram into an attribute map
///
/// Carriage returns are dropped so CRLF and LF framing parse the same.
/// Each line is split on its first colon and both halves are trimmed;
/// lines without a colon are skipped. Returns `None` for search requests,
/// which is what our own broadcast looks like when it loops back.
pub fn parse_response(bytes: &[u8]) -> Option<DeviceInfo> {
    let stripped: Vec<u8> = bytes.iter().copied().filter(|&b| b != b'\r').collect();
    let text = String::from_utf8_lossy(&stripped);

    if text.starts_with(SEARCH_REQUEST_MARKER) {
        tracing::debug!("Skipping search request echo");
        return None;
    }

    let mut info = DeviceInfo::new();
    for line in text.split('\n') {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        info.insert(key.trim().to_string(), value.trim().to_string());
    }

    Some(info)
}

/// Split a `Location` value of the form `scheme://host:port`
pub fn parse_location(location: &str) -> Result<(String, u16)> {
    let invalid = || LanLightError::InvalidLocation(location.to_string());

    let (_scheme, rest) = location.split_once("://").ok_or_else(invalid)?;
    let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;

    Ok((host.to_string(), port))
}

/// Control command sent to a bulb as one JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    pub method: String,
    pub params: Vec<Value>,
}

impl Command {
    /// Create a command with no parameters
    pub fn new(id: u32, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter
    pub fn with_param(mut self, param: impl Into<Value>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Append the transition effect parameters for a duration in milliseconds
    pub fn with_transition(self, duration: u32) -> Self {
        if duration == 0 {
            self.with_param("sudden").with_param(0)
        } else {
            self.with_param("smooth").with_param(duration)
        }
    }

    /// Replace the parameters with a comma-separated JSON parameter list
    pub fn with_raw_params(mut self, params: &str) -> Result<Self> {
        let wrapped = format!("[{}]", params);
        self.params = serde_json::from_str(&wrapped)
            .map_err(|e| LanLightError::InvalidParams(format!("{}: {}", params, e)))?;
        Ok(self)
    }

    /// Encode as a CRLF-terminated line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push_str("\r\n");
        Ok(line)
    }
}

/// Reply or notification received from a bulb
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Reply {
    /// Whether the bulb rejected the command
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
