use thiserror::Error;

/// Result type for lanlight operations
pub type Result<T> = std::result::Result<T, LanLightError>;

/// Errors that can occur when discovering or controlling devices
#[derive(Error, Debug)]
pub enum LanLightError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No device is registered under the given id
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A sighting lacked an attribute needed to update a device
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A sighting attribute could not be parsed as the expected number
    #[error("Invalid value for {field}: {value:?}")]
    InvalidField {
        /// Attribute name
        field: &'static str,
        /// Raw attribute value
        value: String,
    },

    /// The `Location` attribute was not of the form `scheme://host:port`
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// Custom command parameters were not a valid JSON parameter list
    #[error("Invalid command parameters: {0}")]
    InvalidParams(String),

    /// Invalid or unexpected reply from a device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The device connection task or the event channel has gone away
    #[error("Connection closed")]
    ConnectionClosed,

    /// An event receiver fell behind and missed events
    #[error("Channel lagged by {0} messages")]
    ChannelLagged(u64),
}

/// Failures that end a single interface's discovery transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The interface has no IPv4 address to bind the multicast membership to
    #[error("No IPv4 address bound to interface {interface}")]
    NoAddressBound { interface: String },

    /// Socket setup, send or receive failed
    #[error("Socket error on interface {interface}: {source}")]
    Io {
        interface: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Whether this failure is expected and should not be reported at error level
    pub fn is_benign(&self) -> bool {
        matches!(self, TransportError::NoAddressBound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_display() {
        let err = LanLightError::InvalidField {
            field: "ct",
            value: "warm".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid value for ct: \"warm\"");
    }

    #[test]
    fn test_no_address_is_benign() {
        let err = TransportError::NoAddressBound {
            interface: "wlan0".to_string(),
        };
        assert!(err.is_benign());

        let err = TransportError::Io {
            interface: "eth0".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_benign());
        assert!(err.to_string().contains("eth0"));
    }
}
