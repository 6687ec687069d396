//! Status handling for Broadlink-style smart sockets
//!
//! These sockets report power and night-light state as two bits of a
//! single status byte and are polled with a fixed-size status request.
//! Encryption and checksumming of the unicast transport live behind the
//! [`SocketTransport`] trait.

use crate::error::{LanLightError, Result};

/// Command byte of a status request
pub const STATUS_COMMAND: u8 = 0x6a;

/// Length of the status request payload that follows the command byte
pub const STATUS_PAYLOAD_LEN: usize = 16;

/// Offset of the status byte in a decoded status payload
const STATUS_BYTE_OFFSET: usize = 4;

const POWER_BIT: u8 = 0x01;
const NIGHT_LIGHT_BIT: u8 = 0x02;

/// Combine power and night-light states into a status byte
pub fn merge_on_off_bits(power: bool, night_light: bool) -> u8 {
    let mut bits = 0;
    if power {
        bits |= POWER_BIT;
    }
    if night_light {
        bits |= NIGHT_LIGHT_BIT;
    }
    bits
}

/// Power state encoded in a status byte
pub fn power_on(status: u8) -> bool {
    status & POWER_BIT != 0
}

/// Night-light state encoded in a status byte
pub fn night_light_on(status: u8) -> bool {
    status & NIGHT_LIGHT_BIT != 0
}

/// Extract the status byte from a decoded status payload
pub fn status_byte(payload: &[u8]) -> Result<u8> {
    payload.get(STATUS_BYTE_OFFSET).copied().ok_or_else(|| {
        LanLightError::InvalidResponse(format!(
            "status payload too short: {} bytes",
            payload.len()
        ))
    })
}

pub fn derive_power_state(payload: &[u8]) -> Result<bool> {
    status_byte(payload).map(power_on)
}

pub fn derive_night_light_state(payload: &[u8]) -> Result<bool> {
    status_byte(payload).map(night_light_on)
}

/// Status request: the command byte followed by a payload starting with `0x01`
pub fn status_request() -> [u8; 1 + STATUS_PAYLOAD_LEN] {
    let mut request = [0u8; 1 + STATUS_PAYLOAD_LEN];
    request[0] = STATUS_COMMAND;
    request[1] = 0x01;
    request
}

/// Request/response exchange with one socket
pub trait SocketTransport: Send + Sync {
    fn send_and_receive(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Observer of raw bytes sent to a socket
pub trait NetworkTrafficObserver: Send + Sync {
    fn on_bytes_sent(&self, bytes: &[u8]);
}

/// Power and night-light state of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketState {
    pub power: bool,
    pub night_light: bool,
}

impl SocketState {
    pub fn from_status_byte(status: u8) -> Self {
        Self {
            power: power_on(status),
            night_light: night_light_on(status),
        }
    }

    pub fn to_status_byte(self) -> u8 {
        merge_on_off_bits(self.power, self.night_light)
    }
}

/// Polls a socket for its status
pub struct StatusClient<T> {
    transport: T,
    observer: Option<Box<dyn NetworkTrafficObserver>>,
}

impl<T: SocketTransport> StatusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl NetworkTrafficObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Send a status request and decode the reply
    pub fn request_status(&self) -> Result<SocketState> {
        let request = status_request();
        if let Some(observer) = &self.observer {
            observer.on_bytes_sent(&request);
        }

        let payload = self.transport.send_and_receive(&request)?;
        let state = SocketState::from_status_byte(status_byte(&payload)?);
        tracing::debug!("Socket status: {:?}", state);
        Ok(state)
    }
}
