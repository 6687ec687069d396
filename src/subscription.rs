use crate::device::Device;
use crate::error::{LanLightError, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Registry change delivered to subscribers
#[derive(Clone)]
pub enum DeviceEvent {
    /// A device was seen for the first time and registered
    Found(Arc<dyn Device>),

    /// A known device was seen again and its address/status refreshed
    Updated(Arc<dyn Device>),
}

impl DeviceEvent {
    /// The device this event is about
    pub fn device(&self) -> &Arc<dyn Device> {
        match self {
            DeviceEvent::Found(device) | DeviceEvent::Updated(device) => device,
        }
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Found(d) => f.debug_tuple("Found").field(&d.id()).finish(),
            DeviceEvent::Updated(d) => f.debug_tuple("Updated").field(&d.id()).finish(),
        }
    }
}

/// Receiver for registry events
pub struct DeviceReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl DeviceReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with [`LanLightError::ConnectionClosed`] once the registry is dropped.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => LanLightError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                tracing::warn!("Device event receiver lagged by {} events", n);
                LanLightError::ChannelLagged(n)
            }
        })
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(LanLightError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(LanLightError::ChannelLagged(n)),
        }
    }
}
