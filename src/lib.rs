//! Rust library for discovering and controlling smart bulbs on the local network
//!
//! This library finds bulbs that answer the `wifi_bulb` multicast search,
//! keeps a live registry of them and routes actions to the right device. It
//! supports:
//!
//! - Multicast discovery on every non-loopback interface at once
//! - A shared device registry that tells new devices apart from known ones
//! - Listener callbacks and async subscriptions for newly found devices
//! - Typed actions (power, brightness, color, color temperature) and
//!   free-form custom commands
//! - Status helpers for Broadlink-style smart sockets
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lanlight::{Device, DeviceAction, DeviceRegistry, Discovery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = DeviceRegistry::new();
//!     registry.register_listener(Arc::new(|device: Arc<dyn Device>| {
//!         println!("Found {} ({})", device.display_name(), device.id());
//!     }));
//!
//!     // Listen for responses for five seconds
//!     let mut discovery = Discovery::new(registry.clone());
//!     discovery
//!         .start_with_timeout(tokio::time::Duration::from_secs(5))
//!         .await?;
//!     discovery.wait().await;
//!
//!     for device in registry.devices() {
//!         registry.dispatch(device.id(), &DeviceAction::Open { duration: 500 })?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Discovery**: per-interface multicast transports and the session controller
//! - **Protocol**: search request, response parsing and control commands
//! - **Registry**: reconciliation of sightings and action dispatch
//! - **Device**: the capability trait, the factory and the [`Bulb`] implementation
//! - **Connection**: background TCP command channel for each bulb

mod action;
mod connection;
mod device;
mod discovery;
mod error;
mod listener;
mod protocol;
mod registry;
pub mod socket_status;
mod subscription;
mod types;

// Public exports
pub use action::DeviceAction;
pub use device::{Bulb, BulbFactory, Device, DeviceFactory};
pub use discovery::{select_interfaces, usable_interfaces, Discovery, InterfaceTarget};
pub use error::{LanLightError, Result, TransportError};
pub use listener::{DeviceListener, ListenerSet};
pub use protocol::{
    parse_location, parse_response, search_request, Command, Reply, MULTICAST_HOST,
    MULTICAST_PORT, RECEIVE_TIMEOUT, SEARCH_TARGET,
};
pub use registry::{DeviceRegistry, Sighting};
pub use subscription::{DeviceEvent, DeviceReceiver};
pub use types::{
    DeviceId, DeviceInfo, DeviceModel, DeviceStatus, DiscoveryConfig, UnknownModel,
    MIN_RECEIVE_TIMEOUT,
};
