use crate::action::DeviceAction;
use crate::connection::{lock, Connection, Endpoint};
use crate::error::Result;
use crate::protocol::Command;
use crate::types::{DeviceId, DeviceInfo, DeviceModel, DeviceStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// One controllable device
///
/// Identity is fixed at construction; network and status fields are
/// updated in place whenever the device is seen again during discovery.
/// Implementations use interior mutability so a device can be shared
/// between discovery tasks and callers as `Arc<dyn Device>`.
pub trait Device: Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> DeviceModel;

    fn name(&self) -> String;
    fn set_name(&self, name: String);

    fn address(&self) -> String;
    fn set_address(&self, address: String);
    fn port(&self) -> u16;
    fn set_port(&self, port: u16);
    fn is_online(&self) -> bool;
    fn set_online(&self, online: bool);

    fn status(&self) -> DeviceStatus;
    fn set_status(&self, status: DeviceStatus);

    // ========== Capabilities ==========
    // Durations are transition times in milliseconds.

    fn open(&self, duration: u32) -> Result<()>;
    fn close(&self, duration: u32) -> Result<()>;
    fn set_brightness(&self, value: u32, duration: u32) -> Result<()>;
    fn set_color(&self, value: u32, duration: u32) -> Result<()>;
    fn set_ct(&self, value: u32, duration: u32) -> Result<()>;
    fn increase_brightness(&self, duration: u32) -> Result<()>;
    fn decrease_brightness(&self, duration: u32) -> Result<()>;
    fn increase_ct(&self, duration: u32) -> Result<()>;
    fn decrease_ct(&self, duration: u32) -> Result<()>;

    /// Send a free-form command; `params` is a comma-separated JSON parameter list
    fn send_custom_command(&self, method: &str, params: &str) -> Result<()>;

    /// Run a typed action against the matching capability
    fn perform(&self, action: &DeviceAction) -> Result<()> {
        match *action {
            DeviceAction::Open { duration } => self.open(duration),
            DeviceAction::Close { duration } => self.close(duration),
            DeviceAction::Brightness { value, duration } => self.set_brightness(value, duration),
            DeviceAction::Color { value, duration } => self.set_color(value, duration),
            DeviceAction::ColorTemperature { value, duration } => self.set_ct(value, duration),
            DeviceAction::IncreaseBrightness { duration } => self.increase_brightness(duration),
            DeviceAction::DecreaseBrightness { duration } => self.decrease_brightness(duration),
            DeviceAction::IncreaseCt { duration } => self.increase_ct(duration),
            DeviceAction::DecreaseCt { duration } => self.decrease_ct(duration),
        }
    }

    /// User-assigned name, or the model's product name when none is set
    fn display_name(&self) -> String {
        let name = self.name();
        if name.is_empty() {
            self.model().default_name().to_string()
        } else {
            name
        }
    }
}

/// Builds devices from discovery attribute maps
pub trait DeviceFactory: Send + Sync {
    /// Construct a device, or `None` when the model is not supported
    ///
    /// Only called with maps that contain both `model` and `id`.
    fn build(&self, info: &DeviceInfo) -> Option<Arc<dyn Device>>;
}

/// Factory producing [`Bulb`]s for every known [`DeviceModel`]
#[derive(Debug, Default, Clone, Copy)]
pub struct BulbFactory;

impl DeviceFactory for BulbFactory {
    fn build(&self, info: &DeviceInfo) -> Option<Arc<dyn Device>> {
        let id = info.get("id")?;
        let model = match info.get("model")?.parse::<DeviceModel>() {
            Ok(model) => model,
            Err(e) => {
                tracing::debug!("{}", e);
                return None;
            }
        };
        Some(Arc::new(Bulb::new(id.clone(), model)))
    }
}

const ADJUST_STEP: i32 = 10;

/// Bulb speaking the JSON-line control protocol
pub struct Bulb {
    id: DeviceId,
    model: DeviceModel,
    name: Mutex<String>,
    endpoint: Arc<Mutex<Endpoint>>,
    status: Mutex<DeviceStatus>,
    next_command_id: AtomicU32,
    connection: Connection,
}

impl Bulb {
    /// Create a bulb; its connection task starts on the current tokio runtime
    pub fn new(id: DeviceId, model: DeviceModel) -> Self {
        let endpoint = Arc::new(Mutex::new(Endpoint::default()));
        let connection = Connection::spawn(id.clone(), endpoint.clone());
        Self {
            id,
            model,
            name: Mutex::new(String::new()),
            endpoint,
            status: Mutex::new(DeviceStatus::default()),
            next_command_id: AtomicU32::new(1),
            connection,
        }
    }

    fn command(&self, method: &str) -> Command {
        Command::new(self.next_command_id.fetch_add(1, Ordering::Relaxed), method)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.connection.send_only(command)
    }
}

impl Device for Bulb {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> DeviceModel {
        self.model
    }

    fn name(&self) -> String {
        lock(&self.name).clone()
    }

    fn set_name(&self, name: String) {
        *lock(&self.name) = name;
    }

    fn address(&self) -> String {
        lock(&self.endpoint).address.clone()
    }

    fn set_address(&self, address: String) {
        lock(&self.endpoint).address = address;
    }

    fn port(&self) -> u16 {
        lock(&self.endpoint).port
    }

    fn set_port(&self, port: u16) {
        lock(&self.endpoint).port = port;
    }

    fn is_online(&self) -> bool {
        lock(&self.endpoint).online
    }

    fn set_online(&self, online: bool) {
        lock(&self.endpoint).online = online;
    }

    fn status(&self) -> DeviceStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: DeviceStatus) {
        *lock(&self.status) = status;
    }

    fn open(&self, duration: u32) -> Result<()> {
        self.send(self.command("set_power").with_param("on").with_transition(duration))
    }

    fn close(&self, duration: u32) -> Result<()> {
        self.send(self.command("set_power").with_param("off").with_transition(duration))
    }

    fn set_brightness(&self, value: u32, duration: u32) -> Result<()> {
        self.send(
            self.command("set_bright")
                .with_param(value.clamp(1, 100))
                .with_transition(duration),
        )
    }

    fn set_color(&self, value: u32, duration: u32) -> Result<()> {
        self.send(
            self.command("set_rgb")
                .with_param(value & 0x00ff_ffff)
                .with_transition(duration),
        )
    }

    fn set_ct(&self, value: u32, duration: u32) -> Result<()> {
        self.send(self.command("set_ct_abx").with_param(value).with_transition(duration))
    }

    fn increase_brightness(&self, duration: u32) -> Result<()> {
        self.send(self.command("adjust_bright").with_param(ADJUST_STEP).with_param(duration))
    }

    fn decrease_brightness(&self, duration: u32) -> Result<()> {
        self.send(self.command("adjust_bright").with_param(-ADJUST_STEP).with_param(duration))
    }

    fn increase_ct(&self, duration: u32) -> Result<()> {
        self.send(self.command("adjust_ct").with_param(ADJUST_STEP).with_param(duration))
    }

    fn decrease_ct(&self, duration: u32) -> Result<()> {
        self.send(self.command("adjust_ct").with_param(-ADJUST_STEP).with_param(duration))
    }

    fn send_custom_command(&self, method: &str, params: &str) -> Result<()> {
        let command = self.command(method).with_raw_params(params)?;
        self.send(command)
    }
}
