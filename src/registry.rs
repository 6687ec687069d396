use crate::action::DeviceAction;
use crate::connection::lock;
use crate::device::{BulbFactory, Device, DeviceFactory};
use crate::error::{LanLightError, Result};
use crate::listener::{DeviceListener, ListenerSet};
use crate::protocol::parse_location;
use crate::subscription::{DeviceEvent, DeviceReceiver};
use crate::types::{DeviceId, DeviceInfo};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Outcome of ingesting one discovery response
#[derive(Clone)]
pub enum Sighting {
    /// First sighting: the device was registered and listeners notified
    New(Arc<dyn Device>),

    /// The device was already known: address and status were refreshed
    Updated(Arc<dyn Device>),
}

impl Sighting {
    pub fn device(&self) -> &Arc<dyn Device> {
        match self {
            Sighting::New(device) | Sighting::Updated(device) => device,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Sighting::New(_))
    }
}

impl fmt::Debug for Sighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sighting::New(d) => f.debug_tuple("New").field(&d.id()).finish(),
            Sighting::Updated(d) => f.debug_tuple("Updated").field(&d.id()).finish(),
        }
    }
}

struct Inner {
    devices: Mutex<BTreeMap<DeviceId, Arc<dyn Device>>>,
    factory: Box<dyn DeviceFactory>,
    listeners: ListenerSet,
    event_tx: broadcast::Sender<DeviceEvent>,
}

/// Registry of known devices and dispatcher of actions to them
///
/// Cheap to clone; clones share the same devices and listeners. Safe to
/// use from every discovery task and from callers at the same time.
///
/// # Example
///
/// ```no_run
/// use lanlight::{DeviceAction, DeviceRegistry};
///
/// let registry = DeviceRegistry::new();
/// registry.dispatch("0x000000000015243f", &DeviceAction::Open { duration: 500 })?;
/// # Ok::<(), lanlight::LanLightError>(())
/// ```
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<Inner>,
}

impl DeviceRegistry {
    /// Create a registry building [`Bulb`](crate::Bulb)s for discovered devices
    pub fn new() -> Self {
        Self::with_factory(BulbFactory)
    }

    /// Create a registry with a custom device factory
    pub fn with_factory(factory: impl DeviceFactory + 'static) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                devices: Mutex::new(BTreeMap::new()),
                factory: Box::new(factory),
                listeners: ListenerSet::new(),
                event_tx,
            }),
        }
    }

    /// Add a listener for newly found devices; no-op if already registered
    pub fn register_listener(&self, listener: Arc<dyn DeviceListener>) {
        self.inner.listeners.register(listener);
    }

    /// Remove a listener; no-op if not registered
    pub fn unregister_listener(&self, listener: &Arc<dyn DeviceListener>) {
        self.inner.listeners.unregister(listener);
    }

    /// Subscribe to found/updated events
    pub fn subscribe(&self) -> DeviceReceiver {
        DeviceReceiver::new(self.inner.event_tx.subscribe())
    }

    /// Look up a device by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn Device>> {
        lock(&self.inner.devices).get(id).cloned()
    }

    /// Snapshot of all known devices, ordered by id
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        lock(&self.inner.devices).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconcile one parsed discovery response with the registry
    ///
    /// Responses without both `model` and `id`, and unsupported models,
    /// are ignored (`Ok(None)`). A known id has its address, port and status
    /// overwritten and is marked online without notifying listeners; its
    /// name is left alone. A new
    /// id is registered and every listener is notified exactly once.
    ///
    /// Missing or malformed `Location`, `rgb`, `ct`, `hue` or `sat` values
    /// are returned as errors and leave the device untouched.
    pub fn ingest(&self, info: &DeviceInfo) -> Result<Option<Sighting>> {
        let (Some(model), Some(id)) = (info.get("model"), info.get("id")) else {
            tracing::debug!("Ignoring response without model and id: {:?}", info);
            return Ok(None);
        };
        let name = info.get("name").cloned().unwrap_or_default();

        if let Some(existing) = self.get(id) {
            return self.update(existing, info).map(Some);
        }

        let Some(candidate) = self.inner.factory.build(info) else {
            tracing::warn!("Found unsupported device {} (model {})", id, model);
            return Ok(None);
        };
        candidate.set_name(name);
        apply_sighting(candidate.as_ref(), info)?;

        // Another interface may have registered the same id since the lookup
        let registered = {
            let mut devices = lock(&self.inner.devices);
            match devices.entry(candidate.id().to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(candidate.clone());
                    None
                }
                Entry::Occupied(slot) => Some(slot.get().clone()),
            }
        };

        if let Some(existing) = registered {
            return self.update(existing, info).map(Some);
        }

        tracing::info!(
            "Found {} {} at {}:{}",
            candidate.model(),
            candidate.id(),
            candidate.address(),
            candidate.port()
        );

        let failures = self.inner.listeners.notify(&candidate);
        if failures > 0 {
            tracing::warn!("{} listener(s) failed for {}", failures, candidate.id());
        }
        let _ = self.inner.event_tx.send(DeviceEvent::Found(candidate.clone()));

        Ok(Some(Sighting::New(candidate)))
    }

    fn update(&self, device: Arc<dyn Device>, info: &DeviceInfo) -> Result<Sighting> {
        apply_sighting(device.as_ref(), info)?;
        tracing::debug!("Updated {} at {}:{}", device.id(), device.address(), device.port());

        let _ = self.inner.event_tx.send(DeviceEvent::Updated(device.clone()));
        Ok(Sighting::Updated(device))
    }

    /// Run a typed action on a device
    ///
    /// Unknown ids are ignored: devices can disappear between discovery
    /// and use. Errors from the device itself are returned.
    pub fn dispatch(&self, id: &str, action: &DeviceAction) -> Result<()> {
        match self.get(id) {
            Some(device) => {
                tracing::debug!("Dispatching {:?} to {}", action, id);
                device.perform(action)
            }
            None => {
                tracing::debug!("Dropping {:?} for unknown device {}", action, id);
                Ok(())
            }
        }
    }

    /// Send a free-form command to a device that must be known
    pub fn dispatch_custom(&self, id: &str, method: &str, params: &str) -> Result<()> {
        let device = self
            .get(id)
            .ok_or_else(|| LanLightError::DeviceNotFound(id.to_string()))?;
        tracing::debug!("Dispatching custom {}({}) to {}", method, params, id);
        device.send_custom_command(method, params)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_field<T: FromStr>(info: &DeviceInfo, field: &'static str) -> Result<T> {
    let raw = info.get(field).ok_or(LanLightError::MissingField(field))?;
    raw.parse().map_err(|_| LanLightError::InvalidField {
        field,
        value: raw.clone(),
    })
}

/// Copy network location and status from a sighting onto a device
///
/// Everything is parsed before anything is written, so a bad field leaves
/// the device as it was.
fn apply_sighting(device: &dyn Device, info: &DeviceInfo) -> Result<()> {
    let location = info
        .get("Location")
        .ok_or(LanLightError::MissingField("Location"))?;
    let (address, port) = parse_location(location)?;

    let rgb: u32 = parse_field(info, "rgb")?;
    let ct: u32 = parse_field(info, "ct")?;
    let hue: u16 = parse_field(info, "hue")?;
    let sat: u8 = parse_field(info, "sat")?;

    let mut status = device.status();
    status.set_rgb(rgb);
    status.ct = ct;
    status.hue = hue;
    status.sat = sat;

    device.set_address(address);
    device.set_port(port);
    device.set_online(true);
    device.set_status(status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::RecordingFactory;
    use crate::types::DeviceModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(pairs: &[(&str, &str)]) -> DeviceInfo {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn mono_sighting() -> DeviceInfo {
        info(&[
            ("model", "mono"),
            ("id", "abc123"),
            ("Location", "yeelight://192.168.1.5:55443"),
            ("rgb", "16711680"),
            ("ct", "4000"),
            ("hue", "0"),
            ("sat", "100"),
            ("name", ""),
        ])
    }

    fn counting_registry() -> (DeviceRegistry, Arc<AtomicUsize>) {
        let registry = DeviceRegistry::with_factory(RecordingFactory::default());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        registry.register_listener(Arc::new(move |_d: Arc<dyn Device>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (registry, count)
    }

    #[test]
    fn test_new_device_registered_and_notified() {
        let (registry, count) = counting_registry();

        let sighting = registry.ingest(&mono_sighting()).unwrap().unwrap();
        assert!(sighting.is_new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);

        let device = registry.get("abc123").unwrap();
        assert_eq!(device.model(), DeviceModel::Mono);
        assert_eq!(device.address(), "192.168.1.5");
        assert_eq!(device.port(), 55443);
        assert!(device.is_online());
        assert_eq!(device.name(), "");

        let status = device.status();
        assert_eq!((status.r, status.g, status.b), (255, 0, 0));
        assert_eq!(status.ct, 4000);
        assert_eq!(status.hue, 0);
        assert_eq!(status.sat, 100);
    }

    #[test]
    fn test_update_is_idempotent_and_silent() {
        let (registry, count) = counting_registry();
        let sighting = mono_sighting();

        registry.ingest(&sighting).unwrap();
        let first = registry.get("abc123").unwrap().status();

        for _ in 0..2 {
            let outcome = registry.ingest(&sighting).unwrap().unwrap();
            assert!(!outcome.is_new());
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        let device = registry.get("abc123").unwrap();
        assert_eq!(device.status(), first);
        assert_eq!(device.address(), "192.168.1.5");
    }

    #[test]
    fn test_update_overwrites_location_and_status() {
        let (registry, _count) = counting_registry();
        registry.ingest(&mono_sighting()).unwrap();

        let device = registry.get("abc123").unwrap();
        device.set_online(false);

        let mut moved = mono_sighting();
        moved.insert("Location".to_string(), "yeelight://192.168.1.9:55444".to_string());
        moved.insert("rgb".to_string(), "255".to_string());
        moved.insert("ct".to_string(), "2700".to_string());
        moved.insert("name".to_string(), "Desk".to_string());
        registry.ingest(&moved).unwrap();

        assert_eq!(device.address(), "192.168.1.9");
        assert_eq!(device.port(), 55444);
        assert!(device.is_online());
        assert_eq!(device.name(), "");
        let status = device.status();
        assert_eq!((status.r, status.g, status.b), (0, 0, 255));
        assert_eq!(status.ct, 2700);
    }

    #[test]
    fn test_rediscovery_keeps_assigned_name() {
        let (registry, _count) = counting_registry();
        registry.ingest(&mono_sighting()).unwrap();

        let device = registry.get("abc123").unwrap();
        device.set_name("Kitchen".to_string());

        let outcome = registry.ingest(&mono_sighting()).unwrap().unwrap();
        assert!(!outcome.is_new());
        assert_eq!(device.name(), "Kitchen");
        assert_eq!(device.display_name(), "Kitchen");
    }

    #[test]
    fn test_malformed_number_is_reported() {
        let (registry, count) = counting_registry();
        registry.ingest(&mono_sighting()).unwrap();

        let mut bad = mono_sighting();
        bad.insert("ct".to_string(), "warm".to_string());
        bad.insert("Location".to_string(), "yeelight://10.0.0.1:1".to_string());

        let err = registry.ingest(&bad).unwrap_err();
        assert!(matches!(err, LanLightError::InvalidField { field: "ct", .. }));

        // Nothing was half-applied
        let device = registry.get("abc123").unwrap();
        assert_eq!(device.address(), "192.168.1.5");
        assert_eq!(device.status().ct, 4000);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_first_sighting_not_registered() {
        let (registry, count) = counting_registry();
        let mut bad = mono_sighting();
        bad.insert("sat".to_string(), "lots".to_string());

        assert!(registry.ingest(&bad).is_err());
        assert!(registry.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_model_or_id_ignored() {
        let (registry, count) = counting_registry();

        let mut no_id = mono_sighting();
        no_id.remove("id");
        assert!(registry.ingest(&no_id).unwrap().is_none());

        let mut no_model = mono_sighting();
        no_model.remove("model");
        assert!(registry.ingest(&no_model).unwrap().is_none());

        assert!(registry.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsupported_model_ignored() {
        let (registry, count) = counting_registry();
        let mut other = mono_sighting();
        other.insert("model".to_string(), "humidifier".to_string());

        assert!(registry.ingest(&other).unwrap().is_none());
        assert!(registry.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_every_listener_notified_once() {
        let (registry, first) = counting_registry();
        let second = Arc::new(AtomicUsize::new(0));
        let counter = second.clone();
        let listener: Arc<dyn DeviceListener> = Arc::new(move |_d: Arc<dyn Device>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.register_listener(listener.clone());
        registry.register_listener(listener.clone());

        registry.ingest(&mono_sighting()).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        registry.unregister_listener(&listener);
        let mut other = mono_sighting();
        other.insert("id".to_string(), "def456".to_string());
        registry.ingest(&other).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_sightings_register_once() {
        let (registry, count) = counting_registry();
        let sighting = mono_sighting();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    registry.ingest(&sighting).unwrap();
                });
            }
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dispatch_to_unknown_id_is_noop() {
        let (registry, _count) = counting_registry();
        registry
            .dispatch("missing", &DeviceAction::Open { duration: 100 })
            .unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispatch_custom_to_unknown_id_fails() {
        let (registry, _count) = counting_registry();
        let err = registry
            .dispatch_custom("missing", "set_scene", r#""color", 65280, 70"#)
            .unwrap_err();
        assert!(matches!(err, LanLightError::DeviceNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_dispatch_reaches_device() {
        let factory = RecordingFactory::default();
        let registry = DeviceRegistry::with_factory(factory.clone());
        registry.ingest(&mono_sighting()).unwrap();

        registry
            .dispatch("abc123", &DeviceAction::Brightness { value: 50, duration: 200 })
            .unwrap();
        registry.dispatch_custom("abc123", "toggle", "").unwrap();

        let device = factory.built("abc123").unwrap();
        assert_eq!(device.calls(), vec!["set_brightness(50, 200)", "toggle[]"]);
    }

    #[tokio::test]
    async fn test_subscribers_see_found_then_updated() {
        let registry = DeviceRegistry::with_factory(RecordingFactory::default());
        let mut rx = registry.subscribe();

        registry.ingest(&mono_sighting()).unwrap();
        registry.ingest(&mono_sighting()).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), DeviceEvent::Found(d) if d.id() == "abc123"));
        assert!(matches!(rx.recv().await.unwrap(), DeviceEvent::Updated(d) if d.id() == "abc123"));
        assert!(rx.try_recv().unwrap().is_none());
    }
}
