use crate::device::Device;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// Observer of newly discovered devices
///
/// Called synchronously on whichever discovery task found the device, so
/// implementations must not assume a single calling thread and should
/// return quickly.
pub trait DeviceListener: Send + Sync {
    fn on_device_found(&self, device: Arc<dyn Device>);
}

impl<F> DeviceListener for F
where
    F: Fn(Arc<dyn Device>) + Send + Sync,
{
    fn on_device_found(&self, device: Arc<dyn Device>) {
        self(device)
    }
}

/// Registered listeners, in registration order
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn DeviceListener>>>,
}

fn same_listener(a: &Arc<dyn DeviceListener>, b: &Arc<dyn DeviceListener>) -> bool {
    // Compare data pointers only; vtable pointers are not guaranteed unique
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; registering the same listener twice has no effect
    pub fn register(&self, listener: Arc<dyn DeviceListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a listener; unknown listeners are ignored
    pub fn unregister(&self, listener: &Arc<dyn DeviceListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|l| !same_listener(l, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a device to every listener
    ///
    /// Works on a snapshot, so listeners may register or unregister from
    /// inside the callback. A panicking listener does not stop delivery to
    /// the rest. Returns the number of failed deliveries.
    pub fn notify(&self, device: &Arc<dyn Device>) -> usize {
        let snapshot: Vec<Arc<dyn DeviceListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut failures = 0;
        for listener in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| {
                listener.on_device_found(device.clone());
            }));
            if result.is_err() {
                failures += 1;
                tracing::error!("Device listener panicked while handling {}", device.id());
            }
        }
        failures
    }
}
