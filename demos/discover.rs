use lanlight::{Device, DeviceAction, DeviceEvent, DeviceRegistry, Discovery};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Usage: discover [seconds] [--blink]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
    let blink = args.any(|a| a == "--blink");

    let registry = DeviceRegistry::new();
    registry.register_listener(Arc::new(|device: Arc<dyn Device>| {
        println!(
            "+ {:<20} {:<10} {}:{}",
            device.id(),
            device.model(),
            device.address(),
            device.port()
        );
    }));

    let mut updates = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = updates.recv().await {
            if let DeviceEvent::Updated(device) = event {
                tracing::debug!("Seen again: {}", device.id());
            }
        }
    });

    let mut discovery = Discovery::new(registry.clone());
    discovery
        .start_with_timeout(Duration::from_secs(seconds))
        .await?;
    discovery.wait().await;

    println!();
    println!("{} device(s):", registry.len());
    for device in registry.devices() {
        let status = device.status();
        println!(
            "  {:<28} {:<20} rgb=({:>3},{:>3},{:>3}) ct={:<5} hue={:<3} sat={:<3} online={}",
            device.display_name(),
            device.id(),
            status.r,
            status.g,
            status.b,
            status.ct,
            status.hue,
            status.sat,
            device.is_online()
        );

        if blink {
            registry.dispatch(device.id(), &DeviceAction::Close { duration: 300 })?;
            tokio::time::sleep(Duration::from_millis(800)).await;
            registry.dispatch(device.id(), &DeviceAction::Open { duration: 300 })?;
        }
    }

    if blink {
        // Give the connection tasks time to flush
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Ok(())
}
