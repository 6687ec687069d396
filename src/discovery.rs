use crate::error::{LanLightError, Result, TransportError};
use crate::protocol::{parse_response, search_request};
use crate::registry::DeviceRegistry;
use crate::types::DiscoveryConfig;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const RECV_BUFFER_SIZE: usize = 1024;

/// Network interface a discovery transport runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceTarget {
    pub name: String,
    /// First IPv4 address of the interface, if any
    pub ipv4: Option<Ipv4Addr>,
}

/// Discovery session controller
///
/// Each call to [`start`](Self::start) sends one search request per
/// non-loopback interface and keeps listening for responses, feeding them
/// to the registry, until [`stop`](Self::stop) is called. Stopping is
/// cooperative: a transport notices only after its current receive returns,
/// so shutdown takes at most one receive timeout.
///
/// # Example
///
/// ```no_run
/// use lanlight::{Device, DeviceRegistry, Discovery};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = DeviceRegistry::new();
///     let mut discovery = Discovery::new(registry.clone());
///     discovery.start().await?;
///
///     tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;
///
///     for device in registry.devices() {
///         println!("Found {} at {}:{}", device.display_name(), device.address(), device.port());
///     }
///
///     discovery.stop();
///     Ok(())
/// }
/// ```
pub struct Discovery {
    registry: DeviceRegistry,
    config: DiscoveryConfig,
    session: Option<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl Discovery {
    /// Create a discovery controller with the default configuration
    pub fn new(registry: DeviceRegistry) -> Self {
        Self::with_config(registry, DiscoveryConfig::default())
    }

    /// Create a discovery controller with a custom configuration
    pub fn with_config(registry: DeviceRegistry, config: DiscoveryConfig) -> Self {
        Self {
            registry,
            config,
            session: None,
            task_handle: None,
        }
    }

    /// The registry discovered devices are fed into
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Whether a discovery session is in progress
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_cancelled())
    }

    /// Start a discovery session
    ///
    /// Does nothing if a session is already active. Interfaces are
    /// enumerated afresh on every call.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_active() {
            tracing::debug!("Already in discovery, ignoring start");
            return Ok(());
        }

        let targets = usable_interfaces()?;
        if targets.is_empty() {
            tracing::warn!("No usable network interfaces for discovery");
            return Ok(());
        }

        tracing::info!("Starting discovery on {} interface(s)", targets.len());

        let session = CancellationToken::new();
        let mut transports = JoinSet::new();
        for target in targets {
            tracing::debug!("Starting discovery on {}", target.name);
            transports.spawn(run_transport(
                target,
                self.config.clone(),
                self.registry.clone(),
                session.clone(),
            ));
        }

        self.task_handle = Some(tokio::spawn(supervise(transports, session.clone())));
        self.session = Some(session);
        Ok(())
    }

    /// Start a discovery session that stops itself after `stop_after`
    pub async fn start_with_timeout(&mut self, stop_after: Duration) -> Result<()> {
        self.start().await?;
        if let Some(session) = self.session.as_ref().filter(|s| !s.is_cancelled()) {
            schedule_stop(session.clone(), stop_after);
        }
        Ok(())
    }

    /// Request the active session to stop
    ///
    /// Returns immediately; transports exit once their pending receive
    /// completes or times out.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!("Stopping discovery");
            session.cancel();
        }
    }

    /// Wait until every transport of the last session has exited
    pub async fn wait(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
        }
    }
}

fn schedule_stop(session: CancellationToken, stop_after: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = session.cancelled() => {}
            _ = tokio::time::sleep(stop_after) => {
                tracing::info!("Discovery time limit of {:?} reached", stop_after);
                session.cancel();
            }
        }
    });
}

/// Await all transports, then mark the session finished
async fn supervise(
    mut transports: JoinSet<std::result::Result<(), TransportError>>,
    session: CancellationToken,
) {
    while let Some(joined) = transports.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_benign() => tracing::debug!("{}", e),
            Ok(Err(e)) => tracing::error!("Discovery transport failed: {}", e),
            Err(e) => tracing::error!("Discovery transport panicked: {}", e),
        }
    }
    session.cancel();
    tracing::info!("Discovery finished");
}

/// Enumerate interfaces that can carry multicast discovery
pub fn usable_interfaces() -> Result<Vec<InterfaceTarget>> {
    let interfaces = NetworkInterface::show()
        .map_err(|e| LanLightError::Io(std::io::Error::other(e.to_string())))?;

    let entries = interfaces.into_iter().flat_map(|iface| {
        let name = iface.name;
        iface.addr.into_iter().map(move |addr| {
            let ip = match addr {
                Addr::V4(v4) => IpAddr::V4(v4.ip),
                Addr::V6(v6) => IpAddr::V6(v6.ip),
            };
            (name.clone(), ip)
        })
    });

    Ok(select_interfaces(entries))
}

/// Group addresses by interface name and drop loopback interfaces
pub fn select_interfaces(
    entries: impl IntoIterator<Item = (String, IpAddr)>,
) -> Vec<InterfaceTarget> {
    let mut by_name: BTreeMap<String, (bool, Option<Ipv4Addr>)> = BTreeMap::new();

    for (name, ip) in entries {
        let (loopback, ipv4) = by_name.entry(name).or_insert((false, None));
        if ip.is_loopback() {
            *loopback = true;
        }
        if let IpAddr::V4(v4) = ip {
            ipv4.get_or_insert(v4);
        }
    }

    by_name
        .into_iter()
        .filter(|(_, (loopback, _))| !loopback)
        .map(|(name, (_, ipv4))| InterfaceTarget { name, ipv4 })
        .collect()
}

/// Create a socket joined to the discovery group on one interface
fn bind_multicast(config: &DiscoveryConfig, interface: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    socket.bind(&addr.into())?;

    socket.join_multicast_v4(&config.multicast_addr, &interface)?;
    socket.set_multicast_if_v4(&interface)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

/// One discovery cycle on one interface
async fn run_transport(
    target: InterfaceTarget,
    config: DiscoveryConfig,
    registry: DeviceRegistry,
    session: CancellationToken,
) -> std::result::Result<(), TransportError> {
    let Some(ip) = target.ipv4 else {
        return Err(TransportError::NoAddressBound {
            interface: target.name,
        });
    };
    let io_error = |source| TransportError::Io {
        interface: target.name.clone(),
        source,
    };

    let socket = bind_multicast(&config, ip).map_err(io_error)?;

    let request = search_request(&config);
    socket
        .send_to(request.as_bytes(), (config.multicast_addr, config.port))
        .await
        .map_err(io_error)?;
    tracing::debug!("Sent search request on {} ({})", target.name, ip);

    receive_loop(&socket, &target.name, &config, &registry, &session).await
}

/// Receive and ingest responses until the session is cancelled
async fn receive_loop(
    socket: &UdpSocket,
    interface: &str,
    config: &DiscoveryConfig,
    registry: &DeviceRegistry,
    session: &CancellationToken,
) -> std::result::Result<(), TransportError> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let wait = config.receive_wait();

    while !session.is_cancelled() {
        match timeout(wait, socket.recv_from(&mut buf)).await {
            Err(_) => {
                tracing::debug!("No response on {} within {:?}", interface, wait);
            }
            Ok(Err(source)) => {
                return Err(TransportError::Io {
                    interface: interface.to_string(),
                    source,
                });
            }
            Ok(Ok((len, from))) => {
                tracing::debug!("Got {} bytes from {} on {}", len, from, interface);
                let Some(info) = parse_response(&buf[..len]) else {
                    continue;
                };
                if let Err(e) = registry.ingest(&info) {
                    tracing::warn!("Bad response from {}: {}", from, e);
                }
            }
        }
    }

    tracing::debug!("Discovery on {} stopped", interface);
    Ok(())
}
