use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

use voltsync_api::device::DeviceIdentity;
use voltsync_api::message::{CommandEnvelope, ResponseEnvelope};
use voltsync_api::method;
use voltsync_api::status::DeviceSummary;

use crate::errors::DiscoveryError;
use crate::services::transport::{Inbound, UdpMultiplexer};

/// How long one discovery sweep listens for answers.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(9);
/// Interval between repeated broadcasts within the window. Rebroadcasting
/// compensates for per-packet loss, not for a dead device.
pub const REBROADCAST_EVERY: Duration = Duration::from_secs(2);
/// Wait for a directly probed address to answer.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Finds every battery unit reachable by broadcast, deduplicated by link
/// address.
pub struct DiscoveryService {
    transport: Arc<UdpMultiplexer>,
}

impl DiscoveryService {
    pub fn new(transport: Arc<UdpMultiplexer>) -> Self {
        Self { transport }
    }

    /// Sweep the LAN with the default window and rebroadcast cadence.
    pub async fn discover(&self) -> Result<Vec<DeviceIdentity>, DiscoveryError> {
        self.discover_with(DISCOVERY_WINDOW, REBROADCAST_EVERY).await
    }

    /// Broadcast the discovery command every `rebroadcast_every` until
    /// `window` elapses, collecting one identity per link address. A unit
    /// that answers several broadcasts appears once; the first-seen network
    /// address wins for this sweep.
    pub async fn discover_with(
        &self,
        window: Duration,
        rebroadcast_every: Duration,
    ) -> Result<Vec<DeviceIdentity>, DiscoveryError> {
        let payload = discovery_payload()?;

        let (_listener, mut rx) = self.transport.register_listener(Some(Box::new(
            |value, _addr| ResponseEnvelope::peek_id(value) == Some(method::DISCOVERY_ID),
        )));

        let mut devices: Vec<DeviceIdentity> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let deadline = Instant::now() + window;

        while Instant::now() < deadline {
            self.transport.broadcast(&payload).await?;
            tracing::debug!("Discovery broadcast sent");

            let next_broadcast = deadline.min(Instant::now() + rebroadcast_every);
            collect_until(&mut rx, next_broadcast, &mut devices, &mut seen).await;
        }

        tracing::info!(count = devices.len(), "Discovery sweep finished");
        Ok(devices)
    }

    /// Probe one known address instead of sweeping the LAN: same listener
    /// discipline, a single transmission, bounded wait.
    pub async fn discover_at(
        &self,
        host: IpAddr,
    ) -> Result<Option<DeviceIdentity>, DiscoveryError> {
        let payload = discovery_payload()?;

        let (_listener, mut rx) = self.transport.register_listener(Some(Box::new(
            move |value, addr| {
                addr.ip() == host && ResponseEnvelope::peek_id(value) == Some(method::DISCOVERY_ID)
            },
        )));

        let dest = SocketAddr::new(host, self.transport.remote_port());
        self.transport.send(&payload, dest).await?;

        let deadline = Instant::now() + PROBE_TIMEOUT;
        while let Ok(Some((value, addr))) = timeout_at(deadline, rx.recv()).await {
            if let Some(identity) = parse_response(value, addr) {
                return Ok(Some(identity));
            }
        }

        Ok(None)
    }
}

fn discovery_payload() -> Result<Vec<u8>, DiscoveryError> {
    let envelope = CommandEnvelope::new(
        method::DISCOVERY_ID,
        method::GET_DEVICE,
        Some(method::discovery_params()),
    );
    Ok(envelope.to_bytes()?)
}

/// Drain discovery responses until `deadline`, folding each new link
/// address into `devices`.
async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<Inbound>,
    deadline: Instant,
    devices: &mut Vec<DeviceIdentity>,
    seen: &mut HashSet<String>,
) {
    while let Ok(Some((value, addr))) = timeout_at(deadline, rx.recv()).await {
        let Some(identity) = parse_response(value, addr) else {
            continue;
        };

        if seen.insert(identity.link_addr.clone()) {
            tracing::info!(
                model = %identity.model,
                link_addr = %identity.link_addr,
                host = %identity.host,
                firmware = identity.firmware,
                "Discovered device"
            );
            devices.push(identity);
        }
    }
}

fn parse_response(value: serde_json::Value, addr: SocketAddr) -> Option<DeviceIdentity> {
    let response: ResponseEnvelope = serde_json::from_value(value).ok()?;
    let summary: DeviceSummary = serde_json::from_value(response.result?).ok()?;
    DeviceIdentity::from_discovery(&summary, addr)
}
