use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use voltsync_api::device::DeviceIdentity;
use voltsync_api::message::CommandEnvelope;
use voltsync_api::mode::{ManualSchedule, OperatingMode};

use crate::command::{self, DeviceState, MockDeviceConfig};

/// One simulated battery unit bound to its own UDP socket.
pub struct MockDevice;

impl MockDevice {
    /// Bind on `addr` (use port 0 for tests) and start answering requests.
    pub async fn spawn(config: MockDeviceConfig, addr: &str) -> io::Result<MockDeviceHandle> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        let state = Arc::new(Mutex::new(DeviceState::new(config)));
        let silent = Arc::new(AtomicBool::new(false));
        let duplicate_responses = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_device(
            socket,
            state.clone(),
            silent.clone(),
            duplicate_responses.clone(),
            requests.clone(),
        ));

        tracing::debug!(addr = %local_addr, "Simulated device online");

        Ok(MockDeviceHandle {
            addr: local_addr,
            state,
            silent,
            duplicate_responses,
            requests,
            task,
        })
    }
}

async fn run_device(
    socket: UdpSocket,
    state: Arc<Mutex<DeviceState>>,
    silent: Arc<AtomicBool>,
    duplicate_responses: Arc<AtomicBool>,
    requests: Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; 4096];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::warn!("Simulated device receive error: {err}");
                continue;
            }
        };

        requests.fetch_add(1, Ordering::SeqCst);

        if silent.load(Ordering::SeqCst) {
            continue;
        }

        let request: CommandEnvelope = match serde_json::from_slice(&buf[..len]) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!("Ignoring undecodable request from {peer}: {err}");
                continue;
            }
        };

        let response = {
            let mut state = state.lock().expect("device state poisoned");
            command::respond(&mut state, &request)
        };

        let Some(response) = response else { continue };

        match response.to_bytes() {
            Ok(bytes) => {
                let _ = socket.send_to(&bytes, peer).await;
                if duplicate_responses.load(Ordering::SeqCst) {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
            Err(err) => tracing::error!("Failed to encode response: {err}"),
        }
    }
}

/// Control surface for a running [`MockDevice`]; tests use the counters to
/// assert on-the-wire behaviour.
pub struct MockDeviceHandle {
    addr: SocketAddr,
    state: Arc<Mutex<DeviceState>>,
    silent: Arc<AtomicBool>,
    duplicate_responses: Arc<AtomicBool>,
    requests: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl MockDeviceHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Identity record matching what a discovery sweep would build for this
    /// unit.
    pub fn identity(&self) -> DeviceIdentity {
        let state = self.lock_state();
        DeviceIdentity {
            model: state.config.model.clone(),
            link_addr: state.config.wifi_mac.clone(),
            host: self.addr.ip(),
            port: self.addr.port(),
            firmware: state.config.firmware,
            ble_mac: Some(state.config.ble_mac.clone()),
            wifi_name: Some(state.config.wifi_name.clone()),
        }
    }

    /// Drop every request on the floor while still counting it, simulating
    /// an unresponsive or lossy device.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Answer every request twice, simulating duplicated datagrams.
    pub fn set_duplicate_responses(&self, duplicate: bool) {
        self.duplicate_responses.store(duplicate, Ordering::SeqCst);
    }

    /// Re-pin the reported battery power at runtime; `None` resumes the
    /// daily curve.
    pub fn set_fixed_battery_power(&self, power: Option<f64>) {
        self.lock_state().config.fixed_battery_power = power;
    }

    /// Datagrams received, including ones dropped while silent.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn method_count(&self, method_name: &str) -> u64 {
        self.lock_state()
            .method_counts
            .get(method_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn seen_ids(&self) -> Vec<String> {
        self.lock_state().seen_ids.clone()
    }

    pub fn current_mode(&self) -> OperatingMode {
        self.lock_state().mode
    }

    pub fn schedule(&self, slot: u8) -> Option<ManualSchedule> {
        self.lock_state()
            .schedules
            .get(slot as usize)
            .and_then(Clone::clone)
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state poisoned")
    }
}

impl Drop for MockDeviceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
