use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::configs::Transport as TransportSettings;
use crate::errors::TransportError;

const RECV_BUFFER_SIZE: usize = 4096;

/// A parsed inbound datagram and the address it came from.
pub type Inbound = (Value, SocketAddr);

/// Filter applied to every parsed datagram before delivery to a listener.
pub type ListenerPredicate = Box<dyn Fn(&Value, SocketAddr) -> bool + Send + Sync>;

struct Listener {
    predicate: Option<ListenerPredicate>,
    tx: mpsc::UnboundedSender<Inbound>,
}

type Registry = Arc<RwLock<HashMap<Uuid, Listener>>>;

/// Owner of the one UDP socket shared by every logical operation in the
/// process. A single receive loop parses inbound datagrams as JSON and
/// offers each to every registered listener; discovery, polling and mode
/// changes all multiplex over it via [`UdpMultiplexer::register_listener`].
pub struct UdpMultiplexer {
    socket: Arc<UdpSocket>,
    listeners: Registry,
    remote_port: u16,
    broadcast_addr: SocketAddr,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl UdpMultiplexer {
    /// Bind the shared socket per the transport settings and start the
    /// receive loop.
    pub async fn bind(settings: &TransportSettings) -> Result<Arc<Self>, TransportError> {
        let bind_host: IpAddr = settings
            .bind_host
            .parse()
            .map_err(|_| TransportError::Bind(invalid_host(&settings.bind_host)))?;
        let broadcast_host: IpAddr = settings
            .broadcast_host
            .parse()
            .map_err(|_| TransportError::Bind(invalid_host(&settings.broadcast_host)))?;

        Self::bind_with(
            SocketAddr::new(bind_host, settings.port),
            settings.port,
            broadcast_host,
        )
        .await
    }

    /// Bind with explicit addresses. `remote_port` is the port devices
    /// listen on; broadcasts go to `(broadcast_host, remote_port)`.
    pub async fn bind_with(
        bind: SocketAddr,
        remote_port: u16,
        broadcast_host: IpAddr,
    ) -> Result<Arc<Self>, TransportError> {
        let socket = UdpSocket::bind(bind).await.map_err(TransportError::Bind)?;
        socket.set_broadcast(true).map_err(TransportError::Bind)?;
        let socket = Arc::new(socket);

        let listeners: Registry = Arc::new(RwLock::new(HashMap::new()));
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(recv_loop(socket.clone(), listeners.clone(), stop_rx));

        let mux = Arc::new(Self {
            socket,
            listeners,
            remote_port,
            broadcast_addr: SocketAddr::new(broadcast_host, remote_port),
            stop_tx: Mutex::new(Some(stop_tx)),
        });

        let local = mux.local_addr().map_err(TransportError::Bind)?;
        tracing::info!(%local, "UDP transport bound");

        Ok(mux)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Port the devices listen on.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Fire-and-forget unicast; no delivery guarantee.
    pub async fn send(&self, payload: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.socket
            .send_to(payload, dest)
            .await
            .map_err(TransportError::Send)?;
        Ok(())
    }

    /// Fire-and-forget broadcast to the configured LAN broadcast address.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.send(payload, self.broadcast_addr).await
    }

    /// Register a listener for inbound datagrams. Every parsed datagram
    /// matching `predicate` (or every datagram, when `None`) is delivered on
    /// the returned channel until the guard is dropped. Dropping the guard
    /// unregisters on every exit path, so callers hold it for exactly the
    /// scope of their exchange.
    pub fn register_listener(
        &self,
        predicate: Option<ListenerPredicate>,
    ) -> (ListenerGuard, mpsc::UnboundedReceiver<Inbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.listeners.write().insert(id, Listener { predicate, tx });

        (
            ListenerGuard {
                id,
                listeners: self.listeners.clone(),
            },
            rx,
        )
    }

    /// Stop the receive loop and drop every listener registration. In-flight
    /// exchanges resolve as timeouts.
    pub fn shutdown(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        self.listeners.write().clear();
    }
}

/// Removes its listener registration when dropped.
pub struct ListenerGuard {
    id: Uuid,
    listeners: Registry,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.listeners.write().remove(&self.id);
    }
}

fn invalid_host(host: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("invalid host address: {host}"),
    )
}

async fn recv_loop(socket: Arc<UdpSocket>, listeners: Registry, mut stop_rx: oneshot::Receiver<()>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                tracing::debug!("Transport receive loop stopping");
                break;
            }
            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((len, addr)) => {
                        let value: Value = match serde_json::from_slice(&buf[..len]) {
                            Ok(value) => value,
                            Err(err) => {
                                tracing::debug!("Dropping malformed datagram from {addr}: {err}");
                                continue;
                            }
                        };
                        dispatch(&listeners, value, addr);
                    }
                    Err(err) => {
                        tracing::warn!("UDP receive error: {err}");
                    }
                }
            }
        }
    }
}

/// Offer one datagram to every registered listener. A listener whose
/// receiver has gone away only logs; it never blocks delivery to the rest.
fn dispatch(listeners: &Registry, value: Value, addr: SocketAddr) {
    let listeners = listeners.read();

    for (id, listener) in listeners.iter() {
        let interested = listener
            .predicate
            .as_ref()
            .map_or(true, |predicate| predicate(&value, addr));

        if interested && listener.tx.send((value.clone(), addr)).is_err() {
            tracing::debug!("Listener {id} dropped its receiver");
        }
    }
}
