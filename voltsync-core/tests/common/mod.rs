#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde_json::json;
use tokio::net::UdpSocket;

use voltsync_core::UdpMultiplexer;

/// Multiplexer on loopback whose "broadcasts" are aimed at `target`, so a
/// discovery sweep reaches a test responder instead of the LAN.
pub async fn loopback_mux_towards(target: SocketAddr) -> Arc<UdpMultiplexer> {
    UdpMultiplexer::bind_with(
        "127.0.0.1:0".parse().unwrap(),
        target.port(),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    )
    .await
    .unwrap()
}

/// Multiplexer on loopback for plain unicast exchanges.
pub async fn loopback_mux() -> Arc<UdpMultiplexer> {
    UdpMultiplexer::bind_with(
        "127.0.0.1:0".parse().unwrap(),
        30000,
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    )
    .await
    .unwrap()
}

/// Responder standing in for several devices behind one socket: every
/// discovery probe is answered once per configured link address, with the
/// first one optionally answered twice.
pub async fn discovery_responder(
    link_addrs: Vec<&'static str>,
    duplicate_first: bool,
) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&buf[..len]) else {
                continue;
            };
            if value.get("id").and_then(|id| id.as_str()) != Some("voltsync-discover") {
                continue;
            }

            for (index, link_addr) in link_addrs.iter().enumerate() {
                let reply = json!({
                    "id": "voltsync-discover",
                    "result": {
                        "device": "VS300",
                        "ver": 154,
                        "wifi_mac": link_addr,
                    }
                });
                let bytes = serde_json::to_vec(&reply).unwrap();
                let _ = socket.send_to(&bytes, peer).await;
                if duplicate_first && index == 0 {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        }
    });

    addr
}
