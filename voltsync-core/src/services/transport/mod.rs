mod udp;

pub use udp::{Inbound, ListenerGuard, ListenerPredicate, UdpMultiplexer};
