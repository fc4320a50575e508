//! Local-host detection.
//!
//! A host counts as local when it resolves to one of this machine's own
//! addresses, not merely when it spells a loopback address. The address
//! set is gathered once and cached for the client's lifetime.

use std::collections::HashSet;
use std::net::{IpAddr, UdpSocket};

use tracing::debug;

/// Cached predicate: does an address name this machine?
#[derive(Debug, Clone)]
pub struct LocalDetector {
    own_addrs: HashSet<IpAddr>,
    own_names: HashSet<String>,
}

impl LocalDetector {
    /// Gather the machine's own addresses and names.
    pub fn probe() -> Self {
        let mut own_addrs = HashSet::new();
        own_addrs.insert(IpAddr::from([127, 0, 0, 1]));
        own_addrs.insert(IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]));

        // The OS picks the outbound interface for a routed destination;
        // no packet is sent for a UDP connect.
        if let Some(addr) = primary_outbound_addr() {
            own_addrs.insert(addr);
        }

        let mut own_names = HashSet::new();
        own_names.insert("localhost".to_string());
        if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
            let name = name.trim().to_string();
            if !name.is_empty() {
                own_names.insert(name);
            }
        }
        if let Ok(name) = std::env::var("HOSTNAME") {
            if !name.is_empty() {
                own_names.insert(name);
            }
        }

        debug!(?own_addrs, ?own_names, "probed local identity");
        Self { own_addrs, own_names }
    }

    /// Check whether `host` names this machine.
    pub fn is_local(&self, host: &str) -> bool {
        if self.own_names.contains(host) {
            return true;
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback() || self.own_addrs.contains(&ip),
            Err(_) => {
                // Resolve the name and compare addresses.
                std::net::ToSocketAddrs::to_socket_addrs(&(host, 0))
                    .map(|addrs| {
                        addrs.into_iter().any(|a| {
                            a.ip().is_loopback() || self.own_addrs.contains(&a.ip())
                        })
                    })
                    .unwrap_or(false)
            }
        }
    }
}

fn primary_outbound_addr() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_local() {
        let det = LocalDetector::probe();
        assert!(det.is_local("localhost"));
        assert!(det.is_local("127.0.0.1"));
        assert!(det.is_local("::1"));
    }

    #[test]
    fn own_outbound_addr_is_local() {
        let det = LocalDetector::probe();
        if let Some(addr) = primary_outbound_addr() {
            assert!(det.is_local(&addr.to_string()));
        }
    }

    #[test]
    fn remote_addr_is_not_local() {
        let det = LocalDetector::probe();
        assert!(!det.is_local("192.0.2.1")); // TEST-NET, never assigned here
        assert!(!det.is_local("203.0.113.77"));
    }
}
