//! Network link and wall-clock synchronisation

use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::clock::{ClockSource, US_PER_SECOND};
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// Wall-clock readings before 2020-01-01T00:00:00Z are treated as unsynchronised
pub const MIN_VALID_EPOCH_S: u64 = 1_577_836_800;

/// Interval between wall-clock checks while waiting for time sync
pub const SYNC_POLL: Duration = Duration::from_millis(200);

/// True once `wall_us` is past [`MIN_VALID_EPOCH_S`]
pub fn wall_clock_valid(wall_us: u64) -> bool {
    wall_us / US_PER_SECOND > MIN_VALID_EPOCH_S
}

/// Link and time collaborator of the node
pub trait Connectivity {
    /// Bring the network link up
    fn connect_link(&mut self, config: &NodeConfig) -> Result<()>;

    /// Wait until the wall clock is synchronised, bounded by the NTP timeout
    fn sync_time(&mut self, config: &NodeConfig, clock: &dyn ClockSource) -> Result<()>;

    /// Address of this node on the link, as reported in burst metadata
    fn local_address(&self) -> String;

    /// Whether the last sync succeeded
    fn time_valid(&self) -> bool;
}

/// Host networking: the route toward the broker decides the local address
#[derive(Debug, Default)]
pub struct HostConnectivity {
    local: Option<String>,
    synced: bool,
}

impl HostConnectivity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connectivity for HostConnectivity {
    fn connect_link(&mut self, config: &NodeConfig) -> Result<()> {
        let target = (config.mqtt.host.as_str(), config.mqtt.port)
            .to_socket_addrs()
            .map_err(|e| NodeError::Link(format!("cannot resolve {}: {}", config.mqtt.host, e)))?
            .next()
            .ok_or_else(|| NodeError::Link(format!("no address for {}", config.mqtt.host)))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).map_err(|e| NodeError::Link(e.to_string()))?;
        // Connecting a UDP socket only selects a route; nothing is sent.
        socket
            .connect(target)
            .map_err(|e| NodeError::Link(format!("no route to {}: {}", target, e)))?;
        let local = socket.local_addr().map_err(|e| NodeError::Link(e.to_string()))?;

        tracing::info!(local = %local.ip(), broker = %target, "link up");
        self.local = Some(local.ip().to_string());
        Ok(())
    }

    fn sync_time(&mut self, config: &NodeConfig, clock: &dyn ClockSource) -> Result<()> {
        self.synced = false;
        let timeout = config.ntp_timeout();
        tracing::debug!(servers = ?config.ntp_servers(), timeout_s = timeout.as_secs(), "waiting for time sync");

        let start = clock.monotonic_us();
        let limit = timeout.as_micros() as i64;
        loop {
            let wall = clock.wall_us();
            if wall_clock_valid(wall) {
                tracing::info!(epoch_us = wall, "time synchronised");
                self.synced = true;
                return Ok(());
            }
            if clock.monotonic_us() - start >= limit {
                return Err(NodeError::TimeSync(format!(
                    "wall clock still invalid after {} s",
                    timeout.as_secs()
                )));
            }
            clock.pause(SYNC_POLL);
        }
    }

    fn local_address(&self) -> String {
        self.local.clone().unwrap_or_else(|| "0.0.0.0".to_string())
    }

    fn time_valid(&self) -> bool {
        self.synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn config(host: &str) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.wifi.ssid = "lab".to_string();
        config.mqtt.host = host.to_string();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_validity_boundary() {
        assert!(!wall_clock_valid(0));
        assert!(!wall_clock_valid(MIN_VALID_EPOCH_S * US_PER_SECOND));
        assert!(wall_clock_valid((MIN_VALID_EPOCH_S + 1) * US_PER_SECOND));
    }

    #[test]
    fn test_loopback_link() {
        let mut link = HostConnectivity::new();
        link.connect_link(&config("127.0.0.1")).unwrap();
        assert_eq!(link.local_address(), "127.0.0.1");
    }

    #[test]
    fn test_sync_succeeds_on_valid_clock() {
        let clock = VirtualClock::new(1_700_000_000_000_000);
        let mut link = HostConnectivity::new();
        link.sync_time(&config("127.0.0.1"), &clock).unwrap();
        assert!(link.time_valid());
        assert_eq!(clock.monotonic_us(), 0);
    }

    #[test]
    fn test_sync_times_out() {
        let clock = VirtualClock::new(0);
        let mut link = HostConnectivity::new();
        let err = link.sync_time(&config("127.0.0.1"), &clock).unwrap_err();
        assert!(matches!(err, NodeError::TimeSync(_)));
        assert!(!link.time_valid());
        // Default NTP timeout is 15 s.
        assert!(clock.monotonic_us() >= 15_000_000);
        assert!(clock.monotonic_us() < 15_000_000 + 200_000 + 1);
    }
}
