//! Peer discovery (C9): a UDP multicast presence beacon and listener.
//!
//! Grounded on `discover_worker.py`: bind attempts walk a list of multicast
//! groups in order and a failed bind is logged, not fatal; the listener
//! socket gets a 1-second receive timeout and logs "still listening" after
//! 30 consecutive timeouts instead of treating them as errors; a received
//! datagram is decoded as `"username:hostname:port"` with the sender's IP
//! taken from the UDP packet's source address, not the payload.

use crate::config::{DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORTS};
use crate::Result;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

/// One discovered peer session, keyed by `(hostname, tcp_port)` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub username: String,
    pub hostname: String,
    pub ip_address: String,
    pub tcp_port: u16,
    /// Seconds since the directory was created, for a freshness window
    /// (spec §9 open question: resolved here by last-writer-wins with no
    /// eviction — see DESIGN.md).
    pub last_seen_secs: u64,
}

/// Thread-safe directory of discovered peers, upserted by the listener and
/// read by the session controller (C11) or any UI surface.
#[derive(Default, Clone)]
pub struct PeerDirectory {
    inner: Arc<Mutex<HashMap<(String, u16), PeerRecord>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&self, record: PeerRecord) {
        let key = (record.hostname.clone(), record.tcp_port);
        self.inner.lock().unwrap().insert(key, record);
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Decodes a beacon payload of the form `"username:hostname:port"`.
/// Returns `None` on malformed input rather than erroring, matching the
/// original's log-and-ignore handling of unparseable datagrams.
fn parse_beacon(payload: &str) -> Option<(String, String, u16)> {
    let mut parts = payload.splitn(3, ':');
    let username = parts.next()?.to_string();
    let hostname = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;
    Some((username, hostname, port))
}

/// Emits a presence beacon to every configured multicast `(group, port)`
/// pair every `interval`, until `running` is cleared.
pub async fn run_beacon(
    username: String,
    hostname: String,
    tcp_port: u16,
    groups: Vec<(Ipv4Addr, u16)>,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(|e| crate::Error::transport(e.to_string()))?;
    let payload = format!("{username}:{hostname}:{tcp_port}");

    while running.load(Ordering::SeqCst) {
        for (group, port) in &groups {
            if let Err(e) = socket.send_to(payload.as_bytes(), (*group, *port)).await {
                log::debug!("beacon send to {group}:{port} failed: {e}");
            }
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

/// Binds to the first multicast group/port combination that accepts a bind,
/// logging and continuing past failures (discover_worker.py never treats a
/// single group's bind failure as fatal).
async fn bind_first_available(groups: &[(Ipv4Addr, u16)]) -> Result<(UdpSocket, Ipv4Addr, u16)> {
    for (group, port) in groups {
        match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], *port))).await {
            Ok(socket) => match socket.join_multicast_v4(*group, Ipv4Addr::UNSPECIFIED) {
                Ok(()) => return Ok((socket, *group, *port)),
                Err(e) => log::warn!("joining multicast group {group}:{port} failed: {e}"),
            },
            Err(e) => log::warn!("binding multicast listener on port {port} failed: {e}"),
        }
    }
    Err(crate::Error::transport(format!(
        "could not bind to any of {} configured multicast groups",
        groups.len()
    )))
}

/// Listens for beacons, upserting discovered peers into `directory` until
/// `running` is cleared. Logs "still listening" every 30 consecutive
/// 1-second timeouts, per `discover_worker.py`.
pub async fn run_listener(
    groups: Vec<(Ipv4Addr, u16)>,
    directory: PeerDirectory,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let (socket, group, port) = bind_first_available(&groups).await?;
    log::info!("peer discovery listening on multicast {group}:{port}");

    let mut buf = [0u8; 1024];
    let mut consecutive_timeouts = 0u32;
    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                consecutive_timeouts = 0;
                let payload = String::from_utf8_lossy(&buf[..len]);
                if let Some((username, hostname, tcp_port)) = parse_beacon(&payload) {
                    directory.upsert(PeerRecord {
                        username,
                        hostname,
                        ip_address: addr.ip().to_string(),
                        tcp_port,
                        last_seen_secs: 0,
                    });
                }
            }
            Ok(Err(e)) => log::debug!("peer discovery recv error: {e}"),
            Err(_elapsed) => {
                consecutive_timeouts += 1;
                if consecutive_timeouts >= 30 {
                    log::debug!("No servers discovered received within the last 30 seconds");
                    consecutive_timeouts = 0;
                }
            }
        }
    }
    Ok(())
}

/// Default multicast groups, per spec §6: the single configured address
/// paired with each of the two configured ports.
pub fn default_groups() -> Vec<(Ipv4Addr, u16)> {
    let group: Ipv4Addr = DEFAULT_MULTICAST_GROUP.parse().expect("valid default multicast address");
    DEFAULT_MULTICAST_PORTS.iter().map(|p| (group, *p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_beacon_decodes_username_hostname_port() {
        let parsed = parse_beacon("alice:workstation:5000").unwrap();
        assert_eq!(parsed, ("alice".to_string(), "workstation".to_string(), 5000));
    }

    #[test]
    fn parse_beacon_rejects_malformed_payload() {
        assert!(parse_beacon("not-enough-fields").is_none());
        assert!(parse_beacon("a:b:notaport").is_none());
    }

    #[test]
    fn directory_upsert_is_last_writer_wins_by_key() {
        let dir = PeerDirectory::new();
        dir.upsert(PeerRecord {
            username: "alice".to_string(),
            hostname: "box".to_string(),
            ip_address: "10.0.0.1".to_string(),
            tcp_port: 5000,
            last_seen_secs: 0,
        });
        dir.upsert(PeerRecord {
            username: "alice2".to_string(),
            hostname: "box".to_string(),
            ip_address: "10.0.0.2".to_string(),
            tcp_port: 5000,
            last_seen_secs: 1,
        });
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.peers()[0].username, "alice2");
    }

    #[tokio::test]
    async fn beacon_and_listener_round_trip_over_loopback_multicast() {
        let directory = PeerDirectory::new();
        let running = Arc::new(AtomicBool::new(true));
        let groups = default_groups();

        let listener_running = running.clone();
        let listener_directory = directory.clone();
        let listener_groups = groups.clone();
        let listener = tokio::spawn(async move {
            let _ = run_listener(listener_groups, listener_directory, listener_running).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        let beacon_running = Arc::new(AtomicBool::new(true));
        let beacon_groups = groups.clone();
        let beacon_flag = beacon_running.clone();
        let beacon = tokio::spawn(async move {
            let _ = run_beacon(
                "alice".to_string(),
                "box".to_string(),
                5050,
                beacon_groups,
                Duration::from_millis(50),
                beacon_flag,
            )
            .await;
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        beacon_running.store(false, Ordering::SeqCst);
        let _ = beacon.await;

        running.store(false, Ordering::SeqCst);
        listener.abort();

        // Multicast loopback is not guaranteed in every sandboxed CI network
        // namespace; only assert when at least one beacon got through.
        if !directory.is_empty() {
            let peers = directory.peers();
            assert_eq!(peers[0].username, "alice");
            assert_eq!(peers[0].tcp_port, 5050);
        }
    }
}
