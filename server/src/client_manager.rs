//! Peer registry for the lockstep server
//!
//! This module tracks every client taking part in the session:
//! - Connection lifecycle (hello, goodbye, timeout)
//! - The last tick each peer has acknowledged, for latency diagnostics
//! - Team assignment
//! - Capacity limits and address lookup
//!
//! The registry is owned by the simulation loop. Network tasks never touch
//! it; they only push letters into the inbox.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One client as seen from the server
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Address letters are sent to
    pub addr: SocketAddr,
    /// Team the client controls in the world
    pub team_id: u32,
    /// Last time we received any letter from this client
    pub last_seen: Instant,
    /// Highest tick the client reports as applied
    pub last_acked_sequence_id: u64,
}

impl PeerConnection {
    /// Creates a peer that joined when the server was at tick `baseline`.
    pub fn new(id: u32, addr: SocketAddr, baseline: u64, now: Instant) -> Self {
        Self {
            id,
            addr,
            team_id: id,
            last_seen: now,
            last_acked_sequence_id: baseline,
        }
    }

    /// Refreshes liveness and records an acknowledgement.
    ///
    /// Acknowledgements only move forward; a stale heartbeat that overtakes a
    /// newer one on the wire does not roll the value back.
    pub fn acknowledge(&mut self, sequence_id: u64, now: Instant) {
        self.last_seen = now;
        self.last_acked_sequence_id = self.last_acked_sequence_id.max(sequence_id);
    }

    /// Returns true if nothing was heard from this peer within `timeout`.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Ticks the peer is behind the server.
    pub fn latency_ticks(&self, server_current: u64) -> i64 {
        server_current as i64 - self.last_acked_sequence_id as i64
    }
}

/// Manages all connected peers
///
/// Client ids start from 1 and are never reused within a session, so a
/// reconnecting client always gets a fresh id.
pub struct ClientManager {
    /// Connected peers indexed by their unique ID
    clients: HashMap<u32, PeerConnection>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new peer
    ///
    /// Returns the new client id, or None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, baseline: u64, now: Instant) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!(
            "Client {} connected from {} at tick {}",
            client_id, addr, baseline
        );
        self.clients
            .insert(client_id, PeerConnection::new(client_id, addr, baseline, now));

        Some(client_id)
    }

    /// Removes a peer, returning its record if it was present
    pub fn remove_client(&mut self, client_id: &u32) -> Option<PeerConnection> {
        let peer = self.clients.remove(client_id)?;
        info!("Client {} disconnected", peer.id);
        Some(peer)
    }

    /// Finds a client ID by network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: u32) -> Option<&PeerConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut PeerConnection> {
        self.clients.get_mut(&client_id)
    }

    /// Removes every peer silent for longer than `timeout`
    ///
    /// Returns the removed records so the caller can release their teams.
    pub fn check_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<PeerConnection> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(now, timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect()
    }

    /// All peer ids and addresses, ordered by id
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        let mut addrs: Vec<(u32, SocketAddr)> = self
            .clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect();
        addrs.sort_by_key(|(id, _)| *id);
        addrs
    }

    /// Per-peer latency in ticks, ordered by id
    pub fn latencies(&self, server_current: u64) -> Vec<(u32, i64)> {
        let mut latencies: Vec<(u32, i64)> = self
            .clients
            .values()
            .map(|client| (client.id, client.latency_ticks(server_current)))
            .collect();
        latencies.sort_by_key(|(id, _)| *id);
        latencies
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_peer_creation() {
        let now = Instant::now();
        let peer = PeerConnection::new(1, test_addr(), 40, now);

        assert_eq!(peer.id, 1);
        assert_eq!(peer.team_id, 1);
        assert_eq!(peer.addr, test_addr());
        assert_eq!(peer.last_acked_sequence_id, 40);
    }

    #[test]
    fn test_acknowledge_never_goes_backwards() {
        let now = Instant::now();
        let mut peer = PeerConnection::new(1, test_addr(), 0, now);

        peer.acknowledge(12, now);
        peer.acknowledge(9, now);
        assert_eq!(peer.last_acked_sequence_id, 12);
        assert_eq!(peer.latency_ticks(15), 3);
    }

    #[test]
    fn test_peer_timeout() {
        let now = Instant::now();
        let peer = PeerConnection::new(1, test_addr(), 0, now);

        assert!(!peer.is_timed_out(now + Duration::from_millis(500), Duration::from_secs(1)));
        assert!(peer.is_timed_out(now + Duration::from_secs(2), Duration::from_secs(1)));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);
        let now = Instant::now();

        let client_id1 = manager.add_client(test_addr(), 0, now).unwrap();
        let client_id2 = manager.add_client(test_addr2(), 7, now).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(2).unwrap().last_acked_sequence_id, 7);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let now = Instant::now();

        assert!(manager.add_client(test_addr(), 0, now).is_some());
        assert!(manager.add_client(test_addr2(), 0, now).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut manager = ClientManager::new(2);
        let now = Instant::now();

        let first = manager.add_client(test_addr(), 0, now).unwrap();
        assert!(manager.remove_client(&first).is_some());
        assert!(manager.remove_client(&first).is_none());

        let second = manager.add_client(test_addr(), 0, now).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(2);
        let now = Instant::now();

        let client_id1 = manager.add_client(test_addr(), 0, now).unwrap();
        let _client_id2 = manager.add_client(test_addr2(), 0, now).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));

        let unknown_addr: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown_addr), None);
    }

    #[test]
    fn test_check_timeouts_removes_only_silent_peers() {
        let mut manager = ClientManager::new(4);
        let start = Instant::now();

        let quiet = manager.add_client(test_addr(), 0, start).unwrap();
        let chatty = manager.add_client(test_addr2(), 0, start).unwrap();

        let later = start + Duration::from_secs(6);
        manager
            .get_mut(chatty)
            .unwrap()
            .acknowledge(3, later - Duration::from_secs(1));

        let removed = manager.check_timeouts(later, Duration::from_secs(5));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, quiet);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(chatty).is_some());
    }

    #[test]
    fn test_latencies() {
        let mut manager = ClientManager::new(4);
        let now = Instant::now();

        let a = manager.add_client(test_addr(), 0, now).unwrap();
        let b = manager.add_client(test_addr2(), 0, now).unwrap();
        manager.get_mut(a).unwrap().acknowledge(95, now);
        manager.get_mut(b).unwrap().acknowledge(100, now);

        assert_eq!(manager.latencies(100), vec![(a, 5), (b, 0)]);
        assert_eq!(
            manager.get_client_addrs(),
            vec![(a, test_addr()), (b, test_addr2())]
        );
    }
}
