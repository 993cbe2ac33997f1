//! Relay peer registry: which agent addresses each peered relay serves.
//!
//! Updated from peer hellos and `agent_registered` / `agent_unregistered`
//! notifications. Lookups only consider connected peers.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    /// Link lost; the entry is kept so a re-peering relay is recognised.
    Disconnected,
}

/// One peered relay.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub node_id: String,
    pub node_name: String,
    /// Socket address of the link.
    pub address: SocketAddr,
    /// Agent addresses attached to the peer.
    pub agents: HashSet<String>,
    pub state: PeerState,
    pub connected_at: DateTime<Utc>,
    pub protocol_version: u32,
}

impl PeerEntry {
    pub fn new(
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        address: SocketAddr,
        agents: impl IntoIterator<Item = String>,
        protocol_version: u32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            address,
            agents: agents.into_iter().collect(),
            state: PeerState::Connected,
            connected_at: Utc::now(),
            protocol_version,
        }
    }
}

/// Thread-safe registry of peered relays.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, PeerEntry>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a peer after a successful handshake.
    pub fn add_peer(&self, entry: PeerEntry) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(entry.node_id.clone(), entry);
    }

    pub fn remove_peer(&self, node_id: &str) -> Option<PeerEntry> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(node_id)
    }

    pub fn mark_disconnected(&self, node_id: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(node_id) {
            entry.state = PeerState::Disconnected;
        }
    }

    pub fn get_peer(&self, node_id: &str) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(node_id).cloned()
    }

    pub fn connected_peers(&self) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .cloned()
            .collect()
    }

    pub fn add_agent(&self, node_id: &str, address: impl Into<String>) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(node_id) {
            entry.agents.insert(address.into());
        }
    }

    pub fn remove_agent(&self, node_id: &str, address: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(node_id) {
            entry.agents.remove(address);
        }
    }

    /// Node id of a connected peer serving `address`.
    pub fn find_peer_for(&self, address: &str) -> Option<String> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .find(|p| p.state == PeerState::Connected && p.agents.contains(address))
            .map(|p| p.node_id.clone())
    }

    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node_id: &str, agents: &[&str]) -> PeerEntry {
        PeerEntry::new(
            node_id,
            format!("relay-{node_id}"),
            "127.0.0.1:11000".parse().unwrap(),
            agents.iter().map(|a| a.to_string()),
            1,
        )
    }

    #[test]
    fn test_add_and_find() {
        let registry = PeerRegistry::new();
        registry.add_peer(entry("n1", &["addr-1", "addr-2"]));
        registry.add_peer(entry("n2", &["addr-3"]));

        assert_eq!(registry.connected_count(), 2);
        assert_eq!(registry.find_peer_for("addr-2").as_deref(), Some("n1"));
        assert_eq!(registry.find_peer_for("addr-3").as_deref(), Some("n2"));
        assert!(registry.find_peer_for("addr-9").is_none());
    }

    #[test]
    fn test_agent_notifications() {
        let registry = PeerRegistry::new();
        registry.add_peer(entry("n1", &[]));
        registry.add_agent("n1", "late");
        assert_eq!(registry.find_peer_for("late").as_deref(), Some("n1"));

        registry.remove_agent("n1", "late");
        assert!(registry.find_peer_for("late").is_none());

        // Unknown peers are ignored.
        registry.add_agent("ghost", "x");
        assert!(registry.find_peer_for("x").is_none());
    }

    #[test]
    fn test_disconnected_peer_not_routable() {
        let registry = PeerRegistry::new();
        registry.add_peer(entry("n1", &["addr-1"]));
        registry.mark_disconnected("n1");

        assert_eq!(registry.connected_count(), 0);
        assert_eq!(registry.total_count(), 1);
        assert!(registry.find_peer_for("addr-1").is_none());
        assert!(registry.connected_peers().is_empty());
        assert_eq!(
            registry.get_peer("n1").unwrap().state,
            PeerState::Disconnected
        );

        registry.add_peer(entry("n1", &["addr-1"]));
        assert_eq!(registry.find_peer_for("addr-1").as_deref(), Some("n1"));
        assert!(registry.remove_peer("n1").is_some());
        assert_eq!(registry.total_count(), 0);
    }
}
