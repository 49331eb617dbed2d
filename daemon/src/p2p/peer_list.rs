use super::{
    packet::{Packet, PeerInfo},
    peer::{Peer, PeerState},
};
use log::{debug, trace};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use vela_common::crypto::Address;

/// Bounded pool of live peers. Membership changes go through the pool lock;
/// duplicate endpoints are refused so one remote cannot occupy several
/// slots.
pub struct PeerList {
    peers: RwLock<HashMap<u64, Arc<Peer>>>,
    max_peers: usize,
}

impl PeerList {
    pub fn new(max_peers: usize) -> Self {
        PeerList {
            peers: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    pub async fn try_add(&self, peer: &Arc<Peer>) -> bool {
        let mut peers = self.peers.write().await;
        if peers.len() >= self.max_peers {
            debug!("Peer pool is full, refusing {}", peer);
            return false;
        }
        let endpoint = peer.get_connection_addr();
        if peers
            .values()
            .any(|existing| existing.get_connection_addr() == endpoint)
        {
            debug!("Duplicate endpoint {}, refusing {}", endpoint, peer);
            return false;
        }
        trace!("Adding {} to the pool", peer);
        peers.insert(peer.get_id(), peer.clone());
        true
    }

    pub async fn remove(&self, id: u64) -> Option<Arc<Peer>> {
        let mut peers = self.peers.write().await;
        peers.remove(&id)
    }

    pub async fn count(&self) -> usize {
        let peers = self.peers.read().await;
        peers.len()
    }

    pub async fn get_all(&self) -> Vec<Arc<Peer>> {
        let peers = self.peers.read().await;
        peers.values().cloned().collect()
    }

    pub async fn is_connected_to(&self, endpoint: &SocketAddr) -> bool {
        let peers = self.peers.read().await;
        peers.values().any(|peer| {
            peer.get_connection_addr() == *endpoint
                || peer.get_public_endpoint() == Some(*endpoint)
        })
    }

    // Handshake peer lists: everyone except the receiving node itself
    pub async fn infos_except(&self, excluded: Option<&Address>) -> Vec<PeerInfo> {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter_map(|peer| peer.get_info())
            .filter(|info| Some(&info.address) != excluded)
            .collect()
    }

    // First k known peers, excluding the requester; the address-book walk
    // beyond this is still open
    pub async fn lookup(&self, requester: Option<&Address>, count: u8) -> Vec<PeerInfo> {
        let mut infos = self.infos_except(requester).await;
        infos.truncate(count as usize);
        infos
    }

    // Gossip fan-out to every synchronised peer
    pub async fn broadcast(&self, packet: &Packet) {
        let peers = self.get_all().await;
        for peer in peers {
            if peer.get_state() == PeerState::Synchronised {
                if let Err(e) = peer.send_packet(packet).await {
                    debug!("Broadcast to {} failed: {}", peer, e);
                }
            }
        }
    }

    // Fan-out regardless of state (pings, close notices)
    pub async fn broadcast_all(&self, packet: &Packet) {
        let peers = self.get_all().await;
        for peer in peers {
            if let Err(e) = peer.send_packet(packet).await {
                debug!("Broadcast to {} failed: {}", peer, e);
            }
        }
    }
}
