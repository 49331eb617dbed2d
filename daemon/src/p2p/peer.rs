use super::{
    connection::{self, Connection},
    error::P2pError,
    packet::{Packet, PeerInfo},
};
use log::trace;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    fmt::{Display, Error, Formatter},
    net::SocketAddr,
    sync::atomic::{AtomicU64, AtomicU8, Ordering},
};
use tokio::sync::watch;
use vela_common::{
    block::Block,
    crypto::{Address, Hash},
    serializer::Serializer,
    time::{get_current_time_in_seconds, TimestampSeconds},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PeerState {
    // connection is up, handshake not concluded
    JustEstablished,
    // walking back their chain with GetBlock
    RequestedBlocks,
    // same chain view, gossip flows
    Synchronised,
}

impl PeerState {
    fn from_u8(value: u8) -> PeerState {
        match value {
            1 => PeerState::RequestedBlocks,
            2 => PeerState::Synchronised,
            _ => PeerState::JustEstablished,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PeerState::JustEstablished => 0,
            PeerState::RequestedBlocks => 1,
            PeerState::Synchronised => 2,
        }
    }
}

/// One remote node. Carries the session write side, the protocol state and
/// the sync tail accumulated while walking back the peer's chain.
pub struct Peer {
    id: u64,
    connection: Connection,
    // true if we dialed this peer
    outgoing: bool,
    state: AtomicU8,
    // identity claimed in the handshake
    node_address: Mutex<Option<Address>>,
    // where this peer accepts inbound connections
    public_endpoint: Mutex<Option<SocketAddr>>,
    // blocks received while syncing, front is the oldest
    sync_blocks: Mutex<VecDeque<Block>>,
    last_seen: AtomicU64,
}

impl Peer {
    pub fn new(id: u64, connection: Connection, outgoing: bool) -> Self {
        Peer {
            id,
            connection,
            outgoing,
            state: AtomicU8::new(PeerState::JustEstablished.as_u8()),
            node_address: Mutex::new(None),
            public_endpoint: Mutex::new(None),
            sync_blocks: Mutex::new(VecDeque::new()),
            last_seen: AtomicU64::new(get_current_time_in_seconds()),
        }
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn get_connection_addr(&self) -> SocketAddr {
        self.connection.addr()
    }

    pub async fn send_packet(&self, packet: &Packet) -> Result<(), P2pError> {
        trace!("Sending {:?} to {}", packet_name(packet), self);
        let framed = connection::frame(&packet.to_bytes())?;
        self.connection.send(framed).await
    }

    pub fn get_state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: PeerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn refresh_last_seen(&self) {
        self.last_seen
            .store(get_current_time_in_seconds(), Ordering::SeqCst);
    }

    pub fn get_last_seen(&self) -> TimestampSeconds {
        self.last_seen.load(Ordering::SeqCst)
    }

    pub fn set_node_address(&self, address: Address) {
        *self.node_address.lock() = Some(address);
    }

    pub fn get_node_address(&self) -> Option<Address> {
        *self.node_address.lock()
    }

    pub fn set_public_endpoint(&self, endpoint: SocketAddr) {
        *self.public_endpoint.lock() = Some(endpoint);
    }

    pub fn get_public_endpoint(&self) -> Option<SocketAddr> {
        *self.public_endpoint.lock()
    }

    pub fn get_info(&self) -> Option<PeerInfo> {
        let address = self.get_node_address()?;
        let endpoint = self
            .get_public_endpoint()
            .unwrap_or_else(|| self.connection.addr());
        Some(PeerInfo { endpoint, address })
    }

    // Sync tail management: blocks arrive newest first while walking back,
    // so each one is pushed to the front and draining yields chain order
    pub fn add_sync_block(&self, block: Block) {
        self.sync_blocks.lock().push_front(block);
    }

    pub fn oldest_sync_prev_hash(&self) -> Option<Hash> {
        self.sync_blocks
            .lock()
            .front()
            .map(|block| block.get_prev_hash().clone())
    }

    pub fn take_sync_blocks(&self) -> Vec<Block> {
        self.sync_blocks.lock().drain(..).collect()
    }

    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.connection.subscribe_close()
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "Peer[{}, {}, {:?}]",
            self.id,
            self.connection.addr(),
            self.get_state()
        )
    }
}

fn packet_name(packet: &Packet) -> &'static str {
    match packet {
        Packet::Accepted(_) => "Accepted",
        Packet::AcceptedResponse(_) => "AcceptedResponse",
        Packet::CannotAccept(..) => "CannotAccept",
        Packet::Ping => "Ping",
        Packet::Pong => "Pong",
        Packet::Lookup { .. } => "Lookup",
        Packet::LookupResponse(_) => "LookupResponse",
        Packet::Transaction(_) => "Transaction",
        Packet::GetBlock(_) => "GetBlock",
        Packet::Block(_) => "Block",
        Packet::BlockNotFound(_) => "BlockNotFound",
        Packet::GetInfo => "GetInfo",
        Packet::Info { .. } => "Info",
        Packet::NewNode { .. } => "NewNode",
        Packet::Close => "Close",
    }
}
