pub mod connection;
pub mod error;
pub mod packet;
pub mod peer;
pub mod peer_list;

use crate::{
    config::{
        NetConfig, P2P_PING_INTERVAL_SECS, PEER_TIMEOUT_SECS, SEEN_ENDPOINTS_CACHE_SIZE,
    },
    core::Core,
};
use log::{debug, info, trace, warn};
use lru::LruCache;
use self::{
    connection::Connection,
    error::P2pError,
    packet::{Handshake, Packet, RefusalReason},
    peer::{Peer, PeerState},
    peer_list::PeerList,
};
use std::{
    collections::HashSet,
    net::SocketAddr,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{tcp::OwnedReadHalf, TcpListener, TcpStream},
    select,
    sync::broadcast,
};
use vela_common::{
    block::Block, crypto::Address, serializer::Serializer,
    time::get_current_time_in_seconds,
};

/// Runs the listening socket and the outbound dialer, owns the peer pool,
/// and bridges core events into gossip. Peers communicate through
/// length-framed packets; any framing or decoding error is fatal for the
/// session.
pub struct P2pServer {
    core: Arc<Core>,
    peer_list: PeerList,
    node_address: Address,
    listen_address: SocketAddr,
    public_port: u16,
    target_peers: usize,
    peer_id_counter: AtomicU64,
    // endpoints we may dial, learned from handshakes and gossip
    known_endpoints: parking_lot::Mutex<HashSet<SocketAddr>>,
    // endpoints already forwarded via NewNode, to stop rebroadcast storms
    seen_new_nodes: parking_lot::Mutex<LruCache<SocketAddr, ()>>,
}

impl P2pServer {
    pub async fn start(core: Arc<Core>, config: &NetConfig) -> Result<Arc<Self>, P2pError> {
        let listener = TcpListener::bind(config.listen_address).await?;
        let listen_address = listener.local_addr()?;
        info!("P2p server listening on {}", listen_address);

        let cache_size = NonZeroUsize::new(SEEN_ENDPOINTS_CACHE_SIZE)
            .unwrap_or(NonZeroUsize::MIN);
        let server = Arc::new(P2pServer {
            node_address: *core.this_node_address(),
            core,
            peer_list: PeerList::new(config.max_peers),
            listen_address,
            public_port: config.public_port,
            target_peers: config.target_peers,
            peer_id_counter: AtomicU64::new(0),
            known_endpoints: parking_lot::Mutex::new(HashSet::new()),
            seen_new_nodes: parking_lot::Mutex::new(LruCache::new(cache_size)),
        });

        tokio::spawn(server.clone().accept_task(listener));
        tokio::spawn(server.clone().maintenance_task());
        Self::spawn_event_forwarders(&server);

        for endpoint in &config.bootstrap_peers {
            server.known_endpoints.lock().insert(*endpoint);
            Self::spawn_check_out(&server, *endpoint);
        }

        Ok(server)
    }

    pub fn peer_list(&self) -> &PeerList {
        &self.peer_list
    }

    // The address actually bound, useful when the configured port is 0
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    pub async fn broadcast(&self, packet: &Packet) {
        self.peer_list.broadcast(packet).await;
    }

    // Polite shutdown: tell everyone, then drop the sessions
    pub async fn stop(&self) {
        info!("Stopping p2p server");
        self.peer_list.broadcast_all(&Packet::Close).await;
        for peer in self.peer_list.get_all().await {
            peer.close();
        }
    }

    async fn accept_task(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Incoming connection from {}", addr);
                    let server = self.clone();
                    tokio::spawn(server.handle_incoming(stream, addr));
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                }
            }
        }
    }

    async fn handle_incoming(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (peer, read_half) = self.create_peer(stream, addr, false);

        if self.peer_list.try_add(&peer).await {
            let handshake = self.build_handshake(None).await;
            if peer.send_packet(&Packet::Accepted(handshake)).await.is_err() {
                self.cleanup_peer(&peer).await;
                return;
            }
        } else {
            let suggestions = self.peer_list.infos_except(None).await;
            let _ = peer
                .send_packet(&Packet::CannotAccept(
                    RefusalReason::BucketIsFull,
                    suggestions,
                ))
                .await;
            peer.close();
            return;
        }

        self.read_loop(peer, read_half).await;
    }

    /// Dials an endpoint and waits for the listener's verdict
    /// (Accepted / CannotAccept). No-op when already connected, when the
    /// endpoint is our own, or when the pool is full.
    pub async fn check_out_peer(self: Arc<Self>, endpoint: SocketAddr) {
        if endpoint == self.listen_address {
            return;
        }
        if self.peer_list.is_connected_to(&endpoint).await {
            trace!("Already connected to {}", endpoint);
            return;
        }

        self.known_endpoints.lock().insert(endpoint);

        match TcpStream::connect(endpoint).await {
            Ok(stream) => {
                debug!("Connected out to {}", endpoint);
                let (peer, read_half) = self.create_peer(stream, endpoint, true);
                let server = self.clone();
                tokio::spawn(server.read_loop(peer, read_half));
            }
            Err(e) => {
                debug!("Cannot reach {}: {}", endpoint, e);
            }
        }
    }

    fn spawn_check_out(server: &Arc<Self>, endpoint: SocketAddr) {
        let server = server.clone();
        tokio::spawn(server.check_out_peer(endpoint));
    }

    fn create_peer(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        outgoing: bool,
    ) -> (Arc<Peer>, OwnedReadHalf) {
        let (read_half, write_half) = stream.into_split();
        let connection = Connection::new(addr, write_half);
        let id = self.peer_id_counter.fetch_add(1, Ordering::SeqCst);
        (Arc::new(Peer::new(id, connection, outgoing)), read_half)
    }

    async fn read_loop(self: Arc<Self>, peer: Arc<Peer>, mut read_half: OwnedReadHalf) {
        let mut close_rx = peer.subscribe_close();
        loop {
            select! {
                result = connection::read_frame(&mut read_half) => match result {
                    Ok(payload) => {
                        peer.refresh_last_seen();
                        let packet = match Packet::from_bytes(&payload) {
                            Ok(packet) => packet,
                            Err(e) => {
                                warn!("Undecodable packet from {}: {}", peer, e);
                                break;
                            }
                        };
                        if let Err(e) = Self::handle_packet(&self, &peer, packet).await {
                            debug!("Session with {} ends: {}", peer, e);
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Read from {} failed: {}", peer, e);
                        break;
                    }
                },
                _ = close_rx.changed() => break,
            }
        }
        self.cleanup_peer(&peer).await;
    }

    async fn cleanup_peer(&self, peer: &Arc<Peer>) {
        peer.close();
        self.peer_list.remove(peer.get_id()).await;
        debug!("Removed {}", peer);
    }

    async fn build_handshake(&self, excluded: Option<&Address>) -> Handshake {
        Handshake {
            top_block: self.core.get_top_block().await,
            address: self.node_address,
            public_port: self.public_port,
            peers: self.peer_list.infos_except(excluded).await,
        }
    }

    async fn handle_packet(
        server: &Arc<Self>,
        peer: &Arc<Peer>,
        packet: Packet,
    ) -> Result<(), P2pError> {
        match packet {
            // the listener let us in; reply and compare chain views
            Packet::Accepted(handshake) => {
                if !server.peer_list.try_add(peer).await {
                    return Err(P2pError::PoolFull);
                }
                server.register_handshake(peer, &handshake);

                let response = server.build_handshake(Some(&handshake.address)).await;
                peer.send_packet(&Packet::AcceptedResponse(response)).await?;

                for info in &handshake.peers {
                    Self::spawn_check_out(server, info.endpoint);
                }
                server.compare_top_block(peer, handshake.top_block).await?;
            }
            Packet::AcceptedResponse(handshake) => {
                server.register_handshake(peer, &handshake);
                for info in &handshake.peers {
                    Self::spawn_check_out(server, info.endpoint);
                }
                server.compare_top_block(peer, handshake.top_block).await?;
            }
            Packet::CannotAccept(reason, suggestions) => {
                debug!("{} refused us: {:?}", peer, reason);
                for info in suggestions {
                    Self::spawn_check_out(server, info.endpoint);
                }
                return Err(P2pError::Closed);
            }
            Packet::Ping => {
                peer.send_packet(&Packet::Pong).await?;
            }
            Packet::Pong => {}
            Packet::Lookup { target: _, count } => {
                // answered from the pool; the target-distance walk is not
                // implemented, the requester just gets peers to try
                let requester = peer.get_node_address();
                let infos = server.peer_list.lookup(requester.as_ref(), count).await;
                peer.send_packet(&Packet::LookupResponse(infos)).await?;
            }
            Packet::LookupResponse(infos) => {
                let mut known = server.known_endpoints.lock();
                for info in infos {
                    known.insert(info.endpoint);
                }
            }
            Packet::Transaction(tx) => {
                let status = server.core.add_pending_transaction(tx).await;
                trace!("Gossiped tx resolved to {}", status);
            }
            Packet::GetBlock(hash) => {
                debug!("Received GetBlock for {}", hash);
                match server.core.find_block(&hash).await? {
                    Some(block) => peer.send_packet(&Packet::Block(block)).await?,
                    None => peer.send_packet(&Packet::BlockNotFound(hash)).await?,
                }
            }
            Packet::Block(block) => {
                server.handle_block(peer, block).await?;
            }
            Packet::BlockNotFound(hash) => {
                debug!("{} does not have block {}", peer, hash);
            }
            Packet::GetInfo => {
                let top_hash = server.core.get_top_block_hash().await;
                let peers = server
                    .peer_list
                    .infos_except(peer.get_node_address().as_ref())
                    .await
                    .into_iter()
                    .map(|info| info.endpoint)
                    .collect();
                peer.send_packet(&Packet::Info { top_hash, peers }).await?;
            }
            Packet::Info { top_hash, peers } => {
                trace!("{} reports top {}", peer, top_hash);
                let mut known = server.known_endpoints.lock();
                for endpoint in peers {
                    known.insert(endpoint);
                }
            }
            Packet::NewNode { endpoint, address } => {
                let already_seen = {
                    let mut seen = server.seen_new_nodes.lock();
                    seen.put(endpoint, ()).is_some()
                };
                if !already_seen {
                    server.known_endpoints.lock().insert(endpoint);
                    Self::spawn_check_out(server, endpoint);
                    // forward once
                    server
                        .peer_list
                        .broadcast(&Packet::NewNode { endpoint, address })
                        .await;
                }
            }
            Packet::Close => {
                debug!("{} closed the session", peer);
                return Err(P2pError::Closed);
            }
        }
        Ok(())
    }

    fn register_handshake(&self, peer: &Arc<Peer>, handshake: &Handshake) {
        peer.set_node_address(handshake.address);
        if handshake.public_port != 0 {
            let mut endpoint = peer.get_connection_addr();
            endpoint.set_port(handshake.public_port);
            peer.set_public_endpoint(endpoint);
            self.known_endpoints.lock().insert(endpoint);
        }
    }

    /// Handshake chain comparison. Equal tops or a shorter remote chain
    /// mean we are synchronised; a remote top exactly one ahead is applied
    /// directly; anything further starts the walk-back sync.
    async fn compare_top_block(
        &self,
        peer: &Arc<Peer>,
        their_top: Block,
    ) -> Result<(), P2pError> {
        let our_top = self.core.get_top_block().await;

        if their_top == our_top || our_top.get_depth() > their_top.get_depth() {
            // nothing to pull from this peer, it may pull from us
            peer.set_state(PeerState::Synchronised);
            return Ok(());
        }

        if our_top.get_depth() + 1 == their_top.get_depth() {
            self.core.try_add_block(their_top).await?;
            peer.set_state(PeerState::Synchronised);
            return Ok(());
        }

        let prev_hash = their_top.get_prev_hash().clone();
        peer.add_sync_block(their_top);
        peer.send_packet(&Packet::GetBlock(prev_hash)).await?;
        peer.set_state(PeerState::RequestedBlocks);
        Ok(())
    }

    async fn handle_block(&self, peer: &Arc<Peer>, block: Block) -> Result<(), P2pError> {
        match peer.get_state() {
            PeerState::Synchronised => {
                // plain gossip
                if !self.core.try_add_block(block).await? {
                    debug!("Gossiped block from {} was not applied", peer);
                }
            }
            PeerState::RequestedBlocks => {
                let depth = block.get_depth();
                peer.add_sync_block(block);

                let our_depth = self.core.get_top_block().await.get_depth();
                if depth == our_depth + 1 {
                    self.apply_sync_blocks(peer).await?;
                    peer.set_state(PeerState::Synchronised);
                } else {
                    match peer.oldest_sync_prev_hash() {
                        Some(prev_hash) => {
                            peer.send_packet(&Packet::GetBlock(prev_hash)).await?
                        }
                        None => return Err(P2pError::InvalidFrame),
                    }
                }
            }
            PeerState::JustEstablished => {
                debug!("Ignoring block from {} before handshake", peer);
            }
        }
        Ok(())
    }

    // Applies the accumulated walk-back tail oldest to newest
    async fn apply_sync_blocks(&self, peer: &Arc<Peer>) -> Result<(), P2pError> {
        let blocks = peer.take_sync_blocks();
        info!("Applying {} synced blocks from {}", blocks.len(), peer);
        for block in blocks {
            if !self.core.try_add_block(block).await? {
                warn!("Synced block from {} was rejected", peer);
                break;
            }
        }
        Ok(())
    }

    async fn maintenance_task(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(P2P_PING_INTERVAL_SECS));
        loop {
            ticker.tick().await;

            // liveness probe for everyone
            self.peer_list.broadcast_all(&Packet::Ping).await;

            // prune peers gone silent
            let now = get_current_time_in_seconds();
            for peer in self.peer_list.get_all().await {
                if now.saturating_sub(peer.get_last_seen()) > PEER_TIMEOUT_SECS {
                    info!("Pruning silent peer {}", peer);
                    self.cleanup_peer(&peer).await;
                }
            }

            // meet the target peer count from the address book
            let connected = self.peer_list.count().await;
            if connected < self.target_peers {
                let candidates: Vec<SocketAddr> = {
                    let known = self.known_endpoints.lock();
                    known.iter().copied().collect()
                };
                let mut dialed = 0;
                for endpoint in candidates {
                    if dialed >= self.target_peers - connected {
                        break;
                    }
                    if !self.peer_list.is_connected_to(&endpoint).await {
                        Self::spawn_check_out(&self, endpoint);
                        dialed += 1;
                    }
                }
            }
        }
    }

    // Core events feed the gossip: every accepted block and every newly
    // admitted transaction is rebroadcast to synchronised peers
    fn spawn_event_forwarders(server: &Arc<Self>) {
        let block_server = server.clone();
        let mut block_events = block_server.core.subscribe_blocks();
        tokio::spawn(async move {
            loop {
                match block_events.recv().await {
                    Ok(event) => {
                        trace!("Rebroadcasting block {}", event.hash);
                        block_server
                            .broadcast(&Packet::Block((*event.block).clone()))
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Block event stream lagged by {}", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let tx_server = server.clone();
        let mut tx_events = tx_server.core.subscribe_transactions();
        tokio::spawn(async move {
            loop {
                match tx_events.recv().await {
                    Ok(tx) => {
                        tx_server
                            .broadcast(&Packet::Transaction((*tx).clone()))
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Transaction event stream lagged by {}", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
