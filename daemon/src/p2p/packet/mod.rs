use std::net::SocketAddr;
use vela_common::{
    block::Block,
    crypto::{Address, Hash},
    serializer::{Reader, ReaderError, Serializer, Writer},
    transaction::Transaction,
};

// Wire ids, assigned densely in declaration order
const ACCEPTED_ID: u8 = 1;
const ACCEPTED_RESPONSE_ID: u8 = 2;
const CANNOT_ACCEPT_ID: u8 = 3;
const PING_ID: u8 = 4;
const PONG_ID: u8 = 5;
const LOOKUP_ID: u8 = 6;
const LOOKUP_RESPONSE_ID: u8 = 7;
const TRANSACTION_ID: u8 = 8;
const GET_BLOCK_ID: u8 = 9;
const BLOCK_ID: u8 = 10;
const BLOCK_NOT_FOUND_ID: u8 = 11;
const GET_INFO_ID: u8 = 12;
const INFO_ID: u8 = 13;
const NEW_NODE_ID: u8 = 14;
const CLOSE_ID: u8 = 15;

// Where a peer can be reached and who it claims to be
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PeerInfo {
    pub endpoint: SocketAddr,
    pub address: Address,
}

impl Serializer for PeerInfo {
    fn write(&self, writer: &mut Writer) {
        self.endpoint.write(writer);
        self.address.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let endpoint = SocketAddr::read(reader)?;
        let address = Address::read(reader)?;
        Ok(PeerInfo { endpoint, address })
    }

    fn size(&self) -> usize {
        self.endpoint.size() + self.address.size()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RefusalReason {
    BucketIsFull,
    DuplicateConnection,
}

impl Serializer for RefusalReason {
    fn write(&self, writer: &mut Writer) {
        let id = match self {
            RefusalReason::BucketIsFull => 0,
            RefusalReason::DuplicateConnection => 1,
        };
        writer.write_u8(id);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => RefusalReason::BucketIsFull,
            1 => RefusalReason::DuplicateConnection,
            _ => return Err(ReaderError::InvalidValue("refusal reason")),
        })
    }

    fn size(&self) -> usize {
        1
    }
}

/// First message each side sends: current top block, node identity, the
/// port it accepts connections on, and the peers it already knows.
#[derive(Clone, PartialEq, Debug)]
pub struct Handshake {
    pub top_block: Block,
    pub address: Address,
    pub public_port: u16,
    pub peers: Vec<PeerInfo>,
}

impl Serializer for Handshake {
    fn write(&self, writer: &mut Writer) {
        self.top_block.write(writer);
        self.address.write(writer);
        writer.write_u16(self.public_port);
        write_items(writer, &self.peers);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let top_block = Block::read(reader)?;
        let address = Address::read(reader)?;
        let public_port = reader.read_u16()?;
        let peers = read_items(reader)?;
        Ok(Handshake {
            top_block,
            address,
            public_port,
            peers,
        })
    }

    fn size(&self) -> usize {
        self.top_block.size()
            + self.address.size()
            + 2
            + items_size(&self.peers)
    }
}

/// One message of the peer protocol. The payload on the wire is
/// `u8 id || body`, carried inside a length frame.
#[derive(Clone, PartialEq, Debug)]
pub enum Packet {
    // listener greets an accepted connection
    Accepted(Handshake),
    // connector's reply to Accepted
    AcceptedResponse(Handshake),
    // listener refuses; carries peers worth trying instead
    CannotAccept(RefusalReason, Vec<PeerInfo>),
    Ping,
    Pong,
    // address-book walk request
    Lookup { target: Address, count: u8 },
    LookupResponse(Vec<PeerInfo>),
    Transaction(Transaction),
    GetBlock(Hash),
    Block(Block),
    BlockNotFound(Hash),
    GetInfo,
    Info { top_hash: Hash, peers: Vec<SocketAddr> },
    NewNode { endpoint: SocketAddr, address: Address },
    Close,
}

impl Serializer for Packet {
    fn write(&self, writer: &mut Writer) {
        match self {
            Packet::Accepted(handshake) => {
                writer.write_u8(ACCEPTED_ID);
                handshake.write(writer);
            }
            Packet::AcceptedResponse(handshake) => {
                writer.write_u8(ACCEPTED_RESPONSE_ID);
                handshake.write(writer);
            }
            Packet::CannotAccept(reason, peers) => {
                writer.write_u8(CANNOT_ACCEPT_ID);
                reason.write(writer);
                write_items(writer, peers);
            }
            Packet::Ping => writer.write_u8(PING_ID),
            Packet::Pong => writer.write_u8(PONG_ID),
            Packet::Lookup { target, count } => {
                writer.write_u8(LOOKUP_ID);
                target.write(writer);
                writer.write_u8(*count);
            }
            Packet::LookupResponse(peers) => {
                writer.write_u8(LOOKUP_RESPONSE_ID);
                write_items(writer, peers);
            }
            Packet::Transaction(tx) => {
                writer.write_u8(TRANSACTION_ID);
                tx.write(writer);
            }
            Packet::GetBlock(hash) => {
                writer.write_u8(GET_BLOCK_ID);
                hash.write(writer);
            }
            Packet::Block(block) => {
                writer.write_u8(BLOCK_ID);
                block.write(writer);
            }
            Packet::BlockNotFound(hash) => {
                writer.write_u8(BLOCK_NOT_FOUND_ID);
                hash.write(writer);
            }
            Packet::GetInfo => writer.write_u8(GET_INFO_ID),
            Packet::Info { top_hash, peers } => {
                writer.write_u8(INFO_ID);
                top_hash.write(writer);
                write_items(writer, peers);
            }
            Packet::NewNode { endpoint, address } => {
                writer.write_u8(NEW_NODE_ID);
                endpoint.write(writer);
                address.write(writer);
            }
            Packet::Close => writer.write_u8(CLOSE_ID),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            ACCEPTED_ID => Packet::Accepted(Handshake::read(reader)?),
            ACCEPTED_RESPONSE_ID => Packet::AcceptedResponse(Handshake::read(reader)?),
            CANNOT_ACCEPT_ID => {
                let reason = RefusalReason::read(reader)?;
                let peers = read_items(reader)?;
                Packet::CannotAccept(reason, peers)
            }
            PING_ID => Packet::Ping,
            PONG_ID => Packet::Pong,
            LOOKUP_ID => Packet::Lookup {
                target: Address::read(reader)?,
                count: reader.read_u8()?,
            },
            LOOKUP_RESPONSE_ID => Packet::LookupResponse(read_items(reader)?),
            TRANSACTION_ID => Packet::Transaction(Transaction::read(reader)?),
            GET_BLOCK_ID => Packet::GetBlock(Hash::read(reader)?),
            BLOCK_ID => Packet::Block(Block::read(reader)?),
            BLOCK_NOT_FOUND_ID => Packet::BlockNotFound(Hash::read(reader)?),
            GET_INFO_ID => Packet::GetInfo,
            INFO_ID => Packet::Info {
                top_hash: Hash::read(reader)?,
                peers: read_items(reader)?,
            },
            NEW_NODE_ID => Packet::NewNode {
                endpoint: SocketAddr::read(reader)?,
                address: Address::read(reader)?,
            },
            CLOSE_ID => Packet::Close,
            _ => return Err(ReaderError::InvalidValue("packet id")),
        })
    }

    fn size(&self) -> usize {
        1 + match self {
            Packet::Accepted(handshake) | Packet::AcceptedResponse(handshake) => handshake.size(),
            Packet::CannotAccept(reason, peers) => reason.size() + items_size(peers),
            Packet::Ping | Packet::Pong | Packet::GetInfo | Packet::Close => 0,
            Packet::Lookup { target, .. } => target.size() + 1,
            Packet::LookupResponse(peers) => items_size(peers),
            Packet::Transaction(tx) => tx.size(),
            Packet::GetBlock(hash) | Packet::BlockNotFound(hash) => hash.size(),
            Packet::Block(block) => block.size(),
            Packet::Info { top_hash, peers } => top_hash.size() + items_size(peers),
            Packet::NewNode { endpoint, address } => endpoint.size() + address.size(),
        }
    }
}

fn write_items<T: Serializer>(writer: &mut Writer, items: &[T]) {
    writer.write_u16(items.len() as u16);
    for item in items {
        item.write(writer);
    }
}

fn read_items<T: Serializer>(reader: &mut Reader) -> Result<Vec<T>, ReaderError> {
    let count = reader.read_u16()? as usize;
    let mut items = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        items.push(T::read(reader)?);
    }
    Ok(items)
}

fn items_size<T: Serializer>(items: &[T]) -> usize {
    2 + items.iter().map(|item| item.size()).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_common::{
        account::Balance,
        crypto::KeyPair,
        transaction::TransactionBuilder,
    };

    fn sample_tx() -> Transaction {
        let keypair = KeyPair::generate();
        let mut tx = TransactionBuilder::new()
            .from(keypair.address())
            .to(Address::from_data(b"receiver"))
            .amount(Balance::from(99u64))
            .fee(3)
            .timestamp(1_700_000_000)
            .build()
            .unwrap();
        tx.sign(&keypair);
        tx
    }

    fn sample_block() -> Block {
        Block::new(
            7,
            vela_common::crypto::hash(b"prev"),
            1_700_000_500,
            Address::from_data(b"miner"),
            vec![sample_tx()],
        )
    }

    fn sample_peers() -> Vec<PeerInfo> {
        vec![
            PeerInfo {
                endpoint: "10.0.0.1:2255".parse().unwrap(),
                address: Address::from_data(b"peer one"),
            },
            PeerInfo {
                endpoint: "[2001:db8::1]:2255".parse().unwrap(),
                address: Address::from_data(b"peer two"),
            },
        ]
    }

    fn round_trip(packet: Packet) {
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), packet.size());
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_every_packet_round_trips() {
        let handshake = Handshake {
            top_block: sample_block(),
            address: Address::from_data(b"us"),
            public_port: 2255,
            peers: sample_peers(),
        };

        round_trip(Packet::Accepted(handshake.clone()));
        round_trip(Packet::AcceptedResponse(handshake));
        round_trip(Packet::CannotAccept(
            RefusalReason::BucketIsFull,
            sample_peers(),
        ));
        round_trip(Packet::Ping);
        round_trip(Packet::Pong);
        round_trip(Packet::Lookup {
            target: Address::from_data(b"target"),
            count: 8,
        });
        round_trip(Packet::LookupResponse(sample_peers()));
        round_trip(Packet::Transaction(sample_tx()));
        round_trip(Packet::GetBlock(vela_common::crypto::hash(b"wanted")));
        round_trip(Packet::Block(sample_block()));
        round_trip(Packet::BlockNotFound(vela_common::crypto::hash(b"missing")));
        round_trip(Packet::GetInfo);
        round_trip(Packet::Info {
            top_hash: vela_common::crypto::hash(b"top"),
            peers: vec!["10.1.1.1:2255".parse().unwrap()],
        });
        round_trip(Packet::NewNode {
            endpoint: "10.2.2.2:2255".parse().unwrap(),
            address: Address::from_data(b"new node"),
        });
        round_trip(Packet::Close);
    }

    #[test]
    fn test_unknown_id_rejected() {
        assert!(Packet::from_bytes(&[0xFF]).is_err());
        assert!(Packet::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_truncated_body_rejected() {
        let bytes = Packet::GetBlock(vela_common::crypto::hash(b"wanted")).to_bytes();
        assert!(Packet::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
