mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

use primitive_types::U256;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Deterministic binary codec used for every on-wire and on-disk type.
/// Canonical bytes (and therefore hashes) are defined by `write`:
/// integers are big-endian, byte strings carry a u32 length prefix,
/// collections a u16 count.
pub trait Serializer: Sized {
    fn write(&self, writer: &mut Writer);

    fn read(reader: &mut Reader) -> Result<Self, ReaderError>;

    fn size(&self) -> usize {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.total_write()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        Self::read(&mut reader)
    }
}

impl Serializer for bool {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_bool()
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for u8 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u8()
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for u16 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u16()
    }

    fn size(&self) -> usize {
        2
    }
}

impl Serializer for u32 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u32()
    }

    fn size(&self) -> usize {
        4
    }
}

impl Serializer for u64 {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u64()
    }

    fn size(&self) -> usize {
        8
    }
}

// 256-bit balances travel as 32 bytes big-endian
impl Serializer for U256 {
    fn write(&self, writer: &mut Writer) {
        let mut buf = [0u8; 32];
        self.to_big_endian(&mut buf);
        writer.write_bytes(&buf);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes_32()?;
        Ok(U256::from_big_endian(&bytes))
    }

    fn size(&self) -> usize {
        32
    }
}

// Raw byte strings: u32 length followed by the bytes
impl Serializer for Vec<u8> {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.len() as u32);
        writer.write_bytes(self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_u32()? as usize;
        reader.read_bytes(len)
    }

    fn size(&self) -> usize {
        4 + self.len()
    }
}

impl Serializer for SocketAddr {
    fn write(&self, writer: &mut Writer) {
        match self.ip() {
            IpAddr::V4(ip) => {
                writer.write_u8(4);
                writer.write_bytes(&ip.octets());
            }
            IpAddr::V6(ip) => {
                writer.write_u8(6);
                writer.write_bytes(&ip.octets());
            }
        }
        writer.write_u16(self.port());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let ip = match reader.read_u8()? {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&reader.read_bytes(4)?);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&reader.read_bytes(16)?);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return Err(ReaderError::InvalidValue("ip version")),
        };
        let port = reader.read_u16()?;
        Ok(SocketAddr::new(ip, port))
    }

    fn size(&self) -> usize {
        match self.ip() {
            IpAddr::V4(_) => 1 + 4 + 2,
            IpAddr::V6(_) => 1 + 16 + 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Serializer + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = value.to_bytes();
        assert_eq!(bytes.len(), value.size());
        let decoded = T::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_integers_round_trip() {
        round_trip(true);
        round_trip(0xABu8);
        round_trip(0xA0B1u16);
        round_trip(0xDEADBEEFu32);
        round_trip(u64::MAX - 1);
    }

    #[test]
    fn test_integers_are_big_endian() {
        assert_eq!(0x0102u16.to_bytes(), vec![0x01, 0x02]);
        assert_eq!(0x01020304u32.to_bytes(), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_u256_round_trip() {
        round_trip(U256::zero());
        round_trip(U256::MAX);
        round_trip(U256::from(1234567890u64));
    }

    #[test]
    fn test_bytes_round_trip() {
        round_trip(Vec::<u8>::new());
        round_trip(vec![1u8, 2, 3, 4, 5]);
    }

    #[test]
    fn test_socket_addr_round_trip() {
        round_trip("127.0.0.1:2255".parse::<SocketAddr>().unwrap());
        round_trip("[::1]:9000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = 0xDEADBEEFu32.to_bytes();
        assert!(u32::from_bytes(&bytes[..3]).is_err());
    }
}
