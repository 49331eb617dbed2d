use super::{hash, PublicKey};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use ripemd::{Digest, Ripemd160};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const ADDRESS_SIZE: usize = 20; // RIPEMD-160 output

/// A 20-byte account identifier: RIPEMD160(SHA256(compressed public key)).
/// The all-zero address is a sentinel used for contract-creation
/// destinations and the genesis sender.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, std::hash::Hash)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub const fn null() -> Self {
        Address([0; ADDRESS_SIZE])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_data(&public_key.to_bytes())
    }

    // RIPEMD160(SHA256(data)); also used to derive contract addresses
    pub fn from_data(data: &[u8]) -> Self {
        let sha = hash(data);
        let ripemd: [u8; ADDRESS_SIZE] = Ripemd160::digest(sha.as_bytes()).into();
        Address(ripemd)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl FromStr for Address {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| "Invalid base58 string")?;
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| "Invalid address length")?;
        Ok(Address(bytes))
    }
}

impl Serializer for Address {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes(ADDRESS_SIZE)?;
        Ok(Address(bytes.try_into().unwrap()))
    }

    fn size(&self) -> usize {
        ADDRESS_SIZE
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.to_base58())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'a> Deserialize<'a> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(SerdeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GENESIS_RECIPIENT;

    #[test]
    fn test_null_address() {
        assert!(Address::null().is_null());
        assert!(!Address::from_data(b"somebody").is_null());
    }

    #[test]
    fn test_base58_round_trip() {
        let addr = Address::from_data(b"round trip");
        let parsed: Address = addr.to_base58().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_genesis_recipient_parses() {
        let addr: Address = GENESIS_RECIPIENT.parse().unwrap();
        assert!(!addr.is_null());
        assert_eq!(addr.to_base58(), GENESIS_RECIPIENT);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        assert_eq!(Address::from_data(b"a"), Address::from_data(b"a"));
        assert_ne!(Address::from_data(b"a"), Address::from_data(b"b"));
    }

    #[test]
    fn test_invalid_base58_rejected() {
        assert!("not-base58-0OIl".parse::<Address>().is_err());
        // valid base58 but wrong length
        assert!("abc".parse::<Address>().is_err());
    }
}
