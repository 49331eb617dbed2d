use super::Address;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature as EcdsaSignature, SigningKey, VerifyingKey,
};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use log::info;
use rand::rngs::OsRng;
use std::{fmt, path::Path};
use thiserror::Error;

pub const PUBLIC_KEY_SIZE: usize = 33; // SEC1 compressed point
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid hex in key file")]
    InvalidHex,

    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),
}

// secp256k1 public key, kept in its compressed SEC1 form on the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let point = self.0.to_encoded_point(true);
        point
            .as_bytes()
            .try_into()
            .expect("compressed secp256k1 point is 33 bytes")
    }

    // ECDSA over SHA-256 of the message
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match EcdsaSignature::from_slice(&signature.0) {
            Ok(sig) => self.0.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl Serializer for PublicKey {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.to_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes(PUBLIC_KEY_SIZE)?;
        PublicKey::from_bytes(&bytes).map_err(|_| ReaderError::InvalidValue("public key"))
    }

    fn size(&self) -> usize {
        PUBLIC_KEY_SIZE
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn new(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl Serializer for Signature {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes(SIGNATURE_SIZE)?;
        Ok(Signature(bytes.try_into().unwrap()))
    }

    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

// secp256k1 keypair used to sign transactions and identify the node
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        KeyPair {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(KeyPair { signing_key })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.signing_key.verifying_key())
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    // ECDSA over SHA-256 of the message
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature: EcdsaSignature = self.signing_key.sign(message);
        Signature(
            signature
                .to_bytes()
                .as_slice()
                .try_into()
                .expect("secp256k1 signature is 64 bytes"),
        )
    }
}

/// Loads the node keypair from disk, generating and persisting a fresh one
/// on first start. Key files hold the raw key material hex-encoded.
pub struct KeyVault {
    keypair: KeyPair,
    address: Address,
}

impl KeyVault {
    pub fn open(public_path: &Path, private_path: &Path) -> Result<Self, CryptoError> {
        let keypair = if private_path.exists() {
            let encoded = std::fs::read_to_string(private_path)?;
            let bytes = hex::decode(encoded.trim()).map_err(|_| CryptoError::InvalidHex)?;
            let keypair = KeyPair::from_secret_bytes(&bytes)?;
            info!("Loaded node key from {}", private_path.display());
            keypair
        } else {
            let keypair = KeyPair::generate();
            std::fs::write(private_path, hex::encode(keypair.secret_bytes()))?;
            std::fs::write(public_path, hex::encode(keypair.public_key().to_bytes()))?;
            info!("Generated new node key at {}", private_path.display());
            keypair
        };

        let address = keypair.address();
        Ok(KeyVault { keypair, address })
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        let address = keypair.address();
        KeyVault { keypair, address }
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"payload");
        assert!(keypair.public_key().verify(b"payload", &signature));
        assert!(!keypair.public_key().verify(b"other payload", &signature));
    }

    #[test]
    fn test_wrong_key_rejects() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let signature = keypair.sign(b"payload");
        assert!(!other.public_key().verify(b"payload", &signature));
    }

    #[test]
    fn test_secret_round_trip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&keypair.secret_bytes()).unwrap();
        assert_eq!(restored.address(), keypair.address());
    }

    #[test]
    fn test_public_key_codec() {
        let public_key = KeyPair::generate().public_key();
        let bytes = Serializer::to_bytes(&public_key);
        assert_eq!(bytes.len(), PUBLIC_KEY_SIZE);
        assert_eq!(PublicKey::from_bytes(&bytes).unwrap(), public_key);
    }

    #[test]
    fn test_vault_persists_key() {
        let dir = tempfile::tempdir().unwrap();
        let public_path = dir.path().join("node.pub");
        let private_path = dir.path().join("node.key");

        let first = KeyVault::open(&public_path, &private_path).unwrap();
        let second = KeyVault::open(&public_path, &private_path).unwrap();
        assert_eq!(first.address(), second.address());
    }
}
