mod address;
mod hash;
mod keys;

pub use address::{Address, ADDRESS_SIZE};
pub use hash::{hash, Hash, Hashable, HASH_SIZE};
pub use keys::{
    CryptoError, KeyPair, KeyVault, PublicKey, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
