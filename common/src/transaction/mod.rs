mod builder;
mod status;

pub use builder::{TransactionBuilder, TransactionError};
pub use status::{ActionType, StatusCode, TransactionStatus};

use crate::{
    account::Balance,
    crypto::{Address, Hash, Hashable, KeyPair, PublicKey, Signature},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};

/// Fee in base units; it doubles as the gas budget handed to the EVM,
/// which is why it is 64-bit while amounts are 256-bit.
pub type Fee = u64;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[default]
    Transfer,
    MessageCall,
    ContractCreation,
}

impl Serializer for TransactionType {
    fn write(&self, writer: &mut Writer) {
        let id = match self {
            TransactionType::Transfer => 0,
            TransactionType::MessageCall => 1,
            TransactionType::ContractCreation => 2,
        };
        writer.write_u8(id);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => TransactionType::Transfer,
            1 => TransactionType::MessageCall,
            2 => TransactionType::ContractCreation,
            _ => return Err(ReaderError::InvalidValue("transaction type")),
        })
    }

    fn size(&self) -> usize {
        1
    }
}

/// Sender authentication: the sender's public key and an ECDSA signature
/// over SHA-256 of the canonical transaction header bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Sign {
    public_key: PublicKey,
    signature: Signature,
}

impl Sign {
    pub fn new(public_key: PublicKey, signature: Signature) -> Self {
        Sign {
            public_key,
            signature,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl Serializer for Sign {
    fn write(&self, writer: &mut Writer) {
        self.public_key.write(writer);
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let public_key = PublicKey::read(reader)?;
        let signature = Signature::read(reader)?;
        Ok(Sign::new(public_key, signature))
    }

    fn size(&self) -> usize {
        self.public_key.size() + self.signature.size()
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    from: Address,
    to: Address,
    amount: Balance,
    fee: Fee,
    timestamp: Timestamp,
    tx_type: TransactionType,
    data: Vec<u8>,
    sign: Option<Sign>,
}

impl Transaction {
    pub(crate) fn new(
        from: Address,
        to: Address,
        amount: Balance,
        fee: Fee,
        timestamp: Timestamp,
        tx_type: TransactionType,
        data: Vec<u8>,
        sign: Option<Sign>,
    ) -> Self {
        Transaction {
            from,
            to,
            amount,
            fee,
            timestamp,
            tx_type,
            data,
            sign,
        }
    }

    pub fn get_from(&self) -> &Address {
        &self.from
    }

    pub fn get_to(&self) -> &Address {
        &self.to
    }

    pub fn get_amount(&self) -> Balance {
        self.amount
    }

    pub fn get_fee(&self) -> Fee {
        self.fee
    }

    pub fn get_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn get_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn get_sign(&self) -> Option<&Sign> {
        self.sign.as_ref()
    }

    // Total cost charged to the sender if the transaction fully executes
    pub fn get_cost(&self) -> Balance {
        self.amount.saturating_add(Balance::from(self.fee))
    }

    // Canonical header bytes: everything except the signature.
    // This is what gets signed and what identifies the transaction.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write_header(&mut writer);
        writer.into_bytes()
    }

    fn write_header(&self, writer: &mut Writer) {
        self.from.write(writer);
        self.to.write(writer);
        self.amount.write(writer);
        writer.write_u64(self.fee);
        writer.write_u32(self.timestamp);
        self.tx_type.write(writer);
        self.data.write(writer);
    }

    pub fn sign(&mut self, keypair: &KeyPair) {
        let signature = keypair.sign(&self.header_bytes());
        self.sign = Some(Sign::new(keypair.public_key(), signature));
    }

    /// A transaction is accepted only if it carries a signature, the
    /// signature verifies over the canonical header, and the address
    /// derived from the signing key equals `from`.
    pub fn check_sign(&self) -> bool {
        let Some(sign) = &self.sign else {
            return false;
        };

        if Address::from_public_key(sign.public_key()) != self.from {
            return false;
        }

        sign.public_key()
            .verify(&self.header_bytes(), sign.signature())
    }

    // Structural invariants checked at admission and in blocks
    pub fn is_well_formed(&self) -> bool {
        let is_creation = self.tx_type == TransactionType::ContractCreation;
        if self.to.is_null() != is_creation {
            return false;
        }
        match self.tx_type {
            TransactionType::ContractCreation => !self.data.is_empty(),
            // amount-0 calls are legal as long as they carry input
            TransactionType::MessageCall => {
                self.amount > Balance::zero() || !self.data.is_empty()
            }
            TransactionType::Transfer => self.amount > Balance::zero(),
        }
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        self.write_header(writer);
        match &self.sign {
            Some(sign) => {
                writer.write_bool(true);
                sign.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let from = Address::read(reader)?;
        let to = Address::read(reader)?;
        let amount = Balance::read(reader)?;
        let fee = reader.read_u64()?;
        let timestamp = reader.read_u32()?;
        let tx_type = TransactionType::read(reader)?;
        let data = Vec::<u8>::read(reader)?;
        let sign = if reader.read_bool()? {
            Some(Sign::read(reader)?)
        } else {
            None
        };

        Ok(Transaction::new(
            from, to, amount, fee, timestamp, tx_type, data, sign,
        ))
    }

    fn size(&self) -> usize {
        let sign_size = match &self.sign {
            Some(sign) => 1 + sign.size(),
            None => 1,
        };
        self.from.size()
            + self.to.size()
            + self.amount.size()
            + 8
            + 4
            + self.tx_type.size()
            + self.data.size()
            + sign_size
    }
}

// Transactions are identified by the hash of their header: the signature
// does not change the identity.
impl Hashable for Transaction {
    fn hash(&self) -> Hash {
        crate::crypto::hash(&self.header_bytes())
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "Transaction[from: {}, to: {}, amount: {}, fee: {}, timestamp: {}, type: {:?}, signed: {}]",
            self.from,
            self.to,
            self.amount,
            self.fee,
            self.timestamp,
            self.tx_type,
            self.sign.is_some(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(keypair: &KeyPair, amount: u64) -> Transaction {
        let mut tx = TransactionBuilder::new()
            .from(keypair.address())
            .to(Address::from_data(b"receiver"))
            .amount(Balance::from(amount))
            .fee(10)
            .timestamp(1_700_000_000)
            .build()
            .unwrap();
        tx.sign(keypair);
        tx
    }

    #[test]
    fn test_round_trip() {
        let keypair = KeyPair::generate();
        let tx = transfer(&keypair, 500);
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.check_sign());
    }

    #[test]
    fn test_hash_ignores_signature() {
        let keypair = KeyPair::generate();
        let mut unsigned = TransactionBuilder::new()
            .from(keypair.address())
            .to(Address::from_data(b"receiver"))
            .amount(Balance::from(500u64))
            .fee(10)
            .timestamp(1_700_000_000)
            .build()
            .unwrap();
        let before = unsigned.hash();
        unsigned.sign(&keypair);
        assert_eq!(unsigned.hash(), before);
    }

    #[test]
    fn test_unsigned_rejected() {
        let keypair = KeyPair::generate();
        let tx = TransactionBuilder::new()
            .from(keypair.address())
            .to(Address::from_data(b"receiver"))
            .amount(Balance::from(1u64))
            .fee(0)
            .timestamp(1_700_000_000)
            .build()
            .unwrap();
        assert!(!tx.check_sign());
    }

    #[test]
    fn test_foreign_key_rejected() {
        let keypair = KeyPair::generate();
        let stranger = KeyPair::generate();
        // signed by a key that does not match `from`
        let mut tx = TransactionBuilder::new()
            .from(keypair.address())
            .to(Address::from_data(b"receiver"))
            .amount(Balance::from(1u64))
            .fee(0)
            .timestamp(1_700_000_000)
            .build()
            .unwrap();
        tx.sign(&stranger);
        assert!(!tx.check_sign());
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let keypair = KeyPair::generate();
        let tx = transfer(&keypair, 500);

        // same header except the amount, carrying the original signature
        let tampered = Transaction::new(
            *tx.get_from(),
            *tx.get_to(),
            Balance::from(9_999u64),
            tx.get_fee(),
            tx.get_timestamp(),
            tx.get_type(),
            tx.get_data().to_vec(),
            tx.get_sign().cloned(),
        );
        assert!(!tampered.check_sign());
    }

    #[test]
    fn test_well_formed_rules() {
        let from = Address::from_data(b"sender");
        // zero-amount transfer is malformed
        let tx = TransactionBuilder::new()
            .from(from)
            .to(Address::from_data(b"receiver"))
            .amount(Balance::zero())
            .fee(10)
            .timestamp(1)
            .build();
        assert!(tx.is_err());

        // creation with data and zero amount is fine
        let tx = TransactionBuilder::new()
            .from(from)
            .contract_creation(vec![0x60, 0x00])
            .fee(10)
            .timestamp(1)
            .build()
            .unwrap();
        assert!(tx.is_well_formed());
        assert!(tx.get_to().is_null());
    }
}
