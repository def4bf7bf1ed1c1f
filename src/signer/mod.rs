//! Signing identities and legacy (EIP-155) transaction signing.
//!
//! A [`Wallet`] owns one secp256k1 key. The key never leaves the wallet;
//! callers get the derived address and signed raw transaction bytes.

use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};
use crate::ledger::Address;

pub mod rlp;

use rlp::Item;

/// Unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn fields(&self) -> Vec<Item> {
        vec![
            Item::uint(self.nonce as u128),
            Item::uint(self.gas_price),
            Item::uint(self.gas as u128),
            Item::bytes(self.to.as_bytes()),
            Item::uint(self.value),
            Item::bytes(&self.data),
        ]
    }

    /// Keccak hash that gets signed (EIP-155 replay-protected form).
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.fields();
        fields.push(Item::uint(self.chain_id as u128));
        fields.push(Item::uint(0));
        fields.push(Item::uint(0));
        rlp::encode(&Item::List(fields))
    }
}

pub struct Wallet {
    key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_private_key_hex(private_key: &str) -> Result<Self> {
        let body = private_key.trim();
        let body = body.strip_prefix("0x").unwrap_or(body);
        let bytes = hex::decode(body)
            .map_err(|e| Error::Config(format!("private key is not valid hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(Error::Config(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("invalid secp256k1 private key: {}", e)))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign and return the raw RLP bytes ready for `eth_sendRawTransaction`.
    pub fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<Vec<u8>> {
        let payload = tx.signing_payload();
        let digest = Keccak256::new_with_prefix(&payload);
        let (signature, recovery): (Signature, RecoveryId) = self
            .key
            .sign_digest_recoverable(digest)
            .map_err(|e| Error::Signing(e.to_string()))?;

        let v = recovery.to_byte() as u128 + 35 + 2 * tx.chain_id as u128;
        let rs = signature.to_bytes();

        let mut fields = tx.fields();
        fields.push(Item::uint(v));
        fields.push(Item::scalar(&rs[..32]));
        fields.push(Item::scalar(&rs[32..]));
        Ok(rlp::encode(&Item::List(fields)))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn address_of(key: &SigningKey) -> Address {
    let encoded = key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed-point prefix.
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_derivation() {
        let wallet = Wallet::from_private_key_hex(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        assert_eq!(
            wallet.address().to_checksum(),
            "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"
        );
    }

    #[test]
    fn test_private_key_without_prefix() {
        let a = Wallet::from_private_key_hex(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let b = Wallet::from_private_key_hex(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(Wallet::from_private_key_hex("").is_err());
        assert!(Wallet::from_private_key_hex("0x1234").is_err());
        assert!(Wallet::from_private_key_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_eip155_reference_transaction() {
        let wallet = Wallet::from_private_key_hex(&"46".repeat(32)).unwrap();
        let tx = LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas: 21_000,
            to: Address([0x35; 20]),
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
            chain_id: 1,
        };

        let hash = Keccak256::digest(tx.signing_payload());
        assert_eq!(
            hex::encode(hash),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );

        let raw = wallet.sign_transaction(&tx).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }
}
