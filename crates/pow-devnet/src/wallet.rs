//! # Development Wallet
//!
//! Ed25519 keys held in memory. An address is the key-type prefix followed
//! by the hex of the first 20 bytes of `sha256(public key)`: `f1` for
//! `secp256k1`, `f3` for `bls`. The key types only select the prefix; every
//! key is Ed25519. Balances are plain counters funded at creation.

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use pow_engine::{CapabilityError, WalletManager};
use sha2::{Digest, Sha256};

/// Balance of a freshly created address.
pub const DEFAULT_INITIAL_BALANCE: u64 = 1_000_000_000;

#[derive(Debug)]
pub struct DevWallet {
    keys: DashMap<String, SigningKey>,
    balances: DashMap<String, u64>,
    initial_balance: u64,
}

impl Default for DevWallet {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BALANCE)
    }
}

fn address_of(prefix: &str, key: &SigningKey) -> String {
    let digest = Sha256::digest(key.verifying_key().as_bytes());
    format!("{prefix}{}", hex::encode(&digest[..20]))
}

impl DevWallet {
    pub fn new(initial_balance: u64) -> Self {
        Self {
            keys: DashMap::new(),
            balances: DashMap::new(),
            initial_balance,
        }
    }

    /// Credit `amount` to `addr`, creating its balance if needed.
    pub fn fund(&self, addr: &str, amount: u64) {
        let mut bal = self.balances.entry(addr.to_string()).or_insert(0);
        *bal = bal.saturating_add(amount);
    }

    fn key(&self, addr: &str) -> Result<SigningKey, CapabilityError> {
        self.keys
            .get(addr)
            .map(|k| k.value().clone())
            .ok_or_else(|| CapabilityError::NotFound(format!("address {addr}")))
    }
}

#[async_trait]
impl WalletManager for DevWallet {
    async fn new_address(&self, addr_type: &str) -> Result<String, CapabilityError> {
        let prefix = match addr_type {
            "bls" => "f3",
            "secp256k1" => "f1",
            other => {
                return Err(CapabilityError::Rejected(format!(
                    "unsupported address type {other:?}"
                )))
            }
        };
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let addr = address_of(prefix, &key);
        self.keys.insert(addr.clone(), key);
        self.balances.insert(addr.clone(), self.initial_balance);
        tracing::debug!(addr = %addr, addr_type, "created wallet address");
        Ok(addr)
    }

    async fn list(&self) -> Result<Vec<String>, CapabilityError> {
        let mut addrs: Vec<String> = self.keys.iter().map(|e| e.key().clone()).collect();
        addrs.sort();
        Ok(addrs)
    }

    async fn balance(&self, addr: &str) -> Result<u64, CapabilityError> {
        Ok(self.balances.get(addr).map_or(0, |b| *b.value()))
    }

    async fn send(&self, from: &str, to: &str, amount: u64) -> Result<(), CapabilityError> {
        self.key(from)?;
        if from == to {
            return Ok(());
        }
        {
            let mut src = self
                .balances
                .get_mut(from)
                .ok_or_else(|| CapabilityError::NotFound(format!("address {from}")))?;
            if *src < amount {
                return Err(CapabilityError::Rejected(format!(
                    "insufficient funds: {} < {amount}",
                    *src
                )));
            }
            *src -= amount;
        }
        self.fund(to, amount);
        tracing::debug!(from, to, amount, "sent funds");
        Ok(())
    }

    async fn sign(&self, addr: &str, message: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        let key = self.key(addr)?;
        Ok(key.sign(message).to_bytes().to_vec())
    }

    async fn verify(
        &self,
        addr: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CapabilityError> {
        let key = self.key(addr)?;
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return Ok(false);
        };
        let sig = Signature::from_bytes(&bytes);
        Ok(key.verifying_key().verify(message, &sig).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn addresses_carry_type_prefix() {
        let w = DevWallet::default();
        let bls = w.new_address("bls").await.unwrap();
        let secp = w.new_address("secp256k1").await.unwrap();
        assert!(bls.starts_with("f3"));
        assert!(secp.starts_with("f1"));
        assert_eq!(bls.len(), 42);
        assert_ne!(bls, secp);
        assert!(w.new_address("rsa").await.is_err());
        assert_eq!(w.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sign_and_verify() {
        let w = DevWallet::default();
        let a = w.new_address("bls").await.unwrap();
        let b = w.new_address("bls").await.unwrap();
        let sig = w.sign(&a, b"hello").await.unwrap();
        assert_eq!(sig.len(), 64);
        assert!(w.verify(&a, b"hello", &sig).await.unwrap());
        assert!(!w.verify(&a, b"tampered", &sig).await.unwrap());
        assert!(!w.verify(&b, b"hello", &sig).await.unwrap());
        assert!(!w.verify(&a, b"hello", &sig[..10]).await.unwrap());
        assert!(w.sign("f3unknown", b"x").await.is_err());
    }

    #[tokio::test]
    async fn send_moves_balance() {
        let w = DevWallet::new(100);
        let a = w.new_address("bls").await.unwrap();
        let b = w.new_address("bls").await.unwrap();
        w.send(&a, &b, 40).await.unwrap();
        assert_eq!(w.balance(&a).await.unwrap(), 60);
        assert_eq!(w.balance(&b).await.unwrap(), 140);
        let err = w.send(&a, &b, 61).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Rejected(_)));
        assert_eq!(w.balance(&a).await.unwrap(), 60);
        assert_eq!(w.balance("f1nobody").await.unwrap(), 0);
    }
}
