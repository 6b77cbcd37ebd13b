//! Private key storage used to build decrypters.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use x25519_dalek::StaticSecret;

use crate::address::Protocol;
use crate::types::{ChainMailError, Result};

/// Options controlling how a stored key is unlocked.
#[derive(Debug, Clone, Default)]
pub struct KeyDeriveOptions {
    /// Passphrase protecting the key, if the key was stored with one.
    pub passphrase: Option<String>,
}

impl KeyDeriveOptions {
    /// Options unlocking a key with the given passphrase.
    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
        }
    }
}

/// Trait for looking up encryption private keys.
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    /// Retrieve the private key for an address on a protocol and network.
    async fn private_key(
        &self,
        address: &[u8],
        protocol: Protocol,
        network: &str,
        options: &KeyDeriveOptions,
    ) -> Result<StaticSecret>;

    /// Check if a key exists for an address.
    async fn has_key(&self, address: &[u8], protocol: Protocol, network: &str) -> bool;
}

struct StoredKey {
    secret: [u8; 32],
    passphrase: Option<String>,
}

type KeyId = (Protocol, String, Vec<u8>);

/// In-memory implementation of KeyStore.
///
/// WARNING: This is NOT secure for production use. Keys are stored in memory
/// without encryption and are lost when the process exits.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Arc<RwLock<HashMap<KeyId, StoredKey>>>,
}

impl InMemoryKeyStore {
    /// Creates a new in-memory key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a private key for an address.
    pub async fn store(
        &self,
        address: &[u8],
        protocol: Protocol,
        network: &str,
        private_key: &StaticSecret,
        passphrase: Option<&str>,
    ) {
        let mut keys = self.keys.write().await;
        keys.insert(
            (protocol, network.to_string(), address.to_vec()),
            StoredKey {
                secret: private_key.to_bytes(),
                passphrase: passphrase.map(str::to_string),
            },
        );
    }

    /// Delete the key for an address.
    pub async fn delete(&self, address: &[u8], protocol: Protocol, network: &str) {
        let mut keys = self.keys.write().await;
        keys.remove(&(protocol, network.to_string(), address.to_vec()));
    }
}

#[async_trait::async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn private_key(
        &self,
        address: &[u8],
        protocol: Protocol,
        network: &str,
        options: &KeyDeriveOptions,
    ) -> Result<StaticSecret> {
        let keys = self.keys.read().await;
        let stored = keys
            .get(&(protocol, network.to_string(), address.to_vec()))
            .ok_or_else(|| {
                ChainMailError::KeyNotFound(format!(
                    "{}@{}.{}",
                    protocol.encode_address(address),
                    network,
                    protocol
                ))
            })?;

        if let Some(expected) = &stored.passphrase {
            if options.passphrase.as_deref() != Some(expected.as_str()) {
                return Err(ChainMailError::Configuration(
                    "key is locked: passphrase does not match".to_string(),
                ));
            }
        }

        Ok(StaticSecret::from(stored.secret))
    }

    async fn has_key(&self, address: &[u8], protocol: Protocol, network: &str) -> bool {
        let keys = self.keys.read().await;
        keys.contains_key(&(protocol, network.to_string(), address.to_vec()))
    }
}
