//! Blockchain interfaces.
//!
//! This module provides the traits the core uses to reach chains: a
//! [`Sender`] submits framed envelopes and a [`Receiver`] scans one API
//! flavour for transactions touching an address. Concrete clients live
//! outside this crate.

use std::time::Duration;

use ed25519_dalek::{Signer as _, SigningKey};

use crate::address::Protocol;
use crate::fetch::ReceiverKind;
use crate::types::Result;

/// Block a transaction was included in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    /// Block height.
    Number(u64),
    /// Block identifier, for chains that name blocks by hash.
    Id(String),
}

/// A protocol-neutral transaction record returned by a [`Receiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction payload data (a framed envelope if ours).
    pub envelope_data: Vec<u8>,
    /// Block the transaction was included in.
    pub block: BlockRef,
    /// Transaction hash.
    pub hash: Vec<u8>,
}

impl Transaction {
    /// Creates a transaction record.
    pub fn new(envelope_data: impl Into<Vec<u8>>, block: BlockRef, hash: impl Into<Vec<u8>>) -> Self {
        Self {
            envelope_data: envelope_data.into(),
            block,
            hash: hash.into(),
        }
    }

    /// Hex-encoded transaction hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// Trait for scanning a blockchain API for transactions to an address.
#[async_trait::async_trait]
pub trait Receiver: Send + Sync {
    /// The API flavour this receiver talks to.
    fn kind(&self) -> ReceiverKind;

    /// Fetch transactions touching `address` on `protocol`/`network`.
    ///
    /// Fails with [`ChainMailError::NetworkNotSupported`](crate::ChainMailError::NetworkNotSupported)
    /// when the receiver has no endpoint for the network.
    async fn receive(
        &self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
    ) -> Result<Vec<Transaction>>;
}

/// Options for sending a transaction.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Wait for the transaction to be confirmed.
    pub wait_for_confirmation: bool,
    /// Maximum time to wait for confirmation.
    pub confirmation_timeout: Duration,
    /// Fee override in the chain's smallest unit.
    pub fee: Option<u64>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            wait_for_confirmation: false,
            confirmation_timeout: Duration::from_secs(60),
            fee: None,
        }
    }
}

impl SendOptions {
    /// Fire-and-forget (no waiting).
    pub fn fire_and_forget() -> Self {
        Self::default()
    }

    /// Wait for confirmation.
    pub fn confirmed() -> Self {
        Self {
            wait_for_confirmation: true,
            ..Default::default()
        }
    }

    /// Set the fee.
    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = Some(fee);
        self
    }
}

/// Trait for signing transactions. The core hands it to the [`Sender`]
/// untouched.
pub trait Signer: Send + Sync {
    /// Public key of the signing account.
    fn public_key(&self) -> Vec<u8>;

    /// Sign raw transaction bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Ed25519 signer for chains with Ed25519 accounts.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Creates a signer from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(data).to_bytes().to_vec())
    }
}

/// Trait for submitting payloads to a chain.
#[async_trait::async_trait]
pub trait Sender: Send + Sync {
    /// Submit `payload` from `from` to `to` on `network`.
    async fn send(
        &self,
        network: &str,
        to: &[u8],
        from: &[u8],
        payload: &[u8],
        signer: &dyn Signer,
        options: &SendOptions,
    ) -> Result<()>;
}
