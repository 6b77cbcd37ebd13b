//! Type definitions and protocol constants for ChainMail.

use thiserror::Error;

/// Magic prefix placed in front of every marshalled envelope on-chain.
///
/// Scanners check for this before attempting to unmarshal, so unrelated
/// transaction data is skipped cheaply.
pub const FRAME_PREFIX: &[u8] = b"chainmail";

/// Envelope kind: message stored off-chain, referenced via an encrypted
/// location identifier.
pub const KIND_STORED: u8 = 0x01;

/// Envelope kind: encrypted message contents carried inline.
pub const KIND_INLINE: u8 = 0x02;

/// Size of an X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a SHA-256 digest in bytes.
pub const HASH_SIZE: usize = 32;

/// Size of the ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-CBC initialisation vector in bytes.
pub const IV_SIZE: usize = 16;

/// Size of the HMAC-SHA256 tag appended by the aes256cbc cipher.
pub const MAC_SIZE: usize = 32;

/// Key derivation salt for seed-derived encryption keys.
pub const KEY_DERIVATION_SALT: &[u8] = b"ChainMail-v1-encryption";

/// Key derivation info for seed-derived encryption keys.
pub const KEY_DERIVATION_INFO: &[u8] = b"x25519-key";

/// HKDF info used by the aes256cbc cipher.
pub const AES_CBC_INFO: &[u8] = b"ChainMailV1-aes256cbc";

/// HKDF info used by the nacl-ecdh cipher.
pub const NACL_ECDH_INFO: &[u8] = b"ChainMailV1-nacl-ecdh";

/// Errors that can occur during ChainMail operations.
#[derive(Error, Debug)]
pub enum ChainMailError {
    // Format Errors
    /// Malformed envelope, framing or message.
    #[error("Format error: {0}")]
    Format(String),

    // Crypto Errors
    /// Wrong key or corrupt ciphertext.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Encryption failed on the sending side.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// No cipher registered under this name.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Invalid seed length.
    #[error("Invalid seed length: expected 32 bytes, got {0}")]
    InvalidSeedLength(usize),

    /// Invalid public key format.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    // Integrity Errors
    /// Hash mismatch after successful decryption, or a corrupted fetch.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    // Envelope Errors
    /// An envelope contribution was rejected by the builder.
    #[error("Invalid envelope field `{field}`: {reason}")]
    EnvelopeBuild { field: &'static str, reason: String },

    // Storage Errors
    /// Content store or cache failure.
    #[error("Storage failed: {0}")]
    Storage(String),

    /// Key not found in the key store.
    #[error("Key not found for address: {0}")]
    KeyNotFound(String),

    // Configuration Errors
    /// Unsupported cipher name, location code or receiver kind.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid address for the given protocol.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Network Errors
    /// No collaborator configured for this protocol and network.
    #[error("Network not supported: {protocol}/{network}")]
    NetworkNotSupported { protocol: String, network: String },

    /// On-chain send failed.
    #[error("Transport failed: {0}")]
    Transport(String),
}

impl ChainMailError {
    /// Whether this error means the envelope was addressed to someone else.
    ///
    /// Decryption failures are expected for every envelope a recipient
    /// scans that was meant for another key.
    pub fn is_foreign(&self) -> bool {
        matches!(self, ChainMailError::Decryption(_))
    }

    /// Whether this error is always a genuine fault.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ChainMailError::Integrity(_) | ChainMailError::Storage(_)
        )
    }

    /// Whether this error reports a missing network collaborator.
    pub fn is_network_not_supported(&self) -> bool {
        matches!(self, ChainMailError::NetworkNotSupported { .. })
    }

    /// Convenience constructor for [`ChainMailError::NetworkNotSupported`].
    pub fn network_not_supported(protocol: impl Into<String>, network: impl Into<String>) -> Self {
        ChainMailError::NetworkNotSupported {
            protocol: protocol.into(),
            network: network.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainMailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(ChainMailError::Decryption("bad tag".into()).is_foreign());
        assert!(!ChainMailError::Decryption("bad tag".into()).is_fault());
        assert!(ChainMailError::Integrity("mismatch".into()).is_fault());
        assert!(ChainMailError::Storage("down".into()).is_fault());
        assert!(!ChainMailError::Format("short".into()).is_fault());
        assert!(ChainMailError::network_not_supported("ethereum", "goerli")
            .is_network_not_supported());
    }

    #[test]
    fn test_envelope_build_message_names_field() {
        let err = ChainMailError::EnvelopeBuild {
            field: "location",
            reason: "unknown code 9".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid envelope field `location`: unknown code 9"
        );
    }
}
