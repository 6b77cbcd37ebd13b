//! Key derivation and management for ChainMail.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::{
    ChainMailError, Result, KEY_DERIVATION_INFO, KEY_DERIVATION_SALT, PUBLIC_KEY_SIZE,
};

/// Derive a recipient's long-lived X25519 keypair from a 32-byte account seed.
pub fn derive_keys_from_seed(seed: &[u8]) -> Result<(StaticSecret, PublicKey)> {
    let seed: &[u8; 32] = seed
        .try_into()
        .map_err(|_| ChainMailError::InvalidSeedLength(seed.len()))?;

    let mut secret = [0u8; 32];
    Hkdf::<Sha256>::new(Some(KEY_DERIVATION_SALT), seed)
        .expand(KEY_DERIVATION_INFO, &mut secret)
        .map_err(|e| ChainMailError::Encryption(format!("HKDF expand failed: {}", e)))?;

    let secret = StaticSecret::from(secret);
    let public = PublicKey::from(&secret);
    Ok((secret, public))
}

/// Fresh single-use keypair; every encryption gets its own.
pub fn generate_ephemeral_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(rand::thread_rng());
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Perform X25519 ECDH key exchange, returning the 32-byte shared secret.
pub fn x25519_ecdh(private_key: &StaticSecret, public_key: &PublicKey) -> [u8; 32] {
    private_key.diffie_hellman(public_key).to_bytes()
}

/// Parse a recipient public key from raw bytes.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey> {
    let key: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        ChainMailError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_SIZE,
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE_SEED_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000001";
    const BOB_SEED_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000002";

    #[test]
    fn test_invalid_seed_length() {
        assert!(matches!(
            derive_keys_from_seed(b"short seed"),
            Err(ChainMailError::InvalidSeedLength(10))
        ));
        assert!(matches!(
            derive_keys_from_seed(&[0u8; 33]),
            Err(ChainMailError::InvalidSeedLength(33))
        ));
    }

    #[test]
    fn test_same_seed_same_keypair() {
        let seed = hex::decode(ALICE_SEED_HEX).unwrap();
        let (secret_a, public_a) = derive_keys_from_seed(&seed).unwrap();
        let (secret_b, public_b) = derive_keys_from_seed(&seed).unwrap();
        assert_eq!(public_a, public_b);
        assert_eq!(secret_a.to_bytes(), secret_b.to_bytes());
    }

    #[test]
    fn test_distinct_seeds_distinct_keys() {
        let (_, alice) = derive_keys_from_seed(&hex::decode(ALICE_SEED_HEX).unwrap()).unwrap();
        let (_, bob) = derive_keys_from_seed(&hex::decode(BOB_SEED_HEX).unwrap()).unwrap();
        assert_ne!(alice.as_bytes(), bob.as_bytes());
    }

    #[test]
    fn test_ecdh_agrees() {
        let (a_priv, a_pub) = generate_ephemeral_keypair();
        let (b_priv, b_pub) = generate_ephemeral_keypair();
        assert_eq!(x25519_ecdh(&a_priv, &b_pub), x25519_ecdh(&b_priv, &a_pub));
    }

    #[test]
    fn test_public_key_from_bytes() {
        assert!(public_key_from_bytes(&[7u8; 32]).is_ok());
        assert!(matches!(
            public_key_from_bytes(&[7u8; 31]),
            Err(ChainMailError::InvalidPublicKey(_))
        ));
    }
}
