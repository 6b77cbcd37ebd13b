//! Cipher suite: name-keyed registry of encrypt/decrypt algorithms.
//!
//! Every ciphertext starts with a one-byte algorithm id so a decrypter can
//! reject input produced by a different algorithm. Both real algorithms use
//! an ephemeral X25519 key per encryption, so encrypting the same plaintext
//! twice never yields the same ciphertext.
//!
//! Layouts after the id byte:
//! - `aes256cbc`: ephemeralPublicKey (32) | iv (16) | ciphertext | hmacSha256 (32)
//! - `nacl-ecdh`: ephemeralPublicKey (32) | nonce (12) | ciphertext + tag (16)
//! - `noop`: plaintext

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::address::Protocol;
use crate::keys::{generate_ephemeral_keypair, x25519_ecdh};
use crate::keystore::{KeyDeriveOptions, KeyStore};
use crate::types::{
    ChainMailError, Result, AES_CBC_INFO, IV_SIZE, MAC_SIZE, NACL_ECDH_INFO, NONCE_SIZE,
    PUBLIC_KEY_SIZE,
};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Supported encryption algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    /// ECIES over X25519 with AES-256-CBC and HMAC-SHA256.
    Aes256Cbc,
    /// X25519 box with ChaCha20-Poly1305.
    NaclEcdh,
    /// No encryption. Only useful for testing and public broadcasts.
    Noop,
}

impl CipherAlgorithm {
    /// All algorithms registered by default.
    pub const ALL: [CipherAlgorithm; 3] = [
        CipherAlgorithm::Aes256Cbc,
        CipherAlgorithm::NaclEcdh,
        CipherAlgorithm::Noop,
    ];

    /// Registry name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Cbc => "aes256cbc",
            CipherAlgorithm::NaclEcdh => "nacl-ecdh",
            CipherAlgorithm::Noop => "noop",
        }
    }

    /// Leading id byte of ciphertexts produced by the algorithm.
    pub fn id(&self) -> u8 {
        match self {
            CipherAlgorithm::Aes256Cbc => 0x2e,
            CipherAlgorithm::NaclEcdh => 0x2a,
            CipherAlgorithm::Noop => 0x20,
        }
    }

    /// Build an encrypter for this algorithm.
    pub fn encrypter(&self) -> Arc<dyn Encrypter> {
        Arc::new(AlgorithmEncrypter { algorithm: *self })
    }

    /// Build a decrypter for this algorithm holding the given private key.
    pub fn decrypter(&self, private_key: StaticSecret) -> Arc<dyn Decrypter> {
        let public_key = PublicKey::from(&private_key);
        Arc::new(AlgorithmDecrypter {
            algorithm: *self,
            private_key,
            public_key,
        })
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encrypts plaintext for a recipient public key.
pub trait Encrypter: Send + Sync {
    /// The algorithm this encrypter uses.
    fn algorithm(&self) -> CipherAlgorithm;

    /// Encrypt `plaintext` so only the holder of `recipient`'s private key can read it.
    fn encrypt(&self, recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Decrypts ciphertext with a private key it holds.
pub trait Decrypter: Send + Sync {
    /// The algorithm this decrypter uses.
    fn algorithm(&self) -> CipherAlgorithm;

    /// Decrypt `ciphertext`. Wrong keys and corrupt input fail with
    /// [`ChainMailError::Decryption`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

struct AlgorithmEncrypter {
    algorithm: CipherAlgorithm,
}

impl Encrypter for AlgorithmEncrypter {
    fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn encrypt(&self, recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![self.algorithm.id()];
        match self.algorithm {
            CipherAlgorithm::Aes256Cbc => out.extend(aes_cbc_encrypt(recipient, plaintext)?),
            CipherAlgorithm::NaclEcdh => out.extend(nacl_encrypt(recipient, plaintext)?),
            CipherAlgorithm::Noop => out.extend_from_slice(plaintext),
        }
        Ok(out)
    }
}

struct AlgorithmDecrypter {
    algorithm: CipherAlgorithm,
    private_key: StaticSecret,
    public_key: PublicKey,
}

impl Decrypter for AlgorithmDecrypter {
    fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let (&id, body) = ciphertext
            .split_first()
            .ok_or_else(|| ChainMailError::Decryption("empty ciphertext".to_string()))?;

        if id != self.algorithm.id() {
            return Err(ChainMailError::Decryption(format!(
                "ciphertext id 0x{:02x} does not match {}",
                id, self.algorithm
            )));
        }

        match self.algorithm {
            CipherAlgorithm::Aes256Cbc => aes_cbc_decrypt(&self.private_key, &self.public_key, body),
            CipherAlgorithm::NaclEcdh => nacl_decrypt(&self.private_key, &self.public_key, body),
            CipherAlgorithm::Noop => Ok(body.to_vec()),
        }
    }
}

fn expand_key(
    ephemeral_public: &[u8],
    shared_secret: &[u8],
    prefix: &[u8],
    recipient_public: &[u8],
    okm: &mut [u8],
) -> std::result::Result<(), hkdf::InvalidLength> {
    let mut info = Vec::with_capacity(prefix.len() + PUBLIC_KEY_SIZE);
    info.extend_from_slice(prefix);
    info.extend_from_slice(recipient_public);

    Hkdf::<Sha256>::new(Some(ephemeral_public), shared_secret).expand(&info, okm)
}

fn split_ephemeral(body: &[u8], min_rest: usize) -> Result<(PublicKey, &[u8])> {
    if body.len() < PUBLIC_KEY_SIZE + min_rest {
        return Err(ChainMailError::Decryption(format!(
            "ciphertext too short: {} bytes",
            body.len()
        )));
    }
    let mut ephemeral = [0u8; PUBLIC_KEY_SIZE];
    ephemeral.copy_from_slice(&body[..PUBLIC_KEY_SIZE]);
    Ok((PublicKey::from(ephemeral), &body[PUBLIC_KEY_SIZE..]))
}

fn aes_cbc_encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let (ephemeral_private, ephemeral_public) = generate_ephemeral_keypair();
    let shared_secret = x25519_ecdh(&ephemeral_private, recipient);

    let mut keys = [0u8; 64];
    expand_key(
        ephemeral_public.as_bytes(),
        &shared_secret,
        AES_CBC_INFO,
        recipient.as_bytes(),
        &mut keys,
    )
    .map_err(|e| ChainMailError::Encryption(format!("HKDF expand failed: {}", e)))?;
    let (enc_key, mac_key) = keys.split_at(32);

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(enc_key, &iv)
        .map_err(|e| ChainMailError::Encryption(format!("Cipher init failed: {}", e)))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| ChainMailError::Encryption(format!("HMAC init failed: {}", e)))?;
    mac.update(&iv);
    mac.update(ephemeral_public.as_bytes());
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + IV_SIZE + ciphertext.len() + MAC_SIZE);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    Ok(out)
}

fn aes_cbc_decrypt(private_key: &StaticSecret, public_key: &PublicKey, body: &[u8]) -> Result<Vec<u8>> {
    let (ephemeral_public, rest) = split_ephemeral(body, IV_SIZE + MAC_SIZE)?;
    let (iv, rest) = rest.split_at(IV_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - MAC_SIZE);

    let shared_secret = x25519_ecdh(private_key, &ephemeral_public);
    let mut keys = [0u8; 64];
    expand_key(
        ephemeral_public.as_bytes(),
        &shared_secret,
        AES_CBC_INFO,
        public_key.as_bytes(),
        &mut keys,
    )
    .map_err(|e| ChainMailError::Decryption(format!("HKDF expand failed: {}", e)))?;
    let (enc_key, mac_key) = keys.split_at(32);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| ChainMailError::Decryption(format!("HMAC init failed: {}", e)))?;
    mac.update(iv);
    mac.update(ephemeral_public.as_bytes());
    mac.update(ciphertext);
    mac.verify_slice(tag)
        .map_err(|_| ChainMailError::Decryption("MAC verification failed".to_string()))?;

    Aes256CbcDec::new_from_slices(enc_key, iv)
        .map_err(|e| ChainMailError::Decryption(format!("Cipher init failed: {}", e)))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| ChainMailError::Decryption(format!("Invalid padding: {}", e)))
}

fn nacl_encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let (ephemeral_private, ephemeral_public) = generate_ephemeral_keypair();
    let shared_secret = x25519_ecdh(&ephemeral_private, recipient);

    let mut symmetric_key = [0u8; 32];
    expand_key(
        ephemeral_public.as_bytes(),
        &shared_secret,
        NACL_ECDH_INFO,
        recipient.as_bytes(),
        &mut symmetric_key,
    )
    .map_err(|e| ChainMailError::Encryption(format!("HKDF expand failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = <ChaCha20Poly1305 as KeyInit>::new_from_slice(&symmetric_key)
        .map_err(|e| ChainMailError::Encryption(format!("Cipher init failed: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| ChainMailError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn nacl_decrypt(private_key: &StaticSecret, public_key: &PublicKey, body: &[u8]) -> Result<Vec<u8>> {
    let (ephemeral_public, rest) = split_ephemeral(body, NONCE_SIZE)?;
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let shared_secret = x25519_ecdh(private_key, &ephemeral_public);
    let mut symmetric_key = [0u8; 32];
    expand_key(
        ephemeral_public.as_bytes(),
        &shared_secret,
        NACL_ECDH_INFO,
        public_key.as_bytes(),
        &mut symmetric_key,
    )
    .map_err(|e| ChainMailError::Decryption(format!("HKDF expand failed: {}", e)))?;

    let cipher = <ChaCha20Poly1305 as KeyInit>::new_from_slice(&symmetric_key)
        .map_err(|e| ChainMailError::Decryption(format!("Cipher init failed: {}", e)))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| ChainMailError::Decryption(format!("Decryption failed: {}", e)))
}

/// Registry mapping algorithm names to encrypter/decrypter factories.
pub struct CipherSuite {
    algorithms: HashMap<String, CipherAlgorithm>,
    keystore: Arc<dyn KeyStore>,
}

impl CipherSuite {
    /// Creates a suite with every built-in algorithm registered.
    pub fn new(keystore: Arc<dyn KeyStore>) -> Self {
        let algorithms = CipherAlgorithm::ALL
            .iter()
            .map(|a| (a.name().to_string(), *a))
            .collect();
        Self {
            algorithms,
            keystore,
        }
    }

    /// Look up an algorithm by name.
    pub fn algorithm(&self, name: &str) -> Result<CipherAlgorithm> {
        self.algorithms
            .get(name)
            .copied()
            .ok_or_else(|| ChainMailError::UnsupportedAlgorithm(name.to_string()))
    }

    /// Names of every registered algorithm.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.algorithms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get an encrypter for the named algorithm.
    pub fn encrypter(&self, name: &str) -> Result<Arc<dyn Encrypter>> {
        Ok(self.algorithm(name)?.encrypter())
    }

    /// Get a decrypter for the key held for `address` on `protocol`/`network`.
    pub async fn decrypter(
        &self,
        address: &[u8],
        protocol: Protocol,
        network: &str,
        algorithm: &str,
        options: &KeyDeriveOptions,
    ) -> Result<Arc<dyn Decrypter>> {
        let algorithm = self.algorithm(algorithm)?;
        let private_key = self
            .keystore
            .private_key(address, protocol, network, options)
            .await?;
        Ok(algorithm.decrypter(private_key))
    }
}
