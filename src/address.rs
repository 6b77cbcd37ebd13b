//! Protocol addressing.
//!
//! Message headers carry addresses in the `address@network.protocol` form.
//! Before a payload is handed to a [`Sender`](crate::Sender) the address text
//! is resolved into the raw bytes the protocol uses on-chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

use crate::types::{ChainMailError, Result};

/// Blockchain protocols a message can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ethereum,
    Algorand,
    Substrate,
}

impl Protocol {
    /// Lowercase protocol name as used in addresses and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ethereum => "ethereum",
            Protocol::Algorand => "algorand",
            Protocol::Substrate => "substrate",
        }
    }

    /// Decode an address string into raw on-chain bytes.
    pub fn decode_address(&self, address: &str) -> Result<Vec<u8>> {
        match self {
            Protocol::Ethereum => decode_prefixed_hex(address, 20),
            Protocol::Substrate => decode_prefixed_hex(address, 32),
            Protocol::Algorand => decode_algorand_address(address).map(|key| key.to_vec()),
        }
    }

    /// Encode raw address bytes back into the protocol's text form.
    pub fn encode_address(&self, raw: &[u8]) -> String {
        match self {
            Protocol::Ethereum | Protocol::Substrate => format!("0x{}", hex::encode(raw)),
            Protocol::Algorand => {
                let checksum = algorand_checksum(raw);
                let mut data = raw.to_vec();
                data.extend_from_slice(&checksum);
                data_encoding::BASE32_NOPAD.encode(&data)
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ChainMailError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ethereum" => Ok(Protocol::Ethereum),
            "algorand" => Ok(Protocol::Algorand),
            "substrate" => Ok(Protocol::Substrate),
            other => Err(ChainMailError::Configuration(format!(
                "unsupported protocol: {}",
                other
            ))),
        }
    }
}

fn decode_prefixed_hex(address: &str, expected_len: usize) -> Result<Vec<u8>> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| ChainMailError::InvalidAddress(format!("missing 0x prefix: {}", address)))?;

    let bytes = hex::decode(stripped)
        .map_err(|e| ChainMailError::InvalidAddress(format!("{}: {}", address, e)))?;

    if bytes.len() != expected_len {
        return Err(ChainMailError::InvalidAddress(format!(
            "{}: expected {} bytes, got {}",
            address,
            expected_len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn algorand_checksum(public_key: &[u8]) -> [u8; 4] {
    let digest = Sha512_256::digest(public_key);
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&digest[digest.len() - 4..]);
    checksum
}

/// Decodes an Algorand address to extract the 32-byte Ed25519 public key.
///
/// Algorand addresses are base32-encoded (no padding) and contain:
/// - 32 bytes: Ed25519 public key
/// - 4 bytes: checksum (last 4 bytes of SHA-512/256 of the public key)
fn decode_algorand_address(address: &str) -> Result<[u8; 32]> {
    let decoded = data_encoding::BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|e| ChainMailError::InvalidAddress(format!("{}: {}", address, e)))?;
    if decoded.len() != 36 {
        return Err(ChainMailError::InvalidAddress(format!(
            "{}: expected 36 decoded bytes, got {}",
            address,
            decoded.len()
        )));
    }

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&decoded[..32]);
    if algorand_checksum(&public_key) != decoded[32..] {
        return Err(ChainMailError::InvalidAddress(format!(
            "{}: checksum mismatch",
            address
        )));
    }
    Ok(public_key)
}

/// An address of the form `address@network.protocol`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Address in the protocol's text form.
    pub address: String,
    /// Network name, e.g. `ropsten`.
    pub network: String,
    /// Chain protocol.
    pub protocol: Protocol,
}

impl ParsedAddress {
    /// Parse a fully qualified address.
    pub fn parse(full: &str) -> Result<Self> {
        let (address, domain) = full
            .split_once('@')
            .ok_or_else(|| ChainMailError::InvalidAddress(format!("missing '@': {}", full)))?;
        let (network, protocol) = domain.rsplit_once('.').ok_or_else(|| {
            ChainMailError::InvalidAddress(format!("expected network.protocol: {}", full))
        })?;

        if address.is_empty() || network.is_empty() {
            return Err(ChainMailError::InvalidAddress(full.to_string()));
        }

        let protocol: Protocol = protocol
            .parse()
            .map_err(|_| ChainMailError::InvalidAddress(format!("unknown protocol: {}", full)))?;

        Ok(Self {
            address: address.to_string(),
            network: network.to_string(),
            protocol,
        })
    }

    /// Raw on-chain bytes for this address.
    pub fn raw(&self) -> Result<Vec<u8>> {
        self.protocol.decode_address(&self.address)
    }
}

impl fmt::Display for ParsedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{}", self.address, self.network, self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethereum_address() {
        let raw = Protocol::Ethereum
            .decode_address("0x5602ea95540bee46d03ba335eed6f49d117eab95")
            .unwrap();
        assert_eq!(raw.len(), 20);
        assert_eq!(
            Protocol::Ethereum.encode_address(&raw),
            "0x5602ea95540bee46d03ba335eed6f49d117eab95"
        );
        assert!(Protocol::Ethereum.decode_address("5602ea95").is_err());
        assert!(Protocol::Ethereum.decode_address("0x5602").is_err());
    }

    #[test]
    fn test_algorand_address_checksum() {
        let encoded = Protocol::Algorand.encode_address(&[9u8; 32]);
        assert_eq!(encoded.len(), 58);
        assert_eq!(Protocol::Algorand.decode_address(&encoded).unwrap(), vec![9u8; 32]);

        let mut tampered: Vec<char> = encoded.chars().collect();
        tampered[0] = if tampered[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();
        assert!(matches!(
            Protocol::Algorand.decode_address(&tampered),
            Err(ChainMailError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_parse_full_address() {
        let parsed =
            ParsedAddress::parse("0x5602ea95540bee46d03ba335eed6f49d117eab95@ropsten.ethereum")
                .unwrap();
        assert_eq!(parsed.network, "ropsten");
        assert_eq!(parsed.protocol, Protocol::Ethereum);
        assert_eq!(parsed.raw().unwrap().len(), 20);
        assert_eq!(
            parsed.to_string(),
            "0x5602ea95540bee46d03ba335eed6f49d117eab95@ropsten.ethereum"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ParsedAddress::parse("no-at-sign").is_err());
        assert!(ParsedAddress::parse("0x00@nodot").is_err());
        assert!(ParsedAddress::parse("0x00@mainnet.bitcoin").is_err());
        assert!(ParsedAddress::parse("@mainnet.ethereum").is_err());
    }
}
