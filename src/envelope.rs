//! Envelope encoding and decoding for the ChainMail protocol.
//!
//! Wire format:
//! - \[0\]:  kind
//! - \[1..\]: fields, each `tag (1) | length (4, big-endian u32) | value`
//!
//! On-chain payloads are the marshalled envelope behind [`FRAME_PREFIX`].
//! Only the kind byte is readable without the recipient's key: the location,
//! both hashes and any inline contents are ciphertext.

use x25519_dalek::PublicKey;

use crate::cipher::{Decrypter, Encrypter};
use crate::types::{ChainMailError, Result, FRAME_PREFIX, HASH_SIZE, KIND_INLINE, KIND_STORED};

const TAG_LOCATION: u8 = 0x01;
const TAG_RESOURCE: u8 = 0x02;
const TAG_INLINE_CONTENTS: u8 = 0x03;
const TAG_DECRYPTED_HASH: u8 = 0x04;
const TAG_ENCRYPTED_HASH: u8 = 0x05;
const TAG_LOCATION_CODE: u8 = 0x06;

/// Size of a field header (tag + length).
const FIELD_HEADER_SIZE: usize = 5;

/// How the encrypted location turns into a retrieval URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LocationCode {
    /// The encrypted location is the full retrieval URL.
    Url = 0x01,
    /// The encrypted location is a base URL; the retrieval URL is
    /// `{base}/{resource}`.
    UrlWithResource = 0x02,
}

impl LocationCode {
    /// The wire value of this code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Location text to encrypt for a stored message at `url`.
    pub fn location_for(self, url: &str, resource: &str) -> Result<String> {
        match self {
            LocationCode::Url => Ok(url.to_string()),
            LocationCode::UrlWithResource => url
                .strip_suffix(resource)
                .and_then(|base| base.strip_suffix('/'))
                .map(str::to_string)
                .ok_or_else(|| {
                    ChainMailError::Configuration(format!(
                        "url {} does not end with resource {}",
                        url, resource
                    ))
                }),
        }
    }

    /// Retrieval URL for a decrypted location.
    pub fn retrieval_url(self, location: &str, resource: Option<&str>) -> Result<String> {
        match self {
            LocationCode::Url => Ok(location.to_string()),
            LocationCode::UrlWithResource => {
                let resource = resource.ok_or_else(|| {
                    ChainMailError::Format("location code requires a resource".to_string())
                })?;
                Ok(format!("{}/{}", location, resource))
            }
        }
    }
}

impl TryFrom<u8> for LocationCode {
    type Error = ChainMailError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(LocationCode::Url),
            0x02 => Ok(LocationCode::UrlWithResource),
            other => Err(ChainMailError::Configuration(format!(
                "unsupported location code: {}",
                other
            ))),
        }
    }
}

/// A ChainMail envelope as carried on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Schema tag.
    pub kind: u8,
    /// Encrypted location text.
    pub location: Option<Vec<u8>>,
    /// Opaque handle within the location.
    pub resource: Option<String>,
    /// Encrypted message, for inline envelopes.
    pub inline_contents: Option<Vec<u8>>,
    /// Encrypted hash of the plaintext message bytes.
    pub decrypted_hash: Option<Vec<u8>>,
    /// Encrypted hash of the stored ciphertext.
    pub encrypted_hash: Option<Vec<u8>>,
    /// How `location` maps to a retrieval URL.
    pub location_code: Option<LocationCode>,
}

impl Envelope {
    /// Encode the envelope to bytes.
    pub fn marshal(&self) -> Vec<u8> {
        let mut data = vec![self.kind];
        let location_code = self.location_code.map(|c| [c.code()]);

        let fields: [(u8, Option<&[u8]>); 6] = [
            (TAG_LOCATION, self.location.as_deref()),
            (TAG_RESOURCE, self.resource.as_deref().map(str::as_bytes)),
            (TAG_INLINE_CONTENTS, self.inline_contents.as_deref()),
            (TAG_DECRYPTED_HASH, self.decrypted_hash.as_deref()),
            (TAG_ENCRYPTED_HASH, self.encrypted_hash.as_deref()),
            (TAG_LOCATION_CODE, location_code.as_ref().map(|c| c.as_slice())),
        ];

        for (tag, value) in fields {
            if let Some(value) = value {
                data.push(tag);
                data.extend_from_slice(&(value.len() as u32).to_be_bytes());
                data.extend_from_slice(value);
            }
        }
        data
    }

    /// Decode bytes into an envelope.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let (&kind, mut rest) = data
            .split_first()
            .ok_or_else(|| ChainMailError::Format("empty envelope".to_string()))?;

        if kind != KIND_STORED && kind != KIND_INLINE {
            return Err(ChainMailError::Format(format!(
                "unknown envelope kind: 0x{:02x}",
                kind
            )));
        }

        let mut envelope = Envelope {
            kind,
            location: None,
            resource: None,
            inline_contents: None,
            decrypted_hash: None,
            encrypted_hash: None,
            location_code: None,
        };

        while !rest.is_empty() {
            if rest.len() < FIELD_HEADER_SIZE {
                return Err(ChainMailError::Format(format!(
                    "truncated field header: {} bytes",
                    rest.len()
                )));
            }
            let tag = rest[0];
            let len = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
            rest = &rest[FIELD_HEADER_SIZE..];
            if rest.len() < len {
                return Err(ChainMailError::Format(format!(
                    "truncated field 0x{:02x}: need {} bytes, have {}",
                    tag,
                    len,
                    rest.len()
                )));
            }
            let (value, tail) = rest.split_at(len);
            rest = tail;
            envelope.set_field(tag, value)?;
        }

        envelope.check_schema()?;
        Ok(envelope)
    }

    fn set_field(&mut self, tag: u8, value: &[u8]) -> Result<()> {
        fn put<T>(slot: &mut Option<T>, tag: u8, value: T) -> Result<()> {
            if slot.is_some() {
                return Err(ChainMailError::Format(format!("duplicate field 0x{:02x}", tag)));
            }
            *slot = Some(value);
            Ok(())
        }

        match tag {
            TAG_LOCATION => put(&mut self.location, tag, value.to_vec()),
            TAG_RESOURCE => {
                let resource = String::from_utf8(value.to_vec())
                    .map_err(|_| ChainMailError::Format("resource is not UTF-8".to_string()))?;
                put(&mut self.resource, tag, resource)
            }
            TAG_INLINE_CONTENTS => put(&mut self.inline_contents, tag, value.to_vec()),
            TAG_DECRYPTED_HASH => put(&mut self.decrypted_hash, tag, value.to_vec()),
            TAG_ENCRYPTED_HASH => put(&mut self.encrypted_hash, tag, value.to_vec()),
            TAG_LOCATION_CODE => {
                let code = match value {
                    [code] => LocationCode::try_from(*code)
                        .map_err(|e| ChainMailError::Format(e.to_string()))?,
                    _ => {
                        return Err(ChainMailError::Format(
                            "location code must be one byte".to_string(),
                        ))
                    }
                };
                put(&mut self.location_code, tag, code)
            }
            other => Err(ChainMailError::Format(format!("unknown field 0x{:02x}", other))),
        }
    }

    fn check_schema(&self) -> Result<()> {
        let missing = |name: &str| {
            ChainMailError::Format(format!(
                "kind 0x{:02x} envelope missing {}",
                self.kind, name
            ))
        };
        match self.kind {
            KIND_STORED => {
                self.location.as_ref().ok_or_else(|| missing("location"))?;
                self.encrypted_hash
                    .as_ref()
                    .ok_or_else(|| missing("encrypted hash"))?;
                let code = self.location_code.ok_or_else(|| missing("location code"))?;
                if code == LocationCode::UrlWithResource && self.resource.is_none() {
                    return Err(missing("resource"));
                }
                Ok(())
            }
            _ => {
                self.inline_contents
                    .as_ref()
                    .ok_or_else(|| missing("inline contents"))?;
                Ok(())
            }
        }
    }

    /// Decrypt the location and resolve the retrieval URL.
    pub fn url(&self, decrypter: &dyn Decrypter) -> Result<String> {
        let location = self
            .location
            .as_ref()
            .ok_or_else(|| ChainMailError::Format("envelope has no location".to_string()))?;
        let code = self
            .location_code
            .ok_or_else(|| ChainMailError::Format("envelope has no location code".to_string()))?;

        let plaintext = decrypter.decrypt(location)?;
        let location = String::from_utf8(plaintext)
            .map_err(|_| ChainMailError::Format("location is not UTF-8".to_string()))?;
        code.retrieval_url(&location, self.resource.as_deref())
    }

    /// Decrypt the hash of the stored ciphertext.
    pub fn integrity_hash(&self, decrypter: &dyn Decrypter) -> Result<Option<Vec<u8>>> {
        self.encrypted_hash
            .as_ref()
            .map(|h| decrypter.decrypt(h))
            .transpose()
    }

    /// Decrypt the hash of the plaintext message bytes.
    pub fn contents_hash(&self, decrypter: &dyn Decrypter) -> Result<Option<Vec<u8>>> {
        self.decrypted_hash
            .as_ref()
            .map(|h| decrypter.decrypt(h))
            .transpose()
    }

    /// Decrypt inline contents into the encoded message bytes.
    pub fn contents(&self, decrypter: &dyn Decrypter) -> Result<Vec<u8>> {
        let contents = self
            .inline_contents
            .as_ref()
            .ok_or_else(|| ChainMailError::Format("envelope has no inline contents".to_string()))?;
        decrypter.decrypt(contents)
    }
}

/// Plaintext contributions to an envelope.
///
/// Every field is validated on its own by [`EnvelopeFields::build`], which
/// reports the first invalid field by name.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeFields {
    /// Schema tag, [`KIND_STORED`] or [`KIND_INLINE`].
    pub kind: Option<u8>,
    /// Location text, encrypted during build.
    pub location: Option<String>,
    /// Opaque handle within the location, stored in the clear.
    pub resource: Option<String>,
    /// Already encrypted message, for inline envelopes.
    pub inline_contents: Option<Vec<u8>>,
    /// Plaintext message hash, encrypted during build.
    pub decrypted_hash: Option<Vec<u8>>,
    /// Stored ciphertext hash, encrypted during build.
    pub encrypted_hash: Option<Vec<u8>>,
    /// Raw location code, checked against [`LocationCode`].
    pub location_code: Option<u8>,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ChainMailError {
    ChainMailError::EnvelopeBuild {
        field,
        reason: reason.into(),
    }
}

fn check_hash(field: &'static str, hash: &[u8]) -> Result<()> {
    if hash.len() != HASH_SIZE {
        return Err(invalid(
            field,
            format!("expected {} bytes, got {}", HASH_SIZE, hash.len()),
        ));
    }
    Ok(())
}

impl EnvelopeFields {
    /// Validate every contribution and assemble the envelope, encrypting
    /// the sensitive fields for `recipient`.
    pub fn build(self, encrypter: &dyn Encrypter, recipient: &PublicKey) -> Result<Envelope> {
        let kind = self.kind.ok_or_else(|| invalid("kind", "required"))?;
        let stored = match kind {
            KIND_STORED => true,
            KIND_INLINE => false,
            other => return Err(invalid("kind", format!("unknown kind 0x{:02x}", other))),
        };

        match (&self.location, stored) {
            (None, true) => return Err(invalid("location", "required for stored envelopes")),
            (Some(l), true) if l.is_empty() => return Err(invalid("location", "empty")),
            (Some(_), false) => return Err(invalid("location", "not allowed for inline envelopes")),
            _ => {}
        }

        if let Some(resource) = &self.resource {
            if resource.is_empty() {
                return Err(invalid("resource", "empty"));
            }
            if resource.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
                return Err(invalid("resource", "contains whitespace, control or '/'"));
            }
        }

        match (&self.inline_contents, stored) {
            (Some(_), true) => {
                return Err(invalid("inline_contents", "not allowed for stored envelopes"))
            }
            (None, false) => return Err(invalid("inline_contents", "required for inline envelopes")),
            (Some(c), false) if c.is_empty() => return Err(invalid("inline_contents", "empty")),
            _ => {}
        }

        if let Some(hash) = &self.decrypted_hash {
            check_hash("decrypted_hash", hash)?;
        }

        match (&self.encrypted_hash, stored) {
            (None, true) => {
                return Err(invalid("encrypted_hash", "required for stored envelopes"))
            }
            (Some(hash), _) => check_hash("encrypted_hash", hash)?,
            _ => {}
        }

        let location_code = match (self.location_code, stored) {
            (None, true) => return Err(invalid("location_code", "required for stored envelopes")),
            (Some(_), false) => {
                return Err(invalid("location_code", "not allowed for inline envelopes"))
            }
            (Some(code), true) => Some(
                LocationCode::try_from(code).map_err(|e| invalid("location_code", e.to_string()))?,
            ),
            (None, false) => None,
        };

        if location_code == Some(LocationCode::UrlWithResource) && self.resource.is_none() {
            return Err(invalid("resource", "required by location code"));
        }

        let encrypt = |value: &[u8]| encrypter.encrypt(recipient, value);

        Ok(Envelope {
            kind,
            location: self.location.as_deref().map(|l| encrypt(l.as_bytes())).transpose()?,
            resource: self.resource,
            inline_contents: self.inline_contents,
            decrypted_hash: self.decrypted_hash.as_deref().map(encrypt).transpose()?,
            encrypted_hash: self.encrypted_hash.as_deref().map(encrypt).transpose()?,
            location_code,
        })
    }
}

/// Check if data carries the ChainMail framing prefix.
pub fn is_framed(data: &[u8]) -> bool {
    data.starts_with(FRAME_PREFIX)
}

/// Marshal an envelope and prepend the framing prefix.
pub fn frame(envelope: &Envelope) -> Vec<u8> {
    let body = envelope.marshal();
    let mut data = Vec::with_capacity(FRAME_PREFIX.len() + body.len());
    data.extend_from_slice(FRAME_PREFIX);
    data.extend_from_slice(&body);
    data
}

/// Strip the framing prefix and unmarshal the envelope.
pub fn unframe(data: &[u8]) -> Result<Envelope> {
    let body = data
        .strip_prefix(FRAME_PREFIX)
        .ok_or_else(|| ChainMailError::Format("missing framing prefix".to_string()))?;
    Envelope::unmarshal(body)
}
