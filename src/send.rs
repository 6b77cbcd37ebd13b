//! Send pipeline: compose → encrypt → store → embed → transmit.
//!
//! Nothing reaches the chain until every earlier step has succeeded. A send
//! whose content was stored but whose transmission failed leaves an orphaned
//! blob behind; it is harmless and the send can be retried.

use tracing::debug;
use x25519_dalek::PublicKey;

use crate::address::Protocol;
use crate::blockchain::{SendOptions, Sender, Signer};
use crate::cipher::Encrypter;
use crate::envelope::{frame, EnvelopeFields, LocationCode};
use crate::hash::content_hash;
use crate::message::Message;
use crate::store::{MessageStore, StoredLocation};
use crate::types::{ChainMailError, Result, KIND_INLINE, KIND_STORED};

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// ID of the sent message.
    pub message_id: String,
    /// Where the ciphertext was stored, for stored envelopes.
    pub location: Option<StoredLocation>,
    /// The framed payload handed to the sender.
    pub payload: Vec<u8>,
}

/// Encrypt, store and transmit a message to `recipient_public_key`.
#[allow(clippy::too_many_arguments)]
pub async fn send_message(
    protocol: Protocol,
    network: &str,
    message: &Message,
    recipient_public_key: &PublicKey,
    encrypter: &dyn Encrypter,
    sender: &dyn Sender,
    store: &dyn MessageStore,
    signer: &dyn Signer,
    envelope_kind: u8,
    options: &SendOptions,
) -> Result<SendResult> {
    let to = message.headers.to_address()?;
    let from = message.headers.from_address()?;
    if to.protocol != protocol || from.protocol != protocol {
        return Err(ChainMailError::InvalidAddress(format!(
            "addresses {} and {} do not belong to {}",
            to, from, protocol
        )));
    }
    let to_raw = to.raw()?;
    let from_raw = from.raw()?;

    let encoded = message.encode();
    let decrypted_hash = content_hash(&encoded);
    let ciphertext = encrypter.encrypt(recipient_public_key, &encoded)?;

    let (fields, location) = match envelope_kind {
        KIND_STORED => {
            let stored = store
                .put_message(&message.id, &decrypted_hash, &ciphertext)
                .await
                .map_err(|e| match e {
                    ChainMailError::Storage(_) => e,
                    other => ChainMailError::Storage(other.to_string()),
                })?;
            debug!(message_id = %message.id, url_len = stored.url.len(), "stored message ciphertext");

            let code = LocationCode::try_from(stored.location_code)?;
            let location_text = code.location_for(&stored.url, &stored.resource)?;

            let fields = EnvelopeFields {
                kind: Some(KIND_STORED),
                location: Some(location_text),
                resource: Some(stored.resource.clone()),
                decrypted_hash: Some(decrypted_hash.to_vec()),
                encrypted_hash: Some(content_hash(&ciphertext).to_vec()),
                location_code: Some(stored.location_code),
                ..Default::default()
            };
            (fields, Some(stored))
        }
        KIND_INLINE => {
            let fields = EnvelopeFields {
                kind: Some(KIND_INLINE),
                inline_contents: Some(ciphertext),
                decrypted_hash: Some(decrypted_hash.to_vec()),
                ..Default::default()
            };
            (fields, None)
        }
        other => {
            return Err(ChainMailError::EnvelopeBuild {
                field: "kind",
                reason: format!("unknown kind 0x{:02x}", other),
            })
        }
    };

    let envelope = fields.build(encrypter, recipient_public_key)?;
    let payload = frame(&envelope);

    sender
        .send(network, &to_raw, &from_raw, &payload, signer, options)
        .await
        .map_err(|e| match e {
            ChainMailError::Transport(_) => e,
            other => ChainMailError::Transport(other.to_string()),
        })?;

    debug!(
        message_id = %message.id,
        %protocol,
        network,
        payload_len = payload.len(),
        "message sent"
    );

    Ok(SendResult {
        message_id: message.id.clone(),
        location,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Ed25519Signer;
    use crate::cipher::CipherAlgorithm;
    use crate::message::Headers;
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use x25519_dalek::StaticSecret;

    const FROM: &str = "0x5602ea95540bee46d03ba335eed6f49d117eab95@ropsten.ethereum";
    const TO: &str = "0x4ad2b251246aafc2f3bdf3b690de3bf906622c51@ropsten.ethereum";

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, Vec<u8>, Vec<u8>, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Sender for RecordingSender {
        async fn send(
            &self,
            network: &str,
            to: &[u8],
            from: &[u8],
            payload: &[u8],
            _signer: &dyn Signer,
            _options: &SendOptions,
        ) -> Result<()> {
            if self.fail {
                return Err(ChainMailError::Storage("nonce too low".to_string()));
            }
            self.sent.lock().unwrap().push((
                network.to_string(),
                to.to_vec(),
                from.to_vec(),
                payload.to_vec(),
            ));
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl MessageStore for FailingStore {
        async fn put_message(
            &self,
            _message_id: &str,
            _plaintext_hash: &[u8],
            _ciphertext: &[u8],
        ) -> Result<StoredLocation> {
            Err(ChainMailError::Configuration("bucket missing".to_string()))
        }
    }

    struct BadCodeStore;

    #[async_trait::async_trait]
    impl MessageStore for BadCodeStore {
        async fn put_message(
            &self,
            _message_id: &str,
            _plaintext_hash: &[u8],
            _ciphertext: &[u8],
        ) -> Result<StoredLocation> {
            Ok(StoredLocation {
                url: "mem://x/r".to_string(),
                resource: "r".to_string(),
                location_code: 0x7f,
            })
        }
    }

    fn message() -> Message {
        Message::compose(Headers::new(FROM, TO, "Hello world"), "test").unwrap()
    }

    fn recipient() -> PublicKey {
        PublicKey::from(&StaticSecret::from([2u8; 32]))
    }

    async fn send_with(
        sender: &RecordingSender,
        store: &dyn MessageStore,
        kind: u8,
    ) -> Result<SendResult> {
        let encrypter = CipherAlgorithm::Aes256Cbc.encrypter();
        send_message(
            Protocol::Ethereum,
            "ropsten",
            &message(),
            &recipient(),
            encrypter.as_ref(),
            sender,
            store,
            &Ed25519Signer::from_seed(&[1u8; 32]),
            kind,
            &SendOptions::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_send_stored() {
        let sender = RecordingSender::default();
        let store = MemoryStore::new("outbox");
        let result = send_with(&sender, &store, KIND_STORED).await.unwrap();

        assert!(result.location.is_some());
        assert_eq!(store.len().await, 1);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (network, to, from, payload) = &sent[0];
        assert_eq!(network, "ropsten");
        assert_eq!(to.len(), 20);
        assert_eq!(from.len(), 20);
        assert_eq!(payload, &result.payload);
        assert!(crate::envelope::is_framed(payload));
    }

    #[tokio::test]
    async fn test_send_inline_skips_store() {
        let sender = RecordingSender::default();
        let store = MemoryStore::new("outbox");
        let result = send_with(&sender, &store, KIND_INLINE).await.unwrap();
        assert!(result.location.is_none());
        assert!(store.is_empty().await);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_before_transmit() {
        let sender = RecordingSender::default();
        let result = send_with(&sender, &FailingStore, KIND_STORED).await;
        assert!(matches!(result, Err(ChainMailError::Storage(_))));
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_location_code() {
        let sender = RecordingSender::default();
        let result = send_with(&sender, &BadCodeStore, KIND_STORED).await;
        assert!(matches!(result, Err(ChainMailError::Configuration(_))));
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let sender = RecordingSender::default();
        let store = MemoryStore::new("outbox");
        let result = send_with(&sender, &store, 0x09).await;
        assert!(matches!(
            result,
            Err(ChainMailError::EnvelopeBuild { field: "kind", .. })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sender_failure_is_transport_error() {
        let sender = RecordingSender {
            fail: true,
            ..Default::default()
        };
        let store = MemoryStore::new("outbox");
        let result = send_with(&sender, &store, KIND_STORED).await;
        assert!(matches!(result, Err(ChainMailError::Transport(_))));
        // Stored blob is orphaned, not rolled back.
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_protocol_mismatch() {
        let sender = RecordingSender::default();
        let store = MemoryStore::new("outbox");
        let encrypter = CipherAlgorithm::Noop.encrypter();
        let result = send_message(
            Protocol::Algorand,
            "testnet",
            &message(),
            &recipient(),
            encrypter.as_ref(),
            &sender,
            &store,
            &Ed25519Signer::from_seed(&[1u8; 32]),
            KIND_STORED,
            &SendOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(ChainMailError::InvalidAddress(_))));
        assert!(sender.sent.lock().unwrap().is_empty());
        assert!(store.is_empty().await);
    }
}
