//! Read pipeline: unframe → decrypt location → fetch and verify → decrypt → decode.
//!
//! A recipient scanning a chain sees every envelope, most of them meant for
//! someone else. Those fail with [`ChainMailError::Decryption`] at the first
//! decrypt; callers skip them via [`ChainMailError::is_foreign`].

use tracing::debug;

use crate::cache::ContentCache;
use crate::cipher::Decrypter;
use crate::envelope::{unframe, Envelope};
use crate::hash::verify_hash;
use crate::message::Message;
use crate::store::ContentRetriever;
use crate::types::{ChainMailError, Result, KIND_INLINE};

/// Turn raw transaction data into a verified message.
pub async fn read_message(
    raw_tx_data: &[u8],
    decrypter: &dyn Decrypter,
    retriever: &ContentRetriever,
    cache: &dyn ContentCache,
) -> Result<Message> {
    let envelope = unframe(raw_tx_data)?;

    let encoded = if envelope.kind == KIND_INLINE {
        envelope.contents(decrypter)?
    } else {
        fetch_stored(&envelope, decrypter, retriever, cache).await?
    };

    if let Some(expected) = envelope.contents_hash(decrypter)? {
        verify_hash(&encoded, &expected)?;
    }

    let message = Message::decode(&encoded)?;
    debug!(message_id = %message.id, kind = envelope.kind, "message read");
    Ok(message)
}

async fn fetch_stored(
    envelope: &Envelope,
    decrypter: &dyn Decrypter,
    retriever: &ContentRetriever,
    cache: &dyn ContentCache,
) -> Result<Vec<u8>> {
    let url = envelope.url(decrypter)?;
    let expected = envelope.integrity_hash(decrypter)?.ok_or_else(|| {
        ChainMailError::Format("stored envelope has no integrity hash".to_string())
    })?;

    let ciphertext = retriever.get_message(&url, &expected, cache).await?;
    decrypter.decrypt(&ciphertext)
}
