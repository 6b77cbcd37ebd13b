//! ChainMail - Store-and-forward encrypted messaging over public blockchains
//!
//! Messages are encrypted for the recipient's X25519 key, stored off-chain
//! (or carried inline) and announced by a small encrypted envelope in a
//! transaction's payload data. Recipients poll the chains they watch and
//! read back any envelope their key opens.

mod types;
mod keys;
mod hash;
mod address;
mod keystore;
mod cipher;
mod message;
mod envelope;
mod cache;
mod store;
mod blockchain;
mod inbox;
mod send;
mod read;
mod backoff;
mod fetch;

pub use types::*;
pub use keys::*;
pub use hash::*;
pub use address::*;
pub use keystore::*;
pub use cipher::*;
pub use message::*;
pub use envelope::*;
pub use cache::*;
pub use store::*;
pub use blockchain::*;
pub use inbox::*;
pub use send::*;
pub use read::*;
pub use backoff::*;
pub use fetch::*;
