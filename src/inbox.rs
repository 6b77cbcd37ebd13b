//! Inbox state: discovered transactions and read flags.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::address::Protocol;
use crate::blockchain::Transaction;
use crate::types::Result;

/// Trait for storing discovered transactions and message read flags.
///
/// Implementations must tolerate concurrent writers: every fetch worker
/// writes into the same inbox.
#[async_trait::async_trait]
pub trait Inbox: Send + Sync {
    /// Upsert a transaction for an address, keyed by transaction hash.
    async fn put_transaction(
        &self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
        tx: Transaction,
    ) -> Result<()>;

    /// Whether a message has been marked read.
    async fn get_read_status(&self, message_id: &str) -> Result<bool>;

    /// Mark a message read.
    async fn put_message_read(&self, message_id: &str) -> Result<()>;

    /// Mark a message unread.
    async fn delete_message_read(&self, message_id: &str) -> Result<()>;
}

type MailboxId = (Protocol, String, Vec<u8>);

/// In-memory implementation of Inbox.
#[derive(Default)]
pub struct MemoryInbox {
    transactions: Arc<RwLock<HashMap<MailboxId, Vec<Transaction>>>>,
    read: Arc<RwLock<HashSet<String>>>,
}

impl MemoryInbox {
    /// Creates a new in-memory inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactions stored for an address, in insertion order.
    pub async fn transactions(
        &self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
    ) -> Vec<Transaction> {
        let transactions = self.transactions.read().await;
        transactions
            .get(&(protocol, network.to_string(), address.to_vec()))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of stored transactions.
    pub async fn len(&self) -> usize {
        let transactions = self.transactions.read().await;
        transactions.values().map(Vec::len).sum()
    }

    /// Whether the inbox holds no transactions.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl Inbox for MemoryInbox {
    async fn put_transaction(
        &self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
        tx: Transaction,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let entry = transactions
            .entry((protocol, network.to_string(), address.to_vec()))
            .or_default();

        match entry.iter_mut().find(|t| t.hash == tx.hash) {
            Some(existing) => *existing = tx,
            None => entry.push(tx),
        }
        Ok(())
    }

    async fn get_read_status(&self, message_id: &str) -> Result<bool> {
        let read = self.read.read().await;
        Ok(read.contains(message_id))
    }

    async fn put_message_read(&self, message_id: &str) -> Result<()> {
        let mut read = self.read.write().await;
        read.insert(message_id.to_string());
        Ok(())
    }

    async fn delete_message_read(&self, message_id: &str) -> Result<()> {
        let mut read = self.read.write().await;
        read.remove(message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::BlockRef;

    fn tx(hash: u8, round: u64) -> Transaction {
        Transaction::new(vec![hash], BlockRef::Number(round), vec![hash])
    }

    #[tokio::test]
    async fn test_put_transaction_is_idempotent() {
        let inbox = MemoryInbox::new();
        let address = [1u8; 20];

        inbox
            .put_transaction(Protocol::Ethereum, "mainnet", &address, tx(1, 100))
            .await
            .unwrap();
        inbox
            .put_transaction(Protocol::Ethereum, "mainnet", &address, tx(2, 200))
            .await
            .unwrap();
        inbox
            .put_transaction(Protocol::Ethereum, "mainnet", &address, tx(1, 101))
            .await
            .unwrap();

        let stored = inbox.transactions(Protocol::Ethereum, "mainnet", &address).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].block, BlockRef::Number(101));
        assert_eq!(inbox.len().await, 2);
        assert!(inbox
            .transactions(Protocol::Ethereum, "goerli", &address)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_read_flags() {
        let inbox = MemoryInbox::new();
        assert!(!inbox.get_read_status("m1").await.unwrap());

        inbox.put_message_read("m1").await.unwrap();
        assert!(inbox.get_read_status("m1").await.unwrap());

        inbox.delete_message_read("m1").await.unwrap();
        assert!(!inbox.get_read_status("m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let inbox = Arc::new(MemoryInbox::new());
        let mut handles = Vec::new();
        for worker in 0..8u8 {
            let inbox = inbox.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10u8 {
                    let t = Transaction::new(vec![], BlockRef::Number(i as u64), vec![worker, i]);
                    inbox
                        .put_transaction(Protocol::Algorand, "testnet", &[9u8; 32], t)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(inbox.len().await, 80);
    }
}
