//! Fetch scheduler behaviour with stub receivers and a counting inbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chainmail::{
    BlockRef, ChainMailError, CoverageEntry, Fetcher, Inbox, MemoryInbox, Protocol, Receiver,
    ReceiverKind, ReceiverRegistry, Result, SchedulerConfig, Transaction,
};

const FIRST: &str = "0x1111111111111111111111111111111111111111";
const BROKEN: &str = "0x2222222222222222222222222222222222222222";
const THIRD: &str = "0x3333333333333333333333333333333333333333";

/// Receiver that fails for one address and counts calls per address.
struct StubReceiver {
    kind: ReceiverKind,
    broken: Vec<u8>,
    calls: Mutex<HashMap<Vec<u8>, usize>>,
}

impl StubReceiver {
    fn new(kind: ReceiverKind, broken: &str) -> Self {
        Self {
            kind,
            broken: Protocol::Ethereum.decode_address(broken).unwrap(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self, address: &str) -> usize {
        let raw = Protocol::Ethereum.decode_address(address).unwrap();
        self.calls.lock().unwrap().get(&raw).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Receiver for StubReceiver {
    fn kind(&self) -> ReceiverKind {
        self.kind
    }

    async fn receive(
        &self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
    ) -> Result<Vec<Transaction>> {
        if network == "sepolia" {
            return Err(ChainMailError::network_not_supported(protocol.as_str(), network));
        }
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(address.to_vec()).or_default();
            *count += 1;
            *count
        };
        if address == self.broken.as_slice() {
            return Err(ChainMailError::Transport("502 Bad Gateway".to_string()));
        }
        let mut hash = address.to_vec();
        hash.extend_from_slice(&(call as u64).to_be_bytes());
        Ok(vec![Transaction::new(
            b"chainmail".to_vec(),
            BlockRef::Number(call as u64),
            hash,
        )])
    }
}

/// Inbox that counts writes per address and forwards to a memory inbox.
#[derive(Default)]
struct CountingInbox {
    inner: MemoryInbox,
    puts: Mutex<HashMap<Vec<u8>, usize>>,
}

impl CountingInbox {
    fn puts(&self, address: &str) -> usize {
        let raw = Protocol::Ethereum.decode_address(address).unwrap();
        self.puts.lock().unwrap().get(&raw).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Inbox for CountingInbox {
    async fn put_transaction(
        &self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
        tx: Transaction,
    ) -> Result<()> {
        *self.puts.lock().unwrap().entry(address.to_vec()).or_default() += 1;
        self.inner.put_transaction(protocol, network, address, tx).await
    }

    async fn get_read_status(&self, message_id: &str) -> Result<bool> {
        self.inner.get_read_status(message_id).await
    }

    async fn put_message_read(&self, message_id: &str) -> Result<()> {
        self.inner.put_message_read(message_id).await
    }

    async fn delete_message_read(&self, message_id: &str) -> Result<()> {
        self.inner.delete_message_read(message_id).await
    }
}

fn coverage(kind: ReceiverKind) -> SchedulerConfig {
    SchedulerConfig::default().with_coverage(
        CoverageEntry::new(Protocol::Ethereum, "mainnet", kind)
            .with_address(FIRST)
            .with_address(BROKEN)
            .with_address(THIRD),
    )
}

#[tokio::test(start_paused = true)]
async fn failing_address_does_not_block_the_rest() {
    let receiver = Arc::new(StubReceiver::new(ReceiverKind::Blockscout, BROKEN));
    let inbox = Arc::new(CountingInbox::default());
    let registry = ReceiverRegistry::new().with_receiver(receiver.clone());

    let handle = Fetcher::new(&coverage(ReceiverKind::Blockscout), &registry, inbox.clone())
        .unwrap()
        .start();
    tokio::time::sleep(Duration::from_secs(120)).await;
    handle.shutdown().await;

    let first = receiver.calls(FIRST);
    let broken = receiver.calls(BROKEN);
    let third = receiver.calls(THIRD);
    assert!(first >= 3, "first address polled {} times", first);
    assert!(third >= 3, "third address polled {} times", third);
    assert!(broken >= first - 1 && broken <= first, "round robin order broken");
    assert!(third >= first - 1 && third <= first, "round robin order broken");

    assert_eq!(inbox.puts(FIRST), first);
    assert_eq!(inbox.puts(THIRD), third);
    assert_eq!(inbox.puts(BROKEN), 0);
    assert_eq!(inbox.inner.len().await, first + third);
}

#[tokio::test(start_paused = true)]
async fn unsupported_network_is_skipped() {
    let config = coverage(ReceiverKind::Algod).with_coverage(
        CoverageEntry::new(Protocol::Ethereum, "sepolia", ReceiverKind::Algod).with_address(FIRST),
    );
    let receiver = Arc::new(StubReceiver::new(ReceiverKind::Algod, BROKEN));
    let inbox = Arc::new(CountingInbox::default());
    let registry = ReceiverRegistry::new().with_receiver(receiver.clone());

    let handle = Fetcher::new(&config, &registry, inbox.clone())
        .unwrap()
        .start();
    tokio::time::sleep(Duration::from_secs(60)).await;
    handle.shutdown().await;

    assert!(inbox.puts(FIRST) >= 2);
    assert!(inbox.puts(THIRD) >= 2);
    assert!(inbox
        .inner
        .transactions(Protocol::Ethereum, "sepolia", &Protocol::Ethereum.decode_address(FIRST).unwrap())
        .await
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn workers_run_independently_per_kind() {
    let config = coverage(ReceiverKind::Etherscan).with_coverage(
        CoverageEntry::new(Protocol::Ethereum, "mainnet", ReceiverKind::EtherscanNoAuth)
            .with_address(FIRST),
    );
    let fast = Arc::new(StubReceiver::new(ReceiverKind::Etherscan, BROKEN));
    let slow = Arc::new(StubReceiver::new(ReceiverKind::EtherscanNoAuth, BROKEN));
    let registry = ReceiverRegistry::new()
        .with_receiver(fast.clone())
        .with_receiver(slow.clone());

    let handle = Fetcher::new(&config, &registry, Arc::new(MemoryInbox::new()))
        .unwrap()
        .start();
    assert_eq!(handle.worker_count(), 2);
    tokio::time::sleep(Duration::from_secs(30)).await;
    handle.shutdown().await;

    assert!(slow.calls(FIRST) >= 1);
    assert!(fast.calls(FIRST) > slow.calls(FIRST));
}
