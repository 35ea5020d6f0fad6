//! Helpers shared by the integration tests and the demo: deterministic
//! identifiers and builders for blockchain-update events. The in-memory
//! node, updates source and mini evaluator live in [dummy].

use sha3::Digest;

pub mod dummy;

use ride_eval::common::{
    Address, Asset, BlockHeader, BlockId, Bytes, DataEntry, LeaseBalance,
    TxId,
};
use ride_eval::events::{
    Append, AppendKind, BalanceUpdate, BlockchainUpdated, DataEntryUpdate,
    LeaseBalanceUpdate, Rollback, StateUpdate, TxInfo, Update,
};

fn digest32(domain: &str, n: u64) -> [u8; 32] {
    let mut hasher = sha3::Keccak256::new();
    hasher.update(domain.as_bytes());
    hasher.update(n.to_le_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_slice());
    out
}

/// Deterministic block id for test fixtures.
pub fn bid(n: u64) -> BlockId {
    BlockId::from(digest32("block", n))
}

pub fn txid(n: u64) -> TxId {
    TxId::from(digest32("tx", n))
}

pub fn addr(n: u8) -> Address {
    Address::from_slice(&[n; Address::LEN])
}

pub fn int_entry(key: &str, value: i64) -> DataEntry {
    DataEntry::Integer {
        key: key.into(),
        value,
    }
}

pub fn header(h: u32, id: &BlockId) -> BlockHeader {
    BlockHeader {
        id: id.clone(),
        reference: bid(h as u64 - 1),
        timestamp: 1_600_000_000_000 + h as u64 * 60_000,
        generator: addr(0xee),
        base_target: 100,
        generation_signature: Bytes::empty(),
    }
}

/// State-update builder in the fluent style the tests read well in.
#[derive(Default)]
pub struct UpdateBuilder(StateUpdate);

impl UpdateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, address: &Address, entry: DataEntry) -> Self {
        self.0.data_entries.push(DataEntryUpdate {
            address: address.clone(),
            key: entry.key().to_string(),
            entry: Some(entry),
        });
        self
    }

    pub fn delete_data(mut self, address: &Address, key: &str) -> Self {
        self.0.data_entries.push(DataEntryUpdate {
            address: address.clone(),
            key: key.to_string(),
            entry: None,
        });
        self
    }

    pub fn balance(
        mut self, address: &Address, asset: Asset, balance: i64,
    ) -> Self {
        self.0.balances.push(BalanceUpdate {
            address: address.clone(),
            asset,
            balance,
        });
        self
    }

    pub fn lease(mut self, address: &Address, lease: LeaseBalance) -> Self {
        self.0.lease_balances.push(LeaseBalanceUpdate {
            address: address.clone(),
            lease,
        });
        self
    }

    pub fn build(self) -> StateUpdate {
        self.0
    }
}

pub fn block_append(
    h: u32, id: BlockId, state_update: StateUpdate,
) -> BlockchainUpdated {
    BlockchainUpdated {
        height: h,
        id: id.clone(),
        update: Update::Append(Append {
            kind: AppendKind::Block {
                header: header(h, &id),
                hit_source: Some(vec![h as u8; 4].into()),
            },
            state_update,
            tx_state_updates: Vec::new(),
            transactions: Vec::new(),
        }),
    }
}

pub fn micro_append(
    h: u32, id: BlockId, state_update: StateUpdate,
) -> BlockchainUpdated {
    BlockchainUpdated {
        height: h,
        id,
        update: Update::Append(Append {
            kind: AppendKind::MicroBlock,
            state_update,
            tx_state_updates: Vec::new(),
            transactions: Vec::new(),
        }),
    }
}

pub fn block_with_txs(
    h: u32, id: BlockId, state_update: StateUpdate,
    transactions: Vec<TxInfo>,
) -> BlockchainUpdated {
    BlockchainUpdated {
        height: h,
        id: id.clone(),
        update: Update::Append(Append {
            kind: AppendKind::Block {
                header: header(h, &id),
                hit_source: None,
            },
            state_update,
            tx_state_updates: Vec::new(),
            transactions,
        }),
    }
}

pub fn rollback_to(
    h_to: u32, id: BlockId, state_update: StateUpdate,
    removed_tx_ids: Vec<TxId>,
) -> BlockchainUpdated {
    BlockchainUpdated {
        height: h_to,
        id,
        update: Update::Rollback(Rollback {
            state_update,
            removed_tx_ids,
        }),
    }
}

pub fn empty_event(h: u32) -> BlockchainUpdated {
    BlockchainUpdated {
        height: h,
        id: bid(h as u64),
        update: Update::Empty,
    }
}
