//! Record storage for the ledger.
//!
//! Operations read through [`RecordStore`] and describe their effects as a
//! batch of [`StateWrite`]s; a store applies a batch completely or not at all.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::ledger::{AccountAllocation, AccountId, CapacityLedger};
use crate::links::{LinkKey, LinkRecord};

mod file;

pub use file::JsonFileStore;

/// A single staged mutation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateWrite {
    Capacity(CapacityLedger),
    Allocation {
        account: AccountId,
        allocation: AccountAllocation,
    },
    PutLink {
        key: LinkKey,
        record: LinkRecord,
    },
    RemoveLink {
        key: LinkKey,
    },
    /// Marks a signed event as applied.
    Receipt {
        digest: [u8; 32],
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateMeta {
    /// Number of committed batches.
    pub height: u64,
    pub last_receipt: Option<String>,
}

pub trait RecordStore {
    fn capacity(&self) -> Result<Option<CapacityLedger>, StoreError>;

    fn allocation(&self, account: &AccountId) -> Result<Option<AccountAllocation>, StoreError>;

    fn link(&self, key: &LinkKey) -> Result<Option<LinkRecord>, StoreError>;

    fn has_receipt(&self, digest: &[u8; 32]) -> Result<bool, StoreError>;

    fn meta(&self) -> Result<StateMeta, StoreError>;

    /// Apply every write in order, or none of them.
    fn commit(&mut self, writes: Vec<StateWrite>) -> Result<(), StoreError>;
}

/// In-memory state, also the on-disk format of [`JsonFileStore`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MemoryStore {
    #[serde(default)]
    pub meta: StateMeta,
    pub capacity: Option<CapacityLedger>,
    #[serde(default)]
    pub allocations: BTreeMap<AccountId, AccountAllocation>,
    /// owner -> path -> record
    #[serde(default)]
    pub links: BTreeMap<AccountId, BTreeMap<String, LinkRecord>>,
    #[serde(default)]
    receipts: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links_of(&self, owner: &AccountId) -> impl Iterator<Item = (&String, &LinkRecord)> {
        self.links.get(owner).into_iter().flat_map(|paths| paths.iter())
    }

    fn contains_link(&self, key: &LinkKey) -> bool {
        self.links
            .get(&key.owner)
            .is_some_and(|paths| paths.contains_key(&key.path))
    }

    fn apply_one(&mut self, write: StateWrite) {
        match write {
            StateWrite::Capacity(capacity) => self.capacity = Some(capacity),
            StateWrite::Allocation {
                account,
                allocation,
            } => {
                self.allocations.insert(account, allocation);
            }
            StateWrite::PutLink { key, record } => {
                self.links
                    .entry(key.owner)
                    .or_default()
                    .insert(key.path, record);
            }
            StateWrite::RemoveLink { key } => {
                if let Some(paths) = self.links.get_mut(&key.owner) {
                    paths.remove(&key.path);
                    if paths.is_empty() {
                        self.links.remove(&key.owner);
                    }
                }
            }
            StateWrite::Receipt { digest } => {
                let digest = hex::encode(digest);
                self.meta.last_receipt = Some(digest.clone());
                self.receipts.insert(digest);
            }
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            capacity: self.capacity.clone(),
            allocations: self.allocations.clone(),
            links: self.links.clone(),
            merkle_root: hex::encode(compute_merkle_root(self)),
        }
    }
}

impl RecordStore for MemoryStore {
    fn capacity(&self) -> Result<Option<CapacityLedger>, StoreError> {
        Ok(self.capacity.clone())
    }

    fn allocation(&self, account: &AccountId) -> Result<Option<AccountAllocation>, StoreError> {
        Ok(self.allocations.get(account).cloned())
    }

    fn link(&self, key: &LinkKey) -> Result<Option<LinkRecord>, StoreError> {
        Ok(self
            .links
            .get(&key.owner)
            .and_then(|paths| paths.get(&key.path))
            .cloned())
    }

    fn has_receipt(&self, digest: &[u8; 32]) -> Result<bool, StoreError> {
        Ok(self.receipts.contains(&hex::encode(digest)))
    }

    fn meta(&self) -> Result<StateMeta, StoreError> {
        Ok(self.meta.clone())
    }

    fn commit(&mut self, writes: Vec<StateWrite>) -> Result<(), StoreError> {
        // removals are the only writes that can fail; check them up front
        for write in &writes {
            if let StateWrite::RemoveLink { key } = write {
                if !self.contains_link(key) {
                    return Err(StoreError::MissingLink {
                        owner: key.owner.clone(),
                        path: key.path.clone(),
                    });
                }
            }
        }
        for write in writes {
            self.apply_one(write);
        }
        self.meta.height += 1;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: StateMeta,
    pub capacity: Option<CapacityLedger>,
    pub allocations: BTreeMap<AccountId, AccountAllocation>,
    pub links: BTreeMap<AccountId, BTreeMap<String, LinkRecord>>,
    pub merkle_root: String,
}

const CAPACITY_TAG: &[u8] = b"storage-ledger/leaf/capacity";
const ALLOCATION_TAG: &[u8] = b"storage-ledger/leaf/allocation";
const LINK_TAG: &[u8] = b"storage-ledger/leaf/link";
const NODE_TAG: &[u8] = b"storage-ledger/node";
const EMPTY_TAG: &[u8] = b"storage-ledger/empty";

fn compute_merkle_root(state: &MemoryStore) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    if let Some(capacity) = &state.capacity {
        let mut hasher = Sha256::new();
        hasher.update(CAPACITY_TAG);
        hasher.update(capacity.total_supply_bytes.to_le_bytes());
        hasher.update(capacity.reserved.raw().to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, allocation) in &state.allocations {
        let mut hasher = Sha256::new();
        hasher.update(ALLOCATION_TAG);
        hasher.update((account.len() as u64).to_le_bytes());
        hasher.update(account.as_bytes());
        hasher.update(allocation.percent_allocated.raw().to_le_bytes());
        hasher.update(allocation.used_bytes.to_le_bytes());
        hasher.update(allocation.total_paid.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, paths) in &state.links {
        for (path, link) in paths {
            let mut hasher = Sha256::new();
            hasher.update(LINK_TAG);
            for field in [owner.as_bytes(), path.as_bytes(), link.remote_locator.as_bytes()] {
                hasher.update((field.len() as u64).to_le_bytes());
                hasher.update(field);
            }
            hasher.update(link.size.to_le_bytes());
            hasher.update([link.hosting_requested as u8, link.accepted as u8]);
            if let Some(producer) = &link.hosting_producer {
                hasher.update(producer.as_bytes());
            }
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

/// Hashes pairs level by level; an unpaired hash moves up unchanged.
fn build_merkle(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    if level.is_empty() {
        return Sha256::digest(EMPTY_TAG).into();
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => Sha256::new()
                    .chain_update(NODE_TAG)
                    .chain_update(left)
                    .chain_update(right)
                    .finalize()
                    .into(),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}
