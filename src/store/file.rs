use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{MemoryStore, RecordStore, StateMeta, StateWrite};
use crate::error::StoreError;
use crate::ledger::{AccountAllocation, AccountId, CapacityLedger};
use crate::links::{LinkKey, LinkRecord};

/// [`MemoryStore`] persisted as a pretty-printed JSON document.
///
/// Each commit is applied to a copy, written to a sibling temp file and
/// renamed over the state file before the in-memory view changes.
pub struct JsonFileStore {
    path: PathBuf,
    state: MemoryStore,
}

impl JsonFileStore {
    /// Loads `path`, or starts empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            MemoryStore::new()
        };
        debug!(path = %path.display(), height = state.meta.height, "opened state file");
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &MemoryStore {
        &self.state
    }

    fn persist(&self, state: &MemoryStore) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn capacity(&self) -> Result<Option<CapacityLedger>, StoreError> {
        self.state.capacity()
    }

    fn allocation(&self, account: &AccountId) -> Result<Option<AccountAllocation>, StoreError> {
        self.state.allocation(account)
    }

    fn link(&self, key: &LinkKey) -> Result<Option<LinkRecord>, StoreError> {
        self.state.link(key)
    }

    fn has_receipt(&self, digest: &[u8; 32]) -> Result<bool, StoreError> {
        self.state.has_receipt(digest)
    }

    fn meta(&self) -> Result<StateMeta, StoreError> {
        self.state.meta()
    }

    fn commit(&mut self, writes: Vec<StateWrite>) -> Result<(), StoreError> {
        let mut next = self.state.clone();
        next.commit(writes)?;
        self.persist(&next)?;
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.capacity().unwrap().is_none());
        store
            .commit(vec![StateWrite::Capacity(CapacityLedger::init(2048))])
            .unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.capacity().unwrap(), Some(CapacityLedger::init(2048)));
        assert_eq!(reopened.meta().unwrap().height, 1);
    }

    #[test]
    fn rejected_commit_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        let err = store
            .commit(vec![StateWrite::RemoveLink {
                key: LinkKey::new("alice", "/nope"),
            }])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingLink { .. }));
        assert!(!path.exists());
    }
}
