use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::ledger::{load_allocation, load_capacity, AccountId};
use crate::store::{RecordStore, StateWrite};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    pub owner: AccountId,
    pub path: String,
}

impl LinkKey {
    pub fn new(owner: impl Into<AccountId>, path: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            path: path.into(),
        }
    }
}

/// Pointer from an account-scoped path to off-ledger content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkRecord {
    pub remote_locator: String,
    pub size: u64,
    pub hosting_requested: bool,
    pub accepted: bool,
    pub hosting_producer: Option<AccountId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetLink {
    pub owner: AccountId,
    pub path: String,
    pub remote_locator: String,
    pub size: u64,
    #[serde(default)]
    pub hosting_requested: bool,
}

impl SetLink {
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.owner.clone(), self.path.clone())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveLink {
    pub owner: AccountId,
    pub path: String,
    #[serde(default)]
    pub keep_link: bool,
}

impl RemoveLink {
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.owner.clone(), self.path.clone())
    }
}

/// A producer's answer to a hosting request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostingDecision {
    pub producer: AccountId,
    pub owner: AccountId,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Syntax checks for ledger paths and remote locators.
pub trait PathValidator {
    fn validate_path(&self, path: &str) -> bool;
    fn validate_locator(&self, locator: &str) -> bool;
}

/// Accepts every path and locator.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveValidator;

impl PathValidator for PermissiveValidator {
    fn validate_path(&self, _path: &str) -> bool {
        true
    }

    fn validate_locator(&self, _locator: &str) -> bool {
        true
    }
}

/// Plans link changes, charging hosted links against the owner's quota.
pub struct LinkRegistry<V> {
    validator: V,
}

impl<V: PathValidator> LinkRegistry<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }

    /// Upserts the link at `(owner, path)`.
    ///
    /// A hosted link consumes `size` bytes of quota. Replacing a hosted link
    /// gives its bytes back before the new size is checked.
    pub fn set_link<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        request: &SetLink,
    ) -> Result<Vec<StateWrite>> {
        if !self.validator.validate_locator(&request.remote_locator) {
            return Err(LedgerError::InvalidLocator(request.remote_locator.clone()));
        }
        if !self.validator.validate_path(&request.path) {
            return Err(LedgerError::InvalidPath(request.path.clone()));
        }

        let key = request.key();
        let capacity = load_capacity(store)?;
        let mut allocation = load_allocation(store, &request.owner)?;
        let previous = store.link(&key)?;

        let mut used = allocation.used_bytes;
        if let Some(old) = previous.as_ref().filter(|old| old.hosting_requested) {
            used = used
                .checked_sub(old.size)
                .ok_or(LedgerError::Overflow("used bytes"))?;
        }

        if request.hosting_requested {
            let quota = allocation.quota_bytes(capacity.total_supply_bytes);
            let available = quota.saturating_sub(used);
            if request.size > available {
                return Err(LedgerError::QuotaExceeded {
                    account: request.owner.clone(),
                    requested: request.size,
                    available,
                });
            }
            used += request.size;
        }

        let mut writes = Vec::with_capacity(2);
        if used != allocation.used_bytes {
            allocation.used_bytes = used;
            writes.push(StateWrite::Allocation {
                account: request.owner.clone(),
                allocation,
            });
        }
        debug!(owner = %key.owner, path = %key.path, size = request.size, used, "planned set link");
        writes.push(StateWrite::PutLink {
            key,
            record: LinkRecord {
                remote_locator: request.remote_locator.clone(),
                size: request.size,
                hosting_requested: request.hosting_requested,
                accepted: false,
                hosting_producer: None,
            },
        });
        Ok(writes)
    }

    /// Deletes the link, or with `keep_link` retains it unpublished. Either
    /// way a hosted link stops counting against the owner's quota.
    pub fn remove_link<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        request: &RemoveLink,
    ) -> Result<Vec<StateWrite>> {
        if !self.validator.validate_path(&request.path) {
            return Err(LedgerError::InvalidPath(request.path.clone()));
        }

        let key = request.key();
        let mut record = store
            .link(&key)?
            .ok_or_else(|| LedgerError::NotFound(format!("link {}:{}", key.owner, key.path)))?;

        let mut writes = Vec::with_capacity(2);
        if record.hosting_requested {
            let mut allocation = load_allocation(store, &request.owner)?;
            allocation.used_bytes = allocation
                .used_bytes
                .checked_sub(record.size)
                .ok_or(LedgerError::Overflow("used bytes"))?;
            writes.push(StateWrite::Allocation {
                account: request.owner.clone(),
                allocation,
            });
        }

        if request.keep_link {
            record.accepted = false;
            record.hosting_requested = false;
            writes.push(StateWrite::PutLink { key, record });
        } else {
            writes.push(StateWrite::RemoveLink { key });
        }
        Ok(writes)
    }

    /// Producer confirmation is not implemented; decisions change nothing.
    pub fn accept_hosting(&self, decision: &HostingDecision) -> Result<Vec<StateWrite>> {
        debug!(producer = %decision.producer, owner = %decision.owner, path = %decision.path, "hosting accepted (no-op)");
        Ok(Vec::new())
    }

    pub fn reject_hosting(&self, decision: &HostingDecision) -> Result<Vec<StateWrite>> {
        debug!(
            producer = %decision.producer,
            owner = %decision.owner,
            path = %decision.path,
            reason = decision.reason.as_deref().unwrap_or(""),
            "hosting rejected (no-op)"
        );
        Ok(Vec::new())
    }
}

impl Default for LinkRegistry<PermissiveValidator> {
    fn default() -> Self {
        Self::new(PermissiveValidator)
    }
}
