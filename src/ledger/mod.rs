use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::pricing::{PricingCurve, Share};
use crate::store::{RecordStore, StateWrite};

pub type AccountId = String;
pub type Amount = u64;

/// Genesis capacity of the pool: 1 PiB.
pub const DEFAULT_TOTAL_SUPPLY_BYTES: u64 = 1024 * 1024 * 1024 * 1024 * 1024;

/// Total capacity of the pool and the share of it already sold.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityLedger {
    pub total_supply_bytes: u64,
    pub reserved: Share,
}

impl CapacityLedger {
    /// Fresh ledger with nothing reserved. Applying it over an existing
    /// ledger resets the reservation total.
    pub fn init(total_supply_bytes: u64) -> Self {
        Self {
            total_supply_bytes,
            reserved: Share::ZERO,
        }
    }

    /// No upper bound: the pool may be oversubscribed, quota is only
    /// enforced per account when links are set.
    pub fn reserve(&mut self, share: Share) -> Result<()> {
        self.reserved = self
            .reserved
            .checked_add(share)
            .ok_or(LedgerError::Overflow("capacity reservation"))?;
        Ok(())
    }

    pub fn release(&mut self, share: Share) -> Result<()> {
        self.reserved =
            self.reserved
                .checked_sub(share)
                .ok_or(LedgerError::ReserveUnderflow {
                    requested: share.raw(),
                    reserved: self.reserved.raw(),
                })?;
        Ok(())
    }
}

/// Per-account holding: share owned, bytes consumed, tokens paid.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountAllocation {
    pub percent_allocated: Share,
    pub used_bytes: u64,
    pub total_paid: Amount,
}

impl AccountAllocation {
    pub fn quota_bytes(&self, total_supply_bytes: u64) -> u64 {
        self.percent_allocated.of_bytes(total_supply_bytes)
    }

    pub fn available_bytes(&self, total_supply_bytes: u64) -> u64 {
        self.quota_bytes(total_supply_bytes)
            .saturating_sub(self.used_bytes)
    }

    /// Share returned for redeeming `amount` of the paid balance at the
    /// account's own average price, `percent_allocated / total_paid`.
    ///
    /// Redeeming the full balance frees the full share. Partial redemptions
    /// round the freed share down, and the floor lost by earlier deposits is
    /// part of the average price, so a deposit followed by an equal
    /// withdrawal can leave the account ahead by up to its accumulated
    /// deposit rounding (zero when the price unit divides `SHARE_SCALE`).
    pub fn redeemable_share(&self, amount: Amount) -> Option<Share> {
        if amount == self.total_paid {
            return Some(self.percent_allocated);
        }
        self.percent_allocated
            .mul_div_floor(u128::from(amount), u128::from(self.total_paid))
    }
}

pub fn load_capacity<S: RecordStore + ?Sized>(store: &S) -> Result<CapacityLedger> {
    store.capacity()?.ok_or(LedgerError::NotInitialized)
}

pub fn load_allocation<S: RecordStore + ?Sized>(
    store: &S,
    account: &AccountId,
) -> Result<AccountAllocation> {
    Ok(store.allocation(account)?.unwrap_or_default())
}

/// Plans deposits and withdrawals against the capacity ledger.
///
/// Planning never writes; the returned [`StateWrite`]s are committed by the
/// caller once the whole event has been checked.
pub struct AllocationManager<C> {
    curve: C,
}

impl<C: PricingCurve> AllocationManager<C> {
    pub fn new(curve: C) -> Self {
        Self { curve }
    }

    pub fn deposit<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        account: &AccountId,
        amount: Amount,
    ) -> Result<Vec<StateWrite>> {
        let share = self
            .curve
            .allocate(amount)
            .ok_or(LedgerError::Overflow("pricing curve"))?;

        let mut capacity = load_capacity(store)?;
        capacity.reserve(share)?;

        let mut allocation = load_allocation(store, account)?;
        allocation.percent_allocated = allocation
            .percent_allocated
            .checked_add(share)
            .ok_or(LedgerError::Overflow("account share"))?;
        allocation.total_paid = allocation
            .total_paid
            .checked_add(amount)
            .ok_or(LedgerError::Overflow("account payments"))?;

        debug!(%account, amount, share = %share, reserved = %capacity.reserved, "planned deposit");
        Ok(vec![
            StateWrite::Capacity(capacity),
            StateWrite::Allocation {
                account: account.clone(),
                allocation,
            },
        ])
    }

    pub fn withdraw<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        account: &AccountId,
        amount: Amount,
    ) -> Result<Vec<StateWrite>> {
        let mut allocation = load_allocation(store, account)?;
        if amount > allocation.total_paid {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                requested: amount,
                available: allocation.total_paid,
            });
        }

        let mut capacity = load_capacity(store)?;
        let freed = allocation
            .redeemable_share(amount)
            .ok_or(LedgerError::Overflow("average price"))?;
        let remaining = allocation
            .percent_allocated
            .checked_sub(freed)
            .ok_or(LedgerError::Overflow("account share"))?;

        // the shrunken quota must still cover what the account's links use
        let remaining_quota = remaining.of_bytes(capacity.total_supply_bytes);
        if remaining_quota < allocation.used_bytes {
            return Err(LedgerError::QuotaExceeded {
                account: account.clone(),
                requested: allocation.used_bytes,
                available: remaining_quota,
            });
        }

        capacity.release(freed)?;
        allocation.percent_allocated = remaining;
        allocation.total_paid -= amount;

        debug!(%account, amount, freed = %freed, reserved = %capacity.reserved, "planned withdrawal");
        Ok(vec![
            StateWrite::Capacity(capacity),
            StateWrite::Allocation {
                account: account.clone(),
                allocation,
            },
        ])
    }
}
