//! Storage capacity marketplace ledger.
//!
//! Token deposits to a designated ledger account buy proportional shares of a
//! fixed storage pool; withdrawals redeem them at the depositor's average
//! price. Shares become byte quota that owners spend on hosted content links.
//!
//! * [`pricing`] turns deposits into fixed-point [`pricing::Share`]s.
//! * [`ledger`] keeps the pool-wide reservation and per-account allocations.
//! * [`links`] stores content links and charges hosted ones against quota.
//! * [`events`] routes incoming events and commits them atomically through a
//!   [`store::RecordStore`].

pub mod auth;
pub mod config;
pub mod events;
pub mod ledger;
pub mod links;
pub mod logging;
pub mod pricing;
pub mod store;

mod error;

pub use error::{LedgerError, Result, StoreError};
