//! # ilp-accounts
//!
//! Bilateral per-peer balance ledger for the connector core: atomic
//! reserve/commit/rollback against a credit limit, and a threshold-crossing
//! settlement trigger.

mod ledger;
mod manager;

pub use self::ledger::{AccountLedger, AccountSnapshot, Direction, SettlementState};
pub use self::manager::{AccountManager, ReservationToken, SettlementObserver};
