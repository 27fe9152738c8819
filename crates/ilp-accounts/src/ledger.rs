use std::collections::HashMap;

use ilp_errors::AccountError;

/// Which side of the ledger a reservation or settlement affects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Funds owed to the peer increase (credit).
    Outbound,
    /// Funds owed by the peer increase (debit).
    Inbound,
}

/// The settlement trigger's state machine, per peer. `Idle` means no
/// settlement has been requested since the balance last crossed below the
/// threshold; `Pending` means exactly one `SettlementRequested` has fired and
/// is awaiting the external executor; `InProgress` is reserved for an
/// executor that wants to track its own in-flight settlement (not driven by
/// this ledger itself, which only distinguishes "already requested" from
/// "not yet requested").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SettlementState {
    Idle,
    Pending,
    InProgress,
}

#[derive(Clone, Debug)]
struct Reservation {
    amount: u128,
    direction: Direction,
}

/// One peer's bilateral balance ledger.
///
/// Invariant: `credit - debit <= credit_limit` at all times; `pending` sums
/// to the amount reserved but not yet committed or rolled back.
#[derive(Debug)]
pub struct AccountLedger {
    pub debit: u128,
    pub credit: u128,
    pub credit_limit: u128,
    pub settlement_threshold: u128,
    pending: HashMap<u64, Reservation>,
    pub(crate) settlement_state: SettlementState,
}

/// A point-in-time read of a peer's ledger.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccountSnapshot {
    pub debit: u128,
    pub credit: u128,
    pub credit_limit: u128,
    pub settlement_threshold: u128,
    pub pending: u128,
}

impl AccountLedger {
    pub fn new(credit_limit: u128, settlement_threshold: u128) -> Self {
        AccountLedger {
            debit: 0,
            credit: 0,
            credit_limit,
            settlement_threshold,
            pending: HashMap::new(),
            settlement_state: SettlementState::Idle,
        }
    }

    fn pending_total(&self) -> u128 {
        self.pending.values().map(|r| r.amount).sum()
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            debit: self.debit,
            credit: self.credit,
            credit_limit: self.credit_limit,
            settlement_threshold: self.settlement_threshold,
            pending: self.pending_total(),
        }
    }

    /// Adds `amount` to `pending`, failing if doing so would allow
    /// `credit + pending + amount - debit` to exceed `credit_limit`.
    pub fn reserve(
        &mut self,
        peer_id: &str,
        reservation_id: u64,
        amount: u128,
        direction: Direction,
    ) -> Result<(), AccountError> {
        let exposure = self.credit + self.pending_total() + amount;
        let available = exposure.saturating_sub(self.debit);
        if available > self.credit_limit {
            return Err(AccountError::InsufficientCredit {
                peer_id: peer_id.to_string(),
                requested: amount,
                available: self.credit_limit.saturating_sub(
                    (self.credit + self.pending_total()).saturating_sub(self.debit),
                ),
            });
        }
        self.pending.insert(reservation_id, Reservation { amount, direction });
        Ok(())
    }

    /// Moves a reservation's amount from `pending` into `credit` (outbound)
    /// or `debit` (inbound).
    pub fn commit(&mut self, reservation_id: u64) -> Result<(), AccountError> {
        let reservation = self
            .pending
            .remove(&reservation_id)
            .ok_or(AccountError::UnknownReservation(reservation_id))?;
        match reservation.direction {
            Direction::Outbound => self.credit += reservation.amount,
            Direction::Inbound => self.debit += reservation.amount,
        }
        self.maybe_request_settlement();
        Ok(())
    }

    /// Frees a reservation without mutating debit/credit.
    pub fn rollback(&mut self, reservation_id: u64) -> Result<(), AccountError> {
        self.pending
            .remove(&reservation_id)
            .ok_or(AccountError::UnknownReservation(reservation_id))?;
        Ok(())
    }

    /// Reduces the appropriate side of the ledger by `amount`, saturating at
    /// zero, then re-evaluates whether the settlement trigger should reset.
    pub fn apply_settlement(&mut self, amount: u128, direction: Direction) {
        match direction {
            Direction::Outbound => self.credit = self.credit.saturating_sub(amount),
            Direction::Inbound => self.debit = self.debit.saturating_sub(amount),
        }
        self.maybe_reset_settlement();
    }

    fn net_exposure(&self) -> u128 {
        self.credit.saturating_sub(self.debit)
    }

    /// Returns `true` exactly when this call is the one that should emit
    /// `SettlementRequested` (the Idle -> Pending transition on a threshold
    /// crossing).
    fn maybe_request_settlement(&mut self) -> bool {
        if self.settlement_state == SettlementState::Idle && self.net_exposure() >= self.settlement_threshold {
            self.settlement_state = SettlementState::Pending;
            true
        } else {
            false
        }
    }

    fn maybe_reset_settlement(&mut self) {
        if self.net_exposure() < self.settlement_threshold {
            self.settlement_state = SettlementState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_within_limit_succeeds() {
        let mut ledger = AccountLedger::new(1000, 10_000);
        assert!(ledger.reserve("peer", 1, 500, Direction::Outbound).is_ok());
    }

    #[test]
    fn reserve_over_limit_fails() {
        let mut ledger = AccountLedger::new(1000, 10_000);
        let err = ledger.reserve("peer", 1, 1001, Direction::Outbound).unwrap_err();
        match err {
            AccountError::InsufficientCredit { requested, .. } => assert_eq!(requested, 1001),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn commit_moves_pending_into_credit() {
        let mut ledger = AccountLedger::new(1000, 10_000);
        ledger.reserve("peer", 1, 500, Direction::Outbound).unwrap();
        ledger.commit(1).unwrap();
        assert_eq!(ledger.credit, 500);
        assert_eq!(ledger.snapshot().pending, 0);
    }

    #[test]
    fn rollback_does_not_touch_credit_or_debit() {
        let mut ledger = AccountLedger::new(1000, 10_000);
        ledger.reserve("peer", 1, 500, Direction::Outbound).unwrap();
        ledger.rollback(1).unwrap();
        assert_eq!(ledger.credit, 0);
        assert_eq!(ledger.snapshot().pending, 0);
    }

    #[test]
    fn commit_unknown_reservation_fails() {
        let mut ledger = AccountLedger::new(1000, 10_000);
        assert!(ledger.commit(42).is_err());
    }

    #[test]
    fn settlement_triggers_exactly_once_until_reset() {
        let mut ledger = AccountLedger::new(10_000, 500);
        ledger.reserve("peer", 1, 600, Direction::Outbound).unwrap();
        ledger.commit(1).unwrap();
        assert_eq!(ledger.settlement_state, SettlementState::Pending);

        ledger.reserve("peer", 2, 10, Direction::Outbound).unwrap();
        ledger.commit(2).unwrap();
        assert_eq!(ledger.settlement_state, SettlementState::Pending);

        ledger.apply_settlement(610, Direction::Outbound);
        assert_eq!(ledger.settlement_state, SettlementState::Idle);
    }

    #[test]
    fn net_over_extend_never_observed_across_interleavings() {
        let mut ledger = AccountLedger::new(100, 10_000);
        ledger.reserve("peer", 1, 60, Direction::Outbound).unwrap();
        assert!(ledger.reserve("peer", 2, 60, Direction::Outbound).is_err());
        ledger.commit(1).unwrap();
        assert!(ledger.credit + ledger.pending_total() <= ledger.credit_limit + ledger.debit);
    }
}
