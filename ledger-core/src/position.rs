//! Position engine
//!
//! Computes and mutates a participant-currency's position and reserved value
//! in response to transfer lifecycle events, enforcing net-debit-cap limits.
//!
//! # Invariants
//!
//! - `value` equals the sum of committed deltas since genesis
//! - `reserved_value` tracks in-flight reservations and is never negative
//! - Every mutation appends exactly one [`PositionChange`] naming its cause
//! - Limit check and reservation increment are atomic: all mutations stage
//!   into the caller's WriteBatch and commit (or vanish) together

use crate::{
    error::{Error, Result},
    storage::Storage,
    types::{
        Limit, LimitType, ParticipantCurrencyId, Position, PositionChange, PositionChangeCause,
    },
};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Result of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Reservation staged; `alarm` is set when the projected position crossed
    /// the limit's alarm threshold
    Reserved {
        /// Threshold alarm raised
        alarm: bool,
    },
    /// Reservation rejected: it would drive the net position below the cap.
    /// Nothing was staged for this account.
    LimitExceeded {
        /// The active net debit cap
        limit_value: Decimal,
        /// The position the reservation would have produced
        projected: Decimal,
    },
}

/// Position engine scoped to one unit of work.
///
/// Caches positions so multiple legs against the same account within one
/// operation observe each other's staged mutations. The caller owns the
/// WriteBatch; discarding it discards every staged mutation, which is the
/// compensation path for partially-reserved transfers.
pub struct PositionEngine<'a> {
    storage: &'a Storage,
    cache: HashMap<ParticipantCurrencyId, Position>,
}

impl<'a> PositionEngine<'a> {
    /// New engine over the store
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            cache: HashMap::new(),
        }
    }

    fn load(&mut self, id: ParticipantCurrencyId) -> Result<&mut Position> {
        match self.cache.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let position = self.storage.position(id)?;
                Ok(entry.insert(position))
            }
        }
    }

    fn stage(
        &mut self,
        batch: &mut WriteBatch,
        id: ParticipantCurrencyId,
        cause: PositionChangeCause,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let seq = self.storage.next_seq();
        let position = self
            .cache
            .get(&id)
            .ok_or_else(|| Error::InvalidState(format!("Position {} not loaded", id)))?;
        self.storage.put_position(batch, position)?;
        self.storage.append_position_change(
            batch,
            &PositionChange {
                seq,
                participant_currency_id: id,
                value: position.value,
                reserved_value: position.reserved_value,
                cause,
                created_at: now,
            },
        )?;
        Ok(())
    }

    /// Reserve `amount` against the account, enforcing the net debit cap.
    ///
    /// `projected = value - reserved_value - amount`; the reservation is
    /// rejected when an active cap exists and `projected < -cap`. On success
    /// `reserved_value` grows by `amount` and a PositionChange referencing
    /// `cause` is staged (value unchanged at reserve time).
    pub fn reserve(
        &mut self,
        batch: &mut WriteBatch,
        id: ParticipantCurrencyId,
        amount: Decimal,
        cause: PositionChangeCause,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Reservation amount must be positive, got {}",
                amount
            )));
        }

        let limit = self.storage.limit(id, LimitType::NetDebitCap)?;
        let position = self.load(id)?;
        let projected = position.value - position.reserved_value - amount;

        let mut alarm = false;
        if let Some(limit) = limit.filter(|l| l.is_active) {
            if projected < -limit.value {
                tracing::info!(
                    participant_currency_id = %id,
                    limit = %limit.value,
                    projected = %projected,
                    "Reservation rejected by net debit cap"
                );
                return Ok(ReserveOutcome::LimitExceeded {
                    limit_value: limit.value,
                    projected,
                });
            }
            if projected < -(limit.value * limit.alarm_percentage) {
                alarm = true;
                tracing::warn!(
                    participant_currency_id = %id,
                    limit = %limit.value,
                    projected = %projected,
                    "Position crossed net debit cap alarm threshold"
                );
            }
        }

        position.reserved_value += amount;
        position.changed_at = now;
        self.stage(batch, id, cause, now)?;

        Ok(ReserveOutcome::Reserved { alarm })
    }

    /// Convert a reservation into a realized balance change.
    ///
    /// `signed_amount` moves `value` (negative for debit legs); `release`
    /// frees previously reserved funds (zero for credit legs).
    pub fn commit(
        &mut self,
        batch: &mut WriteBatch,
        id: ParticipantCurrencyId,
        signed_amount: Decimal,
        release: Decimal,
        cause: PositionChangeCause,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let position = self.load(id)?;
        if release > position.reserved_value {
            return Err(Error::InvalidState(format!(
                "Cannot release {} from reserved value {} for participantCurrency {}",
                release, position.reserved_value, id
            )));
        }
        position.value += signed_amount;
        position.reserved_value -= release;
        position.changed_at = now;
        self.stage(batch, id, cause, now)
    }

    /// Release a reservation without realizing it
    pub fn rollback(
        &mut self,
        batch: &mut WriteBatch,
        id: ParticipantCurrencyId,
        reserved_amount: Decimal,
        cause: PositionChangeCause,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let position = self.load(id)?;
        if reserved_amount > position.reserved_value {
            return Err(Error::InvalidState(format!(
                "Cannot roll back {} from reserved value {} for participantCurrency {}",
                reserved_amount, position.reserved_value, id
            )));
        }
        position.reserved_value -= reserved_amount;
        position.changed_at = now;
        self.stage(batch, id, cause, now)
    }

    /// Settlement-driven position adjustment (no reservation involved)
    pub fn adjust(
        &mut self,
        batch: &mut WriteBatch,
        id: ParticipantCurrencyId,
        delta: Decimal,
        cause: PositionChangeCause,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let position = self.load(id)?;
        position.value += delta;
        position.changed_at = now;
        let snapshot = position.clone();
        self.stage(batch, id, cause, now)?;
        Ok(snapshot)
    }
}
