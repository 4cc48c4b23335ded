//! Transfer state machine
//!
//! Drives a transfer through RECEIVED -> RESERVED -> COMMITTED / ABORTED,
//! appending one [`TransferStateChange`] per transition and mutating
//! positions in the same WriteBatch so state and money never diverge.
//!
//! Business rejections (net debit cap breach, fulfilment mismatch, expiry)
//! are recorded as ABORTED transitions and returned as `Ok`; only
//! infrastructure and caller errors surface as `Err`.

use crate::{
    error::{Error, Result},
    position::{PositionEngine, ReserveOutcome},
    storage::Storage,
    types::{
        entry_account_type, entry_sign, PositionChangeCause, Sign, Transfer, TransferParticipant,
        TransferState, TransferStateChange,
    },
    validator::FulfilmentValidator,
};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Build the payer/payee entry pair for a principal-only transfer
pub fn principal_entries(
    transfer: &Transfer,
    payer: crate::types::ParticipantCurrencyId,
    payee: crate::types::ParticipantCurrencyId,
) -> Vec<TransferParticipant> {
    vec![
        TransferParticipant {
            transfer_id: transfer.transfer_id,
            participant_currency_id: payer,
            role: crate::types::TransferParticipantRole::PayerDfsp,
            ledger_entry_type: crate::types::LedgerEntryType::PrincipalValue,
            amount: -transfer.amount,
        },
        TransferParticipant {
            transfer_id: transfer.transfer_id,
            participant_currency_id: payee,
            role: crate::types::TransferParticipantRole::PayeeDfsp,
            ledger_entry_type: crate::types::LedgerEntryType::PrincipalValue,
            amount: transfer.amount,
        },
    ]
}

/// Admit a new transfer with its double-entry participant rows.
///
/// Validates the entry set (sign policy, account existence and activity,
/// zero-sum per ledger entry type) and persists the transfer, its entries,
/// the RECEIVED state change and an expiry index entry in one batch.
pub fn receive(
    storage: &Storage,
    transfer: Transfer,
    participants: Vec<TransferParticipant>,
) -> Result<TransferStateChange> {
    if storage.transfer_exists(transfer.transfer_id)? {
        return Err(Error::DuplicateTransfer(transfer.transfer_id));
    }
    if transfer.amount <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "Transfer amount must be positive, got {}",
            transfer.amount
        )));
    }
    if participants.len() < 2 {
        return Err(Error::Validation(
            "A transfer requires at least a payer and a payee entry".to_string(),
        ));
    }

    let mut sums: HashMap<crate::types::LedgerEntryType, Decimal> = HashMap::new();
    for entry in &participants {
        if entry.transfer_id != transfer.transfer_id {
            return Err(Error::Validation(format!(
                "Entry references transfer {} but payload is for {}",
                entry.transfer_id, transfer.transfer_id
            )));
        }
        if entry.amount == Decimal::ZERO {
            return Err(Error::Validation(
                "Zero-amount ledger entries are not allowed".to_string(),
            ));
        }
        let expected = entry_sign(entry.role, entry.ledger_entry_type);
        if Sign::of_amount(entry.amount) != Some(expected) {
            return Err(Error::Validation(format!(
                "Entry for role {:?} / {:?} must be a {:?}, got {}",
                entry.role, entry.ledger_entry_type, expected, entry.amount
            )));
        }

        let account = storage.participant_currency(entry.participant_currency_id)?;
        if !account.is_active {
            return Err(Error::Validation(format!(
                "ParticipantCurrency {} is inactive",
                entry.participant_currency_id
            )));
        }
        if account.currency != transfer.currency {
            return Err(Error::Validation(format!(
                "ParticipantCurrency {} is a {} account, transfer is {}",
                entry.participant_currency_id,
                account.currency.code(),
                transfer.currency.code()
            )));
        }
        if account.account_type != entry_account_type(entry.role) {
            return Err(Error::Validation(format!(
                "Role {:?} must post against a {:?} account",
                entry.role,
                entry_account_type(entry.role)
            )));
        }
        let participant = storage.participant(account.participant_id)?;
        if !participant.is_active {
            return Err(Error::Validation(format!(
                "Participant {} is inactive",
                participant.name
            )));
        }

        *sums.entry(entry.ledger_entry_type).or_insert(Decimal::ZERO) += entry.amount;
    }
    for (entry_type, sum) in &sums {
        if *sum != Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Entries for {:?} sum to {}, expected zero",
                entry_type, sum
            )));
        }
    }

    let change = TransferStateChange {
        seq: storage.next_seq(),
        transfer_id: transfer.transfer_id,
        state: TransferState::Received,
        reason: None,
        created_at: transfer.created_at,
    };

    let mut batch = WriteBatch::default();
    storage.put_transfer(&mut batch, &transfer)?;
    storage.put_transfer_participants(&mut batch, transfer.transfer_id, &participants)?;
    storage.append_transfer_state(&mut batch, &change)?;
    storage.index_expiration(&mut batch, transfer.expiration, transfer.transfer_id)?;
    storage.write(batch)?;

    tracing::debug!(transfer_id = %transfer.transfer_id, amount = %transfer.amount, "Transfer received");
    Ok(change)
}

/// Reserve payer funds for a received transfer.
///
/// Every debit leg is reserved against its account's net debit cap in one
/// batch. A cap breach on any leg discards the whole batch and records an
/// ABORTED transition instead, so no partial reservation ever persists.
pub fn reserve(storage: &Storage, transfer_id: Uuid, now: DateTime<Utc>) -> Result<TransferStateChange> {
    let current = storage
        .current_transfer_state(transfer_id)?
        .ok_or(Error::TransferNotFound(transfer_id))?;
    match current.state {
        TransferState::Received => {}
        // Re-delivery of the same command is a no-op
        TransferState::Reserved => return Ok(current),
        TransferState::Committed | TransferState::Aborted => return Ok(current),
    }

    let entries = storage.transfer_participants(transfer_id)?;

    let change = TransferStateChange {
        seq: storage.next_seq(),
        transfer_id,
        state: TransferState::Reserved,
        reason: None,
        created_at: now,
    };
    let cause = PositionChangeCause::Transfer {
        state_change_seq: change.seq,
    };

    let mut batch = WriteBatch::default();
    storage.append_transfer_state(&mut batch, &change)?;

    let mut engine = PositionEngine::new(storage);
    for entry in entries.iter().filter(|e| e.amount < Decimal::ZERO) {
        let outcome = engine.reserve(
            &mut batch,
            entry.participant_currency_id,
            entry.amount.abs(),
            cause.clone(),
            now,
        )?;
        if let ReserveOutcome::LimitExceeded {
            limit_value,
            projected,
        } = outcome
        {
            // Discard all staged work and record the rejection
            drop(batch);
            return abort(
                storage,
                transfer_id,
                current.state,
                format!(
                    "NET_DEBIT_CAP exceeded for participantCurrency {}: projected {} against limit {}",
                    entry.participant_currency_id, projected, limit_value
                ),
                now,
            );
        }
    }

    storage.write(batch)?;
    tracing::debug!(transfer_id = %transfer_id, "Transfer reserved");
    Ok(change)
}

/// Commit a reserved transfer against the presented fulfilment.
///
/// A valid preimage realizes every leg into position value, releases the
/// payer reservations and assigns the transfer to the open settlement
/// window. An invalid preimage aborts the transfer and rolls the
/// reservations back.
pub fn fulfil(
    storage: &Storage,
    transfer_id: Uuid,
    fulfilment: &str,
    validator: &dyn FulfilmentValidator,
    now: DateTime<Utc>,
) -> Result<TransferStateChange> {
    let current = storage
        .current_transfer_state(transfer_id)?
        .ok_or(Error::TransferNotFound(transfer_id))?;
    match current.state {
        TransferState::Reserved => {}
        TransferState::Committed | TransferState::Aborted => return Ok(current),
        TransferState::Received => {
            return Err(Error::InvalidState(format!(
                "Transfer {} is RECEIVED, funds must be reserved before fulfilment",
                transfer_id
            )))
        }
    }

    let transfer = storage.transfer(transfer_id)?;

    if !validator.validate(&transfer.condition, fulfilment) {
        return abort(
            storage,
            transfer_id,
            current.state,
            "Fulfilment does not match transfer condition".to_string(),
            now,
        );
    }

    let window_id = storage.open_window_id()?.ok_or(Error::NoOpenWindow)?;
    let entries = storage.transfer_participants(transfer_id)?;

    let change = TransferStateChange {
        seq: storage.next_seq(),
        transfer_id,
        state: TransferState::Committed,
        reason: None,
        created_at: now,
    };
    let cause = PositionChangeCause::Transfer {
        state_change_seq: change.seq,
    };

    let mut batch = WriteBatch::default();
    storage.append_transfer_state(&mut batch, &change)?;

    let mut engine = PositionEngine::new(storage);
    for entry in &entries {
        let release = if entry.amount < Decimal::ZERO {
            entry.amount.abs()
        } else {
            Decimal::ZERO
        };
        engine.commit(
            &mut batch,
            entry.participant_currency_id,
            entry.amount,
            release,
            cause.clone(),
            now,
        )?;
    }

    storage.put_fulfilment(
        &mut batch,
        &crate::types::TransferFulfilment {
            transfer_id,
            fulfilment: fulfilment.to_string(),
            settlement_window_id: window_id,
            completed_at: now,
        },
    )?;
    storage.clear_expiration(&mut batch, transfer.expiration, transfer_id)?;
    storage.write(batch)?;

    tracing::debug!(transfer_id = %transfer_id, window_id = %window_id, "Transfer committed");
    Ok(change)
}

/// Abort a transfer whose expiration has passed, releasing any reservation.
pub fn expire(storage: &Storage, transfer_id: Uuid, now: DateTime<Utc>) -> Result<TransferStateChange> {
    let current = storage
        .current_transfer_state(transfer_id)?
        .ok_or(Error::TransferNotFound(transfer_id))?;
    if current.state.is_terminal() {
        return Ok(current);
    }

    let transfer = storage.transfer(transfer_id)?;
    if transfer.expiration > now {
        return Err(Error::Validation(format!(
            "Transfer {} does not expire until {}",
            transfer_id, transfer.expiration
        )));
    }

    abort(
        storage,
        transfer_id,
        current.state,
        "EXPIRED".to_string(),
        now,
    )
}

/// Append an ABORTED transition, rolling back reservations held by a
/// RESERVED transfer. The caller supplies the observed current state.
fn abort(
    storage: &Storage,
    transfer_id: Uuid,
    from_state: TransferState,
    reason: String,
    now: DateTime<Utc>,
) -> Result<TransferStateChange> {
    let transfer = storage.transfer(transfer_id)?;

    let change = TransferStateChange {
        seq: storage.next_seq(),
        transfer_id,
        state: TransferState::Aborted,
        reason: Some(reason.clone()),
        created_at: now,
    };
    let cause = PositionChangeCause::Transfer {
        state_change_seq: change.seq,
    };

    let mut batch = WriteBatch::default();
    storage.append_transfer_state(&mut batch, &change)?;

    if from_state == TransferState::Reserved {
        let entries = storage.transfer_participants(transfer_id)?;
        let mut engine = PositionEngine::new(storage);
        for entry in entries.iter().filter(|e| e.amount < Decimal::ZERO) {
            engine.rollback(
                &mut batch,
                entry.participant_currency_id,
                entry.amount.abs(),
                cause.clone(),
                now,
            )?;
        }
    }

    storage.clear_expiration(&mut batch, transfer.expiration, transfer_id)?;
    storage.write(batch)?;

    tracing::info!(transfer_id = %transfer_id, reason = %reason, "Transfer aborted");
    Ok(change)
}
