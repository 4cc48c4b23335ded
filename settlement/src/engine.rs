//! Settlement engine
//!
//! Coordinates window closure with aggregation, creates settlements over
//! aggregated windows and drives the parent/child settlement state machine.
//! The parent state is always derived from the children by [`rollup`]; it
//! is recomputed after every child mutation and never set directly.

use crate::{
    aggregation::{net_by_account, net_entries},
    config::Config,
    error::{Error, Result},
    storage::SettlementStore,
    types::{
        rollup, AggregationRow, AggregationRun, Settlement, SettlementAccount,
        SettlementAccountStateChange,
        SettlementId, SettlementState, SettlementStateChange,
    },
};
use chrono::Utc;
use clearhub_ledger::{Ledger, ParticipantCurrencyId, TransferParticipant, WindowId, WindowState};
use rocksdb::WriteBatch;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Settlement engine
pub struct SettlementEngine {
    ledger: Arc<Ledger>,
    store: SettlementStore,
    config: Config,
    // Serializes settlement mutations; ledger mutations are serialized by
    // the ledger's own writer task
    write_lock: Mutex<()>,
}

impl SettlementEngine {
    /// Create an engine over an already-open ledger
    pub fn new(ledger: Arc<Ledger>, config: Config) -> Result<Self> {
        let store = SettlementStore::open(&config)?;
        tracing::info!(
            service = %config.service_name,
            data_dir = %config.data_dir.display(),
            "Settlement engine opened"
        );
        Ok(Self {
            ledger,
            store,
            config,
            write_lock: Mutex::new(()),
        })
    }

    /// The underlying ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ---- window closure saga ----

    /// Close the open window and aggregate it.
    ///
    /// The ledger rotates to a successor window first, so the closed
    /// window's transfer set is frozen before the fold runs. On success the
    /// window moves to PENDING_SETTLEMENT; an aggregation failure leaves it
    /// FAILED for [`retry_aggregation`].
    pub async fn close_window(&self, window_id: WindowId, reason: &str) -> Result<AggregationRun> {
        let _guard = self.write_lock.lock().await;
        self.ledger.close_window(window_id, reason).await?;
        self.run_aggregation(window_id, reason).await
    }

    /// Re-run aggregation for a window whose previous run failed
    pub async fn retry_aggregation(
        &self,
        window_id: WindowId,
        reason: &str,
    ) -> Result<AggregationRun> {
        let _guard = self.write_lock.lock().await;
        let state = self
            .ledger
            .window_state(window_id)?
            .ok_or_else(|| Error::NotFound(format!("Window {}", window_id)))?;
        if state.state != WindowState::Failed {
            return Err(Error::InvalidState(format!(
                "Window {} is {}, only FAILED windows can be retried",
                window_id, state.state
            )));
        }
        self.ledger
            .mark_window(window_id, WindowState::Processing, Some(reason.to_string()))
            .await?;
        self.run_aggregation(window_id, reason).await
    }

    async fn run_aggregation(&self, window_id: WindowId, reason: &str) -> Result<AggregationRun> {
        match self.aggregate(window_id) {
            Ok(rows) => {
                let run = AggregationRun {
                    window_id,
                    run: self.store.latest_run(window_id)?.unwrap_or(0) + 1,
                    rows,
                    window_state: WindowState::PendingSettlement,
                    created_at: Utc::now(),
                };
                let mut batch = WriteBatch::default();
                self.store.put_aggregation(&mut batch, &run)?;
                self.store.write(batch)?;

                self.ledger
                    .mark_window(
                        window_id,
                        WindowState::PendingSettlement,
                        Some(reason.to_string()),
                    )
                    .await?;
                tracing::info!(
                    window_id = %window_id,
                    run = run.run,
                    rows = run.rows.len(),
                    "Window aggregated"
                );
                Ok(run)
            }
            Err(e) => {
                tracing::error!(window_id = %window_id, error = %e, "Window aggregation failed");
                self.ledger
                    .mark_window(window_id, WindowState::Failed, Some(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    /// Recompute a window's nets from its committed transfers without
    /// persisting anything. Deterministic for a closed window.
    pub fn aggregate(&self, window_id: WindowId) -> Result<Vec<AggregationRow>> {
        let mut entries: Vec<TransferParticipant> = Vec::new();
        for transfer_id in self.ledger.window_transfers(window_id)? {
            entries.extend(self.ledger.transfer_participants(transfer_id)?);
        }
        Ok(net_entries(&entries))
    }

    // ---- settlement lifecycle ----

    /// Create a settlement over aggregated windows.
    ///
    /// Every window must be in PENDING_SETTLEMENT with a persisted
    /// aggregation run. Obligations are summed per account across the
    /// windows; each account becomes a child in PENDING_SETTLEMENT.
    pub async fn create_settlement(
        &self,
        window_ids: Vec<WindowId>,
        reason: &str,
    ) -> Result<Settlement> {
        let _guard = self.write_lock.lock().await;
        if window_ids.is_empty() {
            return Err(Error::Validation(
                "A settlement requires at least one window".to_string(),
            ));
        }

        let mut nets: BTreeMap<ParticipantCurrencyId, Decimal> = BTreeMap::new();
        for window_id in &window_ids {
            let state = self
                .ledger
                .window_state(*window_id)?
                .ok_or_else(|| Error::NotFound(format!("Window {}", window_id)))?;
            if state.state != WindowState::PendingSettlement {
                return Err(Error::InvalidState(format!(
                    "Window {} is {}, expected PENDING_SETTLEMENT",
                    window_id, state.state
                )));
            }
            // A window belongs to at most one live settlement; a second
            // sweep would duplicate its obligations
            if let Some(owner) = self.store.window_claim(*window_id)? {
                if self.settlement_state(owner)? != SettlementState::Aborted {
                    return Err(Error::InvalidState(format!(
                        "Window {} already belongs to settlement {}",
                        window_id, owner
                    )));
                }
            }
            let run = self
                .store
                .latest_aggregation(*window_id)?
                .ok_or_else(|| {
                    Error::InvalidState(format!("Window {} has no aggregation run", window_id))
                })?;
            for (account, net) in net_by_account(&run.rows) {
                *nets.entry(account).or_insert(Decimal::ZERO) += net;
            }
        }

        let now = Utc::now();
        let settlement = Settlement {
            settlement_id: self.store.next_settlement_id(),
            window_ids,
            reason: reason.to_string(),
            auto_position_reset: self.config.model.auto_position_reset,
            created_at: now,
        };

        let mut batch = WriteBatch::default();
        self.store.put_settlement(&mut batch, &settlement)?;
        for window_id in &settlement.window_ids {
            self.store
                .put_window_claim(&mut batch, *window_id, settlement.settlement_id)?;
        }
        self.store.append_settlement_state(
            &mut batch,
            &SettlementStateChange {
                seq: self.store.next_seq(),
                settlement_id: settlement.settlement_id,
                state: SettlementState::PendingSettlement,
                reason: Some(reason.to_string()),
                created_at: now,
            },
        )?;
        for (account, net_amount) in nets {
            self.store.put_account(
                &mut batch,
                &SettlementAccount {
                    settlement_id: settlement.settlement_id,
                    participant_currency_id: account,
                    net_amount,
                },
            )?;
            self.store.append_account_state(
                &mut batch,
                &SettlementAccountStateChange {
                    seq: self.store.next_seq(),
                    settlement_id: settlement.settlement_id,
                    participant_currency_id: account,
                    state: SettlementState::PendingSettlement,
                    reason: None,
                    created_at: now,
                },
            )?;
        }
        self.store.write(batch)?;

        tracing::info!(
            settlement_id = %settlement.settlement_id,
            windows = settlement.window_ids.len(),
            "Settlement created"
        );
        Ok(settlement)
    }

    /// Acknowledge that the settlement bank recorded the obligations
    pub async fn record_transfers(&self, id: SettlementId, reason: &str) -> Result<SettlementStateChange> {
        self.advance_step(
            id,
            SettlementState::PendingSettlement,
            SettlementState::PsTransfersRecorded,
            reason,
        )
        .await
    }

    /// Acknowledge that funds are reserved at the settlement bank
    pub async fn reserve_transfers(&self, id: SettlementId, reason: &str) -> Result<SettlementStateChange> {
        self.advance_step(
            id,
            SettlementState::PsTransfersRecorded,
            SettlementState::PsTransfersReserved,
            reason,
        )
        .await
    }

    /// Acknowledge the funds movement. With `auto_position_reset` each
    /// advanced account's ledger position is adjusted by the negated net
    /// obligation, releasing the cleared exposure.
    ///
    /// The resets are staged in the same batch as the state change and
    /// cleared one by one as they land in the ledger. If the engine fails
    /// or crashes mid-way, re-calling this on the already-committed
    /// settlement replays the resets still staged.
    pub async fn commit_transfers(&self, id: SettlementId, reason: &str) -> Result<SettlementStateChange> {
        let _guard = self.write_lock.lock().await;
        let parent = self.settlement_state(id)?;
        if parent == SettlementState::PsTransfersCommitted {
            let pending = self.store.pending_resets(id)?;
            if !pending.is_empty() {
                tracing::warn!(
                    settlement_id = %id,
                    pending = pending.len(),
                    "Replaying position resets from an interrupted commit"
                );
                self.apply_pending_resets(id, pending).await?;
                return Ok(self
                    .store
                    .current_settlement_state(id)?
                    .ok_or_else(|| Error::NotFound(format!("Settlement {}", id)))?);
            }
            // An interrupted zero-net commit stages nothing; finish it here
            if self
                .store
                .accounts(id)?
                .iter()
                .all(|a| a.net_amount == Decimal::ZERO)
            {
                return self.settle_zero_net(id, reason).await;
            }
            return Err(Error::InvalidState(format!(
                "Settlement {} is {}, expected {}",
                id, parent, SettlementState::PsTransfersReserved
            )));
        }
        if parent != SettlementState::PsTransfersReserved {
            return Err(Error::InvalidState(format!(
                "Settlement {} is {}, expected {}",
                id, parent, SettlementState::PsTransfersReserved
            )));
        }

        let settlement = self.store.settlement(id)?;
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        for account in self.store.accounts(id)? {
            let state = self.account_state_of(id, account.participant_currency_id)?;
            if state != SettlementState::PsTransfersReserved {
                continue;
            }
            self.store.append_account_state(
                &mut batch,
                &SettlementAccountStateChange {
                    seq: self.store.next_seq(),
                    settlement_id: id,
                    participant_currency_id: account.participant_currency_id,
                    state: SettlementState::PsTransfersCommitted,
                    reason: Some(reason.to_string()),
                    created_at: now,
                },
            )?;
            if settlement.auto_position_reset && account.net_amount != Decimal::ZERO {
                self.store.put_pending_reset(
                    &mut batch,
                    id,
                    account.participant_currency_id,
                    -account.net_amount,
                )?;
            }
        }
        let change = SettlementStateChange {
            seq: self.store.next_seq(),
            settlement_id: id,
            state: SettlementState::PsTransfersCommitted,
            reason: Some(reason.to_string()),
            created_at: now,
        };
        self.store.append_settlement_state(&mut batch, &change)?;
        self.store.write(batch)?;
        tracing::info!(settlement_id = %id, state = %change.state, "Settlement advanced");

        let pending = self.store.pending_resets(id)?;
        self.apply_pending_resets(id, pending).await?;

        // With nothing owed in either direction there is no per-account
        // acknowledgement to wait for
        if self
            .store
            .accounts(id)?
            .iter()
            .all(|a| a.net_amount == Decimal::ZERO)
        {
            return self.settle_zero_net(id, reason).await;
        }
        Ok(change)
    }

    async fn apply_pending_resets(
        &self,
        id: SettlementId,
        pending: Vec<(ParticipantCurrencyId, Decimal)>,
    ) -> Result<()> {
        for (participant_currency_id, delta) in pending {
            self.ledger
                .adjust_position(
                    participant_currency_id,
                    delta,
                    id.0,
                    &format!("Settlement {} position reset", id),
                )
                .await?;
            let mut batch = WriteBatch::default();
            self.store
                .clear_pending_reset(&mut batch, id, participant_currency_id)?;
            self.store.write(batch)?;
        }
        Ok(())
    }

    /// Settle a committed settlement whose accounts all net to zero
    async fn settle_zero_net(&self, id: SettlementId, reason: &str) -> Result<SettlementStateChange> {
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        for account in self.store.accounts(id)? {
            let state = self.account_state_of(id, account.participant_currency_id)?;
            if state != SettlementState::PsTransfersCommitted {
                continue;
            }
            self.store.append_account_state(
                &mut batch,
                &SettlementAccountStateChange {
                    seq: self.store.next_seq(),
                    settlement_id: id,
                    participant_currency_id: account.participant_currency_id,
                    state: SettlementState::Settled,
                    reason: Some(reason.to_string()),
                    created_at: now,
                },
            )?;
        }
        let change = SettlementStateChange {
            seq: self.store.next_seq(),
            settlement_id: id,
            state: SettlementState::Settled,
            reason: Some(reason.to_string()),
            created_at: now,
        };
        self.store.append_settlement_state(&mut batch, &change)?;
        self.store.write(batch)?;

        self.finalize_if_settled(id).await?;
        Ok(change)
    }

    /// Mark one account's obligation discharged. When the last account
    /// settles, the parent and its windows become SETTLED.
    pub async fn settle_account(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
        reason: &str,
    ) -> Result<SettlementAccountStateChange> {
        let _guard = self.write_lock.lock().await;
        // Confirm the account exists
        self.store.account(id, participant_currency_id)?;

        let state = self.account_state_of(id, participant_currency_id)?;
        if state != SettlementState::PsTransfersCommitted {
            return Err(Error::InvalidState(format!(
                "Account {} of settlement {} is {}, expected PS_TRANSFERS_COMMITTED",
                participant_currency_id, id, state
            )));
        }

        let change = SettlementAccountStateChange {
            seq: self.store.next_seq(),
            settlement_id: id,
            participant_currency_id,
            state: SettlementState::Settled,
            reason: Some(reason.to_string()),
            created_at: Utc::now(),
        };
        let mut batch = WriteBatch::default();
        self.store.append_account_state(&mut batch, &change)?;
        self.recompute_parent(
            id,
            &mut batch,
            (participant_currency_id, SettlementState::Settled),
            Some(reason),
        )?;
        self.store.write(batch)?;

        self.finalize_if_settled(id).await?;
        Ok(change)
    }

    /// Abandon a settlement. Allowed only before any obligation committed;
    /// the windows stay in PENDING_SETTLEMENT for a fresh settlement.
    pub async fn abort(&self, id: SettlementId, reason: &str) -> Result<SettlementStateChange> {
        let _guard = self.write_lock.lock().await;
        let parent = self.settlement_state(id)?;
        if parent.is_terminal() {
            return Err(Error::InvalidState(format!(
                "Settlement {} is already {}",
                id, parent
            )));
        }
        let accounts = self.store.accounts(id)?;
        for account in &accounts {
            let state = self.account_state_of(id, account.participant_currency_id)?;
            if matches!(
                state,
                SettlementState::PsTransfersCommitted | SettlementState::Settled
            ) {
                return Err(Error::InvalidState(format!(
                    "Settlement {} cannot be aborted: account {} already committed",
                    id, account.participant_currency_id
                )));
            }
        }

        let now = Utc::now();
        let mut batch = WriteBatch::default();
        for account in &accounts {
            let state = self.account_state_of(id, account.participant_currency_id)?;
            if state.is_terminal() {
                continue;
            }
            self.store.append_account_state(
                &mut batch,
                &SettlementAccountStateChange {
                    seq: self.store.next_seq(),
                    settlement_id: id,
                    participant_currency_id: account.participant_currency_id,
                    state: SettlementState::Aborted,
                    reason: Some(reason.to_string()),
                    created_at: now,
                },
            )?;
        }
        let change = SettlementStateChange {
            seq: self.store.next_seq(),
            settlement_id: id,
            state: SettlementState::Aborted,
            reason: Some(reason.to_string()),
            created_at: now,
        };
        self.store.append_settlement_state(&mut batch, &change)?;
        // Release the windows for a fresh settlement
        let window_ids = self.store.settlement(id)?.window_ids;
        for window_id in window_ids {
            self.store.clear_window_claim(&mut batch, window_id)?;
        }
        self.store.write(batch)?;

        tracing::info!(settlement_id = %id, reason, "Settlement aborted");
        Ok(change)
    }

    /// Abandon a single account's obligation. The remaining accounts settle
    /// normally; the parent reflects only the survivors.
    pub async fn abort_account(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
        reason: &str,
    ) -> Result<SettlementAccountStateChange> {
        let _guard = self.write_lock.lock().await;
        self.store.account(id, participant_currency_id)?;

        let state = self.account_state_of(id, participant_currency_id)?;
        if matches!(
            state,
            SettlementState::PsTransfersCommitted | SettlementState::Settled
        ) {
            return Err(Error::InvalidState(format!(
                "Account {} of settlement {} already committed, cannot abort",
                participant_currency_id, id
            )));
        }
        if state == SettlementState::Aborted {
            return Err(Error::InvalidState(format!(
                "Account {} of settlement {} is already aborted",
                participant_currency_id, id
            )));
        }

        let change = SettlementAccountStateChange {
            seq: self.store.next_seq(),
            settlement_id: id,
            participant_currency_id,
            state: SettlementState::Aborted,
            reason: Some(reason.to_string()),
            created_at: Utc::now(),
        };
        let mut batch = WriteBatch::default();
        self.store.append_account_state(&mut batch, &change)?;
        self.recompute_parent(
            id,
            &mut batch,
            (participant_currency_id, SettlementState::Aborted),
            Some(reason),
        )?;
        self.store.write(batch)?;

        self.finalize_if_settled(id).await?;
        Ok(change)
    }

    // ---- reads ----

    /// Settlement by id
    pub fn settlement(&self, id: SettlementId) -> Result<Settlement> {
        self.store.settlement(id)
    }

    /// Current parent state
    pub fn settlement_state(&self, id: SettlementId) -> Result<SettlementState> {
        Ok(self
            .store
            .current_settlement_state(id)?
            .ok_or_else(|| Error::NotFound(format!("Settlement {}", id)))?
            .state)
    }

    /// Full parent state history, oldest first
    pub fn settlement_state_history(&self, id: SettlementId) -> Result<Vec<SettlementStateChange>> {
        self.store.settlement_state_history(id)
    }

    /// Per-account obligations of a settlement
    pub fn accounts(&self, id: SettlementId) -> Result<Vec<SettlementAccount>> {
        self.store.accounts(id)
    }

    /// Current state of one account
    pub fn account_state(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
    ) -> Result<SettlementState> {
        self.account_state_of(id, participant_currency_id)
    }

    /// Latest aggregation run for a window
    pub fn latest_aggregation(&self, window_id: WindowId) -> Result<Option<AggregationRun>> {
        self.store.latest_aggregation(window_id)
    }

    // ---- internals ----

    async fn advance_step(
        &self,
        id: SettlementId,
        from: SettlementState,
        to: SettlementState,
        reason: &str,
    ) -> Result<SettlementStateChange> {
        let _guard = self.write_lock.lock().await;
        let parent = self.settlement_state(id)?;
        if parent != from {
            return Err(Error::InvalidState(format!(
                "Settlement {} is {}, expected {}",
                id, parent, from
            )));
        }

        let now = Utc::now();
        let mut batch = WriteBatch::default();
        for account in self.store.accounts(id)? {
            let state = self.account_state_of(id, account.participant_currency_id)?;
            if state != from {
                continue;
            }
            self.store.append_account_state(
                &mut batch,
                &SettlementAccountStateChange {
                    seq: self.store.next_seq(),
                    settlement_id: id,
                    participant_currency_id: account.participant_currency_id,
                    state: to,
                    reason: Some(reason.to_string()),
                    created_at: now,
                },
            )?;
        }
        let change = SettlementStateChange {
            seq: self.store.next_seq(),
            settlement_id: id,
            state: to,
            reason: Some(reason.to_string()),
            created_at: now,
        };
        self.store.append_settlement_state(&mut batch, &change)?;
        self.store.write(batch)?;

        tracing::info!(settlement_id = %id, state = %to, "Settlement advanced");
        Ok(change)
    }

    fn account_state_of(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
    ) -> Result<SettlementState> {
        Ok(self
            .store
            .current_account_state(id, participant_currency_id)?
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "Account {} of settlement {} has no state history",
                    participant_currency_id, id
                ))
            })?
            .state)
    }

    /// Derive the parent from the children, staging a change when it moved.
    /// Pointer reads cannot see changes staged in `batch`, so the caller
    /// passes the child state it just staged as `staged`.
    fn recompute_parent(
        &self,
        id: SettlementId,
        batch: &mut WriteBatch,
        staged: (ParticipantCurrencyId, SettlementState),
        reason: Option<&str>,
    ) -> Result<()> {
        let mut states = Vec::new();
        for account in self.store.accounts(id)? {
            let state = if account.participant_currency_id == staged.0 {
                staged.1
            } else {
                self.account_state_of(id, account.participant_currency_id)?
            };
            states.push(state);
        }
        let derived = rollup(&states);
        let current = self.settlement_state(id)?;
        if derived != current {
            self.store.append_settlement_state(
                batch,
                &SettlementStateChange {
                    seq: self.store.next_seq(),
                    settlement_id: id,
                    state: derived,
                    reason: reason.map(|r| r.to_string()),
                    created_at: Utc::now(),
                },
            )?;
        }
        Ok(())
    }

    async fn finalize_if_settled(&self, id: SettlementId) -> Result<()> {
        if self.settlement_state(id)? != SettlementState::Settled {
            return Ok(());
        }
        let settlement = self.store.settlement(id)?;
        for window_id in settlement.window_ids {
            self.ledger
                .mark_window(
                    window_id,
                    WindowState::Settled,
                    Some(format!("Settlement {}", id)),
                )
                .await?;
        }
        tracing::info!(settlement_id = %id, "Settlement fully settled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clearhub_ledger::validator::condition_for;
    use clearhub_ledger::{
        Config as LedgerConfig, Currency, LedgerAccountType, Limit, LimitType, Transfer,
    };
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn setup() -> (
        SettlementEngine,
        ParticipantCurrencyId,
        ParticipantCurrencyId,
        TempDir,
    ) {
        let temp = TempDir::new().unwrap();

        let mut ledger_config = LedgerConfig::default();
        ledger_config.data_dir = temp.path().join("ledger");
        let ledger = Arc::new(Ledger::open(ledger_config).unwrap());

        let payer = ledger.create_participant("payerfsp").await.unwrap();
        let payee = ledger.create_participant("payeefsp").await.unwrap();
        let payer_acc = ledger
            .create_participant_currency(
                payer.participant_id,
                Currency::USD,
                LedgerAccountType::Position,
            )
            .await
            .unwrap();
        let payee_acc = ledger
            .create_participant_currency(
                payee.participant_id,
                Currency::USD,
                LedgerAccountType::Position,
            )
            .await
            .unwrap();
        ledger
            .set_limit(Limit {
                participant_currency_id: payer_acc.participant_currency_id,
                limit_type: LimitType::NetDebitCap,
                value: Decimal::new(1_000, 0),
                alarm_percentage: Decimal::new(8, 1),
                is_active: true,
            })
            .await
            .unwrap();
        ledger.open_window().await.unwrap();

        let mut config = Config::default();
        config.data_dir = temp.path().join("settlement");
        let engine = SettlementEngine::new(ledger, config).unwrap();
        (
            engine,
            payer_acc.participant_currency_id,
            payee_acc.participant_currency_id,
            temp,
        )
    }

    async fn commit_transfer(
        engine: &SettlementEngine,
        payer: ParticipantCurrencyId,
        payee: ParticipantCurrencyId,
        amount: i64,
    ) {
        let now = Utc::now();
        let transfer = Transfer {
            transfer_id: Uuid::new_v4(),
            currency: Currency::USD,
            amount: Decimal::new(amount, 0),
            condition: condition_for("preimage"),
            expiration: now + Duration::seconds(60),
            created_at: now,
        };
        let id = transfer.transfer_id;
        let entries = Ledger::principal_entries(&transfer, payer, payee);
        engine.ledger().receive_transfer(transfer, entries).await.unwrap();
        engine.ledger().reserve_transfer(id).await.unwrap();
        engine.ledger().fulfil_transfer(id, "preimage").await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_retry_replays_staged_resets() {
        let (engine, payer, payee, _temp) = setup().await;
        commit_transfer(&engine, payer, payee, 100).await;
        let window = engine.ledger().open_window_id().unwrap().unwrap();
        engine.close_window(window, "eod").await.unwrap();
        let settlement = engine.create_settlement(vec![window], "eod").await.unwrap();
        let id = settlement.settlement_id;
        engine.record_transfers(id, "ack").await.unwrap();
        engine.reserve_transfers(id, "held").await.unwrap();

        // Replicate a commit cut off right after its batch landed: state
        // changes and staged resets are durable, no adjustment has run
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        for account in engine.store.accounts(id).unwrap() {
            engine
                .store
                .append_account_state(
                    &mut batch,
                    &SettlementAccountStateChange {
                        seq: engine.store.next_seq(),
                        settlement_id: id,
                        participant_currency_id: account.participant_currency_id,
                        state: SettlementState::PsTransfersCommitted,
                        reason: None,
                        created_at: now,
                    },
                )
                .unwrap();
            engine
                .store
                .put_pending_reset(
                    &mut batch,
                    id,
                    account.participant_currency_id,
                    -account.net_amount,
                )
                .unwrap();
        }
        engine
            .store
            .append_settlement_state(
                &mut batch,
                &SettlementStateChange {
                    seq: engine.store.next_seq(),
                    settlement_id: id,
                    state: SettlementState::PsTransfersCommitted,
                    reason: None,
                    created_at: now,
                },
            )
            .unwrap();
        engine.store.write(batch).unwrap();
        assert_eq!(
            engine.ledger().position(payer).unwrap().value,
            Decimal::new(-100, 0)
        );

        // Retrying the commit applies the staged resets and drains them
        let change = engine.commit_transfers(id, "retry").await.unwrap();
        assert_eq!(change.state, SettlementState::PsTransfersCommitted);
        assert_eq!(engine.ledger().position(payer).unwrap().value, Decimal::ZERO);
        assert_eq!(engine.ledger().position(payee).unwrap().value, Decimal::ZERO);
        assert!(engine.store.pending_resets(id).unwrap().is_empty());

        // Once drained a further retry is rejected
        let result = engine.commit_transfers(id, "again").await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_commit_stages_and_drains_resets() {
        let (engine, payer, payee, _temp) = setup().await;
        commit_transfer(&engine, payer, payee, 60).await;
        let window = engine.ledger().open_window_id().unwrap().unwrap();
        engine.close_window(window, "eod").await.unwrap();
        let settlement = engine.create_settlement(vec![window], "eod").await.unwrap();
        let id = settlement.settlement_id;
        engine.record_transfers(id, "ack").await.unwrap();
        engine.reserve_transfers(id, "held").await.unwrap();

        engine.commit_transfers(id, "moved").await.unwrap();
        assert!(engine.store.pending_resets(id).unwrap().is_empty());
        assert_eq!(engine.ledger().position(payer).unwrap().value, Decimal::ZERO);
    }
}
