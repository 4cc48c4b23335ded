//! Ledger facade
//!
//! Owns the storage, the single-writer actor and the metrics registry, and
//! exposes the public API. Mutations are forwarded to the actor; reads hit
//! storage directly since RocksDB snapshots them consistently.

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    transfer as transfer_ops, Config, Error, Result, Storage,
};
use crate::types::{
    Currency, LedgerAccountType, Limit, LimitType, Participant, ParticipantCurrency,
    ParticipantCurrencyId, ParticipantId, Position, PositionChange, SettlementWindow, Transfer,
    TransferFulfilment, TransferParticipant, TransferState, TransferStateChange, WindowId,
    WindowState, WindowStateChange,
};
use crate::validator::{FulfilmentValidator, Sha256PreimageValidator};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The ledger service
pub struct Ledger {
    storage: Arc<Storage>,
    handle: LedgerHandle,
    metrics: Arc<Metrics>,
    config: Config,
}

impl Ledger {
    /// Open the ledger with the standard SHA-256 fulfilment validator.
    /// Must be called from within a Tokio runtime.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_validator(config, Arc::new(Sha256PreimageValidator))
    }

    /// Open the ledger with a custom fulfilment validator
    pub fn open_with_validator(
        config: Config,
        validator: Arc<dyn FulfilmentValidator>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Config(format!("Metrics registry: {}", e)))?,
        );
        let handle = spawn_ledger_actor(storage.clone(), validator);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = %config.data_dir.display(),
            "Ledger opened"
        );

        Ok(Self {
            storage,
            handle,
            metrics,
            config,
        })
    }

    /// Metrics registry for scraping
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Service configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the writer task
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }

    // ---- admin ----

    /// Create a participant
    pub async fn create_participant(&self, name: &str) -> Result<Participant> {
        self.handle.create_participant(name.to_string()).await
    }

    /// Enable or disable a participant
    pub async fn set_participant_active(
        &self,
        participant_id: ParticipantId,
        is_active: bool,
    ) -> Result<Participant> {
        self.handle
            .set_participant_active(participant_id, is_active)
            .await
    }

    /// Create a currency account for a participant
    pub async fn create_participant_currency(
        &self,
        participant_id: ParticipantId,
        currency: Currency,
        account_type: LedgerAccountType,
    ) -> Result<ParticipantCurrency> {
        self.handle
            .create_participant_currency(participant_id, currency, account_type)
            .await
    }

    /// Set or replace an account limit
    pub async fn set_limit(&self, limit: Limit) -> Result<()> {
        self.handle.set_limit(limit).await
    }

    // ---- transfers ----

    /// Admit a transfer with its double-entry participant rows
    pub async fn receive_transfer(
        &self,
        transfer: Transfer,
        participants: Vec<TransferParticipant>,
    ) -> Result<TransferStateChange> {
        let started = Instant::now();
        let change = self.handle.receive(transfer, participants).await?;
        self.metrics.transfers_received.inc();
        self.metrics
            .operation_duration
            .observe(started.elapsed().as_secs_f64());
        Ok(change)
    }

    /// Reserve payer funds for a received transfer
    pub async fn reserve_transfer(&self, transfer_id: Uuid) -> Result<TransferStateChange> {
        let started = Instant::now();
        let change = self.handle.reserve(transfer_id).await?;
        if change.state == TransferState::Aborted {
            self.metrics.transfers_aborted.inc();
            self.metrics.limit_rejections.inc();
        }
        self.metrics
            .operation_duration
            .observe(started.elapsed().as_secs_f64());
        Ok(change)
    }

    /// Commit a reserved transfer against a fulfilment preimage
    pub async fn fulfil_transfer(
        &self,
        transfer_id: Uuid,
        fulfilment: &str,
    ) -> Result<TransferStateChange> {
        let started = Instant::now();
        let change = self.handle.fulfil(transfer_id, fulfilment.to_string()).await?;
        match change.state {
            TransferState::Committed => self.metrics.transfers_committed.inc(),
            TransferState::Aborted => self.metrics.transfers_aborted.inc(),
            _ => {}
        }
        self.metrics
            .operation_duration
            .observe(started.elapsed().as_secs_f64());
        Ok(change)
    }

    /// Abort a transfer whose expiration has passed
    pub async fn expire_transfer(
        &self,
        transfer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransferStateChange> {
        let change = self.handle.expire(transfer_id, now).await?;
        if change.state == TransferState::Aborted {
            self.metrics.transfers_aborted.inc();
            self.metrics.transfers_expired.inc();
        }
        Ok(change)
    }

    /// Abort every transfer whose expiration has passed. Returns the number
    /// of candidates processed. Individual failures are logged, not fatal.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self
            .storage
            .expired_candidates(now, self.config.expiry.max_per_sweep)?;
        let count = candidates.len();
        for transfer_id in candidates {
            if let Err(e) = self.expire_transfer(transfer_id, now).await {
                tracing::warn!(transfer_id = %transfer_id, error = %e, "Expiry sweep failed for transfer");
            }
        }
        if count > 0 {
            tracing::info!(count, "Expiry sweep processed transfers");
        }
        Ok(count)
    }

    // ---- settlement windows ----

    /// Open the genesis settlement window
    pub async fn open_window(&self) -> Result<SettlementWindow> {
        self.handle.open_window().await
    }

    /// Close the open window. Returns the successor window; the closed
    /// window is left in PROCESSING for aggregation.
    pub async fn close_window(
        &self,
        window_id: WindowId,
        reason: &str,
    ) -> Result<SettlementWindow> {
        let (_, successor) = self.handle.close_window(window_id, reason.to_string()).await?;
        self.metrics.windows_rotated.inc();
        Ok(successor)
    }

    /// Append a post-closure window state transition
    pub async fn mark_window(
        &self,
        window_id: WindowId,
        state: WindowState,
        reason: Option<String>,
    ) -> Result<WindowStateChange> {
        self.handle.mark_window(window_id, state, reason).await
    }

    /// Settlement-driven position adjustment
    pub async fn adjust_position(
        &self,
        participant_currency_id: ParticipantCurrencyId,
        delta: Decimal,
        settlement_id: u64,
        reason: &str,
    ) -> Result<Position> {
        self.handle
            .adjust(participant_currency_id, delta, settlement_id, reason.to_string())
            .await
    }

    // ---- reads ----

    /// Participant by id
    pub fn participant(&self, id: ParticipantId) -> Result<Participant> {
        self.storage.participant(id)
    }

    /// Currency account by id
    pub fn participant_currency(&self, id: ParticipantCurrencyId) -> Result<ParticipantCurrency> {
        self.storage.participant_currency(id)
    }

    /// Current position for an account
    pub fn position(&self, id: ParticipantCurrencyId) -> Result<Position> {
        self.storage.position(id)
    }

    /// Position mutation history for an account
    pub fn position_changes(&self, id: ParticipantCurrencyId) -> Result<Vec<PositionChange>> {
        self.storage.position_changes(id)
    }

    /// Active limit for an account
    pub fn limit(&self, id: ParticipantCurrencyId, limit_type: LimitType) -> Result<Option<Limit>> {
        self.storage.limit(id, limit_type)
    }

    /// Transfer by id
    pub fn transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        self.storage.transfer(transfer_id)
    }

    /// Current transfer state
    pub fn transfer_state(&self, transfer_id: Uuid) -> Result<Option<TransferStateChange>> {
        self.storage.current_transfer_state(transfer_id)
    }

    /// Full transfer state history, oldest first
    pub fn transfer_state_history(&self, transfer_id: Uuid) -> Result<Vec<TransferStateChange>> {
        self.storage.transfer_state_history(transfer_id)
    }

    /// Double-entry rows for a transfer
    pub fn transfer_participants(&self, transfer_id: Uuid) -> Result<Vec<TransferParticipant>> {
        self.storage.transfer_participants(transfer_id)
    }

    /// Fulfilment record, present once committed
    pub fn fulfilment(&self, transfer_id: Uuid) -> Result<Option<TransferFulfilment>> {
        self.storage.fulfilment(transfer_id)
    }

    /// Settlement window by id
    pub fn window(&self, window_id: WindowId) -> Result<SettlementWindow> {
        self.storage.window(window_id)
    }

    /// Current window state
    pub fn window_state(&self, window_id: WindowId) -> Result<Option<WindowStateChange>> {
        self.storage.current_window_state(window_id)
    }

    /// Full window state history, oldest first
    pub fn window_state_history(&self, window_id: WindowId) -> Result<Vec<WindowStateChange>> {
        self.storage.window_state_history(window_id)
    }

    /// Transfers committed into a window
    pub fn window_transfers(&self, window_id: WindowId) -> Result<Vec<Uuid>> {
        self.storage.window_transfers(window_id)
    }

    /// The currently open window, if any
    pub fn open_window_id(&self) -> Result<Option<WindowId>> {
        self.storage.open_window_id()
    }
}

// Convenience builder for the common two-party principal transfer shape
impl Ledger {
    /// Build the payer/payee entry pair for a principal-only transfer
    pub fn principal_entries(
        transfer: &Transfer,
        payer: ParticipantCurrencyId,
        payee: ParticipantCurrencyId,
    ) -> Vec<TransferParticipant> {
        transfer_ops::principal_entries(transfer, payer, payee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::condition_for;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn open_ledger() -> (Ledger, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        (Ledger::open(config).unwrap(), temp)
    }

    async fn fixture(ledger: &Ledger) -> (ParticipantCurrencyId, ParticipantCurrencyId) {
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
                value: Decimal::new(1000, 0),
                alarm_percentage: Decimal::new(8, 1),
                is_active: true,
            })
            .await
            .unwrap();
        ledger.open_window().await.unwrap();
        (
            payer_acc.participant_currency_id,
            payee_acc.participant_currency_id,
        )
    }

    fn transfer_of(amount: i64) -> Transfer {
        let now = Utc::now();
        Transfer {
            transfer_id: Uuid::new_v4(),
            currency: Currency::USD,
            amount: Decimal::new(amount, 0),
            condition: condition_for("preimage"),
            expiration: now + Duration::seconds(30),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_updates_metrics() {
        let (ledger, _temp) = open_ledger().await;
        let (payer, payee) = fixture(&ledger).await;

        let transfer = transfer_of(100);
        let id = transfer.transfer_id;
        let entries = Ledger::principal_entries(&transfer, payer, payee);

        ledger.receive_transfer(transfer, entries).await.unwrap();
        ledger.reserve_transfer(id).await.unwrap();
        let change = ledger.fulfil_transfer(id, "preimage").await.unwrap();
        assert_eq!(change.state, TransferState::Committed);

        assert_eq!(ledger.metrics().transfers_received.get(), 1);
        assert_eq!(ledger.metrics().transfers_committed.get(), 1);
        assert_eq!(ledger.metrics().transfers_aborted.get(), 0);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_limit_rejection_counts_as_abort() {
        let (ledger, _temp) = open_ledger().await;
        let (payer, payee) = fixture(&ledger).await;

        let transfer = transfer_of(5000);
        let id = transfer.transfer_id;
        let entries = Ledger::principal_entries(&transfer, payer, payee);
        ledger.receive_transfer(transfer, entries).await.unwrap();
        let change = ledger.reserve_transfer(id).await.unwrap();
        assert_eq!(change.state, TransferState::Aborted);
        assert_eq!(ledger.metrics().limit_rejections.get(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_expire_sweep() {
        let (ledger, _temp) = open_ledger().await;
        let (payer, payee) = fixture(&ledger).await;

        let mut transfer = transfer_of(100);
        transfer.expiration = Utc::now() + Duration::milliseconds(1);
        let id = transfer.transfer_id;
        let entries = Ledger::principal_entries(&transfer, payer, payee);
        ledger.receive_transfer(transfer, entries).await.unwrap();
        ledger.reserve_transfer(id).await.unwrap();

        let later = Utc::now() + Duration::seconds(5);
        let count = ledger.expire_sweep(later).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            ledger.transfer_state(id).unwrap().unwrap().state,
            TransferState::Aborted
        );
        assert_eq!(ledger.metrics().transfers_expired.get(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_window_rotation_via_facade() {
        let (ledger, _temp) = open_ledger().await;
        fixture(&ledger).await;

        let first = ledger.open_window_id().unwrap().unwrap();
        let successor = ledger.close_window(first, "scheduled").await.unwrap();
        assert_eq!(ledger.open_window_id().unwrap(), Some(successor.window_id));
        assert_eq!(
            ledger.window_state(first).unwrap().unwrap().state,
            WindowState::Processing
        );
        assert_eq!(ledger.metrics().windows_rotated.get(), 1);

        ledger.shutdown().await.unwrap();
    }
}
