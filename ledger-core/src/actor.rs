//! Actor-based concurrency for the ledger
//!
//! All mutations flow through one Tokio task with an mpsc mailbox. The
//! single logical writer serializes limit checks, transfer transitions and
//! window rotation against each other, so a commit can never race a window
//! closure and two reservations can never both pass the same net debit cap.
//! Each command stages into one RocksDB WriteBatch and is durable (or
//! absent) as a unit; reads go straight to storage.

use crate::{
    position::PositionEngine,
    transfer, window, Error, Result, Storage,
};
use crate::types::{
    Currency, LedgerAccountType, Limit, Participant, ParticipantCurrency, ParticipantCurrencyId,
    ParticipantId, Position, PositionChangeCause, SettlementWindow, Transfer, TransferParticipant,
    TransferStateChange, WindowId, WindowState, WindowStateChange,
};
use crate::validator::FulfilmentValidator;
use chrono::Utc;
use rocksdb::WriteBatch;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Create a participant
    CreateParticipant {
        name: String,
        response: oneshot::Sender<Result<Participant>>,
    },

    /// Enable or disable a participant
    SetParticipantActive {
        participant_id: ParticipantId,
        is_active: bool,
        response: oneshot::Sender<Result<Participant>>,
    },

    /// Create a currency account for a participant
    CreateParticipantCurrency {
        participant_id: ParticipantId,
        currency: Currency,
        account_type: LedgerAccountType,
        response: oneshot::Sender<Result<ParticipantCurrency>>,
    },

    /// Set or replace an account limit
    SetLimit {
        limit: Limit,
        response: oneshot::Sender<Result<()>>,
    },

    /// Admit a transfer with its double-entry rows
    Receive {
        transfer: Transfer,
        participants: Vec<TransferParticipant>,
        response: oneshot::Sender<Result<TransferStateChange>>,
    },

    /// Reserve payer funds for a received transfer
    Reserve {
        transfer_id: Uuid,
        response: oneshot::Sender<Result<TransferStateChange>>,
    },

    /// Commit a reserved transfer against a fulfilment
    Fulfil {
        transfer_id: Uuid,
        fulfilment: String,
        response: oneshot::Sender<Result<TransferStateChange>>,
    },

    /// Abort an expired transfer
    Expire {
        transfer_id: Uuid,
        now: chrono::DateTime<chrono::Utc>,
        response: oneshot::Sender<Result<TransferStateChange>>,
    },

    /// Settlement-driven position adjustment
    Adjust {
        participant_currency_id: ParticipantCurrencyId,
        delta: Decimal,
        settlement_id: u64,
        reason: String,
        response: oneshot::Sender<Result<Position>>,
    },

    /// Open the genesis settlement window
    OpenWindow {
        response: oneshot::Sender<Result<SettlementWindow>>,
    },

    /// Close the open window and rotate to its successor
    CloseWindow {
        window_id: WindowId,
        reason: String,
        response: oneshot::Sender<Result<(WindowStateChange, SettlementWindow)>>,
    },

    /// Append a post-closure window state transition
    MarkWindow {
        window_id: WindowId,
        state: WindowState,
        reason: Option<String>,
        response: oneshot::Sender<Result<WindowStateChange>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Fulfilment validation strategy
    validator: Arc<dyn FulfilmentValidator>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        validator: Arc<dyn FulfilmentValidator>,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            storage,
            validator,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                _ => self.handle_message(msg),
            }
        }
        tracing::debug!("Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::CreateParticipant { name, response } => {
                let _ = response.send(self.create_participant(name));
            }

            LedgerMessage::SetParticipantActive {
                participant_id,
                is_active,
                response,
            } => {
                let _ = response.send(self.set_participant_active(participant_id, is_active));
            }

            LedgerMessage::CreateParticipantCurrency {
                participant_id,
                currency,
                account_type,
                response,
            } => {
                let _ = response.send(self.create_participant_currency(
                    participant_id,
                    currency,
                    account_type,
                ));
            }

            LedgerMessage::SetLimit { limit, response } => {
                let _ = response.send(self.set_limit(limit));
            }

            LedgerMessage::Receive {
                transfer,
                participants,
                response,
            } => {
                let _ = response.send(transfer::receive(&self.storage, transfer, participants));
            }

            LedgerMessage::Reserve {
                transfer_id,
                response,
            } => {
                let _ = response.send(transfer::reserve(&self.storage, transfer_id, Utc::now()));
            }

            LedgerMessage::Fulfil {
                transfer_id,
                fulfilment,
                response,
            } => {
                let _ = response.send(transfer::fulfil(
                    &self.storage,
                    transfer_id,
                    &fulfilment,
                    self.validator.as_ref(),
                    Utc::now(),
                ));
            }

            LedgerMessage::Expire {
                transfer_id,
                now,
                response,
            } => {
                let _ = response.send(transfer::expire(&self.storage, transfer_id, now));
            }

            LedgerMessage::Adjust {
                participant_currency_id,
                delta,
                settlement_id,
                reason,
                response,
            } => {
                let _ = response.send(self.adjust(
                    participant_currency_id,
                    delta,
                    settlement_id,
                    reason,
                ));
            }

            LedgerMessage::OpenWindow { response } => {
                let _ = response.send(window::open_window(&self.storage, Utc::now()));
            }

            LedgerMessage::CloseWindow {
                window_id,
                reason,
                response,
            } => {
                let _ = response.send(window::close_window(
                    &self.storage,
                    window_id,
                    &reason,
                    Utc::now(),
                ));
            }

            LedgerMessage::MarkWindow {
                window_id,
                state,
                reason,
                response,
            } => {
                let _ = response.send(window::mark_window(
                    &self.storage,
                    window_id,
                    state,
                    reason,
                    Utc::now(),
                ));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn create_participant(&self, name: String) -> Result<Participant> {
        if name.trim().is_empty() {
            return Err(Error::Validation("Participant name is required".to_string()));
        }
        let participant = Participant {
            participant_id: self.storage.next_participant_id(),
            name,
            is_active: true,
            created_at: Utc::now(),
        };
        let mut batch = WriteBatch::default();
        self.storage.put_participant(&mut batch, &participant)?;
        self.storage.write(batch)?;
        tracing::info!(participant_id = %participant.participant_id, name = %participant.name, "Participant created");
        Ok(participant)
    }

    fn set_participant_active(
        &self,
        participant_id: ParticipantId,
        is_active: bool,
    ) -> Result<Participant> {
        let mut participant = self.storage.participant(participant_id)?;
        participant.is_active = is_active;
        let mut batch = WriteBatch::default();
        self.storage.put_participant(&mut batch, &participant)?;
        self.storage.write(batch)?;
        Ok(participant)
    }

    fn create_participant_currency(
        &self,
        participant_id: ParticipantId,
        currency: Currency,
        account_type: LedgerAccountType,
    ) -> Result<ParticipantCurrency> {
        // Existence check
        self.storage.participant(participant_id)?;

        let now = Utc::now();
        let account = ParticipantCurrency {
            participant_currency_id: self.storage.next_account_id(),
            participant_id,
            currency,
            account_type,
            is_active: true,
            created_at: now,
        };
        let mut batch = WriteBatch::default();
        self.storage.put_participant_currency(&mut batch, &account)?;
        self.storage.put_position(
            &mut batch,
            &Position::zero(account.participant_currency_id, now),
        )?;
        self.storage.write(batch)?;
        tracing::info!(
            participant_currency_id = %account.participant_currency_id,
            participant_id = %participant_id,
            currency = %currency.code(),
            "Participant currency account created"
        );
        Ok(account)
    }

    fn set_limit(&self, limit: Limit) -> Result<()> {
        if limit.value < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "Limit value must be non-negative, got {}",
                limit.value
            )));
        }
        if limit.alarm_percentage < Decimal::ZERO || limit.alarm_percentage > Decimal::ONE {
            return Err(Error::Validation(format!(
                "Alarm percentage must be within 0..1, got {}",
                limit.alarm_percentage
            )));
        }
        // Account must exist
        self.storage.participant_currency(limit.participant_currency_id)?;

        let mut batch = WriteBatch::default();
        self.storage.put_limit(&mut batch, &limit)?;
        self.storage.write(batch)?;
        tracing::info!(
            participant_currency_id = %limit.participant_currency_id,
            value = %limit.value,
            "Limit set"
        );
        Ok(())
    }

    fn adjust(
        &self,
        participant_currency_id: ParticipantCurrencyId,
        delta: Decimal,
        settlement_id: u64,
        reason: String,
    ) -> Result<Position> {
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let mut engine = PositionEngine::new(&self.storage);
        let position = engine.adjust(
            &mut batch,
            participant_currency_id,
            delta,
            PositionChangeCause::Settlement {
                settlement_id,
                reason,
            },
            now,
        )?;
        self.storage.write(batch)?;
        Ok(position)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        msg: LedgerMessage,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Create a participant
    pub async fn create_participant(&self, name: String) -> Result<Participant> {
        let (tx, rx) = oneshot::channel();
        self.call(LedgerMessage::CreateParticipant { name, response: tx }, rx)
            .await
    }

    /// Enable or disable a participant
    pub async fn set_participant_active(
        &self,
        participant_id: ParticipantId,
        is_active: bool,
    ) -> Result<Participant> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::SetParticipantActive {
                participant_id,
                is_active,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Create a currency account
    pub async fn create_participant_currency(
        &self,
        participant_id: ParticipantId,
        currency: Currency,
        account_type: LedgerAccountType,
    ) -> Result<ParticipantCurrency> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::CreateParticipantCurrency {
                participant_id,
                currency,
                account_type,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Set or replace an account limit
    pub async fn set_limit(&self, limit: Limit) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(LedgerMessage::SetLimit { limit, response: tx }, rx)
            .await
    }

    /// Admit a transfer
    pub async fn receive(
        &self,
        transfer: Transfer,
        participants: Vec<TransferParticipant>,
    ) -> Result<TransferStateChange> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::Receive {
                transfer,
                participants,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Reserve payer funds
    pub async fn reserve(&self, transfer_id: Uuid) -> Result<TransferStateChange> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::Reserve {
                transfer_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Commit against a fulfilment
    pub async fn fulfil(&self, transfer_id: Uuid, fulfilment: String) -> Result<TransferStateChange> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::Fulfil {
                transfer_id,
                fulfilment,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Abort an expired transfer
    pub async fn expire(
        &self,
        transfer_id: Uuid,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<TransferStateChange> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::Expire {
                transfer_id,
                now,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Settlement-driven position adjustment
    pub async fn adjust(
        &self,
        participant_currency_id: ParticipantCurrencyId,
        delta: Decimal,
        settlement_id: u64,
        reason: String,
    ) -> Result<Position> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::Adjust {
                participant_currency_id,
                delta,
                settlement_id,
                reason,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Open the genesis window
    pub async fn open_window(&self) -> Result<SettlementWindow> {
        let (tx, rx) = oneshot::channel();
        self.call(LedgerMessage::OpenWindow { response: tx }, rx).await
    }

    /// Close the open window, rotating to its successor
    pub async fn close_window(
        &self,
        window_id: WindowId,
        reason: String,
    ) -> Result<(WindowStateChange, SettlementWindow)> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::CloseWindow {
                window_id,
                reason,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Append a post-closure window transition
    pub async fn mark_window(
        &self,
        window_id: WindowId,
        state: WindowState,
        reason: Option<String>,
    ) -> Result<WindowStateChange> {
        let (tx, rx) = oneshot::channel();
        self.call(
            LedgerMessage::MarkWindow {
                window_id,
                state,
                reason,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    validator: Arc<dyn FulfilmentValidator>,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, validator, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{condition_for, Sha256PreimageValidator};
    use crate::types::{LedgerEntryType, TransferParticipantRole, TransferState};
    use crate::Config;
    use chrono::Duration;

    async fn spawn() -> (LedgerHandle, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_ledger_actor(storage.clone(), Arc::new(Sha256PreimageValidator));
        (handle, storage, temp_dir)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _storage, _temp) = spawn().await;
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_admin_and_transfer_flow() {
        let (handle, storage, _temp) = spawn().await;

        let payer = handle.create_participant("payerfsp".to_string()).await.unwrap();
        let payee = handle.create_participant("payeefsp".to_string()).await.unwrap();
        let payer_acc = handle
            .create_participant_currency(
                payer.participant_id,
                Currency::USD,
                LedgerAccountType::Position,
            )
            .await
            .unwrap();
        let payee_acc = handle
            .create_participant_currency(
                payee.participant_id,
                Currency::USD,
                LedgerAccountType::Position,
            )
            .await
            .unwrap();
        handle
            .set_limit(Limit {
                participant_currency_id: payer_acc.participant_currency_id,
                limit_type: crate::types::LimitType::NetDebitCap,
                value: Decimal::new(1000, 0),
                alarm_percentage: Decimal::new(8, 1),
                is_active: true,
            })
            .await
            .unwrap();
        handle.open_window().await.unwrap();

        let transfer_id = Uuid::new_v4();
        let now = Utc::now();
        let transfer = Transfer {
            transfer_id,
            currency: Currency::USD,
            amount: Decimal::new(100, 0),
            condition: condition_for("preimage"),
            expiration: now + Duration::seconds(30),
            created_at: now,
        };
        let participants = vec![
            TransferParticipant {
                transfer_id,
                participant_currency_id: payer_acc.participant_currency_id,
                role: TransferParticipantRole::PayerDfsp,
                ledger_entry_type: LedgerEntryType::PrincipalValue,
                amount: Decimal::new(-100, 0),
            },
            TransferParticipant {
                transfer_id,
                participant_currency_id: payee_acc.participant_currency_id,
                role: TransferParticipantRole::PayeeDfsp,
                ledger_entry_type: LedgerEntryType::PrincipalValue,
                amount: Decimal::new(100, 0),
            },
        ];

        handle.receive(transfer, participants).await.unwrap();
        handle.reserve(transfer_id).await.unwrap();
        let change = handle
            .fulfil(transfer_id, "preimage".to_string())
            .await
            .unwrap();
        assert_eq!(change.state, TransferState::Committed);

        let position = storage
            .position(payer_acc.participant_currency_id)
            .unwrap();
        assert_eq!(position.value, Decimal::new(-100, 0));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_set_limit_validation() {
        let (handle, _storage, _temp) = spawn().await;
        let p = handle.create_participant("dfsp".to_string()).await.unwrap();
        let acc = handle
            .create_participant_currency(
                p.participant_id,
                Currency::USD,
                LedgerAccountType::Position,
            )
            .await
            .unwrap();

        let result = handle
            .set_limit(Limit {
                participant_currency_id: acc.participant_currency_id,
                limit_type: crate::types::LimitType::NetDebitCap,
                value: Decimal::new(-5, 0),
                alarm_percentage: Decimal::new(8, 1),
                is_active: true,
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        handle.shutdown().await.unwrap();
    }
}
