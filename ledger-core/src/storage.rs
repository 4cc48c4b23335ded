//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `participants` - Participant records (key: participant_id)
//! - `participant_currencies` - Accounts (key: participant_currency_id)
//! - `positions` - Current position rows (key: participant_currency_id)
//! - `position_changes` - Append-only position audit (key: seq)
//! - `limits` - Limits (key: participant_currency_id || limit_type)
//! - `transfers` - Immutable transfer cores (key: transfer_id)
//! - `transfer_participants` - Role entries per transfer (key: transfer_id)
//! - `transfer_state_changes` - Append-only transfer history (key: seq)
//! - `fulfilments` - Fulfilment records (key: transfer_id)
//! - `windows` - Settlement windows (key: window_id)
//! - `window_state_changes` - Append-only window history (key: seq)
//! - `indices` - Secondary indices and current-state pointers
//! - `meta` - Monotonic sequence and id counters
//!
//! History rows are never overwritten; "current state" is a dedicated
//! pointer entry in `indices`, updated in the same WriteBatch as the
//! history append. Ordering uses the store's monotonic sequence, never
//! wall clocks.

use crate::{
    error::{Error, Result},
    types::{
        Limit, LimitType, Participant, ParticipantCurrency, ParticipantCurrencyId, ParticipantId,
        Position, PositionChange, SettlementWindow, Transfer, TransferFulfilment,
        TransferParticipant, TransferStateChange, WindowId, WindowStateChange,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_PARTICIPANTS: &str = "participants";
const CF_ACCOUNTS: &str = "participant_currencies";
const CF_POSITIONS: &str = "positions";
const CF_POSITION_CHANGES: &str = "position_changes";
const CF_LIMITS: &str = "limits";
const CF_TRANSFERS: &str = "transfers";
const CF_TRANSFER_PARTICIPANTS: &str = "transfer_participants";
const CF_TRANSFER_STATES: &str = "transfer_state_changes";
const CF_FULFILMENTS: &str = "fulfilments";
const CF_WINDOWS: &str = "windows";
const CF_WINDOW_STATES: &str = "window_state_changes";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

/// Meta counter keys
const META_SEQ: &[u8] = b"seq";
const META_PARTICIPANT_ID: &[u8] = b"participant_id";
const META_ACCOUNT_ID: &[u8] = b"participant_currency_id";
const META_WINDOW_ID: &[u8] = b"window_id";

/// Pointer key for the single OPEN window
const IDX_OPEN_WINDOW: &[u8] = b"open_window";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    // Counters are loaded at open and persisted with every batch.
    // All allocations go through the single-writer actor.
    seq: AtomicU64,
    participant_id: AtomicU64,
    account_id: AtomicU64,
    window_id: AtomicU64,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for append-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_PARTICIPANTS, Self::cf_options_current()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_current()),
            ColumnFamilyDescriptor::new(CF_POSITIONS, Self::cf_options_current()),
            ColumnFamilyDescriptor::new(CF_POSITION_CHANGES, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_LIMITS, Self::cf_options_current()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_TRANSFER_PARTICIPANTS, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_TRANSFER_STATES, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_FULFILMENTS, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_WINDOWS, Self::cf_options_current()),
            ColumnFamilyDescriptor::new(CF_WINDOW_STATES, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_current()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db: Arc::new(db),
            seq: AtomicU64::new(0),
            participant_id: AtomicU64::new(0),
            account_id: AtomicU64::new(0),
            window_id: AtomicU64::new(0),
        };

        storage.seq.store(storage.load_counter(META_SEQ)?, Ordering::SeqCst);
        storage
            .participant_id
            .store(storage.load_counter(META_PARTICIPANT_ID)?, Ordering::SeqCst);
        storage
            .account_id
            .store(storage.load_counter(META_ACCOUNT_ID)?, Ordering::SeqCst);
        storage
            .window_id
            .store(storage.load_counter(META_WINDOW_ID)?, Ordering::SeqCst);

        tracing::info!(path = ?path, "Opened ledger store");

        Ok(storage)
    }

    // Column family options

    fn cf_options_current() -> Options {
        let mut opts = Options::default();
        // Frequently read rows, LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_history() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Counters

    fn load_counter(&self, key: &[u8]) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt meta counter".to_string()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Allocate the next monotonic history sequence
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocate the next participant id
    pub fn next_participant_id(&self) -> ParticipantId {
        ParticipantId(self.participant_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Allocate the next participant-currency id
    pub fn next_account_id(&self) -> ParticipantCurrencyId {
        ParticipantCurrencyId(self.account_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Allocate the next window id
    pub fn next_window_id(&self) -> WindowId {
        WindowId(self.window_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn stash_counters(&self, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        batch.put_cf(cf, META_SEQ, self.seq.load(Ordering::SeqCst).to_be_bytes());
        batch.put_cf(
            cf,
            META_PARTICIPANT_ID,
            self.participant_id.load(Ordering::SeqCst).to_be_bytes(),
        );
        batch.put_cf(
            cf,
            META_ACCOUNT_ID,
            self.account_id.load(Ordering::SeqCst).to_be_bytes(),
        );
        batch.put_cf(
            cf,
            META_WINDOW_ID,
            self.window_id.load(Ordering::SeqCst).to_be_bytes(),
        );
        Ok(())
    }

    /// Commit a batch atomically, persisting counter watermarks with it
    pub fn write(&self, mut batch: WriteBatch) -> Result<()> {
        self.stash_counters(&mut batch)?;
        self.db.write(batch)?;
        Ok(())
    }

    // Generic helpers

    fn get<T: serde::de::DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_in<T: serde::Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf_handle(cf)?;
        batch.put_cf(cf, key, bincode::serialize(value)?);
        Ok(())
    }

    /// Collect all keys starting with `prefix` in a column family
    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    // Participant operations

    /// Stage a participant row
    pub fn put_participant(&self, batch: &mut WriteBatch, p: &Participant) -> Result<()> {
        self.put_in(batch, CF_PARTICIPANTS, &p.participant_id.key_bytes(), p)
    }

    /// Get participant by id
    pub fn participant(&self, id: ParticipantId) -> Result<Participant> {
        self.get(CF_PARTICIPANTS, &id.key_bytes())?
            .ok_or(Error::ParticipantNotFound(id.0))
    }

    /// Stage a participant-currency row
    pub fn put_participant_currency(
        &self,
        batch: &mut WriteBatch,
        pc: &ParticipantCurrency,
    ) -> Result<()> {
        self.put_in(batch, CF_ACCOUNTS, &pc.participant_currency_id.key_bytes(), pc)
    }

    /// Get participant-currency account by id
    pub fn participant_currency(&self, id: ParticipantCurrencyId) -> Result<ParticipantCurrency> {
        self.get(CF_ACCOUNTS, &id.key_bytes())?
            .ok_or(Error::ParticipantCurrencyNotFound(id.0))
    }

    // Position operations

    /// Stage the current position row
    pub fn put_position(&self, batch: &mut WriteBatch, position: &Position) -> Result<()> {
        self.put_in(
            batch,
            CF_POSITIONS,
            &position.participant_currency_id.key_bytes(),
            position,
        )
    }

    /// Get current position for an account
    pub fn position(&self, id: ParticipantCurrencyId) -> Result<Position> {
        self.get(CF_POSITIONS, &id.key_bytes())?
            .ok_or(Error::ParticipantCurrencyNotFound(id.0))
    }

    /// Stage an append-only position change plus its account index
    pub fn append_position_change(
        &self,
        batch: &mut WriteBatch,
        change: &PositionChange,
    ) -> Result<()> {
        self.put_in(batch, CF_POSITION_CHANGES, &change.seq.to_be_bytes(), change)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let mut key = b"pc:".to_vec();
        key.extend_from_slice(&change.participant_currency_id.key_bytes());
        key.extend_from_slice(&change.seq.to_be_bytes());
        batch.put_cf(cf, &key, b"");
        Ok(())
    }

    /// Full position-change history for an account, oldest first
    pub fn position_changes(&self, id: ParticipantCurrencyId) -> Result<Vec<PositionChange>> {
        let mut prefix = b"pc:".to_vec();
        prefix.extend_from_slice(&id.key_bytes());

        let mut changes = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, &prefix)? {
            let seq_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt position change index".to_string()))?;
            let change: Option<PositionChange> = self.get(CF_POSITION_CHANGES, &seq_bytes)?;
            if let Some(change) = change {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    // Limit operations

    fn limit_key(id: ParticipantCurrencyId, limit_type: LimitType) -> [u8; 9] {
        let mut key = [0u8; 9];
        key[..8].copy_from_slice(&id.key_bytes());
        key[8] = limit_type as u8;
        key
    }

    /// Stage a limit row
    pub fn put_limit(&self, batch: &mut WriteBatch, limit: &Limit) -> Result<()> {
        self.put_in(
            batch,
            CF_LIMITS,
            &Self::limit_key(limit.participant_currency_id, limit.limit_type),
            limit,
        )
    }

    /// Get a limit for an account, if one is set
    pub fn limit(
        &self,
        id: ParticipantCurrencyId,
        limit_type: LimitType,
    ) -> Result<Option<Limit>> {
        self.get(CF_LIMITS, &Self::limit_key(id, limit_type))
    }

    // Transfer operations

    /// Stage the immutable transfer core
    pub fn put_transfer(&self, batch: &mut WriteBatch, transfer: &Transfer) -> Result<()> {
        self.put_in(batch, CF_TRANSFERS, transfer.transfer_id.as_bytes(), transfer)
    }

    /// Get transfer by id
    pub fn transfer(&self, transfer_id: Uuid) -> Result<Transfer> {
        self.get(CF_TRANSFERS, transfer_id.as_bytes())?
            .ok_or(Error::TransferNotFound(transfer_id))
    }

    /// Whether a transfer id is already stored
    pub fn transfer_exists(&self, transfer_id: Uuid) -> Result<bool> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        Ok(self.db.get_cf(cf, transfer_id.as_bytes())?.is_some())
    }

    /// Stage the role entries for a transfer (written once at receive)
    pub fn put_transfer_participants(
        &self,
        batch: &mut WriteBatch,
        transfer_id: Uuid,
        entries: &[TransferParticipant],
    ) -> Result<()> {
        self.put_in(
            batch,
            CF_TRANSFER_PARTICIPANTS,
            transfer_id.as_bytes(),
            &entries.to_vec(),
        )
    }

    /// Role entries for a transfer
    pub fn transfer_participants(&self, transfer_id: Uuid) -> Result<Vec<TransferParticipant>> {
        self.get(CF_TRANSFER_PARTICIPANTS, transfer_id.as_bytes())?
            .ok_or(Error::TransferNotFound(transfer_id))
    }

    /// Stage a transfer state change: history row, history index, and the
    /// current-state pointer, all in one batch
    pub fn append_transfer_state(
        &self,
        batch: &mut WriteBatch,
        change: &TransferStateChange,
    ) -> Result<()> {
        self.put_in(batch, CF_TRANSFER_STATES, &change.seq.to_be_bytes(), change)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let mut idx = b"tsc:".to_vec();
        idx.extend_from_slice(change.transfer_id.as_bytes());
        idx.extend_from_slice(&change.seq.to_be_bytes());
        batch.put_cf(cf, &idx, b"");

        let mut ptr = b"ts:".to_vec();
        ptr.extend_from_slice(change.transfer_id.as_bytes());
        batch.put_cf(cf, &ptr, bincode::serialize(change)?);
        Ok(())
    }

    /// Current state change for a transfer (pointer lookup)
    pub fn current_transfer_state(&self, transfer_id: Uuid) -> Result<Option<TransferStateChange>> {
        let mut ptr = b"ts:".to_vec();
        ptr.extend_from_slice(transfer_id.as_bytes());
        self.get(CF_INDICES, &ptr)
    }

    /// Full state history for a transfer, oldest first
    pub fn transfer_state_history(&self, transfer_id: Uuid) -> Result<Vec<TransferStateChange>> {
        let mut prefix = b"tsc:".to_vec();
        prefix.extend_from_slice(transfer_id.as_bytes());

        let mut changes = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, &prefix)? {
            let seq_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt transfer state index".to_string()))?;
            let change: Option<TransferStateChange> = self.get(CF_TRANSFER_STATES, &seq_bytes)?;
            if let Some(change) = change {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    // Fulfilment operations

    /// Stage a fulfilment record and the window membership index
    pub fn put_fulfilment(
        &self,
        batch: &mut WriteBatch,
        fulfilment: &TransferFulfilment,
    ) -> Result<()> {
        self.put_in(
            batch,
            CF_FULFILMENTS,
            fulfilment.transfer_id.as_bytes(),
            fulfilment,
        )?;

        let cf = self.cf_handle(CF_INDICES)?;
        let mut idx = b"wt:".to_vec();
        idx.extend_from_slice(&fulfilment.settlement_window_id.key_bytes());
        idx.extend_from_slice(fulfilment.transfer_id.as_bytes());
        batch.put_cf(cf, &idx, b"");
        Ok(())
    }

    /// Fulfilment record for a transfer, if committed
    pub fn fulfilment(&self, transfer_id: Uuid) -> Result<Option<TransferFulfilment>> {
        self.get(CF_FULFILMENTS, transfer_id.as_bytes())
    }

    /// Transfer ids committed into a window
    pub fn window_transfers(&self, window_id: WindowId) -> Result<Vec<Uuid>> {
        let mut prefix = b"wt:".to_vec();
        prefix.extend_from_slice(&window_id.key_bytes());

        let mut ids = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, &prefix)? {
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt window transfer index".to_string()))?;
            ids.push(Uuid::from_bytes(id_bytes));
        }
        Ok(ids)
    }

    // Window operations

    /// Stage a window row
    pub fn put_window(&self, batch: &mut WriteBatch, window: &SettlementWindow) -> Result<()> {
        self.put_in(batch, CF_WINDOWS, &window.window_id.key_bytes(), window)
    }

    /// Get window by id
    pub fn window(&self, window_id: WindowId) -> Result<SettlementWindow> {
        self.get(CF_WINDOWS, &window_id.key_bytes())?
            .ok_or(Error::WindowNotFound(window_id.0))
    }

    /// Stage a window state change plus its current-state pointer
    pub fn append_window_state(
        &self,
        batch: &mut WriteBatch,
        change: &WindowStateChange,
    ) -> Result<()> {
        self.put_in(batch, CF_WINDOW_STATES, &change.seq.to_be_bytes(), change)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let mut idx = b"wsc:".to_vec();
        idx.extend_from_slice(&change.window_id.key_bytes());
        idx.extend_from_slice(&change.seq.to_be_bytes());
        batch.put_cf(cf, &idx, b"");

        let mut ptr = b"ws:".to_vec();
        ptr.extend_from_slice(&change.window_id.key_bytes());
        batch.put_cf(cf, &ptr, bincode::serialize(change)?);
        Ok(())
    }

    /// Current state change for a window (pointer lookup)
    pub fn current_window_state(&self, window_id: WindowId) -> Result<Option<WindowStateChange>> {
        let mut ptr = b"ws:".to_vec();
        ptr.extend_from_slice(&window_id.key_bytes());
        self.get(CF_INDICES, &ptr)
    }

    /// Full state history for a window, oldest first
    pub fn window_state_history(&self, window_id: WindowId) -> Result<Vec<WindowStateChange>> {
        let mut prefix = b"wsc:".to_vec();
        prefix.extend_from_slice(&window_id.key_bytes());

        let mut changes = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, &prefix)? {
            let seq_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt window state index".to_string()))?;
            let change: Option<WindowStateChange> = self.get(CF_WINDOW_STATES, &seq_bytes)?;
            if let Some(change) = change {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    /// Stage the OPEN-window pointer; `None` clears it
    pub fn set_open_window(
        &self,
        batch: &mut WriteBatch,
        window_id: Option<WindowId>,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_INDICES)?;
        match window_id {
            Some(id) => batch.put_cf(cf, IDX_OPEN_WINDOW, id.key_bytes()),
            None => batch.delete_cf(cf, IDX_OPEN_WINDOW),
        }
        Ok(())
    }

    /// The currently OPEN window, if any
    pub fn open_window_id(&self) -> Result<Option<WindowId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, IDX_OPEN_WINDOW)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt open window pointer".to_string()))?;
                Ok(Some(WindowId(u64::from_be_bytes(arr))))
            }
            None => Ok(None),
        }
    }

    // Expiration index (driven by the sweep)

    fn expiration_key(expiration: DateTime<Utc>, transfer_id: Uuid) -> Vec<u8> {
        let mut key = b"exp:".to_vec();
        key.extend_from_slice(&(expiration.timestamp_millis() as u64).to_be_bytes());
        key.extend_from_slice(transfer_id.as_bytes());
        key
    }

    /// Stage an expiration index entry (written at receive)
    pub fn index_expiration(
        &self,
        batch: &mut WriteBatch,
        expiration: DateTime<Utc>,
        transfer_id: Uuid,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_INDICES)?;
        batch.put_cf(cf, Self::expiration_key(expiration, transfer_id), b"");
        Ok(())
    }

    /// Stage removal of an expiration index entry (at terminal state)
    pub fn clear_expiration(
        &self,
        batch: &mut WriteBatch,
        expiration: DateTime<Utc>,
        transfer_id: Uuid,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_INDICES)?;
        batch.delete_cf(cf, Self::expiration_key(expiration, transfer_id));
        Ok(())
    }

    /// Transfers whose expiration is at or before `now`, oldest first
    pub fn expired_candidates(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let prefix = b"exp:";
        let cutoff = now.timestamp_millis() as u64;

        let mut ids = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, prefix)? {
            let ts_bytes: [u8; 8] = key[prefix.len()..prefix.len() + 8]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt expiration index".to_string()))?;
            if u64::from_be_bytes(ts_bytes) > cutoff {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len() + 8..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt expiration index".to_string()))?;
            ids.push(Uuid::from_bytes(id_bytes));
            if ids.len() >= limit {
                break;
            }
        }
        Ok(ids)
    }
}
