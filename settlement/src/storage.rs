//! Settlement persistence on RocksDB
//!
//! Same layout discipline as the ledger store: typed column families,
//! bincode values, big-endian composite keys so prefix scans return rows in
//! order, and current-state pointers updated in the same WriteBatch as the
//! history append.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{
    AggregationRun, Settlement, SettlementAccount, SettlementAccountStateChange, SettlementId,
    SettlementStateChange,
};
use clearhub_ledger::{ParticipantCurrencyId, WindowId};
use rocksdb::{
    ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode, Options, WriteBatch, DB,
};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const CF_AGGREGATIONS: &str = "aggregations";
const CF_SETTLEMENTS: &str = "settlements";
const CF_ACCOUNTS: &str = "settlement_accounts";
const CF_STATE_CHANGES: &str = "settlement_state_changes";
const CF_ACCOUNT_STATE_CHANGES: &str = "account_state_changes";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[
    CF_AGGREGATIONS,
    CF_SETTLEMENTS,
    CF_ACCOUNTS,
    CF_STATE_CHANGES,
    CF_ACCOUNT_STATE_CHANGES,
    CF_INDICES,
    CF_META,
];

const KEY_SEQ: &[u8] = b"counter:seq";
const KEY_SETTLEMENT_ID: &[u8] = b"counter:settlement_id";

/// Settlement store
pub struct SettlementStore {
    db: Arc<DB>,
    seq: AtomicU64,
    settlement_id: AtomicU64,
}

impl SettlementStore {
    /// Open or create the store
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(DBCompressionType::Lz4);

        let cfs: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.data_dir, cfs)?;
        let db = Arc::new(db);

        let store = Self {
            seq: AtomicU64::new(0),
            settlement_id: AtomicU64::new(0),
            db,
        };
        store.load_counters()?;
        Ok(store)
    }

    fn load_counters(&self) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        if let Some(bytes) = self.db.get_cf(cf, KEY_SEQ)? {
            self.seq.store(decode_u64(&bytes)?, Ordering::SeqCst);
        }
        if let Some(bytes) = self.db.get_cf(cf, KEY_SETTLEMENT_ID)? {
            self.settlement_id
                .store(decode_u64(&bytes)?, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stash_counters(&self, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        batch.put_cf(cf, KEY_SEQ, self.seq.load(Ordering::SeqCst).to_be_bytes());
        batch.put_cf(
            cf,
            KEY_SETTLEMENT_ID,
            self.settlement_id.load(Ordering::SeqCst).to_be_bytes(),
        );
        Ok(())
    }

    /// Allocate the next store sequence number
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Allocate the next settlement id
    pub fn next_settlement_id(&self) -> SettlementId {
        SettlementId(self.settlement_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Apply a batch atomically, persisting counter watermarks with it
    pub fn write(&self, mut batch: WriteBatch) -> Result<()> {
        self.stash_counters(&mut batch)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Missing column family: {}", name)))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_in<T: Serialize>(
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

    fn scan_prefix<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    // ---- aggregations ----

    /// Persist an aggregation run and advance the window's latest-run pointer
    pub fn put_aggregation(&self, batch: &mut WriteBatch, run: &AggregationRun) -> Result<()> {
        let mut key = run.window_id.key_bytes().to_vec();
        key.extend_from_slice(&run.run.to_be_bytes());
        self.put_in(batch, CF_AGGREGATIONS, &key, run)?;

        let mut ptr = b"ar:".to_vec();
        ptr.extend_from_slice(&run.window_id.key_bytes());
        self.put_in(batch, CF_INDICES, &ptr, &run.run)
    }

    /// Latest aggregation run number for a window
    pub fn latest_run(&self, window_id: WindowId) -> Result<Option<u32>> {
        let mut ptr = b"ar:".to_vec();
        ptr.extend_from_slice(&window_id.key_bytes());
        self.get(CF_INDICES, &ptr)
    }

    /// A specific aggregation run
    pub fn aggregation(&self, window_id: WindowId, run: u32) -> Result<Option<AggregationRun>> {
        let mut key = window_id.key_bytes().to_vec();
        key.extend_from_slice(&run.to_be_bytes());
        self.get(CF_AGGREGATIONS, &key)
    }

    /// The latest aggregation run for a window, if any
    pub fn latest_aggregation(&self, window_id: WindowId) -> Result<Option<AggregationRun>> {
        match self.latest_run(window_id)? {
            Some(run) => self.aggregation(window_id, run),
            None => Ok(None),
        }
    }

    // ---- settlements ----

    /// Persist a settlement record
    pub fn put_settlement(&self, batch: &mut WriteBatch, settlement: &Settlement) -> Result<()> {
        self.put_in(
            batch,
            CF_SETTLEMENTS,
            &settlement.settlement_id.key_bytes(),
            settlement,
        )
    }

    /// Settlement by id
    pub fn settlement(&self, id: SettlementId) -> Result<Settlement> {
        self.get(CF_SETTLEMENTS, &id.key_bytes())?
            .ok_or_else(|| Error::NotFound(format!("Settlement {}", id)))
    }

    /// Append a parent state change and advance the current-state pointer
    pub fn append_settlement_state(
        &self,
        batch: &mut WriteBatch,
        change: &SettlementStateChange,
    ) -> Result<()> {
        let mut key = change.settlement_id.key_bytes().to_vec();
        key.extend_from_slice(&change.seq.to_be_bytes());
        self.put_in(batch, CF_STATE_CHANGES, &key, change)?;

        let mut ptr = b"ss:".to_vec();
        ptr.extend_from_slice(&change.settlement_id.key_bytes());
        self.put_in(batch, CF_INDICES, &ptr, change)
    }

    /// Current parent state
    pub fn current_settlement_state(
        &self,
        id: SettlementId,
    ) -> Result<Option<SettlementStateChange>> {
        let mut ptr = b"ss:".to_vec();
        ptr.extend_from_slice(&id.key_bytes());
        self.get(CF_INDICES, &ptr)
    }

    /// Full parent state history, oldest first
    pub fn settlement_state_history(&self, id: SettlementId) -> Result<Vec<SettlementStateChange>> {
        self.scan_prefix(CF_STATE_CHANGES, &id.key_bytes())
    }

    // ---- settlement accounts ----

    /// Persist a per-account obligation row
    pub fn put_account(&self, batch: &mut WriteBatch, account: &SettlementAccount) -> Result<()> {
        let mut key = account.settlement_id.key_bytes().to_vec();
        key.extend_from_slice(&account.participant_currency_id.key_bytes());
        self.put_in(batch, CF_ACCOUNTS, &key, account)
    }

    /// All obligation rows of a settlement, ordered by account id
    pub fn accounts(&self, id: SettlementId) -> Result<Vec<SettlementAccount>> {
        self.scan_prefix(CF_ACCOUNTS, &id.key_bytes())
    }

    /// One obligation row
    pub fn account(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
    ) -> Result<SettlementAccount> {
        let mut key = id.key_bytes().to_vec();
        key.extend_from_slice(&participant_currency_id.key_bytes());
        self.get(CF_ACCOUNTS, &key)?.ok_or_else(|| {
            Error::NotFound(format!(
                "Settlement {} has no account {}",
                id, participant_currency_id
            ))
        })
    }

    /// Append a child state change and advance its current-state pointer
    pub fn append_account_state(
        &self,
        batch: &mut WriteBatch,
        change: &SettlementAccountStateChange,
    ) -> Result<()> {
        let mut key = change.settlement_id.key_bytes().to_vec();
        key.extend_from_slice(&change.participant_currency_id.key_bytes());
        key.extend_from_slice(&change.seq.to_be_bytes());
        self.put_in(batch, CF_ACCOUNT_STATE_CHANGES, &key, change)?;

        let mut ptr = b"sas:".to_vec();
        ptr.extend_from_slice(&change.settlement_id.key_bytes());
        ptr.extend_from_slice(&change.participant_currency_id.key_bytes());
        self.put_in(batch, CF_INDICES, &ptr, change)
    }

    /// Current state for one child
    pub fn current_account_state(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
    ) -> Result<Option<SettlementAccountStateChange>> {
        let mut ptr = b"sas:".to_vec();
        ptr.extend_from_slice(&id.key_bytes());
        ptr.extend_from_slice(&participant_currency_id.key_bytes());
        self.get(CF_INDICES, &ptr)
    }

    /// Full child state history for one account, oldest first
    pub fn account_state_history(
        &self,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
    ) -> Result<Vec<SettlementAccountStateChange>> {
        let mut prefix = id.key_bytes().to_vec();
        prefix.extend_from_slice(&participant_currency_id.key_bytes());
        self.scan_prefix(CF_ACCOUNT_STATE_CHANGES, &prefix)
    }

    // ---- window claims ----

    /// Record a window as owned by a settlement
    pub fn put_window_claim(
        &self,
        batch: &mut WriteBatch,
        window_id: WindowId,
        settlement_id: SettlementId,
    ) -> Result<()> {
        self.put_in(batch, CF_INDICES, &claim_key(window_id), &settlement_id)
    }

    /// The settlement that claimed a window, if any
    pub fn window_claim(&self, window_id: WindowId) -> Result<Option<SettlementId>> {
        self.get(CF_INDICES, &claim_key(window_id))
    }

    /// Release a window claim
    pub fn clear_window_claim(&self, batch: &mut WriteBatch, window_id: WindowId) -> Result<()> {
        let cf = self.cf_handle(CF_INDICES)?;
        batch.delete_cf(cf, claim_key(window_id));
        Ok(())
    }

    // ---- pending position resets ----

    /// Stage a ledger position reset so it survives a crash between the
    /// commit state change and the adjustment
    pub fn put_pending_reset(
        &self,
        batch: &mut WriteBatch,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
        delta: Decimal,
    ) -> Result<()> {
        self.put_in(
            batch,
            CF_INDICES,
            &reset_key(id, participant_currency_id),
            &(participant_currency_id, delta),
        )
    }

    /// Resets staged for a settlement but not yet applied
    pub fn pending_resets(
        &self,
        id: SettlementId,
    ) -> Result<Vec<(ParticipantCurrencyId, Decimal)>> {
        let mut prefix = b"pr:".to_vec();
        prefix.extend_from_slice(&id.key_bytes());
        self.scan_prefix(CF_INDICES, &prefix)
    }

    /// Drop one staged reset once its ledger adjustment landed
    pub fn clear_pending_reset(
        &self,
        batch: &mut WriteBatch,
        id: SettlementId,
        participant_currency_id: ParticipantCurrencyId,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_INDICES)?;
        batch.delete_cf(cf, reset_key(id, participant_currency_id));
        Ok(())
    }
}

fn claim_key(window_id: WindowId) -> Vec<u8> {
    let mut key = b"wc:".to_vec();
    key.extend_from_slice(&window_id.key_bytes());
    key
}

fn reset_key(id: SettlementId, participant_currency_id: ParticipantCurrencyId) -> Vec<u8> {
    let mut key = b"pr:".to_vec();
    key.extend_from_slice(&id.key_bytes());
    key.extend_from_slice(&participant_currency_id.key_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage("Corrupt counter value".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}
