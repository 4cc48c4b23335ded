//! Window aggregation
//!
//! Nets the committed transfers of a closed window into one signed amount
//! per (account, role, entry type). The fold is recomputed from the source
//! entries on every run; nothing is patched incrementally, so a retry after
//! a failure can never double-count.

use crate::types::{AggregationKey, AggregationRow};
use clearhub_ledger::TransferParticipant;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Net a window's committed transfer entries into ordered aggregation rows
pub fn net_entries<'a, I>(entries: I) -> Vec<AggregationRow>
where
    I: IntoIterator<Item = &'a TransferParticipant>,
{
    let mut nets: BTreeMap<AggregationKey, Decimal> = BTreeMap::new();
    for entry in entries {
        let key = AggregationKey {
            participant_currency_id: entry.participant_currency_id,
            role: entry.role,
            ledger_entry_type: entry.ledger_entry_type,
        };
        *nets.entry(key).or_insert(Decimal::ZERO) += entry.amount;
    }

    nets.into_iter()
        .map(|(key, net_amount)| AggregationRow { key, net_amount })
        .collect()
}

/// Sum the per-key nets down to one signed obligation per account
pub fn net_by_account(
    rows: &[AggregationRow],
) -> BTreeMap<clearhub_ledger::ParticipantCurrencyId, Decimal> {
    let mut nets = BTreeMap::new();
    for row in rows {
        *nets
            .entry(row.key.participant_currency_id)
            .or_insert(Decimal::ZERO) += row.net_amount;
    }
    nets
}
