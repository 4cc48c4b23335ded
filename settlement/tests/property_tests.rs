//! Property-based tests for window aggregation and the parent rollup

use clearhub_ledger::{
    LedgerEntryType, ParticipantCurrencyId, TransferParticipant, TransferParticipantRole,
};
use clearhub_settlement::aggregation::{net_by_account, net_entries};
use clearhub_settlement::{rollup, SettlementState};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// One committed transfer between two distinct accounts, as its ledger entries
fn transfer_entries() -> impl Strategy<Value = Vec<TransferParticipant>> {
    (0u64..5, 0u64..5, 1i64..10_000).prop_map(|(payer, payee, cents)| {
        let transfer_id = Uuid::new_v4();
        let amount = Decimal::new(cents, 2);
        let payee = if payee == payer { (payee + 1) % 5 } else { payee };
        vec![
            TransferParticipant {
                transfer_id,
                participant_currency_id: ParticipantCurrencyId(payer),
                role: TransferParticipantRole::PayerDfsp,
                ledger_entry_type: LedgerEntryType::PrincipalValue,
                amount: -amount,
            },
            TransferParticipant {
                transfer_id,
                participant_currency_id: ParticipantCurrencyId(payee),
                role: TransferParticipantRole::PayeeDfsp,
                ledger_entry_type: LedgerEntryType::PrincipalValue,
                amount,
            },
        ]
    })
}

fn settlement_state() -> impl Strategy<Value = SettlementState> {
    prop_oneof![
        Just(SettlementState::PendingSettlement),
        Just(SettlementState::PsTransfersRecorded),
        Just(SettlementState::PsTransfersReserved),
        Just(SettlementState::PsTransfersCommitted),
        Just(SettlementState::Settled),
        Just(SettlementState::Aborted),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Netting balanced transfers always nets to zero across the window
    #[test]
    fn prop_netting_conserves_value(transfers in proptest::collection::vec(transfer_entries(), 1..40)) {
        let entries: Vec<TransferParticipant> = transfers.into_iter().flatten().collect();
        let rows = net_entries(&entries);

        let total: Decimal = rows.iter().map(|r| r.net_amount).sum();
        prop_assert_eq!(total, Decimal::ZERO);

        let by_account = net_by_account(&rows);
        let total: Decimal = by_account.values().copied().sum();
        prop_assert_eq!(total, Decimal::ZERO);
    }

    /// Aggregation output does not depend on the order entries are folded in
    #[test]
    fn prop_netting_is_order_independent(
        transfers in proptest::collection::vec(transfer_entries(), 1..20)
    ) {
        let entries: Vec<TransferParticipant> = transfers.into_iter().flatten().collect();
        let mut reversed = entries.clone();
        reversed.reverse();
        prop_assert_eq!(net_entries(&entries), net_entries(&reversed));
    }

    /// The parent never reads further along than its slowest live child
    #[test]
    fn prop_rollup_bounded_by_slowest_child(
        children in proptest::collection::vec(settlement_state(), 1..12)
    ) {
        let parent = rollup(&children);
        let live_ranks: Vec<u8> = children.iter().filter_map(|s| s.rank()).collect();

        match live_ranks.iter().min() {
            // Every child aborted
            None => prop_assert_eq!(parent, SettlementState::Aborted),
            Some(&min) => {
                prop_assert_ne!(parent, SettlementState::Aborted);
                let parent_rank = parent.rank().unwrap();
                if parent == SettlementState::Settling {
                    // Partial completion: someone settled, nobody below committed
                    prop_assert!(live_ranks.contains(&SettlementState::Settled.rank().unwrap()));
                    prop_assert!(min >= SettlementState::PsTransfersCommitted.rank().unwrap());
                } else {
                    prop_assert_eq!(parent_rank, min);
                }
            }
        }
    }

    /// Settled is only reachable when every live child has settled
    #[test]
    fn prop_rollup_settled_requires_all_settled(
        children in proptest::collection::vec(settlement_state(), 1..12)
    ) {
        let parent = rollup(&children);
        let all_live_settled = children
            .iter()
            .filter(|s| **s != SettlementState::Aborted)
            .all(|s| *s == SettlementState::Settled);
        let any_live = children.iter().any(|s| *s != SettlementState::Aborted);
        prop_assert_eq!(parent == SettlementState::Settled, all_live_settled && any_live);
    }
}
