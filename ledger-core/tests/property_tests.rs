//! Property-based tests for the position and transfer engines

use chrono::{Duration, Utc};
use clearhub_ledger::{
    Config, Currency, Ledger, LedgerAccountType, Limit, LimitType, ParticipantCurrencyId,
    Transfer, TransferState,
};
use clearhub_ledger::validator::condition_for;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

async fn open_ledger(temp: &tempfile::TempDir) -> Ledger {
    let mut config = Config::default();
    config.data_dir = temp.path().to_path_buf();
    Ledger::open(config).unwrap()
}

async fn two_accounts(
    ledger: &Ledger,
    cap: Option<i64>,
) -> (ParticipantCurrencyId, ParticipantCurrencyId) {
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
    if let Some(cap) = cap {
        ledger
            .set_limit(Limit {
                participant_currency_id: payer_acc.participant_currency_id,
                limit_type: LimitType::NetDebitCap,
                value: Decimal::new(cap, 0),
                alarm_percentage: Decimal::new(8, 1),
                is_active: true,
            })
            .await
            .unwrap();
    }
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
        expiration: now + Duration::seconds(60),
        created_at: now,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The net debit cap bounds exposure no matter what sequence of
    /// reservations arrives: value - reserved_value never drops below -cap.
    #[test]
    fn prop_net_debit_cap_never_breached(
        amounts in prop::collection::vec(1i64..400, 1..25),
        cap in 100i64..1000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let temp = tempfile::tempdir().unwrap();
            let ledger = open_ledger(&temp).await;
            let (payer, payee) = two_accounts(&ledger, Some(cap)).await;

            for amount in amounts {
                let transfer = transfer_of(amount);
                let id = transfer.transfer_id;
                let entries = Ledger::principal_entries(&transfer, payer, payee);
                ledger.receive_transfer(transfer, entries).await.unwrap();
                ledger.reserve_transfer(id).await.unwrap();

                let position = ledger.position(payer).unwrap();
                prop_assert!(
                    position.value - position.reserved_value >= Decimal::new(-cap, 0),
                    "exposure {} breached cap {}",
                    position.value - position.reserved_value,
                    cap
                );
            }
            Ok(())
        })?;
    }

    /// Once every transfer reaches a terminal state, no reserved value is
    /// left behind on either account.
    #[test]
    fn prop_no_reservation_leaks(
        plan in prop::collection::vec((1i64..400, 0u8..3), 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let temp = tempfile::tempdir().unwrap();
            let ledger = open_ledger(&temp).await;
            let (payer, payee) = two_accounts(&ledger, Some(2_000_000)).await;

            for (amount, fate) in plan {
                let mut transfer = transfer_of(amount);
                if fate == 2 {
                    transfer.expiration = Utc::now() + Duration::milliseconds(1);
                }
                let id = transfer.transfer_id;
                let entries = Ledger::principal_entries(&transfer, payer, payee);
                ledger.receive_transfer(transfer, entries).await.unwrap();
                ledger.reserve_transfer(id).await.unwrap();

                let change = match fate {
                    0 => ledger.fulfil_transfer(id, "preimage").await.unwrap(),
                    1 => ledger.fulfil_transfer(id, "wrong").await.unwrap(),
                    _ => ledger
                        .expire_transfer(id, Utc::now() + Duration::seconds(5))
                        .await
                        .unwrap(),
                };
                prop_assert!(change.state.is_terminal());
            }

            let payer_pos = ledger.position(payer).unwrap();
            let payee_pos = ledger.position(payee).unwrap();
            prop_assert_eq!(payer_pos.reserved_value, Decimal::ZERO);
            prop_assert_eq!(payee_pos.reserved_value, Decimal::ZERO);
            Ok(())
        })?;
    }

    /// Committed transfers conserve money: positions across both accounts
    /// always sum to zero, and each equals the committed principal total.
    #[test]
    fn prop_double_entry_conservation(
        amounts in prop::collection::vec(1i64..400, 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let temp = tempfile::tempdir().unwrap();
            let ledger = open_ledger(&temp).await;
            let (payer, payee) = two_accounts(&ledger, None).await;

            let mut committed_total = Decimal::ZERO;
            for amount in amounts {
                let transfer = transfer_of(amount);
                let id = transfer.transfer_id;
                let entries = Ledger::principal_entries(&transfer, payer, payee);
                ledger.receive_transfer(transfer, entries).await.unwrap();
                ledger.reserve_transfer(id).await.unwrap();
                let change = ledger.fulfil_transfer(id, "preimage").await.unwrap();
                prop_assert_eq!(change.state, TransferState::Committed);
                committed_total += Decimal::new(amount, 0);
            }

            let payer_pos = ledger.position(payer).unwrap();
            let payee_pos = ledger.position(payee).unwrap();
            prop_assert_eq!(payer_pos.value + payee_pos.value, Decimal::ZERO);
            prop_assert_eq!(payer_pos.value, -committed_total);
            prop_assert_eq!(payee_pos.value, committed_total);
            Ok(())
        })?;
    }

    /// State histories are append-only and strictly ordered by sequence.
    #[test]
    fn prop_history_is_ordered(
        amounts in prop::collection::vec(1i64..400, 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let temp = tempfile::tempdir().unwrap();
            let ledger = open_ledger(&temp).await;
            let (payer, payee) = two_accounts(&ledger, None).await;

            let mut ids = Vec::new();
            for amount in amounts {
                let transfer = transfer_of(amount);
                ids.push(transfer.transfer_id);
                let entries = Ledger::principal_entries(&transfer, payer, payee);
                ledger
                    .receive_transfer(transfer, entries)
                    .await
                    .unwrap();
                ledger.reserve_transfer(*ids.last().unwrap()).await.unwrap();
                ledger
                    .fulfil_transfer(*ids.last().unwrap(), "preimage")
                    .await
                    .unwrap();
            }

            for id in ids {
                let history = ledger.transfer_state_history(id).unwrap();
                prop_assert_eq!(history.len(), 3);
                for pair in history.windows(2) {
                    prop_assert!(pair[0].seq < pair[1].seq);
                }
                let current = ledger.transfer_state(id).unwrap().unwrap();
                prop_assert_eq!(current.seq, history.last().unwrap().seq);
            }
            Ok(())
        })?;
    }
}
