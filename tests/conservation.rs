use marketplace_ledger::domain::ledger::{EntrySource, EntryType};
use marketplace_ledger::repo::memory::InMemoryStore;
use marketplace_ledger::service::payout_ledger::PayoutLedger;
use marketplace_ledger::split::{compute_split, platform_revenue_split, MAX_COMMISSION_BPS};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn split_parts_sum_to_gross(gross in 100_i64..=10_000_000, percent in 0_i32..=50, fee_bps in 0_i32..=500) {
        let split = compute_split(gross, percent * 100, fee_bps);
        prop_assert_eq!(split.commission_amount + split.gateway_fee_amount + split.payout_amount, gross);
        prop_assert!(split.payout_amount >= 0);
        prop_assert!(split.commission_amount >= 0);
        prop_assert!(split.gateway_fee_amount >= 0);
    }

    #[test]
    fn commission_never_exceeds_cap(gross in 1_i64..=10_000_000, bps in 0_i32..=20_000) {
        let split = compute_split(gross, bps, 0);
        let capped = compute_split(gross, MAX_COMMISSION_BPS, 0);
        prop_assert!(split.commission_amount <= capped.commission_amount);
    }

    #[test]
    fn platform_revenue_has_no_payout(gross in 1_i64..=10_000_000, fee_bps in 0_i32..=500) {
        let split = platform_revenue_split(gross, fee_bps);
        prop_assert_eq!(split.payout_amount, 0);
        prop_assert_eq!(split.commission_amount + split.gateway_fee_amount, gross);
    }

    #[test]
    fn balance_is_credits_minus_debits(ops in prop::collection::vec((any::<bool>(), 1_i64..=100_000), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = InMemoryStore::new();
            let ledger = PayoutLedger::new(Arc::new(store.clone()));

            let mut expected = 0_i64;
            for (i, (credit, amount)) in ops.iter().enumerate() {
                let (entry_type, source) = if *credit {
                    (EntryType::Credit, EntrySource::Transfer)
                } else {
                    (EntryType::Debit, EntrySource::Refund)
                };
                ledger
                    .append("org_p", entry_type, source, &format!("ref_{i}"), *amount, "INR")
                    .await
                    .unwrap();
                // Replays of the same completion are absorbed.
                ledger
                    .append("org_p", entry_type, source, &format!("ref_{i}"), *amount, "INR")
                    .await
                    .unwrap();
                expected += entry_type.delta(*amount);
            }

            let entries = store.ledger_entries().unwrap();
            assert_eq!(entries.len(), ops.len());
            assert_eq!(ledger.balance_of("org_p").await.unwrap(), expected);
            assert_eq!(entries.last().unwrap().balance_after, expected);

            let mut running = 0_i64;
            for entry in &entries {
                running += entry.entry_type.delta(entry.amount);
                assert_eq!(entry.balance_after, running);
            }
        });
    }
}
