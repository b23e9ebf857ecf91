mod common;

use access_storefront::application::engine::DepositOutcome;
use access_storefront::domain::account::AccountId;
use access_storefront::domain::payment::{PaymentRef, PaymentStatus, SettlementStatus};
use access_storefront::domain::ports::LedgerStore;
use access_storefront::error::{FailureClass, ShopError};
use common::harness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const ALICE: AccountId = AccountId(1001);

#[tokio::test]
async fn test_deposit_credited_once() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(150)).await.unwrap();
    assert!(opened.payment_ref.as_str().starts_with("1001-"));
    assert!(opened.instructions.redirect_url.contains(opened.payment_ref.as_str()));

    // Not paid yet
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Pending
    );
    assert_eq!(h.balance(ALICE).await, Decimal::ZERO);

    h.processor.settle(&opened.payment_ref);
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Credited
    );
    assert_eq!(h.balance(ALICE).await, dec!(150));

    // "I have paid" pressed again, then a background sweep
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::AlreadyCredited
    );
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert!(report.credited.is_empty());
    assert_eq!(h.balance(ALICE).await, dec!(150));

    let intent = h
        .ledger
        .get_payment_intent(&opened.payment_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(intent.status, PaymentStatus::Settled);
    assert!(intent.closed_at.is_some());
}

#[tokio::test]
async fn test_sweep_credits_settled_deposits() {
    let h = harness();
    let first = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();
    let second = h.engine.request_deposit(ALICE, dec!(50)).await.unwrap();
    let other = h
        .engine
        .request_deposit(AccountId(7), dec!(30))
        .await
        .unwrap();

    h.processor.settle(&first.payment_ref);
    h.processor.settle(&other.payment_ref);

    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.credited.len(), 2);
    assert_eq!(report.pending, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(h.balance(ALICE).await, dec!(100));
    assert_eq!(h.balance(AccountId(7)).await, dec!(30));

    h.processor.settle(&second.payment_ref);
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.credited.len(), 1);
    assert_eq!(report.credited[0].payment_ref, second.payment_ref);
    assert_eq!(h.balance(ALICE).await, dec!(150));

    // Nothing left to do
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert!(report.credited.is_empty());
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn test_refused_payment_fails_intent() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();
    h.processor.refuse(&opened.payment_ref);

    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(h.balance(ALICE).await, Decimal::ZERO);

    // A failed intent is never polled again
    let polls = h.processor.polls();
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Failed
    );
    assert_eq!(h.processor.polls(), polls);
    assert!(h.ledger.pending_payment_intents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unpaid_deposit_fails_after_horizon() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();

    h.clock.advance(chrono::Duration::hours(23));
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.pending, 1);

    h.clock.advance(chrono::Duration::hours(1));
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].payment_ref, opened.payment_ref);

    // Settling now changes nothing
    h.processor.settle(&opened.payment_ref);
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Failed
    );
    assert_eq!(h.balance(ALICE).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_payment_settled_at_horizon_is_still_credited() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();
    h.clock.advance(chrono::Duration::hours(30));
    h.processor.settle(&opened.payment_ref);

    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.credited.len(), 1);
    assert_eq!(h.balance(ALICE).await, dec!(100));
}

#[tokio::test]
async fn test_processor_outage_keeps_deposits_pending() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();

    h.processor.set_unavailable(true);
    let err = h
        .engine
        .confirm_deposit(&opened.payment_ref)
        .await
        .unwrap_err();
    assert!(matches!(err, ShopError::GatewayUnavailable(_)));
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.pending, 0);
    assert_eq!(h.ledger.pending_payment_intents().await.unwrap().len(), 1);

    h.processor.set_unavailable(false);
    h.processor.settle(&opened.payment_ref);
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Credited
    );
}

#[tokio::test]
async fn test_outage_at_horizon_does_not_fail_paid_deposit() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();
    h.processor.settle(&opened.payment_ref);
    h.processor.set_unavailable(true);
    h.clock.advance(chrono::Duration::hours(25));

    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.errors, 1);

    h.processor.set_unavailable(false);
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Credited
    );
    assert_eq!(h.balance(ALICE).await, dec!(100));
}

#[tokio::test]
async fn test_repeated_checks_until_settled() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();

    for _ in 0..3 {
        assert_eq!(
            h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
            DepositOutcome::Pending
        );
    }
    assert_eq!(h.processor.polls(), 3);

    h.processor.settle(&opened.payment_ref);
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::Credited
    );
    assert_eq!(h.processor.polls(), 4);

    // Answered from the ledger, even while the processor is down
    h.processor.set_unavailable(true);
    assert_eq!(
        h.engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
        DepositOutcome::AlreadyCredited
    );
    assert_eq!(h.processor.polls(), 4);
    assert_eq!(h.balance(ALICE).await, dec!(100));
}

#[tokio::test]
async fn test_gateway_unavailable_at_open() {
    let h = harness();
    h.processor.set_unavailable(true);

    let err = h
        .engine
        .request_deposit(ALICE, dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ShopError::GatewayUnavailable(_)));
    assert_eq!(err.class(), FailureClass::Unavailable);

    // The local intent was closed, so no sweep will ever credit it
    assert!(h.ledger.pending_payment_intents().await.unwrap().is_empty());
    assert_eq!(h.balance(ALICE).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_invalid_deposit_amounts() {
    let h = harness();
    for amount in [Decimal::ZERO, dec!(-5)] {
        let err = h.engine.request_deposit(ALICE, amount).await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidInput(_)));
    }
    assert_eq!(h.processor.requests.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(h.ledger.pending_payment_intents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_payment_ref() {
    let h = harness();
    let err = h
        .engine
        .confirm_deposit(&PaymentRef::from("1001-missing"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), FailureClass::NotFound);
}

#[tokio::test]
async fn test_late_settlement_of_failed_intent_is_not_credited() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(100)).await.unwrap();
    h.processor.refuse(&opened.payment_ref);
    h.engine.run_deposit_sweep().await.unwrap();

    h.processor.set(&opened.payment_ref, SettlementStatus::Settled);
    let report = h.engine.run_deposit_sweep().await.unwrap();
    assert!(report.credited.is_empty());
    assert_eq!(h.balance(ALICE).await, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirmations_credit_once() {
    let h = harness();
    let opened = h.engine.request_deposit(ALICE, dec!(250)).await.unwrap();
    h.processor.settle(&opened.payment_ref);

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = h.engine.clone();
        let payment_ref = opened.payment_ref.clone();
        handles.push(tokio::spawn(async move {
            if i % 4 == 0 {
                engine.run_deposit_sweep().await.unwrap().credited.len()
            } else {
                usize::from(engine.confirm_deposit(&payment_ref).await.unwrap() == DepositOutcome::Credited)
            }
        }));
    }

    let mut credited = 0;
    for handle in handles {
        credited += handle.await.unwrap();
    }
    assert_eq!(credited, 1);
    assert_eq!(h.balance(ALICE).await, dec!(250));
}
