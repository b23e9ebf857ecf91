#![cfg(feature = "storage-rocksdb")]

use access_storefront::application::engine::{DepositOutcome, ReconciliationEngine};
use access_storefront::domain::account::AccountId;
use access_storefront::domain::plan::{Catalog, PlanId};
use access_storefront::domain::ports::LedgerStoreRef;
use access_storefront::infrastructure::clock::SystemClock;
use access_storefront::infrastructure::rocksdb::RocksDBStore;
use assert_cmd::cargo_bin;
use rust_decimal_macros::dec;
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

mod common;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: touch an account
    let output1 = Command::new(cargo_bin!("storefront"))
        .arg("--db-path")
        .arg(&db_path)
        .args(["balance", "--account", "5"])
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());

    // 2. Second run: the account is still there
    let output2 = Command::new(cargo_bin!("storefront"))
        .arg("--db-path")
        .arg(&db_path)
        .arg("accounts")
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("\n5,0,"));
}

#[tokio::test]
async fn test_engine_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("ledger");
    let processor = Arc::new(common::ScriptedProcessor::default());
    let panel = Arc::new(common::FakePanel::default());
    let account = AccountId(77);

    let engine = |ledger: LedgerStoreRef| {
        ReconciliationEngine::new(
            ledger,
            processor.clone(),
            panel.clone(),
            Arc::new(SystemClock),
            Catalog::default(),
            common::test_settings(),
        )
    };

    let payment_ref = {
        let ledger: LedgerStoreRef = Arc::new(RocksDBStore::open(&db_path).unwrap());
        let engine = engine(ledger);
        let opened = engine.request_deposit(account, dec!(120)).await.unwrap();
        processor.settle(&opened.payment_ref);
        assert_eq!(
            engine.confirm_deposit(&opened.payment_ref).await.unwrap(),
            DepositOutcome::Credited
        );
        engine
            .request_purchase(account, &PlanId::from("1_month"))
            .await
            .unwrap();
        opened.payment_ref
    };

    let ledger: LedgerStoreRef = Arc::new(RocksDBStore::open(&db_path).unwrap());
    let engine = engine(ledger);
    assert_eq!(engine.get_balance(account).await.unwrap().value(), dec!(20));
    assert_eq!(engine.list_subscriptions(account).await.unwrap().len(), 1);
    assert_eq!(
        engine.confirm_deposit(&payment_ref).await.unwrap(),
        DepositOutcome::AlreadyCredited
    );
}
