mod common;

use benki::application::engine::{LedgerEngine, RetryPolicy};
use benki::domain::account::OwnerId;
use benki::error::LedgerError;
use benki::infrastructure::in_memory::{InMemoryAccountStore, InMemoryTransactionLog};
use common::{balance_of, open_funded};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

/// Engine with enough retry headroom that contention alone never exhausts
/// the attempt budget; only genuine rejections surface.
fn contended_engine() -> Arc<LedgerEngine> {
    Arc::new(
        LedgerEngine::new(
            Box::new(InMemoryAccountStore::new()),
            Box::new(InMemoryTransactionLog::new()),
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 50,
            base_delay: Duration::from_millis(1),
        }),
    )
}

#[tokio::test]
async fn test_two_racing_withdrawals_exactly_one_wins() {
    let engine = contended_engine();
    let owner = OwnerId::from("u1");
    let account = open_funded(&engine, &owner, "a1", dec!(500)).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        let owner = owner.clone();
        let id = account.id.clone();
        handles.push(tokio::spawn(async move {
            engine.withdraw(&owner, id, dec!(300), None).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(LedgerError::InsufficientFunds(_)) | Err(LedgerError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(balance_of(&engine, &account.id).await, dec!(200));
}

#[tokio::test]
async fn test_n_withdrawals_drain_exactly_floor_of_balance() {
    let engine = contended_engine();
    let owner = OwnerId::from("u1");
    // floor(1000 / 300) = 3 of 10 may succeed.
    let account = open_funded(&engine, &owner, "a1", dec!(1000)).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = Arc::clone(&engine);
        let owner = owner.clone();
        let id = account.id.clone();
        handles.push(tokio::spawn(async move {
            // Jitter the start so interleavings vary between runs.
            let delay = rand::thread_rng().gen_range(0..3);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            engine.withdraw(&owner, id, dec!(300), None).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 3);
    assert_eq!(balance_of(&engine, &account.id).await, dec!(100));
}

#[tokio::test]
async fn test_concurrent_deposits_all_land() {
    let engine = contended_engine();
    let owner = OwnerId::from("u1");
    let account = open_funded(&engine, &owner, "a1", dec!(0.01)).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = Arc::clone(&engine);
        let owner = owner.clone();
        let id = account.id.clone();
        handles.push(tokio::spawn(async move {
            engine.deposit(&owner, id, dec!(5), None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(balance_of(&engine, &account.id).await, dec!(100.01));
}

#[tokio::test]
async fn test_concurrent_transfers_conserve_total_funds() {
    let engine = contended_engine();
    let alice = OwnerId::from("alice");
    let bob = OwnerId::from("bob");
    let a = open_funded(&engine, &alice, "a", dec!(400)).await;
    let b = open_funded(&engine, &bob, "b", dec!(400)).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&engine);
        let (owner, from, to) = if i % 2 == 0 {
            (alice.clone(), a.id.clone(), b.id.clone())
        } else {
            (bob.clone(), b.id.clone(), a.id.clone())
        };
        handles.push(tokio::spawn(async move {
            engine.transfer(&owner, from, to, dec!(50), None).await
        }));
    }
    for handle in handles {
        // Individual transfers may lose to insufficient funds; money must
        // never appear or vanish.
        let _ = handle.await.unwrap();
    }

    let total: Decimal =
        balance_of(&engine, &a.id).await + balance_of(&engine, &b.id).await;
    assert_eq!(total, dec!(800));
    assert!(balance_of(&engine, &a.id).await >= dec!(0));
    assert!(balance_of(&engine, &b.id).await >= dec!(0));
}
