mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Marketplace, test_service};
use homeserve::application::AppError;
use homeserve::domain::{
    MAX_AMOUNT, TransactionType, Wallet, replay_balance, verify_wallet_ledger,
};

#[tokio::test]
async fn test_get_or_create_wallet_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;

    let first = service.get_or_create_wallet(market.customer.id).await?;
    let second = service.get_or_create_wallet(market.customer.id).await?;
    assert_eq!(first.id, second.id);
    assert_eq!(first.balance, 0);
    assert_eq!(first.currency, "INR");
    assert!(first.is_active);

    assert_eq!(service.wallet_for_user(market.customer.id).await?.id, first.id);
    assert_eq!(service.list_wallets().await?.len(), 1);

    // No wallet yet for the provider
    let err = service
        .wallet_for_user(market.provider_user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalletNotFound(_)));

    // Unknown users cannot get a wallet
    let err = service
        .get_or_create_wallet(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_deposit_and_withdraw_keep_running_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;

    let deposit = service.deposit(wallet.id, 100000, "Top up").await?;
    assert_eq!(deposit.wallet.balance, 100000);
    assert_eq!(deposit.transaction.balance_before, 0);
    assert_eq!(deposit.transaction.balance_after, 100000);
    assert_eq!(deposit.transaction.transaction_type, TransactionType::Credit);
    assert!(deposit.transaction.reference.starts_with("WLT"));

    let withdrawal = service.withdraw(wallet.id, 25050, "Bank transfer").await?;
    assert_eq!(withdrawal.wallet.balance, 74950);
    assert_eq!(withdrawal.transaction.balance_before, 100000);
    assert_eq!(withdrawal.transaction.balance_after, 74950);
    assert_eq!(withdrawal.transaction.sequence, deposit.transaction.sequence + 1);

    // Most recent first
    let entries = service.wallet_transactions(wallet.id, None).await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].transaction_type, TransactionType::Debit);
    assert_eq!(entries[0].description, "Bank transfer");

    let limited = service.wallet_transactions(wallet.id, Some(1)).await?;
    assert_eq!(limited.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_overdraw_is_rejected_without_side_effects() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;
    service.deposit(wallet.id, 5000, "Top up").await?;

    let err = service.withdraw(wallet.id, 5001, "Too much").await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientFunds {
            balance: 5000,
            required: 5001
        }
    ));

    let wallet = service.get_wallet(wallet.id).await?;
    assert_eq!(wallet.balance, 5000);
    assert_eq!(service.wallet_transactions(wallet.id, None).await?.len(), 1);

    // Draining to exactly zero is fine
    let drained = service.withdraw(wallet.id, 5000, "Everything").await?;
    assert_eq!(drained.wallet.balance, 0);

    Ok(())
}

#[tokio::test]
async fn test_non_positive_amounts_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;

    for amount in [0, -100] {
        assert!(matches!(
            service.deposit(wallet.id, amount, "x").await.unwrap_err(),
            AppError::InvalidAmount(_)
        ));
        assert!(matches!(
            service.withdraw(wallet.id, amount, "x").await.unwrap_err(),
            AppError::InvalidAmount(_)
        ));
    }
    assert!(service.wallet_transactions(wallet.id, None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_deposits_stop_at_balance_ceiling() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;

    // Far above the per-amount limit
    for _ in 0..2 {
        assert!(matches!(
            service
                .deposit(wallet.id, 5_000_000_000_000_000_000, "x")
                .await
                .unwrap_err(),
            AppError::InvalidAmount(_)
        ));
    }
    assert!(matches!(
        service.deposit(wallet.id, MAX_AMOUNT + 1, "x").await.unwrap_err(),
        AppError::InvalidAmount(_)
    ));

    let full = service.deposit(wallet.id, MAX_AMOUNT, "Top up").await?;
    assert_eq!(full.wallet.balance, Wallet::MAX_BALANCE);

    // Within the per-amount limit but past the ceiling
    let err = service.deposit(wallet.id, 1, "x").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let wallet = service.get_wallet(wallet.id).await?;
    assert_eq!(wallet.balance, MAX_AMOUNT);
    assert_eq!(wallet.version, 1);
    assert_eq!(service.wallet_transactions(wallet.id, None).await?.len(), 1);

    service.withdraw(wallet.id, 100, "Cash out").await?;
    assert_eq!(service.deposit(wallet.id, 100, "Top up").await?.wallet.balance, MAX_AMOUNT);

    Ok(())
}

#[tokio::test]
async fn test_frozen_wallet_rejects_movements() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;
    service.deposit(wallet.id, 10000, "Top up").await?;

    let frozen = service.set_wallet_active(wallet.id, false).await?;
    assert!(!frozen.is_active);

    assert!(matches!(
        service.deposit(wallet.id, 100, "x").await.unwrap_err(),
        AppError::WalletInactive(_)
    ));
    assert!(matches!(
        service.withdraw(wallet.id, 100, "x").await.unwrap_err(),
        AppError::WalletInactive(_)
    ));

    service.set_wallet_active(wallet.id, true).await?;
    let movement = service.withdraw(wallet.id, 100, "x").await?;
    assert_eq!(movement.wallet.balance, 9900);

    Ok(())
}

#[tokio::test]
async fn test_unknown_wallet_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(
        service.deposit(missing, 100, "x").await.unwrap_err(),
        AppError::WalletNotFound(_)
    ));
    assert!(matches!(
        service.set_wallet_active(missing, false).await.unwrap_err(),
        AppError::WalletNotFound(_)
    ));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;
    service.deposit(wallet.id, 10000, "Top up").await?;

    let service = Arc::new(service);
    let mut handles = Vec::new();
    for i in 0..10 {
        let service = Arc::clone(&service);
        let wallet_id = wallet.id;
        handles.push(tokio::spawn(async move {
            service
                .withdraw(wallet_id, 3000, &format!("Withdrawal {}", i))
                .await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientFunds { .. }) => insufficient += 1,
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(succeeded, 3);
    assert_eq!(insufficient, 7);

    let wallet = service.get_wallet(wallet.id).await?;
    assert_eq!(wallet.balance, 1000);

    let ledger = service.repository().wallet_ledger(wallet.id).await?;
    assert_eq!(ledger.len(), 4);
    assert_eq!(replay_balance(&ledger), wallet.balance);
    assert!(verify_wallet_ledger(wallet.id, wallet.balance, &ledger).is_empty());
    let sequences: Vec<i64> = ledger.iter().map(|tx| tx.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_deposits_all_land() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;

    let service = Arc::new(service);
    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = Arc::clone(&service);
        let wallet_id = wallet.id;
        handles.push(tokio::spawn(async move {
            service.deposit(wallet_id, 250, "Cashback").await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let wallet = service.get_wallet(wallet.id).await?;
    assert_eq!(wallet.balance, 5000);
    assert_eq!(wallet.version, 20);

    let ledger = service.repository().wallet_ledger(wallet.id).await?;
    assert!(verify_wallet_ledger(wallet.id, wallet.balance, &ledger).is_empty());

    Ok(())
}
