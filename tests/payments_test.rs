mod common;

use anyhow::Result;
use common::{Marketplace, test_service};
use homeserve::application::AppError;
use homeserve::domain::{
    BookingPaymentStatus, Gateway, NewPayment, PaymentMethod, PaymentStatus, TransactionType,
};

fn standalone_payment(user_id: uuid::Uuid, amount: i64) -> NewPayment {
    NewPayment {
        user_id,
        booking_id: None,
        amount,
        currency: Some(" usd ".to_string()),
        method: PaymentMethod::Card,
        gateway: Gateway::Stripe,
        description: Some("Gift card".to_string()),
    }
}

#[tokio::test]
async fn test_create_payment_references() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;

    let standalone = service
        .create_payment(standalone_payment(market.customer.id, 1000))
        .await?;
    assert_eq!(standalone.status, PaymentStatus::Pending);
    assert_eq!(standalone.currency, "USD");
    assert!(standalone.payment_reference.starts_with("PAY"));
    assert!(standalone.order_reference.starts_with("ORD"));

    let linked = market.settled_payment(&service, &booking, 20000).await?;
    assert_eq!(linked.currency, "INR");
    assert!(
        linked
            .order_reference
            .starts_with(&format!("{}-", booking.booking_number))
    );

    let for_booking = service.list_payments_for_booking(booking.id).await?;
    assert_eq!(for_booking.len(), 1);
    assert_eq!(for_booking[0].id, linked.id);
    assert_eq!(service.list_payments().await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_create_payment_validation() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;

    assert!(matches!(
        service
            .create_payment(standalone_payment(market.customer.id, 0))
            .await
            .unwrap_err(),
        AppError::InvalidAmount(_)
    ));
    assert!(matches!(
        service
            .create_payment(standalone_payment(uuid::Uuid::new_v4(), 100))
            .await
            .unwrap_err(),
        AppError::UserNotFound(_)
    ));

    let mut request = standalone_payment(market.customer.id, 100);
    request.booking_id = Some(uuid::Uuid::new_v4());
    assert!(matches!(
        service.create_payment(request).await.unwrap_err(),
        AppError::BookingNotFound(_)
    ));

    Ok(())
}

#[tokio::test]
async fn test_successful_payment_updates_booking_advance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;

    let payment = market.settled_payment(&service, &booking, 20000).await?;
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_gw_1"));
    assert!(payment.completed_at.is_some());

    let booking_after = service.get_booking(booking.id).await?;
    assert_eq!(booking_after.advance_paid, 20000);
    assert_eq!(booking_after.payment_status, BookingPaymentStatus::Partial);
    assert_eq!(booking_after.balance_amount(), 30000);

    market.settled_payment(&service, &booking, 30000).await?;
    let paid = service.get_booking(booking.id).await?;
    assert_eq!(paid.payment_status, BookingPaymentStatus::Paid);
    assert_eq!(paid.balance_amount(), 0);

    Ok(())
}

#[tokio::test]
async fn test_settled_payment_status_is_final() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;
    let payment = market.settled_payment(&service, &booking, 20000).await?;

    // A second success callback must not double-count the advance
    let err = service
        .update_payment_status(payment.id, PaymentStatus::Success, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(service.get_booking(booking.id).await?.advance_paid, 20000);

    let err = service
        .update_payment_status(payment.id, PaymentStatus::Refunded, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = service
        .update_payment_status(uuid::Uuid::new_v4(), PaymentStatus::Failed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PaymentNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_failed_payment_marks_unpaid_booking() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;

    let payment = service
        .create_payment(NewPayment {
            user_id: market.customer.id,
            booking_id: Some(booking.id),
            amount: 50000,
            currency: None,
            method: PaymentMethod::Card,
            gateway: Gateway::Razorpay,
            description: None,
        })
        .await?;
    let initiated = service
        .update_payment_status(payment.id, PaymentStatus::Initiated, None)
        .await?;
    assert!(initiated.initiated_at.is_some());

    service
        .update_payment_status(payment.id, PaymentStatus::Failed, None)
        .await?;
    let booking = service.get_booking(booking.id).await?;
    assert_eq!(booking.payment_status, BookingPaymentStatus::Failed);
    assert_eq!(booking.advance_paid, 0);

    Ok(())
}

#[tokio::test]
async fn test_partial_then_full_refund() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;
    let payment = market.settled_payment(&service, &booking, 50000).await?;

    let first = service
        .refund_payment(payment.id, 20000, "partial work", Some(market.admin.id), false)
        .await?;
    assert_eq!(first.payment.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(first.payment.refund_amount, 20000);
    assert!(first.refund.reference.starts_with("REF"));
    assert!(first.wallet_transaction.is_none());

    let booking_mid = service.get_booking(booking.id).await?;
    assert_eq!(booking_mid.advance_paid, 30000);
    assert_eq!(booking_mid.payment_status, BookingPaymentStatus::Partial);

    let err = service
        .refund_payment(payment.id, 30001, "too much", None, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::RefundExceedsPayment {
            refundable: 30000,
            requested: 30001
        }
    ));

    let last = service
        .refund_payment(payment.id, 30000, "job cancelled", None, false)
        .await?;
    assert_eq!(last.payment.status, PaymentStatus::Refunded);
    assert_eq!(last.payment.refund_amount, 50000);
    assert!(last.payment.refunded_at.is_some());

    let booking_after = service.get_booking(booking.id).await?;
    assert_eq!(booking_after.advance_paid, 0);
    assert_eq!(booking_after.payment_status, BookingPaymentStatus::Refunded);

    let refunds = service.list_refunds(payment.id).await?;
    assert_eq!(refunds.len(), 2);
    assert_eq!(refunds.iter().map(|r| r.amount).sum::<i64>(), 50000);

    // Fully refunded payments cannot be refunded again
    let err = service
        .refund_payment(payment.id, 1, "again", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    Ok(())
}

#[tokio::test]
async fn test_pending_payment_cannot_be_refunded() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let payment = service
        .create_payment(standalone_payment(market.customer.id, 1000))
        .await?;

    let err = service
        .refund_payment(payment.id, 500, "nope", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = service
        .refund_payment(payment.id, 500, "   ", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert!(service.list_refunds(payment.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_refund_to_wallet_credits_payer() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;
    let payment = market.settled_payment(&service, &booking, 50000).await?;

    // The wallet is opened on demand
    let result = service
        .refund_payment(payment.id, 15000, "late arrival", None, true)
        .await?;
    let entry = result.wallet_transaction.expect("wallet credited");
    assert_eq!(entry.transaction_type, TransactionType::Credit);
    assert_eq!(entry.amount, 15000);
    assert_eq!(entry.reference_payment, Some(payment.id));

    let wallet = service.wallet_for_user(market.customer.id).await?;
    assert_eq!(wallet.id, entry.wallet_id);
    assert_eq!(wallet.balance, 15000);

    Ok(())
}

#[tokio::test]
async fn test_pay_booking_from_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;
    service.deposit(wallet.id, 40000, "Top up").await?;

    let result = service
        .pay_booking_from_wallet(booking.id, 30000, Some("Advance".to_string()))
        .await?;
    assert_eq!(result.payment.method, PaymentMethod::Wallet);
    assert_eq!(result.payment.status, PaymentStatus::Success);
    assert_eq!(result.payment.booking_id, Some(booking.id));
    assert_eq!(result.transaction.transaction_type, TransactionType::Debit);
    assert_eq!(result.transaction.balance_after, 10000);
    assert_eq!(result.transaction.reference_payment, Some(result.payment.id));
    assert_eq!(result.booking.advance_paid, 30000);
    assert_eq!(result.booking.payment_status, BookingPaymentStatus::Partial);

    // Not enough left: nothing changes
    let err = service
        .pay_booking_from_wallet(booking.id, 20000, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));
    assert_eq!(service.get_wallet(wallet.id).await?.balance, 10000);
    assert_eq!(service.get_booking(booking.id).await?.advance_paid, 30000);
    assert_eq!(service.list_payments_for_booking(booking.id).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_pay_from_wallet_requires_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;

    let err = service
        .pay_booking_from_wallet(booking.id, 1000, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalletNotFound(_)));
    assert!(service.list_payments().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_pay_from_wallet_rejects_deactivated_booking() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.book(&service, 50000).await?;
    let wallet = service.get_or_create_wallet(market.customer.id).await?;
    service.deposit(wallet.id, 40000, "Top up").await?;

    service.deactivate_booking(booking.id).await?;
    let err = service
        .pay_booking_from_wallet(booking.id, 10000, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BookingNotFound(_)));

    // The rolled-back unit left no trace
    let wallet = service.get_wallet(wallet.id).await?;
    assert_eq!(wallet.balance, 40000);
    assert_eq!(wallet.version, 1);
    assert!(service.list_payments().await?.is_empty());
    assert_eq!(service.get_booking(booking.id).await?.advance_paid, 0);

    Ok(())
}
