mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Marketplace, test_service};
use homeserve::application::AppError;
use homeserve::domain::{DetailedRatings, NewReview, Role};

fn review_for(market: &Marketplace, booking_id: uuid::Uuid, rating: u8) -> NewReview {
    NewReview {
        booking_id,
        customer_id: market.customer.id,
        rating,
        detailed: DetailedRatings {
            punctuality: Some(5),
            professionalism: Some(4),
            quality: None,
            communication: None,
        },
        title: Some("Quick fix".to_string()),
        comment: "Sorted the leak in twenty minutes".to_string(),
    }
}

#[tokio::test]
async fn test_review_updates_provider_rating() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;

    let first = market.completed_booking(&service).await?;
    let second = market.completed_booking(&service).await?;

    let review = service.submit_review(review_for(&market, first.id, 5)).await?;
    assert_eq!(review.provider_id, market.provider.id);
    assert_eq!(review.detailed.average(), Some(4.5));
    service.submit_review(review_for(&market, second.id, 4)).await?;

    let provider = service.get_provider(market.provider.id).await?;
    assert_eq!(provider.rating.total_reviews, 2);
    assert_eq!(provider.rating.rating_sum, 9);
    assert_eq!(provider.rating.average(), 4.5);

    let reviews = service.list_reviews(market.provider.id).await?;
    assert_eq!(reviews.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_one_review_per_booking() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.completed_booking(&service).await?;

    service.submit_review(review_for(&market, booking.id, 5)).await?;
    let err = service
        .submit_review(review_for(&market, booking.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReviewAlreadyExists(ref n) if *n == booking.booking_number));

    // The duplicate did not touch the aggregate
    let provider = service.get_provider(market.provider.id).await?;
    assert_eq!(provider.rating.total_reviews, 1);
    assert_eq!(provider.rating.rating_sum, 5);

    Ok(())
}

#[tokio::test]
async fn test_review_preconditions() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let pending = market.book(&service, 50000).await?;
    let completed = market.completed_booking(&service).await?;

    // Out-of-range scores
    for rating in [0, 6] {
        assert!(matches!(
            service
                .submit_review(review_for(&market, completed.id, rating))
                .await
                .unwrap_err(),
            AppError::InvalidRating(r) if r == rating
        ));
    }
    let mut bad_detail = review_for(&market, completed.id, 4);
    bad_detail.detailed.quality = Some(9);
    assert!(matches!(
        service.submit_review(bad_detail).await.unwrap_err(),
        AppError::InvalidRating(9)
    ));

    // Only completed bookings
    assert!(matches!(
        service
            .submit_review(review_for(&market, pending.id, 4))
            .await
            .unwrap_err(),
        AppError::InvalidInput(_)
    ));

    // Only the booking's customer
    let other = service
        .create_user("Other".into(), "other@example.com".into(), None, Role::Customer)
        .await?;
    let mut request = review_for(&market, completed.id, 4);
    request.customer_id = other.id;
    assert!(matches!(
        service.submit_review(request).await.unwrap_err(),
        AppError::PermissionDenied(_)
    ));

    assert_eq!(service.get_provider(market.provider.id).await?.rating.total_reviews, 0);

    Ok(())
}

#[tokio::test]
async fn test_provider_response() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.completed_booking(&service).await?;
    let review = service.submit_review(review_for(&market, booking.id, 5)).await?;

    let err = service
        .respond_to_review(review.id, market.customer.id, "Thanks!".into())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));

    let responded = service
        .respond_to_review(review.id, market.provider_user.id, "Thanks!".into())
        .await?;
    assert_eq!(responded.provider_response.as_deref(), Some("Thanks!"));
    assert!(responded.responded_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_recompute_repairs_drift() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let booking = market.completed_booking(&service).await?;
    service.submit_review(review_for(&market, booking.id, 3)).await?;

    sqlx::query("UPDATE providers SET rating_sum = 40, total_reviews = 9 WHERE id = ?")
        .bind(market.provider.id.to_string())
        .execute(service.repository().pool())
        .await?;

    let repaired = service.recompute_provider_rating(market.provider.id).await?;
    assert_eq!(repaired.rating_sum, 3);
    assert_eq!(repaired.total_reviews, 1);
    assert_eq!(
        service.get_provider(market.provider.id).await?.rating,
        repaired
    );

    Ok(())
}

#[tokio::test]
async fn test_concurrent_reviews_keep_aggregate_exact() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;

    let mut bookings = Vec::new();
    for _ in 0..6 {
        bookings.push(market.completed_booking(&service).await?);
    }

    let service = Arc::new(service);
    let mut handles = Vec::new();
    for (i, booking) in bookings.iter().enumerate() {
        let service = Arc::clone(&service);
        let request = review_for(&market, booking.id, (i % 5) as u8 + 1);
        handles.push(tokio::spawn(async move { service.submit_review(request).await }));
    }
    for handle in handles {
        handle.await??;
    }

    let provider = service.get_provider(market.provider.id).await?;
    assert_eq!(provider.rating.total_reviews, 6);
    // 1 + 2 + 3 + 4 + 5 + 1
    assert_eq!(provider.rating.rating_sum, 16);

    Ok(())
}
