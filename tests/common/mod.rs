// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use homeserve::application::MarketplaceService;
use homeserve::config::AppConfig;
use homeserve::domain::{
    Booking, Cents, Gateway, Location, NewBooking, NewPayment, Payment, PaymentMethod,
    PaymentStatus, Priority, Provider, Role, Schedule, Service, TransitionPolicy, User,
};
use tempfile::TempDir;

/// Config pointing at a fresh database inside `temp_dir`
pub fn test_config(temp_dir: &TempDir, policy: TransitionPolicy) -> AppConfig {
    let db_path = temp_dir.path().join("test.db");
    AppConfig {
        database_path: db_path.to_string_lossy().into_owned(),
        transition_policy: policy,
        ..AppConfig::default()
    }
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(MarketplaceService, TempDir)> {
    test_service_with_policy(TransitionPolicy::Permissive).await
}

pub async fn test_service_with_policy(
    policy: TransitionPolicy,
) -> Result<(MarketplaceService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = MarketplaceService::init(&test_config(&temp_dir, policy)).await?;
    Ok((service, temp_dir))
}

/// A date `days` from today
pub fn days_from_now(days: i64) -> NaiveDate {
    (Utc::now() + Duration::days(days)).date_naive()
}

pub fn ten_am() -> NaiveTime {
    NaiveTime::from_hms_opt(10, 0, 0).unwrap()
}

pub fn sample_location() -> Location {
    Location {
        address: "12 MG Road".to_string(),
        city: "Pune".to_string(),
        state: "MH".to_string(),
        postal_code: "411001".to_string(),
        latitude: None,
        longitude: None,
    }
}

/// Test fixture: a customer, a provider with one service and an admin
pub struct Marketplace {
    pub customer: User,
    pub provider_user: User,
    pub provider: Provider,
    pub service: Service,
    pub admin: User,
}

impl Marketplace {
    pub async fn create(service: &MarketplaceService) -> Result<Self> {
        let customer = service
            .create_user(
                "Asha Customer".into(),
                "asha@example.com".into(),
                None,
                Role::Customer,
            )
            .await?;
        let provider_user = service
            .create_user(
                "Ravi Plumber".into(),
                "ravi@example.com".into(),
                Some("+91 98000 00000".into()),
                Role::Provider,
            )
            .await?;
        let provider = service
            .create_provider(provider_user.id, "Ravi Plumbing".into(), "Pune".into(), 45000)
            .await?;
        let catalogue_entry = service
            .create_service(provider.id, "Leak repair".into(), "plumbing".into(), 50000, 60)
            .await?;
        let admin = service
            .create_user("Ops".into(), "ops@example.com".into(), None, Role::Admin)
            .await?;

        Ok(Self {
            customer,
            provider_user,
            provider,
            service: catalogue_entry,
            admin,
        })
    }

    pub fn booking_request(&self, quoted_price: Cents) -> NewBooking {
        NewBooking {
            customer_id: self.customer.id,
            provider_id: self.provider.id,
            service_id: self.service.id,
            schedule: Schedule::new(days_from_now(3), ten_am(), 60),
            location: sample_location(),
            problem_description: "Kitchen sink leaking".to_string(),
            quoted_price,
            priority: Priority::Medium,
            customer_notes: None,
        }
    }

    /// A pending booking quoted at `quoted_price`
    pub async fn book(&self, service: &MarketplaceService, quoted_price: Cents) -> Result<Booking> {
        Ok(service.create_booking(self.booking_request(quoted_price)).await?)
    }

    /// A booking driven through to completed
    pub async fn completed_booking(&self, service: &MarketplaceService) -> Result<Booking> {
        let booking = self.book(service, 50000).await?;
        for status in ["confirmed", "accepted", "in_progress", "completed"] {
            service
                .transition_booking(booking.id, status, Some(self.provider_user.id), None)
                .await?;
        }
        Ok(service.get_booking(booking.id).await?)
    }

    /// A successful UPI payment of `amount` against `booking`
    pub async fn settled_payment(
        &self,
        service: &MarketplaceService,
        booking: &Booking,
        amount: Cents,
    ) -> Result<Payment> {
        let payment = service
            .create_payment(NewPayment {
                user_id: self.customer.id,
                booking_id: Some(booking.id),
                amount,
                currency: None,
                method: PaymentMethod::Upi,
                gateway: Gateway::Razorpay,
                description: None,
            })
            .await?;
        Ok(service
            .update_payment_status(payment.id, PaymentStatus::Success, Some("pay_gw_1"))
            .await?)
    }
}
