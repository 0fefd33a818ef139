use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, RatingAggregate, money};

pub type UserId = Uuid;
pub type ProviderId = Uuid;
pub type ServiceId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "customer" => Some(Role::Customer),
            "provider" => Some(Role::Provider),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            phone: None,
            role,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    UnderReview,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::UnderReview => "under_review",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(VerificationStatus::Pending),
            "under_review" => Some(VerificationStatus::UnderReview),
            "verified" => Some(VerificationStatus::Verified),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A provider profile. Always owned by a user with the provider role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub user_id: UserId,
    pub business_name: String,
    pub city: String,
    pub is_available: bool,
    pub verification_status: VerificationStatus,
    #[serde(with = "money::decimal")]
    pub hourly_rate: Cents,
    pub rating: RatingAggregate,
    pub created_at: DateTime<Utc>,
}

impl Provider {
    pub fn new(user_id: UserId, business_name: String, city: String, hourly_rate: Cents) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            business_name,
            city,
            is_available: true,
            verification_status: VerificationStatus::Pending,
            hourly_rate,
            rating: RatingAggregate::default(),
            created_at: Utc::now(),
        }
    }
}

/// A bookable service offered by one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub provider_id: ProviderId,
    pub title: String,
    pub category: String,
    #[serde(with = "money::decimal")]
    pub base_price: Cents,
    pub duration_minutes: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn new(
        provider_id: ProviderId,
        title: String,
        category: String,
        base_price: Cents,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            title,
            category,
            base_price,
            duration_minutes,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
