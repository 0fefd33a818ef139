use tracing::info;

use crate::config::AppConfig;
use crate::domain::{
    Cents, MAX_AMOUNT, Provider, ProviderId, Role, Service, ServiceId, TransitionPolicy, User, UserId,
    VerificationStatus,
};
use crate::storage::Repository;

use super::AppError;

/// Application service providing the marketplace use cases.
/// This is the primary interface for any client (CLI, HTTP API).
pub struct MarketplaceService {
    pub(super) repo: Repository,
    pub(super) policy: TransitionPolicy,
    pub(super) default_currency: String,
}

impl MarketplaceService {
    pub fn new(repo: Repository, policy: TransitionPolicy, default_currency: String) -> Self {
        Self {
            repo,
            policy,
            default_currency,
        }
    }

    /// Create (if needed) and migrate the database at `config.database_path`.
    pub async fn init(config: &AppConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", config.database_path);
        let repo = Repository::init(&db_url, config.busy_timeout).await?;
        Ok(Self::from_config(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", config.database_path);
        let repo = Repository::connect(&db_url, config.busy_timeout).await?;
        Ok(Self::from_config(repo, config))
    }

    fn from_config(repo: Repository, config: &AppConfig) -> Self {
        Self::new(
            repo,
            config.transition_policy,
            config.default_currency.clone(),
        )
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // User operations
    // ========================

    pub async fn create_user(
        &self,
        name: String,
        email: String,
        phone: Option<String>,
        role: Role,
    ) -> Result<User, AppError> {
        let name = require_text("name", name)?;
        let email = require_text("email", email)?.to_lowercase();
        if !email.contains('@') {
            return Err(AppError::InvalidInput(format!("invalid email address: {}", email)));
        }
        if self.repo.get_user_by_email(&email).await?.is_some() {
            return Err(AppError::InvalidInput(format!("email already registered: {}", email)));
        }

        let mut user = User::new(name, email, role);
        if let Some(phone) = phone.filter(|p| !p.trim().is_empty()) {
            user = user.with_phone(phone);
        }

        self.repo.save_user(&user).await?;
        info!(user_id = %user.id, role = %user.role, "user created");
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        self.repo
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    // ========================
    // Provider operations
    // ========================

    /// Create the provider profile of a user with the provider role. One per user.
    pub async fn create_provider(
        &self,
        user_id: UserId,
        business_name: String,
        city: String,
        hourly_rate: Cents,
    ) -> Result<Provider, AppError> {
        let user = self.get_user(user_id).await?;
        if user.role != Role::Provider {
            return Err(AppError::PermissionDenied(format!(
                "user {} has role {}, provider profiles need role provider",
                user.id, user.role
            )));
        }
        if self.repo.get_provider_by_user(user_id).await?.is_some() {
            return Err(AppError::ProviderProfileExists(user_id.to_string()));
        }
        if hourly_rate < 0 {
            return Err(AppError::InvalidAmount("hourly rate cannot be negative".to_string()));
        }
        require_within_limit(hourly_rate)?;

        let provider = Provider::new(
            user_id,
            require_text("business name", business_name)?,
            require_text("city", city)?,
            hourly_rate,
        );
        self.repo.save_provider(&provider).await?;
        info!(provider_id = %provider.id, user_id = %user_id, "provider profile created");
        Ok(provider)
    }

    pub async fn get_provider(&self, id: ProviderId) -> Result<Provider, AppError> {
        self.repo
            .get_provider(id)
            .await?
            .ok_or_else(|| AppError::ProviderNotFound(id.to_string()))
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>, AppError> {
        Ok(self.repo.list_providers().await?)
    }

    pub async fn set_provider_availability(
        &self,
        id: ProviderId,
        available: bool,
    ) -> Result<Provider, AppError> {
        if !self.repo.set_provider_availability(id, available).await? {
            return Err(AppError::ProviderNotFound(id.to_string()));
        }
        self.get_provider(id).await
    }

    pub async fn set_provider_verification(
        &self,
        id: ProviderId,
        status: VerificationStatus,
    ) -> Result<Provider, AppError> {
        if !self.repo.set_provider_verification(id, status).await? {
            return Err(AppError::ProviderNotFound(id.to_string()));
        }
        info!(provider_id = %id, status = %status, "provider verification changed");
        self.get_provider(id).await
    }

    // ========================
    // Service catalogue
    // ========================

    pub async fn create_service(
        &self,
        provider_id: ProviderId,
        title: String,
        category: String,
        base_price: Cents,
        duration_minutes: u32,
    ) -> Result<Service, AppError> {
        let provider = self.get_provider(provider_id).await?;
        if base_price < 0 {
            return Err(AppError::InvalidAmount("base price cannot be negative".to_string()));
        }
        require_within_limit(base_price)?;
        if duration_minutes == 0 {
            return Err(AppError::InvalidInput("duration must be positive".to_string()));
        }

        let service = Service::new(
            provider.id,
            require_text("title", title)?,
            require_text("category", category)?,
            base_price,
            duration_minutes,
        );
        self.repo.save_service(&service).await?;
        Ok(service)
    }

    pub async fn get_service(&self, id: ServiceId) -> Result<Service, AppError> {
        self.repo
            .get_service(id)
            .await?
            .ok_or_else(|| AppError::ServiceNotFound(id.to_string()))
    }

    pub async fn list_services(&self, provider_id: ProviderId) -> Result<Vec<Service>, AppError> {
        Ok(self.repo.list_services_for_provider(provider_id).await?)
    }
}

pub(super) fn require_text(field: &str, value: String) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

pub(super) fn require_positive(amount: Cents) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "amount must be positive, got {}",
            crate::domain::format_cents(amount)
        )));
    }
    require_within_limit(amount)
}

/// Reject magnitudes above [`MAX_AMOUNT`].
pub(super) fn require_within_limit(amount: Cents) -> Result<(), AppError> {
    if amount.unsigned_abs() > MAX_AMOUNT.unsigned_abs() {
        return Err(AppError::InvalidAmount(format!(
            "amount {} exceeds the limit of {}",
            crate::domain::format_cents(amount),
            crate::domain::format_cents(MAX_AMOUNT)
        )));
    }
    Ok(())
}
