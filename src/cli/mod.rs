use std::net::SocketAddr;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::api::{self, AppState};
use crate::application::{MarketplaceService, NotificationOutcome, PricingUpdate};
use crate::config::AppConfig;
use crate::domain::{
    Booking, BookingStatus, BookingView, Cents, DetailedRatings, Gateway, Location, NewBooking,
    NewNotification, NewPayment, NewReview, NotificationChannel, NotificationPreferences,
    NotificationType, PaymentMethod, PaymentStatus, Priority, QuietHours, Role, Schedule,
    TransactionType, VerificationStatus, format_cents, parse_cents, total_by_type,
};
use crate::storage::{BookingFilter, BookingScope};

/// Homeserve - home-services marketplace backend
#[derive(Parser)]
#[command(name = "homeserve")]
#[command(about = "Bookings, wallets and payments for a home-services marketplace")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides HOMESERVE_DATABASE)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and apply the schema
    Init,

    /// Run the HTTP API
    Serve {
        /// Listen address (overrides HOMESERVE_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// User management
    #[command(subcommand)]
    User(UserCommands),

    /// Provider profiles
    #[command(subcommand)]
    Provider(ProviderCommands),

    /// Service catalogue
    #[command(subcommand)]
    Service(ServiceCommands),

    /// Booking lifecycle
    #[command(subcommand)]
    Booking(BookingCommands),

    /// Wallet balances and ledger
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Payments and refunds
    #[command(subcommand)]
    Payment(PaymentCommands),

    /// Reviews and ratings
    #[command(subcommand)]
    Review(ReviewCommands),

    /// Notifications and delivery preferences
    #[command(subcommand)]
    Notification(NotificationCommands),

    /// Verify wallet ledgers, provider ratings and refunds
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: bookings, statement, payments, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Wallet ID, required for statement exports
        #[arg(long)]
        wallet: Option<Uuid>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user
    Create {
        name: String,
        email: String,

        /// Role: customer, provider, admin
        #[arg(short, long, default_value = "customer")]
        role: String,

        #[arg(short, long)]
        phone: Option<String>,
    },

    /// Show a user
    Show { id: Uuid },
}

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// Create the provider profile of a provider-role user
    Create {
        /// Owning user ID
        #[arg(long)]
        user: Uuid,

        /// Business name
        name: String,

        #[arg(long)]
        city: String,

        /// Hourly rate (e.g., "450.00")
        #[arg(long, default_value = "0")]
        hourly_rate: String,
    },

    /// Show a provider with its rating
    Show { id: Uuid },

    /// List all providers
    List,

    /// Mark a provider available or unavailable
    Availability {
        id: Uuid,

        #[arg(action = clap::ArgAction::Set)]
        available: bool,
    },

    /// Set verification status: pending, under_review, verified, rejected
    Verify { id: Uuid, status: String },

    /// Rebuild the rating aggregate from all reviews
    Recompute { id: Uuid },
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Add a service to a provider's catalogue
    Create {
        #[arg(long)]
        provider: Uuid,

        title: String,

        #[arg(long)]
        category: String,

        /// Base price (e.g., "500.00")
        #[arg(long)]
        price: String,

        /// Duration in minutes
        #[arg(long, default_value = "60")]
        duration: u32,
    },

    /// List a provider's services
    List { provider: Uuid },
}

#[derive(Subcommand)]
pub enum BookingCommands {
    /// Book a service
    Create {
        #[arg(long)]
        customer: Uuid,

        #[arg(long)]
        provider: Uuid,

        #[arg(long)]
        service: Uuid,

        /// Scheduled date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Scheduled time (HH:MM)
        #[arg(long)]
        time: String,

        /// Duration in minutes
        #[arg(long, default_value = "60")]
        duration: u32,

        #[arg(long)]
        address: String,

        #[arg(long)]
        city: String,

        #[arg(long, default_value = "")]
        state: String,

        #[arg(long, default_value = "")]
        postal_code: String,

        /// What needs doing
        #[arg(short = 'm', long)]
        description: String,

        /// Quoted price (e.g., "500.00")
        #[arg(long)]
        price: String,

        /// Priority: low, medium, high, emergency
        #[arg(long, default_value = "medium")]
        priority: String,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show a booking by ID or booking number
    Show { booking: String },

    /// List bookings
    List {
        #[arg(long)]
        customer: Option<Uuid>,

        #[arg(long)]
        provider: Option<Uuid>,

        #[arg(long)]
        status: Option<String>,

        /// Include deleted bookings
        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Change a booking's status
    Status {
        booking: String,

        /// One of: pending, confirmed, accepted, in_progress, completed,
        /// cancelled, rejected, rescheduled, no_show
        status: String,

        /// Note, required as the reason when cancelling
        #[arg(short, long)]
        note: Option<String>,

        /// Acting user ID
        #[arg(long)]
        actor: Option<Uuid>,
    },

    /// Move a booking to a new slot
    Reschedule {
        booking: String,

        #[arg(long)]
        date: String,

        #[arg(long)]
        time: String,

        #[arg(long, default_value = "60")]
        duration: u32,

        #[arg(short, long)]
        note: Option<String>,

        #[arg(long)]
        actor: Option<Uuid>,
    },

    /// Adjust final price, extra charges and discount
    Pricing {
        booking: String,

        #[arg(long = "final")]
        final_price: Option<String>,

        #[arg(long, default_value = "0")]
        additional: String,

        #[arg(long, default_value = "0")]
        discount: String,
    },

    /// Status history, newest first
    History { booking: String },

    /// Upcoming bookings
    Upcoming {
        #[arg(long)]
        customer: Option<Uuid>,

        #[arg(long)]
        provider: Option<Uuid>,
    },

    /// Counts per status and completed revenue
    Stats {
        #[arg(long)]
        customer: Option<Uuid>,

        #[arg(long)]
        provider: Option<Uuid>,
    },

    /// Soft-delete a booking
    Delete { booking: String },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Open (or show) the wallet of a user
    Open { user: Uuid },

    /// Show a wallet
    Show { wallet: Uuid },

    /// List all wallets
    List,

    /// Credit a wallet
    Deposit {
        wallet: Uuid,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        #[arg(short, long, default_value = "Deposit")]
        reason: String,
    },

    /// Debit a wallet
    Withdraw {
        wallet: Uuid,

        amount: String,

        #[arg(short, long, default_value = "Withdrawal")]
        reason: String,
    },

    /// Recent ledger entries
    Transactions {
        wallet: Uuid,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Block all movements on a wallet
    Freeze { wallet: Uuid },

    /// Re-enable a frozen wallet
    Unfreeze { wallet: Uuid },
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Record a pending payment
    Create {
        #[arg(long)]
        user: Uuid,

        amount: String,

        /// Method: cash, upi, card, net_banking, wallet, emi
        #[arg(long, default_value = "upi")]
        method: String,

        /// Gateway: razorpay, stripe, paypal, paytm, cashfree, manual
        #[arg(long, default_value = "manual")]
        gateway: String,

        #[arg(long)]
        booking: Option<String>,

        #[arg(long)]
        currency: Option<String>,

        #[arg(short = 'm', long)]
        description: Option<String>,
    },

    /// Show a payment and its refunds
    Show { id: Uuid },

    /// Apply a gateway status update
    Status {
        id: Uuid,

        status: String,

        #[arg(long)]
        gateway_id: Option<String>,
    },

    /// Refund part or all of a payment
    Refund {
        id: Uuid,

        amount: String,

        #[arg(short, long)]
        reason: String,

        /// Credit the refund to the payer's wallet
        #[arg(long)]
        to_wallet: bool,

        /// User processing the refund
        #[arg(long)]
        by: Option<Uuid>,
    },

    /// Pay a booking from the customer's wallet
    FromWallet {
        booking: String,

        amount: String,

        #[arg(short = 'm', long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// Review a completed booking
    Submit {
        booking: String,

        #[arg(long)]
        customer: Uuid,

        /// Overall rating 1-5
        #[arg(long)]
        rating: u8,

        #[arg(short, long)]
        comment: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(long)]
        punctuality: Option<u8>,

        #[arg(long)]
        professionalism: Option<u8>,

        #[arg(long)]
        quality: Option<u8>,

        #[arg(long)]
        communication: Option<u8>,
    },

    /// Reply to a review as the reviewed provider
    Respond {
        id: Uuid,

        /// Provider's user ID
        #[arg(long)]
        user: Uuid,

        response: String,
    },

    /// List a provider's reviews
    List { provider: Uuid },
}

#[derive(Subcommand)]
pub enum NotificationCommands {
    /// Notify a user, subject to their preferences
    Send {
        user: Uuid,

        /// system, booking, payment, review, promotional, alert
        #[arg(short = 'k', long, default_value = "system")]
        kind: String,

        /// in_app, email, sms, push
        #[arg(short, long, default_value = "in_app")]
        channel: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        message: String,

        /// 1 (low) to 4 (urgent)
        #[arg(short, long, default_value_t = 1)]
        priority: u8,
    },

    /// List a user's notifications
    List {
        user: Uuid,

        #[arg(long)]
        unread: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Mark one notification read, or all of them with --all
    Read {
        user: Uuid,

        id: Option<Uuid>,

        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Show or change a user's preferences
    Prefs {
        user: Uuid,

        /// Channel or type to turn on (email, sms, push, in_app, booking, payment, review, promotional, system)
        #[arg(long)]
        enable: Vec<String>,

        /// Channel or type to turn off
        #[arg(long)]
        disable: Vec<String>,

        /// Quiet hours as HH:MM-HH:MM (UTC), or "off"
        #[arg(long)]
        quiet: Option<String>,

        /// Do not disturb for this many hours (0 clears it)
        #[arg(long)]
        dnd_hours: Option<i64>,
    },

    /// External-channel notifications waiting to be sent
    Pending {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Record that the external sender delivered a notification
    Sent { id: Uuid },
}

impl Cli {
    pub async fn run(self, mut config: AppConfig) -> Result<()> {
        if let Some(path) = self.database {
            config.database_path = path;
        }

        match self.command {
            Commands::Init => {
                MarketplaceService::init(&config).await?;
                println!("Database initialized: {}", config.database_path);
            }

            Commands::Serve { bind } => {
                if let Some(addr) = bind {
                    config.bind = addr;
                }
                let service = MarketplaceService::init(&config).await?;
                api::serve(AppState::new(service, config)).await?;
            }

            Commands::User(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_user_command(&service, cmd).await?;
            }

            Commands::Provider(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_provider_command(&service, cmd).await?;
            }

            Commands::Service(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_service_command(&service, cmd).await?;
            }

            Commands::Booking(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_booking_command(&service, cmd).await?;
            }

            Commands::Wallet(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_wallet_command(&service, cmd).await?;
            }

            Commands::Payment(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_payment_command(&service, cmd).await?;
            }

            Commands::Review(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_review_command(&service, cmd).await?;
            }

            Commands::Notification(cmd) => {
                let service = MarketplaceService::connect(&config).await?;
                run_notification_command(&service, cmd).await?;
            }

            Commands::Check => {
                let service = MarketplaceService::connect(&config).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                export_type,
                output,
                wallet,
            } => {
                let service = MarketplaceService::connect(&config).await?;
                run_export_command(&service, &export_type, output.as_deref(), wallet).await?;
            }
        }

        Ok(())
    }
}

async fn run_user_command(service: &MarketplaceService, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            name,
            email,
            role,
            phone,
        } => {
            let role = Role::from_str(&role).ok_or_else(|| {
                anyhow::anyhow!("Invalid role '{}'. Valid roles: customer, provider, admin", role)
            })?;
            let user = service.create_user(name, email, phone, role).await?;
            println!("Created user: {} <{}> ({}) {}", user.name, user.email, user.role, user.id);
        }

        UserCommands::Show { id } => {
            let user = service.get_user(id).await?;
            println!("User: {}", user.name);
            println!("  ID:      {}", user.id);
            println!("  Email:   {}", user.email);
            if let Some(phone) = &user.phone {
                println!("  Phone:   {}", phone);
            }
            println!("  Role:    {}", user.role);
            println!("  Active:  {}", if user.is_active { "yes" } else { "no" });
        }
    }
    Ok(())
}

async fn run_provider_command(service: &MarketplaceService, cmd: ProviderCommands) -> Result<()> {
    match cmd {
        ProviderCommands::Create {
            user,
            name,
            city,
            hourly_rate,
        } => {
            let rate = parse_amount(&hourly_rate)?;
            let provider = service.create_provider(user, name, city, rate).await?;
            println!("Created provider: {} ({})", provider.business_name, provider.id);
        }

        ProviderCommands::Show { id } => {
            let provider = service.get_provider(id).await?;
            println!("Provider: {}", provider.business_name);
            println!("  ID:           {}", provider.id);
            println!("  User:         {}", provider.user_id);
            println!("  City:         {}", provider.city);
            println!("  Available:    {}", if provider.is_available { "yes" } else { "no" });
            println!("  Verification: {}", provider.verification_status);
            println!("  Hourly rate:  {}", format_cents(provider.hourly_rate));
            println!(
                "  Rating:       {:.2} ({} reviews)",
                provider.rating.average(),
                provider.rating.total_reviews
            );
        }

        ProviderCommands::List => {
            let providers = service.list_providers().await?;
            if providers.is_empty() {
                println!("No providers found.");
            } else {
                println!("{:<36} {:<24} {:<14} {:>6}", "ID", "NAME", "CITY", "RATING");
                println!("{}", "-".repeat(84));
                for provider in providers {
                    println!(
                        "{:<36} {:<24} {:<14} {:>6.2}",
                        provider.id,
                        truncate(&provider.business_name, 24),
                        truncate(&provider.city, 14),
                        provider.rating.average()
                    );
                }
            }
        }

        ProviderCommands::Availability { id, available } => {
            let provider = service.set_provider_availability(id, available).await?;
            println!(
                "{} is now {}",
                provider.business_name,
                if provider.is_available { "available" } else { "unavailable" }
            );
        }

        ProviderCommands::Verify { id, status } => {
            let status = VerificationStatus::from_str(&status).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid status '{}'. Valid: pending, under_review, verified, rejected",
                    status
                )
            })?;
            let provider = service.set_provider_verification(id, status).await?;
            println!("{}: {}", provider.business_name, provider.verification_status);
        }

        ProviderCommands::Recompute { id } => {
            let aggregate = service.recompute_provider_rating(id).await?;
            println!(
                "Rating: {:.2} ({} reviews)",
                aggregate.average(),
                aggregate.total_reviews
            );
        }
    }
    Ok(())
}

async fn run_service_command(service: &MarketplaceService, cmd: ServiceCommands) -> Result<()> {
    match cmd {
        ServiceCommands::Create {
            provider,
            title,
            category,
            price,
            duration,
        } => {
            let price = parse_amount(&price)?;
            let created = service
                .create_service(provider, title, category, price, duration)
                .await?;
            println!("Created service: {} ({})", created.title, created.id);
        }

        ServiceCommands::List { provider } => {
            let services = service.list_services(provider).await?;
            if services.is_empty() {
                println!("No services found.");
            } else {
                println!("{:<36} {:<24} {:<14} {:>10} {:>5}", "ID", "TITLE", "CATEGORY", "PRICE", "MIN");
                println!("{}", "-".repeat(93));
                for s in services {
                    println!(
                        "{:<36} {:<24} {:<14} {:>10} {:>5}",
                        s.id,
                        truncate(&s.title, 24),
                        truncate(&s.category, 14),
                        format_cents(s.base_price),
                        s.duration_minutes
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_booking_command(service: &MarketplaceService, cmd: BookingCommands) -> Result<()> {
    match cmd {
        BookingCommands::Create {
            customer,
            provider,
            service: service_id,
            date,
            time,
            duration,
            address,
            city,
            state,
            postal_code,
            description,
            price,
            priority,
            notes,
        } => {
            let priority = Priority::from_str(&priority).ok_or_else(|| {
                anyhow::anyhow!("Invalid priority '{}'. Valid: low, medium, high, emergency", priority)
            })?;
            let request = NewBooking {
                customer_id: customer,
                provider_id: provider,
                service_id,
                schedule: Schedule::new(parse_date(&date)?, parse_time(&time)?, duration),
                location: Location {
                    address,
                    city,
                    state,
                    postal_code,
                    latitude: None,
                    longitude: None,
                },
                problem_description: description,
                quoted_price: parse_amount(&price)?,
                priority,
                customer_notes: notes,
            };
            let booking = service.create_booking(request).await?;
            println!("Created booking: {} ({})", booking.booking_number, booking.id);
        }

        BookingCommands::Show { booking } => {
            let booking = resolve_booking(service, &booking).await?;
            print_booking(&BookingView::new(booking, Utc::now().naive_utc()));
        }

        BookingCommands::List {
            customer,
            provider,
            status,
            all,
            limit,
        } => {
            let status = status
                .map(|s| {
                    BookingStatus::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("Invalid booking status '{}'", s))
                })
                .transpose()?;
            let filter = BookingFilter {
                customer,
                provider,
                status,
                include_inactive: all,
                limit,
            };
            print_booking_table(&service.list_bookings(&filter).await?);
        }

        BookingCommands::Status {
            booking,
            status,
            note,
            actor,
        } => {
            let booking = resolve_booking(service, &booking).await?;
            let result = service
                .transition_booking(booking.id, &status, actor, note.as_deref())
                .await?;
            println!(
                "{}: {} -> {}",
                result.booking.booking_number, result.previous_status, result.booking.status
            );
        }

        BookingCommands::Reschedule {
            booking,
            date,
            time,
            duration,
            note,
            actor,
        } => {
            let booking = resolve_booking(service, &booking).await?;
            let schedule = Schedule::new(parse_date(&date)?, parse_time(&time)?, duration);
            let result = service
                .reschedule_booking(booking.id, schedule, actor, note.as_deref())
                .await?;
            println!(
                "{} rescheduled to {} {}",
                result.booking.booking_number,
                result.booking.schedule.date,
                result.booking.schedule.time.format("%H:%M")
            );
        }

        BookingCommands::Pricing {
            booking,
            final_price,
            additional,
            discount,
        } => {
            let booking = resolve_booking(service, &booking).await?;
            let update = PricingUpdate {
                final_price: final_price.as_deref().map(parse_amount).transpose()?,
                additional_charges: parse_amount(&additional)?,
                discount_amount: parse_amount(&discount)?,
            };
            let booking = service.update_pricing(booking.id, update).await?;
            println!(
                "{}: total {}, balance {} ({})",
                booking.booking_number,
                format_cents(booking.total_amount()),
                format_cents(booking.balance_amount()),
                booking.payment_status.as_str()
            );
        }

        BookingCommands::History { booking } => {
            let booking = resolve_booking(service, &booking).await?;
            let history = service.booking_history(booking.id).await?;
            println!("{:<20} {:<12} {:<12} NOTES", "WHEN", "FROM", "TO");
            println!("{}", "-".repeat(60));
            for entry in history {
                println!(
                    "{:<20} {:<12} {:<12} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.old_status,
                    entry.new_status,
                    entry.notes.as_deref().unwrap_or("")
                );
            }
        }

        BookingCommands::Upcoming { customer, provider } => {
            let scope = scope_from(customer, provider)?;
            let bookings = service
                .upcoming_bookings(scope, Utc::now().date_naive())
                .await?;
            print_booking_table(&bookings);
        }

        BookingCommands::Stats { customer, provider } => {
            let stats = service.booking_stats(scope_from(customer, provider)?).await?;
            println!("Total bookings: {}", stats.total);
            for (status, count) in &stats.by_status {
                println!("  {:<12} {:>6}", format!("{}:", status), count);
            }
            println!("Completed revenue: {}", format_cents(stats.completed_revenue));
        }

        BookingCommands::Delete { booking } => {
            let booking = resolve_booking(service, &booking).await?;
            service.deactivate_booking(booking.id).await?;
            println!("Deleted booking: {}", booking.booking_number);
        }
    }
    Ok(())
}

async fn run_wallet_command(service: &MarketplaceService, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Open { user } => {
            let wallet = service.get_or_create_wallet(user).await?;
            println!(
                "Wallet {}: {} {}",
                wallet.id,
                format_cents(wallet.balance),
                wallet.currency
            );
        }

        WalletCommands::Show { wallet } => {
            let wallet = service.get_wallet(wallet).await?;
            println!("Wallet: {}", wallet.id);
            println!("  User:     {}", wallet.user_id);
            println!("  Balance:  {} {}", format_cents(wallet.balance), wallet.currency);
            let ledger = service.repository().wallet_ledger(wallet.id).await?;
            println!("  Entries:  {}", ledger.len());
            println!(
                "  Credited: {}",
                format_cents(total_by_type(&ledger, TransactionType::Credit))
            );
            println!(
                "  Debited:  {}",
                format_cents(total_by_type(&ledger, TransactionType::Debit))
            );
            println!("  Active:   {}", if wallet.is_active { "yes" } else { "no" });
        }

        WalletCommands::List => {
            let wallets = service.list_wallets().await?;
            if wallets.is_empty() {
                println!("No wallets found.");
            } else {
                println!("{:<36} {:<36} {:>12} {:<8}", "WALLET", "USER", "BALANCE", "CURRENCY");
                println!("{}", "-".repeat(95));
                for wallet in wallets {
                    println!(
                        "{:<36} {:<36} {:>12} {:<8}",
                        wallet.id,
                        wallet.user_id,
                        format_cents(wallet.balance),
                        wallet.currency
                    );
                }
            }
        }

        WalletCommands::Deposit {
            wallet,
            amount,
            reason,
        } => {
            let movement = service.deposit(wallet, parse_amount(&amount)?, &reason).await?;
            println!(
                "Deposited {} ({}): balance {}",
                format_cents(movement.transaction.amount),
                movement.transaction.reference,
                format_cents(movement.wallet.balance)
            );
        }

        WalletCommands::Withdraw {
            wallet,
            amount,
            reason,
        } => {
            let movement = service.withdraw(wallet, parse_amount(&amount)?, &reason).await?;
            println!(
                "Withdrew {} ({}): balance {}",
                format_cents(movement.transaction.amount),
                movement.transaction.reference,
                format_cents(movement.wallet.balance)
            );
        }

        WalletCommands::Transactions { wallet, limit } => {
            let entries = service.wallet_transactions(wallet, limit).await?;
            if entries.is_empty() {
                println!("No transactions found.");
            } else {
                println!(
                    "{:>5} {:<20} {:<7} {:>10} {:>12} DESCRIPTION",
                    "SEQ", "DATE", "TYPE", "AMOUNT", "BALANCE"
                );
                println!("{}", "-".repeat(80));
                for tx in entries {
                    println!(
                        "{:>5} {:<20} {:<7} {:>10} {:>12} {}",
                        tx.sequence,
                        tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                        tx.transaction_type,
                        format_cents(tx.amount),
                        format_cents(tx.balance_after),
                        truncate(&tx.description, 30)
                    );
                }
            }
        }

        WalletCommands::Freeze { wallet } => {
            service.set_wallet_active(wallet, false).await?;
            println!("Frozen wallet: {}", wallet);
        }

        WalletCommands::Unfreeze { wallet } => {
            service.set_wallet_active(wallet, true).await?;
            println!("Unfrozen wallet: {}", wallet);
        }
    }
    Ok(())
}

async fn run_payment_command(service: &MarketplaceService, cmd: PaymentCommands) -> Result<()> {
    match cmd {
        PaymentCommands::Create {
            user,
            amount,
            method,
            gateway,
            booking,
            currency,
            description,
        } => {
            let method = PaymentMethod::from_str(&method)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment method '{}'", method))?;
            let gateway = Gateway::from_str(&gateway)
                .ok_or_else(|| anyhow::anyhow!("Invalid gateway '{}'", gateway))?;
            let booking_id = match booking {
                Some(b) => Some(resolve_booking(service, &b).await?.id),
                None => None,
            };
            let payment = service
                .create_payment(NewPayment {
                    user_id: user,
                    booking_id,
                    amount: parse_amount(&amount)?,
                    currency,
                    method,
                    gateway,
                    description,
                })
                .await?;
            println!(
                "Created payment {} (order {}): {} {} {}",
                payment.payment_reference,
                payment.order_reference,
                format_cents(payment.amount),
                payment.currency,
                payment.id
            );
        }

        PaymentCommands::Show { id } => {
            let payment = service.get_payment(id).await?;
            println!("Payment: {}", payment.payment_reference);
            println!("  Order:     {}", payment.order_reference);
            println!("  Status:    {}", payment.status);
            println!("  Amount:    {} {}", format_cents(payment.amount), payment.currency);
            println!("  Refunded:  {}", format_cents(payment.refund_amount));
            println!("  Method:    {} via {}", payment.method.as_str(), payment.gateway.as_str());
            if let Some(gateway_id) = &payment.gateway_payment_id {
                println!("  Gateway:   {}", gateway_id);
            }
            for refund in service.list_refunds(id).await? {
                println!(
                    "  Refund {}: {} ({})",
                    refund.reference,
                    format_cents(refund.amount),
                    refund.reason
                );
            }
        }

        PaymentCommands::Status {
            id,
            status,
            gateway_id,
        } => {
            let status = PaymentStatus::from_str(&status)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment status '{}'", status))?;
            let payment = service
                .update_payment_status(id, status, gateway_id.as_deref())
                .await?;
            println!("{}: {}", payment.payment_reference, payment.status);
        }

        PaymentCommands::Refund {
            id,
            amount,
            reason,
            to_wallet,
            by,
        } => {
            let result = service
                .refund_payment(id, parse_amount(&amount)?, &reason, by, to_wallet)
                .await?;
            println!(
                "Refunded {} ({}): payment now {}, {} refunded in total",
                format_cents(result.refund.amount),
                result.refund.reference,
                result.payment.status,
                format_cents(result.payment.refund_amount)
            );
            if let Some(tx) = result.wallet_transaction {
                println!("Credited to wallet {}: {}", tx.wallet_id, tx.reference);
            }
        }

        PaymentCommands::FromWallet {
            booking,
            amount,
            description,
        } => {
            let booking = resolve_booking(service, &booking).await?;
            let result = service
                .pay_booking_from_wallet(booking.id, parse_amount(&amount)?, description)
                .await?;
            println!(
                "Paid {} towards {}: balance due {}, wallet balance {}",
                format_cents(result.payment.amount),
                result.booking.booking_number,
                format_cents(result.booking.balance_amount()),
                format_cents(result.transaction.balance_after)
            );
        }
    }
    Ok(())
}

async fn run_review_command(service: &MarketplaceService, cmd: ReviewCommands) -> Result<()> {
    match cmd {
        ReviewCommands::Submit {
            booking,
            customer,
            rating,
            comment,
            title,
            punctuality,
            professionalism,
            quality,
            communication,
        } => {
            let booking = resolve_booking(service, &booking).await?;
            let review = service
                .submit_review(NewReview {
                    booking_id: booking.id,
                    customer_id: customer,
                    rating,
                    detailed: DetailedRatings {
                        punctuality,
                        professionalism,
                        quality,
                        communication,
                    },
                    title,
                    comment,
                })
                .await?;
            println!("Submitted review {} for {}", review.id, booking.booking_number);
        }

        ReviewCommands::Respond { id, user, response } => {
            service.respond_to_review(id, user, response).await?;
            println!("Response saved.");
        }

        ReviewCommands::List { provider } => {
            let reviews = service.list_reviews(provider).await?;
            if reviews.is_empty() {
                println!("No reviews found.");
            }
            for review in reviews {
                println!(
                    "{} [{}/5] {}",
                    review.created_at.format("%Y-%m-%d"),
                    review.rating,
                    review.title.as_deref().unwrap_or("")
                );
                println!("    {}", review.comment);
                if let Some(response) = &review.provider_response {
                    println!("    > {}", response);
                }
            }
        }
    }
    Ok(())
}

async fn run_notification_command(
    service: &MarketplaceService,
    cmd: NotificationCommands,
) -> Result<()> {
    match cmd {
        NotificationCommands::Send {
            user,
            kind,
            channel,
            title,
            message,
            priority,
        } => {
            let notification_type = NotificationType::from_str(&kind)
                .with_context(|| format!("Unknown notification type '{}'", kind))?;
            let channel = NotificationChannel::from_str(&channel)
                .with_context(|| format!("Unknown channel '{}'", channel))?;
            let outcome = service
                .notify(NewNotification {
                    user_id: user,
                    notification_type,
                    channel,
                    title,
                    message,
                    data: serde_json::Value::Null,
                    action_url: None,
                    action_text: None,
                    priority,
                    expires_at: None,
                })
                .await?;
            match outcome {
                NotificationOutcome::Stored { notification } => {
                    println!("Stored notification {}", notification.id);
                }
                NotificationOutcome::Suppressed { reason } => {
                    println!("Not sent: {}", reason);
                }
            }
        }

        NotificationCommands::List {
            user,
            unread,
            limit,
        } => {
            let notifications = service.list_notifications(user, unread, limit).await?;
            if notifications.is_empty() {
                println!("No notifications.");
                return Ok(());
            }
            for n in notifications {
                println!(
                    "{} {} {:<8} {:<7} {}",
                    if n.is_read { " " } else { "*" },
                    n.created_at.format("%Y-%m-%d %H:%M"),
                    n.notification_type,
                    n.channel,
                    truncate(&n.title, 50)
                );
                println!("    {}", n.id);
            }
        }

        NotificationCommands::Read { user, id, all } => match (id, all) {
            (_, true) => {
                let marked = service.mark_all_notifications_read(user).await?;
                println!("Marked {} notification(s) read.", marked);
            }
            (Some(id), false) => {
                service.mark_notification_read(user, id).await?;
                println!("Marked {} read.", id);
            }
            (None, false) => anyhow::bail!("Give a notification ID or --all"),
        },

        NotificationCommands::Prefs {
            user,
            enable,
            disable,
            quiet,
            dnd_hours,
        } => {
            let mut prefs = service.get_notification_preferences(user).await?;
            let changed = !enable.is_empty()
                || !disable.is_empty()
                || quiet.is_some()
                || dnd_hours.is_some();
            for name in &enable {
                set_preference_flag(&mut prefs, name, true)?;
            }
            for name in &disable {
                set_preference_flag(&mut prefs, name, false)?;
            }
            if let Some(quiet) = quiet {
                prefs.quiet_hours = parse_quiet_hours(&quiet)?;
            }
            if let Some(hours) = dnd_hours {
                prefs.dnd_until = (hours > 0).then(|| Utc::now() + chrono::Duration::hours(hours));
            }
            if changed {
                prefs = service.set_notification_preferences(prefs).await?;
            }
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }

        NotificationCommands::Pending { limit } => {
            let pending = service.pending_deliveries(limit).await?;
            if pending.is_empty() {
                println!("Nothing to send.");
            }
            for n in pending {
                println!(
                    "{} p{} {:<6} {} {}",
                    n.id,
                    n.priority,
                    n.channel,
                    n.user_id,
                    truncate(&n.title, 40)
                );
            }
        }

        NotificationCommands::Sent { id } => {
            service.mark_notification_sent(id).await?;
            println!("Marked {} sent.", id);
        }
    }
    Ok(())
}

fn set_preference_flag(prefs: &mut NotificationPreferences, name: &str, on: bool) -> Result<()> {
    let flag = match name {
        "email" => &mut prefs.email,
        "sms" => &mut prefs.sms,
        "push" => &mut prefs.push,
        "in_app" => &mut prefs.in_app,
        "booking" => &mut prefs.booking_updates,
        "payment" => &mut prefs.payment_updates,
        "review" => &mut prefs.review_updates,
        "promotional" => &mut prefs.promotional,
        "system" => &mut prefs.system_alerts,
        other => anyhow::bail!("Unknown preference '{}'", other),
    };
    *flag = on;
    Ok(())
}

fn parse_quiet_hours(input: &str) -> Result<Option<QuietHours>> {
    if input.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let (start, end) = input
        .split_once('-')
        .context("Quiet hours must look like 22:00-08:00")?;
    Ok(Some(QuietHours {
        start: parse_time(start.trim())?,
        end: parse_time(end.trim())?,
    }))
}

async fn run_check_command(service: &MarketplaceService) -> Result<()> {
    println!("Checking marketplace integrity...\n");

    let report = service.check_integrity().await?;

    println!("Wallets:      {}", report.wallets_checked);
    println!("Transactions: {}", report.transactions_checked);
    println!("Providers:    {}", report.providers_checked);
    println!("Payments:     {}", report.payments_checked);
    println!();

    if report.is_healthy() {
        println!("Everything is consistent.");
        return Ok(());
    }

    println!("Issues found:");
    for issue in &report.ledger_issues {
        println!("  - {}", issue);
    }
    for drift in &report.rating_drift {
        println!(
            "  - provider {}: stored {}/{} but reviews give {}/{}",
            drift.provider_id,
            drift.stored.rating_sum,
            drift.stored.total_reviews,
            drift.recomputed.rating_sum,
            drift.recomputed.total_reviews
        );
    }
    for overrun in &report.refund_overruns {
        println!(
            "  - payment {}: refunded {} of {}",
            overrun.payment_id,
            format_cents(overrun.refund_amount),
            format_cents(overrun.amount)
        );
    }
    anyhow::bail!("Integrity check failed with {} issue(s)", report.issue_count())
}

async fn run_export_command(
    service: &MarketplaceService,
    export_type: &str,
    output: Option<&str>,
    wallet: Option<Uuid>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "bookings" => {
            let filter = BookingFilter {
                include_inactive: true,
                ..Default::default()
            };
            let count = exporter.export_bookings_csv(writer, &filter).await?;
            if output.is_some() {
                eprintln!("Exported {} bookings", count);
            }
        }
        "statement" => {
            let wallet = wallet.context("--wallet is required for statement exports")?;
            let count = exporter.export_wallet_statement_csv(writer, wallet).await?;
            if output.is_some() {
                eprintln!("Exported {} wallet transactions", count);
            }
        }
        "payments" => {
            let count = exporter.export_payments_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} payments", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} bookings, {} wallets, {} wallet transactions, {} payments",
                    snapshot.bookings.len(),
                    snapshot.wallets.len(),
                    snapshot.wallet_transactions.len(),
                    snapshot.payments.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: bookings, statement, payments, full",
                export_type
            );
        }
    }

    Ok(())
}

/// Accept either a booking UUID or a booking number.
async fn resolve_booking(service: &MarketplaceService, key: &str) -> Result<Booking> {
    let booking = match Uuid::parse_str(key) {
        Ok(id) => service.get_booking(id).await?,
        Err(_) => service.get_booking_by_number(key).await?,
    };
    Ok(booking)
}

fn scope_from(customer: Option<Uuid>, provider: Option<Uuid>) -> Result<BookingScope> {
    match (customer, provider) {
        (Some(_), Some(_)) => anyhow::bail!("Use either --customer or --provider, not both"),
        (Some(id), None) => Ok(BookingScope::Customer(id)),
        (None, Some(id)) => Ok(BookingScope::Provider(id)),
        (None, None) => Ok(BookingScope::All),
    }
}

fn print_booking(view: &BookingView) {
    let booking = &view.booking;
    println!("Booking: {}", booking.booking_number);
    println!("  ID:          {}", booking.id);
    println!("  Status:      {}", booking.status);
    println!("  Priority:    {}", booking.priority.as_str());
    println!(
        "  Scheduled:   {} {} ({} min)",
        booking.schedule.date,
        booking.schedule.time.format("%H:%M"),
        booking.schedule.duration_minutes
    );
    println!("  Address:     {}, {}", booking.location.address, booking.location.city);
    println!("  Problem:     {}", booking.problem_description);
    println!("  Quoted:      {}", format_cents(booking.quoted_price));
    if let Some(final_price) = booking.final_price {
        println!("  Final:       {}", format_cents(final_price));
    }
    println!("  Total:       {}", format_cents(view.total_amount));
    println!("  Paid:        {}", format_cents(booking.advance_paid));
    println!("  Balance:     {}", format_cents(view.balance_amount));
    println!("  Payment:     {}", booking.payment_status.as_str());
    if let Some(reason) = &booking.cancellation_reason {
        println!("  Cancelled:   {}", reason);
    }
    if view.is_past_due {
        println!("  PAST DUE");
    }
    if !booking.is_active {
        println!("  (deleted)");
    }
}

fn print_booking_table(bookings: &[Booking]) {
    if bookings.is_empty() {
        println!("No bookings found.");
        return;
    }
    println!(
        "{:<14} {:<12} {:<6} {:<12} {:>10} {:>10}",
        "NUMBER", "DATE", "TIME", "STATUS", "TOTAL", "BALANCE"
    );
    println!("{}", "-".repeat(70));
    for booking in bookings {
        println!(
            "{:<14} {:<12} {:<6} {:<12} {:>10} {:>10}",
            booking.booking_number,
            booking.schedule.date,
            booking.schedule.time.format("%H:%M"),
            booking.status,
            format_cents(booking.total_amount()),
            format_cents(booking.balance_amount())
        );
    }
}

fn parse_amount(input: &str) -> Result<Cents> {
    parse_cents(input).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").context("Date must be in YYYY-MM-DD format")
}

fn parse_time(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M:%S"))
        .context("Time must be in HH:MM format")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_accepts_seconds() {
        assert_eq!(parse_time("09:30").ok(), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time("09:30:15").ok(), NaiveTime::from_hms_opt(9, 30, 15));
        assert!(parse_time("9.30").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Plumbing & Heating Services", 10), "Plumbin...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_cli_parses_booking_status() {
        let cli = Cli::try_parse_from([
            "homeserve",
            "booking",
            "status",
            "BK2410160001",
            "cancelled",
            "--note",
            "customer requested",
        ])
        .expect("valid command line");
        assert!(matches!(
            cli.command,
            Commands::Booking(BookingCommands::Status { .. })
        ));
    }

    #[test]
    fn test_parse_quiet_hours() {
        let quiet = parse_quiet_hours("22:00-07:30").expect("valid window").expect("some");
        assert_eq!(quiet.start, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert_eq!(quiet.end, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(parse_quiet_hours("off").expect("off is valid").is_none());
        assert!(parse_quiet_hours("22:00").is_err());
    }

    #[test]
    fn test_preference_flags_by_name() {
        let mut prefs = NotificationPreferences::for_user(Uuid::new_v4());
        set_preference_flag(&mut prefs, "promotional", true).expect("known flag");
        set_preference_flag(&mut prefs, "sms", false).expect("known flag");
        assert!(prefs.promotional);
        assert!(!prefs.sms);
        assert!(set_preference_flag(&mut prefs, "fax", true).is_err());
    }
}
