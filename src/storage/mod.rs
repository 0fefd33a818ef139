mod bookings;
mod notifications;
mod payments;
mod repository;
mod reviews;
mod wallets;

pub use bookings::*;
pub use notifications::*;
pub use repository::*;
pub use wallets::*;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");
