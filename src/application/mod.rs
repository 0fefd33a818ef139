// Application layer - use cases and orchestration over the repository.
// Every state change runs inside one SQL transaction.

mod bookings;
pub mod error;
mod integrity;
mod notifications;
mod payments;
mod reviews;
mod service;
mod wallets;

pub use bookings::*;
pub use error::*;
pub use notifications::*;
pub use payments::*;
pub use service::MarketplaceService;
pub use wallets::*;
