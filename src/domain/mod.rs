mod booking;
mod directory;
mod history;
mod integrity;
mod ledger;
mod notification;
pub mod money;
mod payment;
mod review;
mod wallet;

pub use booking::*;
pub use directory::*;
pub use history::*;
pub use integrity::*;
pub use ledger::*;
pub use notification::*;
pub use money::{Cents, MAX_AMOUNT, ParseCentsError, format_cents, parse_cents};
pub use payment::*;
pub use review::*;
pub use wallet::*;
