use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BookingId, BookingStatus, UserId};

/// One booking status transition. Rows are only ever inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingStatusHistory {
    pub id: Uuid,
    pub booking_id: BookingId,
    pub old_status: BookingStatus,
    pub new_status: BookingStatus,
    /// None when the change was made by the system
    pub changed_by: Option<UserId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
