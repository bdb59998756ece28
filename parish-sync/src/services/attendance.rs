//! Attendance of members at events

use super::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

/// One member's attendance at one event.
///
/// `event_id` and `member_id` hold whatever id the referenced record had
/// when this row was written; a placeholder id here is not rewritten once
/// the referenced record syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Attendance {
    #[validate(length(min = 1, message = "event_id is required"))]
    pub event_id: String,

    #[validate(length(min = 1, message = "member_id is required"))]
    pub member_id: String,

    pub status: AttendanceStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl Attendance {
    pub fn present(event_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            member_id: member_id.into(),
            status: AttendanceStatus::Present,
            checked_in_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Validate)]
pub struct AttendancePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl Entity for Attendance {
    const COLLECTION: &'static str = "attendance";
    type Patch = AttendancePatch;
}

pub type AttendanceService = super::EntityService<Attendance>;
