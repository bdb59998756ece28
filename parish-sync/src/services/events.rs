//! Parish events (services, meetings, gatherings)

use super::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_event_window"))]
pub struct Event {
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,

    pub starts_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn validate_event_window(event: &Event) -> Result<(), ValidationError> {
    match event.ends_at {
        Some(ends_at) if ends_at < event.starts_at => Err(ValidationError::new("ends_before_start")),
        _ => Ok(()),
    }
}

impl Event {
    pub fn new(title: impl Into<String>, starts_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            starts_at,
            ends_at: None,
            location: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Validate)]
pub struct EventPatch {
    #[validate(length(min = 1, message = "title cannot be blank"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity for Event {
    const COLLECTION: &'static str = "events";
    type Patch = EventPatch;
}

pub type EventService = super::EntityService<Event>;
