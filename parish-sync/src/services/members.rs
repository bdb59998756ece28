//! Parish members

use super::Entity;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Visitor,
    Inactive,
}

/// A person on the parish register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Member {
    #[validate(length(min = 1, message = "first name is required"))]
    pub first_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[validate(email)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_status: Option<MembershipStatus>,
}

impl Member {
    pub fn new(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: None,
            email: None,
            phone: None,
            birth_date: None,
            membership_status: None,
        }
    }

    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Validate)]
pub struct MemberPatch {
    #[validate(length(min = 1, message = "first name cannot be blank"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[validate(email)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_status: Option<MembershipStatus>,
}

impl Entity for Member {
    const COLLECTION: &'static str = "members";
    type Patch = MemberPatch;
}

pub type MemberService = super::EntityService<Member>;
