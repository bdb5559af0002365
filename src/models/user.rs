use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::Document;

pub const USERS: &str = "users";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Rider,
    Operator,
}

/// Account profile as stored in `users`. Read-only from this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl UserProfile {
    pub fn from_document(id: &str, doc: &Document) -> Result<Self, StoreError> {
        let mut profile: UserProfile = serde_json::from_value(doc.clone().into())
            .map_err(|err| StoreError::Decode(format!("user {id}: {err}")))?;
        if profile.uid.is_empty() {
            profile.uid = id.to_string();
        }
        Ok(profile)
    }
}
