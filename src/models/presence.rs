use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::location::GeoPoint;
use crate::store::Document;

pub const OPERATOR_PRESENCE: &str = "operatorPresence";

/// Last known location of an operator. Overwritten on every publish, no history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorPresence {
    #[serde(skip)]
    pub operator_id: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OperatorPresence {
    pub fn from_document(operator_id: &str, doc: &Document) -> Result<Self, StoreError> {
        let mut presence: OperatorPresence = serde_json::from_value(doc.clone().into())
            .map_err(|err| StoreError::Decode(format!("presence {operator_id}: {err}")))?;
        presence.operator_id = operator_id.to_string();
        Ok(presence)
    }
}
