use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::geo::format_coordinate;
use crate::models::user::UserProfile;
use crate::store::Document;

pub const RIDE_REQUESTS: &str = "rideRequests";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    OnWay,
    Arrived,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 6] = [
        RideStatus::Pending,
        RideStatus::Accepted,
        RideStatus::OnWay,
        RideStatus::Arrived,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::OnWay => "on_way",
            RideStatus::Arrived => "arrived",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// Still waiting for, or moving towards, a pickup.
    pub fn is_active(self) -> bool {
        match self {
            RideStatus::Pending | RideStatus::Accepted | RideStatus::OnWay => true,
            RideStatus::Arrived | RideStatus::Completed | RideStatus::Cancelled => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            RideStatus::Completed | RideStatus::Cancelled => true,
            RideStatus::Pending | RideStatus::Accepted | RideStatus::OnWay | RideStatus::Arrived => {
                false
            }
        }
    }

    /// Statuses in which an operator has claimed the request.
    pub fn has_operator(self) -> bool {
        match self {
            RideStatus::Accepted | RideStatus::OnWay | RideStatus::Arrived | RideStatus::Completed => {
                true
            }
            RideStatus::Pending | RideStatus::Cancelled => false,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            RideStatus::Pending => "Looking for available cart...",
            RideStatus::Accepted => "Cart assigned! Getting ready...",
            RideStatus::OnWay => "Your cart is on the way!",
            RideStatus::Arrived => "Your cart has arrived!",
            RideStatus::Completed => "Ride completed. Thank you!",
            RideStatus::Cancelled => "Ride was cancelled.",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display fields snapshotted from a profile. Empty values are never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl ContactInfo {
    pub fn new(display_name: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            display_name: non_empty(display_name),
            phone_number: non_empty(phone_number),
        }
    }

    pub fn from_profile(profile: &UserProfile) -> Self {
        Self::new(
            profile.display_name.as_deref(),
            profile.phone_number.as_deref(),
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickupLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl PickupLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = non_empty(Some(&address.into()));
        self
    }

    pub fn display_text(&self) -> String {
        match &self.address {
            Some(address) => address.clone(),
            None => format!(
                "{}, {}",
                format_coordinate(self.latitude),
                format_coordinate(self.longitude)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RideRequest {
    pub id: String,
    pub rider_id: String,
    pub rider_info: ContactInfo,
    pub location: PickupLocation,
    pub status: RideStatus,
    pub operator_id: Option<String>,
    pub operator_info: Option<ContactInfo>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Wire shape of a `rideRequests` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredRideRequest {
    pub rider_id: String,
    #[serde(default)]
    pub rider_info: ContactInfo,
    pub location: PickupLocation,
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_info: Option<ContactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RideRequest {
    /// Decodes a stored document. Only `requestedAt` falls back to now when missing.
    pub fn from_document(id: &str, doc: &Document) -> Result<Self, StoreError> {
        let stored: StoredRideRequest = serde_json::from_value(doc.clone().into())
            .map_err(|err| StoreError::Decode(format!("ride request {id}: {err}")))?;

        Ok(Self {
            id: id.to_string(),
            rider_id: stored.rider_id,
            rider_info: stored.rider_info,
            location: stored.location,
            status: stored.status,
            operator_id: stored.operator_id,
            operator_info: stored.operator_info,
            requested_at: stored.requested_at.unwrap_or_else(Utc::now),
            accepted_at: stored.accepted_at,
            completed_at: stored.completed_at,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn status_message(&self) -> &'static str {
        self.status.message()
    }
}
