use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single position reading. Never merged with other fixes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn at(point: GeoPoint, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: None,
            altitude: None,
            heading: None,
            speed: None,
            captured_at,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.captured_at
    }
}
