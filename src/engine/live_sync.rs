use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::geo::{self, DEFAULT_AVERAGE_SPEED_KMH};
use crate::models::location::GeoPoint;
use crate::models::presence::{OPERATOR_PRESENCE, OperatorPresence};
use crate::models::ride::RideRequest;
use crate::observability::metrics::{GaugeGuard, Metrics};
use crate::store::DocumentStore;
use crate::store::subscription::{ListenerHandle, listen};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveEstimate {
    pub distance_m: f64,
    pub eta_minutes: u32,
}

impl LiveEstimate {
    pub fn eta_text(&self) -> String {
        geo::format_eta(self.eta_minutes)
    }
}

struct Tracked {
    operator_id: String,
    handle: ListenerHandle,
}

/// Rider-side mirror of the assigned operator's live location.
pub struct RiderLiveSync {
    store: Arc<dyn DocumentStore>,
    metrics: Metrics,
    average_speed_kmh: f64,
    operator_tx: Arc<watch::Sender<Option<GeoPoint>>>,
    rider_location: Option<GeoPoint>,
    tracked: Option<Tracked>,
}

impl RiderLiveSync {
    pub fn new(store: Arc<dyn DocumentStore>, metrics: Metrics) -> Self {
        let (operator_tx, _unused_rx) = watch::channel(None);

        Self {
            store,
            metrics,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            operator_tx: Arc::new(operator_tx),
            rider_location: None,
            tracked: None,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, metrics: Metrics, config: &Config) -> Self {
        Self::new(store, metrics).with_average_speed(config.average_speed_kmh)
    }

    pub fn with_average_speed(mut self, average_speed_kmh: f64) -> Self {
        self.average_speed_kmh = average_speed_kmh;
        self
    }

    /// Follows `operator_id`'s presence. `None` stops tracking and clears the
    /// location; a different id replaces the current subscription.
    pub async fn track(&mut self, operator_id: Option<&str>) -> Result<(), AppError> {
        let operator_id = operator_id.map(str::trim).filter(|id| !id.is_empty());

        if let (Some(tracked), Some(operator_id)) = (&self.tracked, operator_id) {
            if tracked.operator_id == operator_id && tracked.handle.is_active() {
                return Ok(());
            }
        }
        self.stop();

        let Some(operator_id) = operator_id else {
            return Ok(());
        };

        let subscription = self
            .store
            .subscribe_document(OPERATOR_PRESENCE, operator_id)
            .await?;

        let operator_tx = self.operator_tx.clone();
        let live = GaugeGuard::new(&self.metrics.active_subscriptions);
        let id = operator_id.to_string();

        let handle = listen(subscription, move |event| {
            let _live = &live;

            match event {
                Ok(Some(doc)) => match OperatorPresence::from_document(&id, &doc) {
                    Ok(OperatorPresence {
                        location: Some(location),
                        ..
                    }) => {
                        operator_tx.send_replace(Some(location));
                    }
                    Ok(_) => {}
                    Err(err) => warn!(operator_id = %id, error = %err, "undecodable operator presence"),
                },
                Ok(None) => debug!(operator_id = %id, "operator presence not published yet"),
                Err(err) => {
                    warn!(operator_id = %id, error = %err, "operator presence subscription error");
                    operator_tx.send_replace(None);
                }
            }
        });

        debug!(operator_id, "tracking operator presence");
        self.tracked = Some(Tracked {
            operator_id: operator_id.to_string(),
            handle,
        });

        Ok(())
    }

    /// Tracks the operator of `request` while it is claimed and not finished.
    pub async fn follow(&mut self, request: Option<&RideRequest>) -> Result<(), AppError> {
        let operator_id = request
            .filter(|r| r.status.has_operator() && !r.status.is_terminal())
            .and_then(|r| r.operator_id.as_deref());
        self.track(operator_id).await
    }

    /// Stops tracking and clears the operator location. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(tracked) = self.tracked.take() {
            tracked.handle.cancel();
            debug!(operator_id = %tracked.operator_id, "stopped tracking operator presence");
        }
        self.operator_tx.send_replace(None);
    }

    pub fn set_rider_location(&mut self, location: Option<GeoPoint>) {
        self.rider_location = location;
    }

    pub fn rider_location(&self) -> Option<GeoPoint> {
        self.rider_location
    }

    pub fn operator_location(&self) -> Option<GeoPoint> {
        *self.operator_tx.borrow()
    }

    pub fn updates(&self) -> watch::Receiver<Option<GeoPoint>> {
        self.operator_tx.subscribe()
    }

    /// Straight-line distance and ETA, once both ends are known.
    pub fn estimate(&self) -> Option<LiveEstimate> {
        let rider = self.rider_location?;
        let operator = self.operator_location()?;
        let distance_m = geo::haversine_m(&operator, &rider);

        Some(LiveEstimate {
            distance_m,
            eta_minutes: geo::eta_minutes(distance_m, self.average_speed_kmh),
        })
    }
}

impl Drop for RiderLiveSync {
    fn drop(&mut self) {
        if let Some(tracked) = self.tracked.take() {
            tracked.handle.cancel();
        }
    }
}
