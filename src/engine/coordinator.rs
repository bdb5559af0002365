use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::lifecycle;
use crate::error::{AppError, StoreError};
use crate::models::ride::{
    ContactInfo, PickupLocation, RIDE_REQUESTS, RideRequest, RideStatus, StoredRideRequest,
};
use crate::models::user::{USERS, UserProfile};
use crate::observability::metrics::{GaugeGuard, Metrics};
use crate::store::subscription::{ListenerHandle, listen};
use crate::store::{Direction, DocumentStore, Fields, Precondition, Query};

const RECENT_REQUESTS_LIMIT: usize = 10;

pub type RideUpdateFn = Arc<dyn Fn(Option<RideRequest>) + Send + Sync>;

struct ActiveSubscription {
    request_id: String,
    handle: ListenerHandle,
    on_update: RideUpdateFn,
}

/// Rider-side owner of one ride request and its live subscription.
///
/// Holds at most one subscription: subscribing again tears the previous one
/// down before the new one is established.
pub struct RideRequestCoordinator {
    store: Arc<dyn DocumentStore>,
    metrics: Metrics,
    current_tx: Arc<watch::Sender<Option<RideRequest>>>,
    active: Option<ActiveSubscription>,
}

impl RideRequestCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, metrics: Metrics) -> Self {
        let (current_tx, _unused_rx) = watch::channel(None);

        Self {
            store,
            metrics,
            current_tx: Arc::new(current_tx),
            active: None,
        }
    }

    /// Writes a new `pending` request for `rider_id` and returns its id.
    pub async fn create(
        &self,
        rider_id: Option<&str>,
        location: PickupLocation,
    ) -> Result<String, AppError> {
        let rider_id = rider_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AppError::NotAuthenticated)?;

        let profile = self
            .store
            .get(USERS, rider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))?;
        let profile = UserProfile::from_document(rider_id, &profile)?;

        let request = StoredRideRequest {
            rider_id: rider_id.to_string(),
            rider_info: ContactInfo::from_profile(&profile),
            location,
            status: RideStatus::Pending,
            operator_id: None,
            operator_info: None,
            requested_at: None,
            accepted_at: None,
            completed_at: None,
        };
        let fields = Fields::from_serialize(&request)?.server_timestamp("requestedAt");

        let request_id = self.store.create(RIDE_REQUESTS, fields).await?;

        self.metrics
            .ride_transitions_total
            .with_label_values(&[RideStatus::Pending.as_str()])
            .inc();
        info!(request_id = %request_id, rider_id, "ride request created");

        Ok(request_id)
    }

    /// Creates a request and immediately follows it.
    pub async fn request_ride<F>(
        &mut self,
        rider_id: Option<&str>,
        location: PickupLocation,
        on_update: F,
    ) -> Result<String, AppError>
    where
        F: Fn(Option<RideRequest>) + Send + Sync + 'static,
    {
        let request_id = self.create(rider_id, location).await?;
        self.subscribe(&request_id, on_update).await?;
        Ok(request_id)
    }

    /// Follows `request_id`, replacing any previous subscription.
    ///
    /// `on_update` receives every decoded change; a vanished document, an
    /// undecodable one or a subscription error is delivered as `None`.
    pub async fn subscribe<F>(
        &mut self,
        request_id: &str,
        on_update: F,
    ) -> Result<ListenerHandle, AppError>
    where
        F: Fn(Option<RideRequest>) + Send + Sync + 'static,
    {
        self.unsubscribe();

        let subscription = self
            .store
            .subscribe_document(RIDE_REQUESTS, request_id)
            .await?;

        let on_update: RideUpdateFn = Arc::new(on_update);
        let callback = on_update.clone();
        let current_tx = self.current_tx.clone();
        let live = GaugeGuard::new(&self.metrics.active_subscriptions);
        let id = request_id.to_string();

        let handle = listen(subscription, move |event| {
            let _live = &live;

            let update = match event {
                Ok(Some(doc)) => match RideRequest::from_document(&id, &doc) {
                    Ok(request) => Some(request),
                    Err(err) => {
                        warn!(request_id = %id, error = %err, "undecodable ride request");
                        None
                    }
                },
                Ok(None) => {
                    info!(request_id = %id, "ride request no longer exists");
                    None
                }
                Err(err) => {
                    warn!(request_id = %id, error = %err, "ride request subscription error");
                    None
                }
            };

            let previous = current_tx.send_replace(update.clone());
            if let Some(request) = &update {
                let changed = previous.as_ref().map(|p| p.status) != Some(request.status);
                if changed {
                    info!(request_id = %id, status = %request.status, "ride status observed");
                }
            }

            callback(update);
        });

        debug!(request_id, "ride request subscription started");
        self.active = Some(ActiveSubscription {
            request_id: request_id.to_string(),
            handle: handle.clone(),
            on_update,
        });

        Ok(handle)
    }

    /// Stops the active subscription, if any, and forgets the request it was
    /// following. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        self.close_active();
        self.current_tx.send_replace(None);
    }

    /// Cancels the listener and waits out a callback already in progress.
    fn close_active(&mut self) -> Option<ActiveSubscription> {
        let active = self.active.take()?;
        if active.handle.cancel() {
            debug!(request_id = %active.request_id, "ride request subscription closed");
        }
        Some(active)
    }

    /// Cancels the held request while it is still `pending`.
    ///
    /// Anything else is a silent no-op: a request this coordinator is not
    /// subscribed to, a ride past `pending`, or losing a race against an
    /// operator's acceptance.
    pub async fn cancel(&mut self, request_id: &str) -> Result<(), AppError> {
        if !self
            .active
            .as_ref()
            .is_some_and(|active| active.request_id == request_id)
        {
            debug!(request_id, "cancel ignored; request is not held");
            return Ok(());
        }

        let current = match self.current_request().filter(|r| r.id == request_id) {
            Some(current) => current,
            None => match self.fetch(request_id).await? {
                Some(current) => current,
                None => {
                    debug!(request_id, "cancel ignored; request no longer exists");
                    return Ok(());
                }
            },
        };

        if lifecycle::transition(current.status, RideStatus::Cancelled).is_err() {
            info!(request_id, status = %current.status, "cancel ignored; ride is no longer pending");
            return Ok(());
        }

        let result = self
            .store
            .update(
                RIDE_REQUESTS,
                request_id,
                Fields::new().set("status", RideStatus::Cancelled.as_str()),
                Some(Precondition::field_equals(
                    "status",
                    RideStatus::Pending.as_str(),
                )),
            )
            .await;

        match result {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed(reason)) => {
                info!(request_id, reason = %reason, "cancel ignored; ride changed concurrently");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.metrics
            .ride_transitions_total
            .with_label_values(&[RideStatus::Cancelled.as_str()])
            .inc();
        info!(request_id, "ride request cancelled");

        let closed = self.close_active();

        // The listener may already have delivered the store's own change.
        let delivered = self
            .current_tx
            .borrow()
            .as_ref()
            .is_some_and(|r| r.id == request_id && r.status == RideStatus::Cancelled);
        if delivered {
            return Ok(());
        }

        let mut cancelled = current;
        cancelled.status = RideStatus::Cancelled;
        self.current_tx.send_replace(Some(cancelled.clone()));
        if let Some(closed) = closed {
            (closed.on_update)(Some(cancelled));
        }

        Ok(())
    }

    pub async fn fetch(&self, request_id: &str) -> Result<Option<RideRequest>, AppError> {
        let doc = self.store.get(RIDE_REQUESTS, request_id).await?;
        doc.map(|doc| RideRequest::from_document(request_id, &doc).map_err(AppError::from))
            .transpose()
    }

    /// The rider's latest requests, newest first.
    pub async fn recent_requests(&self, rider_id: &str) -> Result<Vec<RideRequest>, AppError> {
        let query = Query::new()
            .where_eq("riderId", rider_id)
            .order_by("requestedAt", Direction::Descending)
            .limit(RECENT_REQUESTS_LIMIT);

        self.store
            .query(RIDE_REQUESTS, &query)
            .await?
            .iter()
            .map(|snapshot| {
                RideRequest::from_document(&snapshot.id, &snapshot.data).map_err(AppError::from)
            })
            .collect()
    }

    pub fn current_request(&self) -> Option<RideRequest> {
        self.current_tx.borrow().clone()
    }

    /// Watch channel mirroring [`Self::current_request`].
    pub fn updates(&self) -> watch::Receiver<Option<RideRequest>> {
        self.current_tx.subscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.handle.is_active())
    }

    pub fn has_active_request(&self) -> bool {
        self.current_tx
            .borrow()
            .as_ref()
            .is_some_and(RideRequest::is_active)
    }

    /// Empty when no request is held.
    pub fn status_message(&self) -> &'static str {
        self.current_tx
            .borrow()
            .as_ref()
            .map(RideRequest::status_message)
            .unwrap_or("")
    }
}

impl Drop for RideRequestCoordinator {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
