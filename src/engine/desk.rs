use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::lifecycle::{self, Actor};
use crate::error::{AppError, StoreError};
use crate::models::ride::{ContactInfo, RIDE_REQUESTS, RideRequest, RideStatus};
use crate::models::user::UserProfile;
use crate::observability::metrics::Metrics;
use crate::store::subscription::{ListenerHandle, listen};
use crate::store::{Direction, DocumentStore, Fields, Precondition, Query, Snapshot};

/// Operator-side view of the ride queue: claim pending requests and drive
/// claimed ones to completion.
pub struct OperatorDesk {
    store: Arc<dyn DocumentStore>,
    metrics: Metrics,
    operator_id: String,
    operator_info: ContactInfo,
}

impl OperatorDesk {
    pub fn new(store: Arc<dyn DocumentStore>, metrics: Metrics, operator: &UserProfile) -> Self {
        Self {
            store,
            metrics,
            operator_id: operator.uid.clone(),
            operator_info: ContactInfo::from_profile(operator),
        }
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    /// Claims a `pending` request. The first operator to apply the write wins;
    /// everyone else gets `PreconditionFailed`.
    pub async fn accept(&self, request_id: &str) -> Result<(), AppError> {
        let transition = lifecycle::transition(RideStatus::Pending, RideStatus::Accepted)?;

        let mut fields = Fields::new()
            .set("status", RideStatus::Accepted.as_str())
            .set("operatorId", self.operator_id.as_str())
            .set_serialized("operatorInfo", &self.operator_info)?;
        if let Some(stamp) = transition.stamp {
            fields = fields.server_timestamp(stamp.field());
        }

        let result = self
            .store
            .update(
                RIDE_REQUESTS,
                request_id,
                fields,
                Some(Precondition::field_equals(
                    "status",
                    RideStatus::Pending.as_str(),
                )),
            )
            .await;

        match result {
            Ok(()) => {
                self.metrics
                    .ride_transitions_total
                    .with_label_values(&[RideStatus::Accepted.as_str()])
                    .inc();
                info!(request_id, operator_id = %self.operator_id, "ride request accepted");
                Ok(())
            }
            Err(StoreError::PreconditionFailed(reason)) => {
                info!(
                    request_id,
                    operator_id = %self.operator_id,
                    reason = %reason,
                    "ride request already taken"
                );
                Err(AppError::PreconditionFailed(reason))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Moves a request this operator holds to `to`.
    pub async fn advance(&self, request_id: &str, to: RideStatus) -> Result<RideStatus, AppError> {
        let doc = self
            .store
            .get(RIDE_REQUESTS, request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ride request {request_id} not found")))?;
        let request = RideRequest::from_document(request_id, &doc)?;

        if request.operator_id.as_deref() != Some(self.operator_id.as_str()) {
            return Err(AppError::PreconditionFailed(format!(
                "ride request {request_id} is not assigned to {}",
                self.operator_id
            )));
        }

        let transition = lifecycle::transition(request.status, to)?;
        if transition.actor != Actor::Operator {
            return Err(AppError::InvalidTransition {
                from: request.status,
                to,
            });
        }

        let mut fields = Fields::new().set("status", to.as_str());
        if let Some(stamp) = transition.stamp {
            fields = fields.server_timestamp(stamp.field());
        }

        let precondition = Precondition::field_equals("status", request.status.as_str())
            .and("operatorId", self.operator_id.as_str());

        self.store
            .update(RIDE_REQUESTS, request_id, fields, Some(precondition))
            .await?;

        self.metrics
            .ride_transitions_total
            .with_label_values(&[to.as_str()])
            .inc();
        info!(
            request_id,
            operator_id = %self.operator_id,
            from = %request.status,
            to = %to,
            "ride request advanced"
        );

        Ok(to)
    }

    /// Live list of unclaimed requests, newest first.
    pub async fn watch_pending<F>(&self, on_change: F) -> Result<ListenerHandle, AppError>
    where
        F: Fn(Vec<RideRequest>) + Send + Sync + 'static,
    {
        let query = Query::new()
            .where_eq("status", RideStatus::Pending.as_str())
            .order_by("requestedAt", Direction::Descending);
        self.watch_query(query, on_change).await
    }

    /// Live list of requests this operator has accepted but not yet started.
    pub async fn watch_assigned<F>(&self, on_change: F) -> Result<ListenerHandle, AppError>
    where
        F: Fn(Vec<RideRequest>) + Send + Sync + 'static,
    {
        let query = Query::new()
            .where_eq("status", RideStatus::Accepted.as_str())
            .where_eq("operatorId", self.operator_id.as_str());
        self.watch_query(query, on_change).await
    }

    async fn watch_query<F>(&self, query: Query, on_change: F) -> Result<ListenerHandle, AppError>
    where
        F: Fn(Vec<RideRequest>) + Send + Sync + 'static,
    {
        let subscription = self.store.subscribe_query(RIDE_REQUESTS, query).await?;
        let operator_id = self.operator_id.clone();

        Ok(listen(subscription, move |event| match event {
            Ok(snapshots) => on_change(decode_all(&snapshots)),
            Err(err) => {
                warn!(operator_id = %operator_id, error = %err, "ride queue subscription error");
                on_change(Vec::new());
            }
        }))
    }
}

fn decode_all(snapshots: &[Snapshot]) -> Vec<RideRequest> {
    snapshots
        .iter()
        .filter_map(
            |snapshot| match RideRequest::from_document(&snapshot.id, &snapshot.data) {
                Ok(request) => Some(request),
                Err(err) => {
                    warn!(request_id = %snapshot.id, error = %err, "skipping undecodable ride request");
                    None
                }
            },
        )
        .collect()
}
