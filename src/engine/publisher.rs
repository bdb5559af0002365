use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::location::acquirer::{LocationAcquirer, WatchHandle};
use crate::location::provider::{Backend, WatchOptions};
use crate::models::location::{GeoPoint, LocationFix};
use crate::models::presence::OPERATOR_PRESENCE;
use crate::observability::metrics::Metrics;
use crate::store::{DocumentStore, Fields};

struct Publishing {
    operator_id: String,
    watch: WatchHandle,
    writer: JoinHandle<()>,
}

/// Keeps an operator's presence record current while enabled.
pub struct OperatorPublisher {
    acquirer: LocationAcquirer,
    store: Arc<dyn DocumentStore>,
    metrics: Metrics,
    options: WatchOptions,
    prefer_alternate_backend: bool,
    last_tx: Arc<watch::Sender<Option<GeoPoint>>>,
    active: Option<Publishing>,
}

impl OperatorPublisher {
    pub fn new(
        acquirer: LocationAcquirer,
        store: Arc<dyn DocumentStore>,
        metrics: Metrics,
        options: WatchOptions,
    ) -> Self {
        let (last_tx, _unused_rx) = watch::channel(None);

        Self {
            acquirer,
            store,
            metrics,
            options,
            prefer_alternate_backend: true,
            last_tx: Arc::new(last_tx),
            active: None,
        }
    }

    pub fn from_config(
        acquirer: LocationAcquirer,
        store: Arc<dyn DocumentStore>,
        metrics: Metrics,
        config: &Config,
    ) -> Self {
        Self::new(acquirer, store, metrics, config.watch_options())
    }

    /// Watch on the platform's default backend even when an alternate exists.
    pub fn with_default_backend(mut self) -> Self {
        self.prefer_alternate_backend = false;
        self
    }

    /// Publishes only while `enabled` and an operator identity is present.
    pub async fn set_enabled(
        &mut self,
        operator_id: Option<&str>,
        enabled: bool,
    ) -> Result<(), AppError> {
        match operator_id.filter(|id| !id.trim().is_empty()) {
            Some(operator_id) if enabled => self.start(operator_id).await,
            _ => {
                self.stop();
                Ok(())
            }
        }
    }

    pub async fn start(&mut self, operator_id: &str) -> Result<(), AppError> {
        if let Some(active) = &self.active {
            if active.operator_id == operator_id && active.watch.is_active() {
                return Ok(());
            }
        }
        self.stop();

        let mut options = self.options.clone();
        if self.prefer_alternate_backend && self.acquirer.has_alternate_backend() {
            options.backend = Backend::Alternate;
        }

        let (fix_tx, fix_rx) = mpsc::unbounded_channel::<LocationFix>();
        let error_operator = operator_id.to_string();

        let watch = self
            .acquirer
            .watch(
                options,
                move |fix| {
                    let _ = fix_tx.send(fix);
                },
                move |err| {
                    warn!(operator_id = %error_operator, error = %err, "location tracking error");
                },
            )
            .await?;

        let writer = tokio::spawn(publish_loop(
            self.store.clone(),
            self.metrics.clone(),
            self.last_tx.clone(),
            operator_id.to_string(),
            fix_rx,
        ));

        info!(operator_id, "operator location publishing started");
        self.active = Some(Publishing {
            operator_id: operator_id.to_string(),
            watch,
            writer,
        });

        Ok(())
    }

    /// Stops the watch and the writer. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.watch.cancel();
            active.writer.abort();
            info!(operator_id = %active.operator_id, "operator location publishing stopped");
        }
    }

    pub fn is_publishing(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.watch.is_active())
    }

    /// Most recent fix handed to the store.
    pub fn last_location(&self) -> Option<GeoPoint> {
        *self.last_tx.borrow()
    }

    pub fn updates(&self) -> watch::Receiver<Option<GeoPoint>> {
        self.last_tx.subscribe()
    }
}

impl Drop for OperatorPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn publish_loop(
    store: Arc<dyn DocumentStore>,
    metrics: Metrics,
    last_tx: Arc<watch::Sender<Option<GeoPoint>>>,
    operator_id: String,
    mut fix_rx: mpsc::UnboundedReceiver<LocationFix>,
) {
    while let Some(fix) = fix_rx.recv().await {
        let point = fix.point();
        last_tx.send_replace(Some(point));

        match publish(store.as_ref(), &operator_id, point).await {
            Ok(()) => {
                metrics
                    .presence_publishes_total
                    .with_label_values(&["success"])
                    .inc();
                debug!(
                    operator_id = %operator_id,
                    latitude = point.latitude,
                    longitude = point.longitude,
                    "operator presence published"
                );
            }
            Err(err) => {
                metrics
                    .presence_publishes_total
                    .with_label_values(&["error"])
                    .inc();
                warn!(operator_id = %operator_id, error = %err, "failed to publish operator presence");
            }
        }
    }
}

/// Merge-writes the presence record; other fields on it are left alone.
async fn publish(
    store: &dyn DocumentStore,
    operator_id: &str,
    point: GeoPoint,
) -> Result<(), AppError> {
    let fields = Fields::new()
        .set("available", true)
        .set_serialized("location", &point)?
        .server_timestamp("updatedAt");

    store.merge(OPERATOR_PRESENCE, operator_id, fields).await?;
    Ok(())
}
