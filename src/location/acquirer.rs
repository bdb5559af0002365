use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LocationError;
use crate::geo::haversine_m;
use crate::location::provider::{PositionProvider, ProviderError, WatchOptions};
use crate::location::strategy::{self, AcquireOptions, FixStrategy};
use crate::models::location::{GeoPoint, LocationFix};
use crate::observability::metrics::Metrics;
use crate::store::subscription::ListenerHandle;

pub type WatchHandle = ListenerHandle;

/// Obtains position fixes from a [`PositionProvider`].
#[derive(Clone)]
pub struct LocationAcquirer {
    provider: Arc<dyn PositionProvider>,
    metrics: Metrics,
    defaults: AcquireOptions,
}

impl LocationAcquirer {
    pub fn new(provider: Arc<dyn PositionProvider>, metrics: Metrics) -> Self {
        Self {
            provider,
            metrics,
            defaults: AcquireOptions::default(),
        }
    }

    pub fn from_config(
        provider: Arc<dyn PositionProvider>,
        metrics: Metrics,
        config: &Config,
    ) -> Self {
        Self {
            defaults: config.acquire_options(),
            ..Self::new(provider, metrics)
        }
    }

    pub fn has_alternate_backend(&self) -> bool {
        self.provider.has_alternate_backend()
    }

    async fn ensure_permission(&self) -> Result<(), LocationError> {
        let status = self.provider.request_permission().await;
        if status.allows_location() {
            Ok(())
        } else {
            warn!("location permission denied");
            Err(LocationError::PermissionDenied)
        }
    }

    /// [`Self::acquire`] with the options this acquirer was built with.
    pub async fn current_fix(&self) -> Result<LocationFix, LocationError> {
        self.acquire(&self.defaults).await
    }

    /// Single best-effort fix. Strategies from [`strategy::plan`] run in order;
    /// the first success wins, otherwise the last failure is reported.
    pub async fn acquire(&self, options: &AcquireOptions) -> Result<LocationFix, LocationError> {
        self.ensure_permission().await?;

        let strategies = strategy::plan(options, self.provider.has_alternate_backend());
        let mut last_error = None;

        for strategy in &strategies {
            match self.attempt(strategy).await {
                Ok(fix) => {
                    self.metrics
                        .fix_attempts_total
                        .with_label_values(&[strategy.tier.as_str(), "success"])
                        .inc();
                    info!(
                        tier = strategy.tier.as_str(),
                        latitude = fix.latitude,
                        longitude = fix.longitude,
                        "location fix acquired"
                    );
                    return Ok(fix);
                }
                Err(err) => {
                    self.metrics
                        .fix_attempts_total
                        .with_label_values(&[strategy.tier.as_str(), "error"])
                        .inc();
                    warn!(tier = strategy.tier.as_str(), error = %err.message, "location fix attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .map(LocationError::from)
            .unwrap_or(LocationError::Unavailable))
    }

    async fn attempt(&self, strategy: &FixStrategy) -> Result<LocationFix, ProviderError> {
        let request = &strategy.request;
        let started = Utc::now();
        let fix = match timeout(request.timeout, self.provider.current_position(request)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Err(ProviderError::timeout()),
        };

        if strategy.reject_stale {
            let oldest_allowed = chrono::Duration::from_std(request.max_age)
                .ok()
                .and_then(|max_age| started.checked_sub_signed(max_age));
            if oldest_allowed.is_some_and(|oldest| fix.captured_at < oldest) {
                let age = fix.age(started).to_std().unwrap_or_default();
                return Err(ProviderError::unavailable(format!(
                    "cached fix is {}ms old",
                    age.as_millis()
                )));
            }
        }

        Ok(fix)
    }

    /// Continuous fixes. `on_fix` sees the first fix and then only fixes that
    /// moved at least `distance_filter_m` and arrived no sooner than
    /// `fastest_interval` after the last delivered one.
    pub async fn watch<F, E>(
        &self,
        options: WatchOptions,
        mut on_fix: F,
        mut on_error: E,
    ) -> Result<WatchHandle, LocationError>
    where
        F: FnMut(LocationFix) + Send + 'static,
        E: FnMut(LocationError) + Send + 'static,
    {
        if let Err(err) = self.ensure_permission().await {
            on_error(err.clone());
            return Err(err);
        }

        let mut feed = match self.provider.watch_position(&options).await {
            Ok(feed) => feed,
            Err(err) => {
                let err = LocationError::from(err);
                on_error(err.clone());
                return Err(err);
            }
        };

        debug!(
            distance_filter_m = options.distance_filter_m,
            interval_ms = options.interval.as_millis() as u64,
            "position watch started"
        );

        Ok(ListenerHandle::spawn(move |active| async move {
            let mut last_delivered: Option<(GeoPoint, Instant)> = None;

            while let Some(event) = feed.recv().await {
                let delivered = match event {
                    Ok(fix) => {
                        if let Some((point, at)) = &last_delivered {
                            if at.elapsed() < options.fastest_interval {
                                continue;
                            }
                            if haversine_m(point, &fix.point()) < options.distance_filter_m {
                                continue;
                            }
                        }
                        last_delivered = Some((fix.point(), Instant::now()));
                        active.run(|| on_fix(fix))
                    }
                    Err(err) => active.run(|| on_error(LocationError::from(err))),
                };

                if delivered.is_none() {
                    break;
                }
            }

            debug!("position watch ended");
        }))
    }
}
