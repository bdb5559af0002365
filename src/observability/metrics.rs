use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ride_transitions_total: IntCounterVec,
    pub fix_attempts_total: IntCounterVec,
    pub presence_publishes_total: IntCounterVec,
    pub active_subscriptions: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ride_transitions_total = IntCounterVec::new(
            Opts::new("ride_transitions_total", "Ride request status writes by target status"),
            &["status"],
        )
        .expect("valid ride_transitions_total metric");

        let fix_attempts_total = IntCounterVec::new(
            Opts::new("fix_attempts_total", "Location fix attempts by tier and outcome"),
            &["tier", "outcome"],
        )
        .expect("valid fix_attempts_total metric");

        let presence_publishes_total = IntCounterVec::new(
            Opts::new("presence_publishes_total", "Operator presence writes by outcome"),
            &["outcome"],
        )
        .expect("valid presence_publishes_total metric");

        let active_subscriptions = IntGauge::new(
            "active_subscriptions",
            "Live store subscriptions held by coordinators and live sync",
        )
        .expect("valid active_subscriptions metric");

        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(fix_attempts_total.clone()))
            .expect("register fix_attempts_total");
        registry
            .register(Box::new(presence_publishes_total.clone()))
            .expect("register presence_publishes_total");
        registry
            .register(Box::new(active_subscriptions.clone()))
            .expect("register active_subscriptions");

        Self {
            registry,
            ride_transitions_total,
            fix_attempts_total,
            presence_publishes_total,
            active_subscriptions,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

/// Holds one unit of a gauge for as long as it lives.
pub struct GaugeGuard(IntGauge);

impl GaugeGuard {
    pub fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}
