use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub notifications_total: IntCounterVec,
    pub reminder_sweeps_total: IntCounterVec,
    pub pending_alarms: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Driver assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of driver matching and assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Push delivery attempts by status"),
            &["status"],
        )
        .expect("valid notifications_total metric");

        let reminder_sweeps_total = IntCounterVec::new(
            Opts::new("reminder_sweeps_total", "Reminder sweeps by outcome"),
            &["outcome"],
        )
        .expect("valid reminder_sweeps_total metric");

        let pending_alarms = IntGauge::new(
            "pending_alarms",
            "Assignment alarms awaiting acknowledgement at the last sweep",
        )
        .expect("valid pending_alarms metric");

        let collectors: [Box<dyn Collector>; 5] = [
            Box::new(assignments_total.clone()),
            Box::new(assignment_latency_seconds.clone()),
            Box::new(notifications_total.clone()),
            Box::new(reminder_sweeps_total.clone()),
            Box::new(pending_alarms.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("dispatch metric names are unique");
        }

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            notifications_total,
            reminder_sweeps_total,
            pending_alarms,
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
