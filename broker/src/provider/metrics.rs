use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus gauges and histograms of the provider store.
pub struct Metrics {
    registry: Registry,
    tasks_completed: HistogramVec,
    connected_providers: IntGauge,
    connected_workers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tasks_completed = HistogramVec::new(
            HistogramOpts::new(
                "wasimoff_completed_tasks",
                "Completed tasks with their status and offloading target.",
            ),
            &["status", "target"],
        )
        .expect("histogram definition");
        registry
            .register(Box::new(tasks_completed.clone()))
            .expect("register histogram");

        let connected_providers = IntGauge::with_opts(Opts::new(
            "wasimoff_conn_providers",
            "Currently connected providers.",
        ))
        .expect("gauge definition");
        registry
            .register(Box::new(connected_providers.clone()))
            .expect("register gauge");

        let connected_workers = IntGauge::with_opts(Opts::new(
            "wasimoff_conn_providers_workers",
            "Sum of worker slots across currently connected providers.",
        ))
        .expect("gauge definition");
        registry
            .register(Box::new(connected_workers.clone()))
            .expect("register gauge");

        Self { registry, tasks_completed, connected_providers, connected_workers }
    }

    pub fn observe_task(&self, ok: bool, cloud: bool, duration: Duration) {
        let status = if ok { "ok" } else { "err" };
        let target = if cloud { "cloud" } else { "provider" };
        self.tasks_completed
            .with_label_values(&[status, target])
            .observe(duration.as_secs_f64());
    }

    pub fn set_connected(&self, providers: i64, workers: i64) {
        self.connected_providers.set(providers);
        self.connected_workers.set(workers);
    }

    /// Render the text exposition format for the `/metrics` route.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
