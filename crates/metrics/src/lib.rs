use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use anyhow::Result;
use opentelemetry::{
    metrics::Histogram,
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};

const DEFAULT_METRICS_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enable_metrics: bool,
    /// OTLP collector endpoint. The exporter default is used when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(
        default = "default_metrics_interval",
        rename = "metrics_interval_secs",
        with = "beacon_utils::duration_serde::secs"
    )]
    pub metrics_interval: Duration,
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS)
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            endpoint: None,
            metrics_interval: default_metrics_interval(),
        }
    }
}

/// Installs the global meter provider with an OTLP exporter. Without
/// `enable_metrics` the no-op global provider stays in place and every
/// instrument below records into nothing.
pub fn init_provider(config: &TelemetryConfig, env: &str) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "beacon"))
        .with_attribute(KeyValue::new("service.name", "beacon-watch"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .with_attribute(KeyValue::new("deployment.environment", env.to_string()))
        .build();

    let mut exporter_builder = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = &config.endpoint {
        exporter_builder = exporter_builder.with_endpoint(endpoint.clone());
    }
    let exporter = exporter_builder.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider);

    tracing::info!(
        endpoint = ?config.endpoint,
        interval_secs = config.metrics_interval.as_secs(),
        "Metrics provider initialized"
    );

    Ok(())
}

pin_project! {
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct TimedFuture<F, C>
    where
        F: Future,
        C: FnOnce(Duration),
    {
        #[pin]
        inner: F,
        start: Instant,
        callback: Option<C>,
    }
}

impl<F, C> TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    pub fn new(inner: F, callback: C) -> Self {
        Self {
            inner,
            callback: Some(callback),
            start: Instant::now(),
        }
    }
}

impl<F, C> Future for TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let poll_result = this.inner.poll(cx);

        if poll_result.is_ready() {
            let elapsed = this.start.elapsed();
            if let Some(callback) = this.callback.take() {
                callback(elapsed);
            }
        }

        poll_result
    }
}

/// Wraps `future` so that `callback` receives its wall-clock duration once
/// it resolves. A future dropped before completion reports nothing.
pub fn create_timed_future<F, C>(future: F, callback: C) -> TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    TimedFuture::new(future, callback)
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: Vec<KeyValue>,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, Vec::new())
    }

    pub fn start_with_labels(metric: &'a T, labels: Vec<KeyValue>) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<T: TimerUpdate + Sync> Drop for Timer<'_, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), &self.labels);
    }
}

pub mod tracker_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub fetches: Counter<u64>,
        pub fetch_errors: Counter<u64>,
        pub fetch_latency: Histogram<f64>,
        pub stale_responses: Counter<u64>,
        pub push_frames_accepted: Counter<u64>,
        pub push_frames_ignored: Counter<u64>,
        pub push_frames_collapsed: Counter<u64>,
        pub adoptions: Counter<u64>,
        pub retention_expiries: Counter<u64>,
        pub purges: Counter<u64>,
        pub retries_submitted: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("beacon-tracker");
            Metrics {
                fetches: meter
                    .u64_counter("beacon.tracker.fetches")
                    .with_description("job fetches issued, labeled by trigger")
                    .build(),
                fetch_errors: meter
                    .u64_counter("beacon.tracker.fetch_errors")
                    .with_description("job fetches that failed, labeled by error kind")
                    .build(),
                fetch_latency: meter
                    .f64_histogram("beacon.tracker.fetch_latency")
                    .with_unit("s")
                    .with_description("job fetch round trip")
                    .build(),
                stale_responses: meter
                    .u64_counter("beacon.tracker.stale_responses")
                    .with_description("responses discarded because the job was superseded")
                    .build(),
                push_frames_accepted: meter
                    .u64_counter("beacon.tracker.push_frames_accepted")
                    .with_description("push frames that scheduled a refetch")
                    .build(),
                push_frames_ignored: meter
                    .u64_counter("beacon.tracker.push_frames_ignored")
                    .with_description("push frames for other jobs or irrelevant types")
                    .build(),
                push_frames_collapsed: meter
                    .u64_counter("beacon.tracker.push_frames_collapsed")
                    .with_description("push frames merged into an already scheduled refetch")
                    .build(),
                adoptions: meter
                    .u64_counter("beacon.tracker.adoptions")
                    .with_description("jobs adopted for tracking")
                    .build(),
                retention_expiries: meter
                    .u64_counter("beacon.tracker.retention_expiries")
                    .with_description("completed jobs dismissed after retention")
                    .build(),
                purges: meter
                    .u64_counter("beacon.tracker.purges")
                    .with_description("tracked jobs that disappeared upstream")
                    .build(),
                retries_submitted: meter
                    .u64_counter("beacon.tracker.retries_submitted")
                    .with_description("region-restricted retry jobs submitted")
                    .build(),
            }
        }
    }
}

pub mod analysis_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug, Clone)]
    pub struct Metrics {
        pub analyses: Counter<u64>,
        pub aggregation_latency: Histogram<f64>,
        pub analyses_unavailable: Counter<u64>,
        pub proof_checks: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("beacon-analysis");
            Metrics {
                analyses: meter
                    .u64_counter("beacon.analysis.diffs")
                    .with_description("diff analyses produced, labeled by source")
                    .build(),
                aggregation_latency: meter
                    .f64_histogram("beacon.analysis.aggregation_latency")
                    .with_unit("s")
                    .with_description("time to fetch and build a diff analysis")
                    .build(),
                analyses_unavailable: meter
                    .u64_counter("beacon.analysis.unavailable")
                    .with_description("aggregations with neither live nor synthetic data")
                    .build(),
                proof_checks: meter
                    .u64_counter("beacon.proof.checks")
                    .with_description("transparency proof checks, labeled by status")
                    .build(),
            }
        }
    }
}
