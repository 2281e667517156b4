use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the process-wide `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE
        .get_or_init(|| async {
            info!("Initializing Metrics ...");
            Metrics::new()
        })
        .await
}

/// Text exposition of every registered metric.
pub async fn gather_metrics() -> anyhow::Result<String> {
    let metrics = get_metrics().await;
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metrics.registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Decorator
    pub sends: IntCounterVec,
    pub retries: IntCounterVec,

    // Renewal
    pub renewals: IntCounterVec,
    pub renewal_joins: IntCounter,

    // Token endpoint
    pub token_fetch_requests: IntCounter,
    pub token_fetch_failures: IntCounter,
    pub token_fetch_duration: Histogram,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("tokenrenew".into()), None)
            .expect("static registry prefix is valid");

        let metrics = Arc::new(Self {
            sends: IntCounterVec::new(Opts::new("sends_total", "Authenticated sends by outcome"), &["outcome"])
                .expect("sends_total definition"),
            retries: IntCounterVec::new(Opts::new("retries_total", "Retried requests by final status"), &["status"])
                .expect("retries_total definition"),

            renewals: IntCounterVec::new(Opts::new("renewals_total", "Token renewal rounds by outcome"), &["outcome"])
                .expect("renewals_total definition"),
            renewal_joins: IntCounter::new("renewal_joins_total", "Callers that joined an in-flight renewal")
                .expect("renewal_joins_total definition"),

            token_fetch_requests: IntCounter::new("token_fetch_requests_total", "Client-credentials grants sent")
                .expect("token_fetch_requests_total definition"),
            token_fetch_failures: IntCounter::new("token_fetch_failures_total", "Client-credentials grants that failed")
                .expect("token_fetch_failures_total definition"),
            token_fetch_duration: Histogram::with_opts(
                HistogramOpts::new("token_fetch_duration_seconds", "Token fetch duration seconds")
                    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            )
            .expect("token_fetch_duration_seconds definition"),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.sends.clone()),
            Box::new(metrics.retries.clone()),
            Box::new(metrics.renewals.clone()),
            Box::new(metrics.renewal_joins.clone()),
            Box::new(metrics.token_fetch_requests.clone()),
            Box::new(metrics.token_fetch_failures.clone()),
            Box::new(metrics.token_fetch_duration.clone()),
        ];
        for collector in collectors {
            reg.register(collector).expect("metric registered once");
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exposition_carries_prefixed_names() {
        get_metrics().await.renewal_joins.inc();
        let text = gather_metrics().await.unwrap();
        assert!(text.contains("tokenrenew_renewal_joins_total"));
    }
}
