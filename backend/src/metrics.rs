use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

const PREDICTION_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Prometheus collectors for the service, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    enabled: bool,
    registry: Registry,
    request_count: CounterVec,
    request_latency: HistogramVec,
    prediction_requests: CounterVec,
    prediction_latency: Histogram,
}

impl Metrics {
    pub fn new(enabled: bool) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_count = CounterVec::new(
            Opts::new("app_request_count", "Total number of API requests"),
            &["method", "endpoint"],
        )?;
        let request_latency = HistogramVec::new(
            HistogramOpts::new("app_request_latency_seconds", "API request latency in seconds"),
            &["endpoint"],
        )?;
        let prediction_requests = CounterVec::new(
            Opts::new(
                "prediction_requests_total",
                "Total number of prediction requests by status",
            ),
            &["status"],
        )?;
        let prediction_latency = Histogram::with_opts(
            HistogramOpts::new(
                "prediction_request_latency_seconds",
                "Prediction request end-to-end latency in seconds",
            )
            .buckets(PREDICTION_LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(request_count.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(prediction_requests.clone()))?;
        registry.register(Box::new(prediction_latency.clone()))?;

        Ok(Self {
            enabled,
            registry,
            request_count,
            request_latency,
            prediction_requests,
            prediction_latency,
        })
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, seconds: f64) {
        if !self.enabled {
            return;
        }
        self.request_count.with_label_values(&[method, endpoint]).inc();
        self.request_latency.with_label_values(&[endpoint]).observe(seconds);
    }

    pub fn observe_prediction(&self, success: bool, seconds: f64) {
        if !self.enabled {
            return;
        }
        let status = if success { "success" } else { "error" };
        self.prediction_requests.with_label_values(&[status]).inc();
        self.prediction_latency.observe(seconds);
    }

    /// Text exposition format, as scraped by Prometheus.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
