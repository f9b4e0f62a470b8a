use crate::metrics::Metrics;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Endpoint label for requests no route matched, so unknown paths share one series.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Records per-endpoint request count and latency, and reports the handling
/// time back to the caller in `X-Process-Time`.
#[derive(Clone)]
pub struct RequestTracking {
    metrics: Arc<Metrics>,
}

impl RequestTracking {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestTracking
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestTrackingService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestTrackingService {
            service: Arc::new(service),
            metrics: self.metrics.clone(),
        })
    }
}

pub struct RequestTrackingService<S> {
    service: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<S, B> Service<ServiceRequest> for RequestTrackingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let started = Instant::now();
            let method = req.method().to_string();
            let path = req.path().to_string();

            let mut res = service.call(req).await?;

            let elapsed = started.elapsed().as_secs_f64();
            let endpoint = res
                .request()
                .match_pattern()
                .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());
            metrics.observe_request(&method, &endpoint, elapsed);
            if let Ok(value) = HeaderValue::from_str(&elapsed.to_string()) {
                res.headers_mut()
                    .insert(HeaderName::from_static(PROCESS_TIME_HEADER), value);
            }
            log::debug!("{} {} -> {} in {:.4}s", method, path, res.status(), elapsed);
            Ok(res)
        })
    }
}
