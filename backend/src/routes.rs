use actix_multipart::Multipart;
use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, ResponseError};
use futures::TryStreamExt;
use log::{error, info, warn};
use shared::{ErrorResponse, HealthResponse, ModelInfo, PredictionResponse, ServiceInfo};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::Settings;
use crate::inference::{ModelLifecycle, PipelineSettings, PredictError, PredictionPipeline};
use crate::metrics::Metrics;

const UPLOAD_FIELD: &str = "file";
const GENERIC_SERVER_ERROR: &str = "An unexpected error occurred";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error("Field '{0}' is required")]
    MissingField(&'static str),
    #[error("Malformed multipart payload: {0}")]
    Multipart(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Predict(PredictError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Predict(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Predict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let detail = if status.is_server_error() {
            GENERIC_SERVER_ERROR.to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(ErrorResponse::new(
            status.canonical_reason().unwrap_or("Error"),
            detail,
        ))
    }
}

/// Process start, for the uptime reported by `/health`.
pub struct StartedAt(pub Instant);

/// Everything the handlers share, wired into each worker's `App`.
#[derive(Clone)]
pub struct AppState {
    pub settings: web::Data<Settings>,
    pub lifecycle: web::Data<ModelLifecycle>,
    pub pipeline: web::Data<PredictionPipeline>,
    pub metrics: web::Data<Metrics>,
    pub started_at: web::Data<StartedAt>,
}

impl AppState {
    pub fn new(settings: Settings, lifecycle: Arc<ModelLifecycle>, metrics: Arc<Metrics>) -> Self {
        let pipeline = PredictionPipeline::new(lifecycle.clone(), PipelineSettings::from(&settings));
        Self {
            settings: web::Data::new(settings),
            lifecycle: web::Data::from(lifecycle),
            pipeline: web::Data::new(pipeline),
            metrics: web::Data::from(metrics),
            started_at: web::Data::new(StartedAt(Instant::now())),
        }
    }

    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(self.settings.clone())
            .app_data(self.lifecycle.clone())
            .app_data(self.pipeline.clone())
            .app_data(self.metrics.clone())
            .app_data(self.started_at.clone());
        configure_routes(cfg);
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/model").route(web::get().to(model_info)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/metrics").route(web::get().to(metrics)))
        .default_service(web::to(not_found));
}

async fn root(settings: web::Data<Settings>) -> HttpResponse {
    let endpoints = [
        ("health", "/health"),
        ("model", "/model"),
        ("predict", "/predict"),
        ("metrics", "/metrics"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    HttpResponse::Ok().json(ServiceInfo {
        message: settings.app_name.clone(),
        version: settings.app_version.clone(),
        endpoints,
    })
}

async fn health(
    settings: web::Data<Settings>,
    lifecycle: web::Data<ModelLifecycle>,
    started_at: web::Data<StartedAt>,
) -> HttpResponse {
    let uptime = started_at.0.elapsed().as_secs_f64();
    let loaded = lifecycle.is_ready();

    let body = HealthResponse {
        status: if loaded { "healthy" } else { "unhealthy" }.to_string(),
        model_loaded: loaded,
        model_path: settings.model_path.clone(),
        uptime_seconds: (uptime * 100.0).round() / 100.0,
    };

    if loaded {
        HttpResponse::Ok().json(body)
    } else {
        if let Some(reason) = lifecycle.failure() {
            warn!("Health check failing, model load error: {}", reason);
        }
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn model_info(lifecycle: web::Data<ModelLifecycle>) -> HttpResponse {
    let info = match lifecycle.session() {
        Ok(session) => {
            let (height, width) = session.input_size();
            ModelInfo {
                loaded: true,
                model_type: Some("Image Classification (ONNX)".to_string()),
                num_classes: Some(session.class_labels().len()),
                input_shape: Some([1, 3, height as usize, width as usize]),
            }
        }
        Err(_) => ModelInfo {
            loaded: false,
            model_type: None,
            num_classes: None,
            input_shape: None,
        },
    };
    HttpResponse::Ok().json(info)
}

async fn predict(
    pipeline: web::Data<PredictionPipeline>,
    metrics: web::Data<Metrics>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    let outcome = run_prediction(pipeline, payload).await;
    metrics.observe_prediction(outcome.is_ok(), started.elapsed().as_secs_f64());

    match outcome {
        Ok(response) => {
            info!(
                "[{}] Prediction successful: {} results in {:.2}ms",
                request_id,
                response.predictions.len(),
                response.inference_time_ms
            );
            Ok(HttpResponse::Ok()
                .insert_header(("X-Request-Id", request_id.to_string()))
                .json(response))
        }
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("[{}] Prediction error: {}", request_id, e);
            } else {
                warn!("[{}] Rejected prediction request: {}", request_id, e);
            }
            Err(e)
        }
    }
}

async fn run_prediction(
    pipeline: web::Data<PredictionPipeline>,
    payload: Multipart,
) -> Result<PredictionResponse, ApiError> {
    // One byte past the limit is enough for the pipeline to reject the upload.
    let cap = pipeline.settings().max_upload_size.saturating_add(1);
    let (filename, data) = read_upload(payload, cap).await?;

    let pipeline = pipeline.into_inner();
    let outcome = web::block(move || pipeline.predict(&data, &filename))
        .await
        .map_err(|e| PredictError::Internal(format!("prediction task aborted: {}", e)))?;
    Ok(outcome?)
}

async fn read_upload(mut payload: Multipart, cap: usize) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let Some(disposition) = field.content_disposition() else {
            continue;
        };
        if disposition.get_name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = disposition.get_filename().unwrap_or_default().to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::Multipart(e.to_string()))?
        {
            let room = cap.saturating_sub(data.len());
            data.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if data.len() >= cap {
                break;
            }
        }
        return Ok((filename, data));
    }

    Err(ApiError::MissingField(UPLOAD_FIELD))
}

async fn metrics(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type(metrics.content_type())
            .body(body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new(
                "Internal Server Error",
                GENERIC_SERVER_ERROR,
            ))
        }
    }
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse::new(
        "Not Found",
        format!("The path {} does not exist", req.path()),
    ))
}
