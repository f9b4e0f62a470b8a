mod config;
mod inference;
mod metrics;
mod middleware;
mod routes;

use actix_cors::Cors;
use actix_web::{App, HttpServer};
use config::Settings;
use inference::{ModelLifecycle, ModelSession};
use metrics::Metrics;
use middleware::RequestTracking;
use routes::AppState;
use std::path::Path;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    log::info!("Starting {} v{}", settings.app_name, settings.app_version);

    let lifecycle = Arc::new(ModelLifecycle::new());
    let loaded = lifecycle.initialize(|| {
        ModelSession::load(
            Path::new(&settings.model_path),
            Path::new(&settings.class_names_path),
        )
    });
    match loaded {
        Ok(session) => {
            let (height, width) = session.input_size();
            log::info!(
                "Model ready: {} classes, input {}x{}",
                session.class_labels().len(),
                height,
                width
            );
        }
        Err(e) => {
            log::error!("Failed to preload model at startup: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Model loading failed: {}", e),
            ));
        }
    }

    let metrics = Metrics::new(settings.enable_metrics)
        .map(Arc::new)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let bind_address = format!("{}:{}", settings.host, settings.port);
    let workers = settings.workers;
    let state = AppState::new(settings, lifecycle, metrics.clone());

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(RequestTracking::new(metrics.clone()))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(move |cfg| state.configure(cfg))
    })
    .workers(workers)
    .bind(&bind_address)?
    .run()
    .await
}
