use shared::PredictionResponse;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::decode::{self, DecodeError};
use super::lifecycle::{ModelLifecycle, NotLoadedError};
use super::postprocess;
use super::preprocess;
use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Invalid file type. Allowed: {}", format_extensions(.allowed))]
    InvalidExtension { allowed: BTreeSet<String> },
    #[error("File too large. Max size: {}MB", format_megabytes(.max_bytes))]
    TooLarge { max_bytes: usize },
    #[error("Invalid image file: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    NotLoaded(#[from] NotLoadedError),
    #[error("{0}")]
    Internal(String),
}

impl PredictError {
    /// Client-side mistakes, as opposed to faults of the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PredictError::InvalidExtension { .. }
                | PredictError::TooLarge { .. }
                | PredictError::Decode(_)
        )
    }
}

fn format_megabytes(bytes: &usize) -> String {
    let mb = *bytes as f64 / 1024.0 / 1024.0;
    if mb.fract() == 0.0 {
        format!("{:.1}", mb)
    } else {
        mb.to_string()
    }
}

fn format_extensions(allowed: &BTreeSet<String>) -> String {
    let quoted: Vec<String> = allowed.iter().map(|e| format!("'{}'", e)).collect();
    format!("{{{}}}", quoted.join(", "))
}

/// Request-scoped knobs taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub allowed_extensions: BTreeSet<String>,
    pub max_upload_size: usize,
    pub confidence_threshold: f32,
    pub max_predictions: usize,
    pub model_version: String,
}

impl From<&Settings> for PipelineSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            allowed_extensions: settings.allowed_extensions.clone(),
            max_upload_size: settings.max_upload_size,
            confidence_threshold: settings.model_confidence_threshold,
            max_predictions: settings.max_predictions,
            model_version: settings.model_version.clone(),
        }
    }
}

/// validate -> decode -> preprocess -> infer -> rank, short-circuiting on the
/// first failure.
#[derive(Clone)]
pub struct PredictionPipeline {
    lifecycle: Arc<ModelLifecycle>,
    settings: PipelineSettings,
}

impl PredictionPipeline {
    pub fn new(lifecycle: Arc<ModelLifecycle>, settings: PipelineSettings) -> Self {
        Self {
            lifecycle,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn predict(&self, raw: &[u8], filename: &str) -> Result<PredictionResponse, PredictError> {
        self.check_extension(filename)?;
        self.check_size(raw.len())?;

        let started = Instant::now();

        let pixels = decode::normalize(raw)?;
        let session = self.lifecycle.session()?;
        let (height, width) = session.input_size();
        let tensor = preprocess::to_tensor(&pixels, height, width);
        drop(pixels);

        let scores = session
            .infer(&tensor)
            .map_err(|e| PredictError::Internal(e.to_string()))?;
        let predictions = postprocess::rank(
            &scores,
            session.class_labels(),
            self.settings.confidence_threshold,
            self.settings.max_predictions,
        );

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(PredictionResponse {
            success: true,
            predictions,
            model_version: self.settings.model_version.clone(),
            inference_time_ms: (elapsed_ms * 100.0).round() / 100.0,
        })
    }

    fn check_extension(&self, filename: &str) -> Result<(), PredictError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()));

        match extension {
            Some(ext) if self.settings.allowed_extensions.contains(&ext) => Ok(()),
            _ => Err(PredictError::InvalidExtension {
                allowed: self.settings.allowed_extensions.clone(),
            }),
        }
    }

    fn check_size(&self, len: usize) -> Result<(), PredictError> {
        if len > self.settings.max_upload_size {
            return Err(PredictError::TooLarge {
                max_bytes: self.settings.max_upload_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::session::ModelSession;
    use crate::inference::test_support::{
        encode_png, pipeline_settings, ready_lifecycle, FailingBackend, FixedScores,
    };

    fn pipeline(scores: Vec<f32>, labels: &[&str]) -> PredictionPipeline {
        PredictionPipeline::new(
            ready_lifecycle(Box::new(FixedScores::new(scores)), labels),
            pipeline_settings(),
        )
    }

    #[test]
    fn ranks_predictions_for_valid_image() {
        let pipeline = pipeline(vec![0.1, 0.7, 0.05, 0.15], &["cat", "bus", "dog", "car"]);
        let response = pipeline.predict(&encode_png(32, 32), "bus.PNG").unwrap();

        assert!(response.success);
        assert_eq!(response.model_version, "test-model");
        assert_eq!(response.predictions.len(), 1);
        assert_eq!(response.predictions[0].class_name, "bus");
        assert_eq!(response.predictions[0].confidence, 0.7);
        assert!(response.inference_time_ms >= 0.0);
    }

    #[test]
    fn repeated_predictions_are_identical() {
        let pipeline = pipeline(vec![0.3, 0.5, 0.4], &["a", "b", "c"]);
        let image = encode_png(20, 10);
        let first = pipeline.predict(&image, "x.png").unwrap();
        let second = pipeline.predict(&image, "x.png").unwrap();
        assert_eq!(first.predictions, second.predictions);
    }

    #[test]
    fn rejects_unlisted_extension_before_reading_bytes() {
        let err = pipeline(vec![1.0], &[])
            .predict(b"this is not an image at all", "not_image.txt")
            .unwrap_err();
        assert!(matches!(err, PredictError::InvalidExtension { .. }));
        assert_eq!(
            err.to_string(),
            "Invalid file type. Allowed: {'.jpeg', '.jpg', '.png', '.webp'}"
        );
    }

    #[test]
    fn filename_without_extension_is_rejected() {
        let err = pipeline(vec![1.0], &[]).predict(&encode_png(4, 4), "upload").unwrap_err();
        assert!(matches!(err, PredictError::InvalidExtension { .. }));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let mut settings = pipeline_settings();
        settings.max_upload_size = 16;
        let pipeline = PredictionPipeline::new(
            ready_lifecycle(Box::new(FixedScores::new(vec![1.0])), &[]),
            settings,
        );
        let err = pipeline.predict(&[0u8; 17], "big.jpg").unwrap_err();
        assert!(matches!(err, PredictError::TooLarge { max_bytes: 16 }));

        let err = pipeline.predict(&[0u8; 16], "small.jpg").unwrap_err();
        assert!(matches!(err, PredictError::Decode(_)));
    }

    #[test]
    fn too_large_message_reports_megabytes() {
        let err = PredictError::TooLarge {
            max_bytes: 10 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "File too large. Max size: 10.0MB");
    }

    #[test]
    fn corrupt_image_is_a_decode_error() {
        let err = pipeline(vec![1.0], &[])
            .predict(b"\x89PNG\r\n\x1a\nbroken", "broken.png")
            .unwrap_err();
        assert!(matches!(err, PredictError::Decode(_)));
        assert!(err.is_client_error());
        assert!(err.to_string().starts_with("Invalid image file: "));
    }

    #[test]
    fn unloaded_model_is_reported() {
        let pipeline = PredictionPipeline::new(Arc::new(ModelLifecycle::new()), pipeline_settings());
        let err = pipeline.predict(&encode_png(4, 4), "a.png").unwrap_err();
        assert!(matches!(err, PredictError::NotLoaded(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn backend_failure_becomes_internal_error() {
        let lifecycle = Arc::new(ModelLifecycle::new());
        lifecycle
            .initialize(|| Ok(ModelSession::from_backend(Box::new(FailingBackend), Vec::new())))
            .unwrap();
        let pipeline = PredictionPipeline::new(lifecycle, pipeline_settings());
        let err = pipeline.predict(&encode_png(4, 4), "a.webp").unwrap_err();
        assert!(matches!(err, PredictError::Internal(_)));
    }
}
