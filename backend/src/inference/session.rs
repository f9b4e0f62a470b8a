use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::preprocess::InputTensor;

pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// One score per class, in class-id order.
pub type RawScores = Vec<f32>;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    #[error("failed to read class labels from {path}: {source}")]
    Labels {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to load model artifact: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("model declares no {0}")]
    MissingTensor(&'static str),
}

#[derive(Debug, thiserror::Error)]
#[error("inference failed: {0}")]
pub struct InferenceError(#[from] BackendError);

/// Execution engine behind a [`ModelSession`]. Implementations must tolerate
/// concurrent `run` calls from request workers.
pub trait InferenceBackend: Send + Sync {
    /// Declared dimensions of the first input; negative values are dynamic.
    fn input_dimensions(&self) -> Vec<i64>;

    /// Feeds one tensor through the graph and returns the first output,
    /// flattened.
    fn run(&self, input: &InputTensor) -> Result<RawScores, BackendError>;
}

/// ONNX Runtime session pinned to the CPU execution provider.
///
/// `Session::run` needs exclusive access, so calls are serialized.
pub struct OrtBackend {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_dimensions: Vec<i64>,
}

impl OrtBackend {
    pub fn open(model_path: &Path) -> Result<Self, BackendError> {
        let session = Session::builder()?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .commit_from_file(model_path)?;

        let input = session
            .inputs
            .first()
            .ok_or(BackendError::MissingTensor("inputs"))?;
        let input_name = input.name.clone();
        let input_dimensions = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .unwrap_or_default();
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or(BackendError::MissingTensor("outputs"))?;

        log::info!(
            "Model expects input: {} with shape {:?}",
            input_name,
            input_dimensions
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_dimensions,
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn input_dimensions(&self) -> Vec<i64> {
        self.input_dimensions.clone()
    }

    fn run(&self, input: &InputTensor) -> Result<RawScores, BackendError> {
        let tensor = TensorRef::from_array_view(input)?;
        let mut session = lock_recovering(&self.session);
        let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (_, scores) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        Ok(scores.to_vec())
    }
}

/// A panic in an earlier `run` leaves the ort session usable.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("Recovering inference session lock after a panicked run");
        poisoned.into_inner()
    })
}

/// The loaded classification model together with its label table.
/// Immutable once constructed.
pub struct ModelSession {
    backend: Box<dyn InferenceBackend>,
    class_labels: Vec<String>,
    input_height: u32,
    input_width: u32,
}

impl ModelSession {
    pub fn load(model_path: &Path, labels_path: &Path) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::ArtifactNotFound(
                model_path.display().to_string(),
            ));
        }

        log::info!("Loading ONNX model from {}", model_path.display());
        let backend = OrtBackend::open(model_path)?;
        let class_labels = read_class_labels(labels_path)?;
        let session = Self::from_backend(Box::new(backend), class_labels);
        log::info!("Model loaded successfully");
        Ok(session)
    }

    pub fn from_backend(backend: Box<dyn InferenceBackend>, class_labels: Vec<String>) -> Self {
        let (input_height, input_width) = resolve_input_size(&backend.input_dimensions());
        Self {
            backend,
            class_labels,
            input_height,
            input_width,
        }
    }

    pub fn infer(&self, input: &InputTensor) -> Result<RawScores, InferenceError> {
        Ok(self.backend.run(input)?)
    }

    pub fn class_labels(&self) -> &[String] {
        &self.class_labels
    }

    /// (height, width) the model expects.
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_height, self.input_width)
    }
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("class_labels", &self.class_labels.len())
            .field("input_height", &self.input_height)
            .field("input_width", &self.input_width)
            .finish_non_exhaustive()
    }
}

/// Height and width come from dims 2 and 3 of an NCHW input when they are
/// fixed; anything else falls back to 224.
pub fn resolve_input_size(dimensions: &[i64]) -> (u32, u32) {
    let fixed = |idx: usize| {
        dimensions
            .get(idx)
            .copied()
            .filter(|d| *d > 0)
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(DEFAULT_INPUT_SIZE)
    };
    (fixed(2), fixed(3))
}

/// One label per line, trimmed. A missing file is not an error: the service
/// then reports raw class indices.
pub fn read_class_labels(path: &Path) -> Result<Vec<String>, ModelLoadError> {
    if !path.exists() {
        log::warn!(
            "Class label file {} not found. Predictions will return indices.",
            path.display()
        );
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path).map_err(|source| ModelLoadError::Labels {
        path: path.display().to_string(),
        source,
    })?;
    let labels: Vec<String> = contents.lines().map(|l| l.trim().to_string()).collect();
    log::info!("Loaded {} class labels.", labels.len());
    Ok(labels)
}
