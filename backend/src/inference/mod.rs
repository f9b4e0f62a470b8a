pub mod decode;
pub mod lifecycle;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod session;

pub use lifecycle::ModelLifecycle;
pub use pipeline::{PipelineSettings, PredictError, PredictionPipeline};
pub use session::ModelSession;
