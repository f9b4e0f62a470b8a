use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResult {
    pub class_name: String,
    /// Raw model score rounded to 4 decimals, always within [0, 1].
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub success: bool,
    /// Ordered by descending confidence.
    pub predictions: Vec<PredictionResult>,
    pub model_version: String,
    pub inference_time_ms: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_path: String,
    pub uptime_seconds: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            detail: Some(detail.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<[usize; 4]>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
    pub endpoints: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_keeps_detail_field() {
        let body = serde_json::to_value(ErrorResponse::new("Bad Request", "nope")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Bad Request");
        assert_eq!(body["detail"], "nope");
    }

    #[test]
    fn unloaded_model_info_omits_metadata() {
        let info = ModelInfo {
            loaded: false,
            model_type: None,
            num_classes: None,
            input_shape: None,
        };
        let body = serde_json::to_value(info).unwrap();
        assert_eq!(body, serde_json::json!({ "loaded": false }));
    }
}
