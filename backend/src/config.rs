use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

const CONFIG_FILE_VAR: &str = "CONFIG_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Process-wide service settings. Read once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,

    pub model_path: String,
    pub class_names_path: String,
    pub model_version: String,
    pub model_confidence_threshold: f32,
    pub max_predictions: usize,

    pub max_upload_size: usize,
    pub allowed_extensions: BTreeSet<String>,

    pub host: String,
    pub port: u16,
    pub workers: usize,

    pub enable_metrics: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "ML Prediction API".to_string(),
            app_version: "0.1.0".to_string(),
            model_path: "./models/yolo11l-cls.onnx".to_string(),
            class_names_path: "./models/imagenet_classes.txt".to_string(),
            model_version: "yolo11l-cls".to_string(),
            model_confidence_threshold: 0.25,
            max_predictions: 5,
            max_upload_size: 10 * 1024 * 1024,
            allowed_extensions: [".jpg", ".jpeg", ".png", ".webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 1,
            enable_metrics: true,
        }
    }
}

impl Settings {
    /// Loads settings from the optional YAML file named by `CONFIG_FILE`,
    /// then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();

        let yaml = match vars.get(CONFIG_FILE_VAR) {
            Some(path) => {
                log::info!("Reading configuration from {}", path);
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some(contents)
            }
            None => None,
        };

        Self::from_sources(yaml.as_deref(), vars)
    }

    pub fn from_sources<I>(yaml: Option<&str>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = match yaml {
            Some(contents) if !contents.trim().is_empty() => serde_yaml::from_str(contents)?,
            _ => Settings::default(),
        };

        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        settings.apply_env(&vars)?;
        settings.allowed_extensions = normalize_extensions(settings.allowed_extensions.iter());
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        override_with(vars, "APP_NAME", &mut self.app_name)?;
        override_with(vars, "APP_VERSION", &mut self.app_version)?;
        override_with(vars, "MODEL_PATH", &mut self.model_path)?;
        override_with(vars, "CLASS_NAMES_PATH", &mut self.class_names_path)?;
        override_with(vars, "MODEL_VERSION", &mut self.model_version)?;
        override_with(
            vars,
            "MODEL_CONFIDENCE_THRESHOLD",
            &mut self.model_confidence_threshold,
        )?;
        override_with(vars, "MAX_PREDICTIONS", &mut self.max_predictions)?;
        override_with(vars, "MAX_UPLOAD_SIZE", &mut self.max_upload_size)?;
        override_with(vars, "HOST", &mut self.host)?;
        override_with(vars, "PORT", &mut self.port)?;
        override_with(vars, "WORKERS", &mut self.workers)?;

        if let Some(value) = vars.get("ENABLE_METRICS") {
            self.enable_metrics = parse_bool("ENABLE_METRICS", value)?;
        }
        if let Some(value) = vars.get("ALLOWED_EXTENSIONS") {
            self.allowed_extensions = value
                .split(',')
                .map(str::trim)
                .filter(|ext| !ext.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.model_confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "model_confidence_threshold must be within [0, 1], got {}",
                self.model_confidence_threshold
            )));
        }
        if self.max_predictions == 0 {
            return Err(ConfigError::Invalid("max_predictions must be at least 1".into()));
        }
        if self.max_upload_size == 0 {
            return Err(ConfigError::Invalid("max_upload_size must be at least 1".into()));
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid("allowed_extensions must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        Ok(())
    }
}

fn override_with<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = vars.get(key) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
        })?;
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn normalize_extensions<'a>(extensions: impl Iterator<Item = &'a String>) -> BTreeSet<String> {
    extensions
        .map(|ext| {
            let ext = ext.trim().to_ascii_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect()
}
