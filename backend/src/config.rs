use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid inference service URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub detection: DetectionConfig,
    pub storage: StorageConfig,
    pub tables: TableConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

/// Network policy for the classification service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub service_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub max_redirects: usize,
    pub verify_tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Deployment environment, used as the first segment of archive folders.
    pub environment: String,
    pub pest_category: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub sessions: String,
    pub detections: String,
    pub tasks: String,
    pub plots: String,
    pub farm_members: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            detection: DetectionConfig::default(),
            storage: StorageConfig::default(),
            tables: TableConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8081 }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            timeout_secs: 60,
            connect_timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
            pool_max_idle_per_host: 10,
            pool_idle_timeout_secs: 90,
            max_redirects: 10,
            verify_tls: true,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            pest_category: "leaf-pests".to_string(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            sessions: "monitoring_sessions".to_string(),
            detections: "detections".to_string(),
            tasks: "tasks".to_string(),
            plots: "plots".to_string(),
            farm_members: "farm_members".to_string(),
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `{service_url}/predict`, keeping any path prefix of the service URL.
    pub fn predict_url(&self) -> Result<Url, ConfigError> {
        let base = format!("{}/", self.service_url.trim_end_matches('/'));
        let base = Url::parse(&base).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                base.scheme()
            )));
        }
        base.join("predict")
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))
    }
}

impl AppConfig {
    /// Loads `.env`, then the YAML file named by `LEAFGUARD_CONFIG` if set, then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("LEAFGUARD_CONFIG") {
            Ok(path) => {
                log::info!("Loading configuration from {}", path);
                Self::from_yaml_file(Path::new(&path))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_value("PORT", &v)?;
        }

        if let Some(v) = lookup("INFERENCE_SERVICE_URL") {
            self.inference.service_url = v;
        }
        if let Some(v) = lookup("INFERENCE_TIMEOUT_SECS") {
            self.inference.timeout_secs = parse_value("INFERENCE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("INFERENCE_MAX_RETRIES") {
            self.inference.max_retries = parse_value("INFERENCE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("INFERENCE_POOL_MAX_IDLE") {
            self.inference.pool_max_idle_per_host = parse_value("INFERENCE_POOL_MAX_IDLE", &v)?;
        }
        if let Some(v) = lookup("INFERENCE_VERIFY_TLS") {
            self.inference.verify_tls = parse_value("INFERENCE_VERIFY_TLS", &v)?;
        }

        if let Some(v) = lookup("APP_ENVIRONMENT") {
            self.detection.environment = v;
        }
        if let Some(v) = lookup("PEST_CATEGORY") {
            self.detection.pest_category = v;
        }

        if let Some(v) = lookup("S3_BUCKET_NAME") {
            self.storage.bucket = v;
        }
        if let Some(v) = lookup("AWS_REGION") {
            self.storage.region = Some(v);
        }
        if let Some(v) = lookup("S3_PUBLIC_BASE_URL") {
            self.storage.public_base_url = Some(v);
        }

        if let Some(v) = lookup("DYNAMODB_SESSIONS_TABLE") {
            self.tables.sessions = v;
        }
        if let Some(v) = lookup("DYNAMODB_DETECTIONS_TABLE") {
            self.tables.detections = v;
        }
        if let Some(v) = lookup("DYNAMODB_TASKS_TABLE") {
            self.tables.tasks = v;
        }
        if let Some(v) = lookup("DYNAMODB_PLOTS_TABLE") {
            self.tables.plots = v;
        }
        if let Some(v) = lookup("DYNAMODB_FARM_MEMBERS_TABLE") {
            self.tables.farm_members = v;
        }

        if let Some(v) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.service_url.trim().is_empty() {
            return Err(ConfigError::Missing("INFERENCE_SERVICE_URL"));
        }
        self.inference.predict_url()?;
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INFERENCE_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET_NAME"));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if self.detection.environment.trim().is_empty() {
            return Err(ConfigError::Missing("APP_ENVIRONMENT"));
        }
        Ok(())
    }
}
