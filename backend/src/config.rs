use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

pub const DEFAULT_FRONTEND_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_MODEL_PATH: &str = "animal_classifier_mobilenetv2.keras";
pub const DEFAULT_PORT: u16 = 5000;
pub const BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT {0:?}: expected an integer between 1 and 65535")]
    InvalidPort(String),
    #[error("Invalid FRONTEND_ORIGIN {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },
    #[error("Invalid MODEL_INPUT_LAYOUT {0:?}: expected \"nhwc\" or \"nchw\"")]
    InvalidLayout(String),
}

/// Memory layout the model artifact expects for its single input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputLayout {
    /// (batch, height, width, channels), the Keras convention.
    #[default]
    Nhwc,
    /// (batch, channels, height, width), the PyTorch convention.
    Nchw,
}

impl FromStr for InputLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(InputLayout::Nhwc),
            "nchw" => Ok(InputLayout::Nchw),
            _ => Err(ConfigError::InvalidLayout(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub frontend_origin: String,
    pub model_path: PathBuf,
    pub port: u16,
    pub input_layout: InputLayout,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset or blank keys take
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let frontend_origin = match get("FRONTEND_ORIGIN") {
            Some(origin) => validate_origin(&origin)?,
            None => DEFAULT_FRONTEND_ORIGIN.to_string(),
        };

        let model_path = get("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let port = match get("PORT") {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(ConfigError::InvalidPort(raw)),
            },
            None => DEFAULT_PORT,
        };

        let input_layout = match get("MODEL_INPUT_LAYOUT") {
            Some(raw) => raw.parse()?,
            None => InputLayout::default(),
        };

        Ok(Self {
            frontend_origin,
            model_path,
            port,
            input_layout,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", BIND_HOST, self.port)
    }
}

/// Checks that `origin` is a bare http(s) origin and returns it in the form
/// browsers send in the `Origin` header.
fn validate_origin(origin: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidOrigin {
        origin: origin.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(origin.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("an origin cannot carry a path, query or fragment"));
    }

    Ok(url.origin().ascii_serialization())
}
