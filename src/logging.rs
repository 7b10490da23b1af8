use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HTTP client internals are noisy at debug level
const QUIET_DEPENDENCIES: &str = "hyper=warn,h2=warn,reqwest=warn,rustls=warn";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub loki_enabled: bool,
    pub loki_url: Option<String>,
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            loki_enabled: false,
            loki_url: None,
            service_name: "trader-backend".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            loki_enabled: std::env::var("LOKI_ENABLED")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(defaults.loki_enabled),
            loki_url: std::env::var("LOKI_URL").ok().filter(|url| !url.trim().is_empty()),
            service_name: std::env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.loki_enabled && self.loki_url.is_none() {
            return Err("LOKI_ENABLED is true but LOKI_URL is not set".to_string());
        }
        self.env_filter().map(|_| ())
    }

    /// `RUST_LOG` directives with the HTTP stack capped at `warn`.
    pub fn env_filter(&self) -> Result<EnvFilter, String> {
        EnvFilter::try_new(format!("{},{}", self.log_level, QUIET_DEPENDENCIES))
            .map_err(|e| format!("invalid log filter {:?}: {}", self.log_level, e))
    }
}

pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    #[cfg(feature = "loki")]
    let loki_layer = match (config.loki_enabled, config.loki_url.as_deref()) {
        (true, Some(loki_url)) => Some(build_loki_layer(&config, loki_url)?),
        _ => None,
    };
    #[cfg(not(feature = "loki"))]
    let loki_layer: Option<tracing_subscriber::layer::Identity> = None;

    let shipping = loki_layer.is_some();

    tracing_subscriber::registry()
        .with(config.env_filter()?)
        .with(tracing_subscriber::fmt::layer())
        .with(loki_layer)
        .try_init()?;

    if shipping {
        tracing::info!(
            "✅ Logging initialized for {} ({}), shipping to Loki",
            config.service_name,
            config.environment
        );
    } else {
        tracing::info!(
            "📊 Console logging initialized for {} ({})",
            config.service_name,
            config.environment
        );
    }
    Ok(())
}

#[cfg(feature = "loki")]
fn build_loki_layer(
    config: &LoggingConfig,
    loki_url: &str,
) -> Result<tracing_loki::Layer, Box<dyn std::error::Error>> {
    let url = url::Url::parse(loki_url)?;

    let (layer, task) = tracing_loki::builder()
        .label("service", &config.service_name)?
        .label("environment", &config.environment)?
        .build_url(url)?;

    // Ships buffered log lines to Loki
    tokio::spawn(task);
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loki_requires_url() {
        let config = LoggingConfig {
            loki_enabled: true,
            ..LoggingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_console_config_is_valid() {
        let config = LoggingConfig {
            log_level: "debug,trader_backend=trace".to_string(),
            ..LoggingConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_filter() {
        let config = LoggingConfig {
            log_level: "trader_backend=loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(config.env_filter().is_err());
    }
}
