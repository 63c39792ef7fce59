use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub loki_enabled: bool,
    pub loki_url: Option<String>,
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            loki_enabled: std::env::var("LOKI_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            loki_url: std::env::var("LOKI_URL").ok(),
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "stockcast".to_string()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlx=warn".to_string()),
        }
    }

    /// Tags the service label with the process role so API and worker logs separate in Loki.
    pub fn for_role(mut self, role: &str) -> Self {
        self.service_name = format!("{}-{}", self.service_name, role);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.loki_enabled && self.loki_url.is_none() {
            return Err("LOKI_ENABLED is true but LOKI_URL is not set".to_string());
        }
        EnvFilter::try_new(&self.log_level).map_err(|e| format!("Invalid RUST_LOG '{}': {}", self.log_level, e))?;
        Ok(())
    }
}

pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    #[cfg(feature = "loki")]
    {
        if config.loki_enabled {
            if let Some(loki_url) = config.loki_url.clone() {
                return init_with_loki(config, &loki_url);
            }
        }
    }

    init_console_only(config)
}

fn init_console_only(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    tracing::info!("📊 Console logging initialized for {}", config.service_name);
    Ok(())
}

#[cfg(feature = "loki")]
fn init_with_loki(config: LoggingConfig, loki_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = url::Url::parse(loki_url)?;

    let (loki_layer, task) = tracing_loki::builder()
        .label("service", &config.service_name)?
        .label("environment", &config.environment)?
        .build_url(url)?;

    // Ships buffered events to Loki in the background
    tokio::spawn(task);

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(loki_layer)
        .try_init()?;

    tracing::info!("✅ Loki logging initialized at {} for {}", loki_url, config.service_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoggingConfig {
        LoggingConfig {
            loki_enabled: false,
            loki_url: None,
            service_name: "stockcast".into(),
            environment: "test".into(),
            log_level: "info".into(),
        }
    }

    #[test]
    fn test_loki_requires_url() {
        let mut c = config();
        c.loki_enabled = true;
        assert!(c.validate().is_err());
        c.loki_url = Some("http://localhost:3100".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_bad_filter_is_rejected() {
        let mut c = config();
        c.log_level = "info,sqlx=[".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_role_suffix() {
        assert_eq!(config().for_role("worker").service_name, "stockcast-worker");
    }
}
