use super::RequestsLoggingLevel;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub bind: String,
    pub port: u16,
    /// Prometheus scraping endpoint. Disabled when unset.
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            bind: "0.0.0.0".to_string(),
            port: 9000,
            metrics_port: None,
        }
    }
}
