use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub transport: Option<String>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    pub cml: Option<CmlConfig>,
    pub pool: Option<PoolConfig>,
}

/// Default lab controller. Required for stdio, optional fallback in HTTP mode.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CmlConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_ssl: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: Option<usize>,
    pub ttl_seconds: Option<u64>,
    pub max_per_server: Option<usize>,
    pub eviction_interval_seconds: Option<u64>,
    pub allowed_urls: Option<Vec<String>>,
    pub url_pattern: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
transport = "http"
port = 9100
logging_level = "headers"

[cml]
url = "https://cml.example.com"
verify_ssl = false

[pool]
max_size = 10
allowed_urls = ["https://cml.example.com", "https://lab2.example.com"]
url_pattern = "^https://.*\\.example\\.com"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.transport.as_deref(), Some("http"));
        assert_eq!(config.port, Some(9100));
        let cml = config.cml.unwrap();
        assert_eq!(cml.url.as_deref(), Some("https://cml.example.com"));
        assert_eq!(cml.verify_ssl, Some(false));
        assert!(cml.username.is_none());
        let pool = config.pool.unwrap();
        assert_eq!(pool.max_size, Some(10));
        assert_eq!(pool.allowed_urls.unwrap().len(), 2);
        assert!(pool.ttl_seconds.is_none());
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert!(config.port.is_none());
        assert!(config.cml.is_none());
    }

    #[test]
    fn test_load_errors() {
        assert!(FileConfig::load(Path::new("/nonexistent/config.toml")).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "port = \"not a number\"").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
