use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use url::Url;
use crate::core::{ChunkedConfig, Result, TransferError, DEFAULT_COMPLETION_TOLERANCE};
use crate::uploaders::HttpTransport;

fn default_category() -> String {
    "default".to_string()
}

fn default_chunk_size_mib() -> u64 {
    49
}

fn default_cleanup_delay_ms() -> u64 {
    3000
}

fn default_completion_tolerance() -> u64 {
    DEFAULT_COMPLETION_TOLERANCE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 配置文件 `config.toml`
#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// 接收分片的地址
    pub endpoint: String,
    /// 原样放进 `Authorization` 头
    #[serde(default)]
    pub token: Option<String>,
    /// 分类标签，例如目标系统
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_chunk_size_mib")]
    pub chunk_size_mib: u64,
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,
    #[serde(default = "default_completion_tolerance")]
    pub completion_tolerance: u64,
    #[serde(default)]
    pub abort_in_flight: bool,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| TransferError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::invalid_config(format!(
                "endpoint must be http or https: {}",
                self.endpoint
            )));
        }
        if self.chunk_size_mib == 0 {
            return Err(TransferError::invalid_config("chunk_size_mib must be greater than 0"));
        }
        Ok(())
    }

    pub fn chunked_config(&self) -> ChunkedConfig {
        ChunkedConfig {
            chunk_size: self.chunk_size_mib * 1024 * 1024,
            cleanup_delay: Duration::from_millis(self.cleanup_delay_ms),
            completion_tolerance: self.completion_tolerance,
            abort_in_flight: self.abort_in_flight,
        }
    }

    pub fn transport(&self) -> Result<HttpTransport> {
        let mut transport = HttpTransport::new(&self.endpoint)?;
        if let Some(token) = &self.token {
            transport = transport.with_token(token)?;
        }
        if let Some(secs) = self.request_timeout_secs {
            transport = transport.with_timeout(Duration::from_secs(secs))?;
        }
        Ok(transport)
    }
}
