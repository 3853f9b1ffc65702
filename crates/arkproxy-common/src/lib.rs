use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod alias;

pub use alias::{DEFAULT_UPSTREAM_MODEL, ModelAliasTable};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid model mapping entry `{0}` (expected alias=upstream_id)")]
    InvalidAliasEntry(String),
    #[error("invalid error policy `{0}` (expected compat or strict)")]
    InvalidErrorPolicy(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
}

/// How upstream failures are surfaced to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// HTTP 200 with a single `{"error": ...}` chunk, framed per the requested mode.
    #[default]
    Compat,
    /// HTTP 502 with a JSON `{"error": ...}` body.
    Strict,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPolicy::Compat => "compat",
            ErrorPolicy::Strict => "strict",
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compat" => Ok(ErrorPolicy::Compat),
            "strict" => Ok(ErrorPolicy::Strict),
            _ => Err(ConfigError::InvalidErrorPolicy(value.to_string())),
        }
    }
}

/// Final, merged configuration used by the running process.
///
/// Built once at startup (CLI > ENV > defaults) and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Base URL of the upstream provider; `/chat/completions` is appended per call.
    pub upstream_base_url: String,
    pub models: ModelAliasTable,
    pub upstream_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub error_policy: ErrorPolicy,
}

impl GlobalConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            models: ModelAliasTable::default(),
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            proxy: None,
            error_policy: ErrorPolicy::default(),
        }
    }
}

/// Optional layer used for merging config sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream_base_url: Option<String>,
    pub default_model: Option<String>,
    /// Extra alias entries, laid over the reference table.
    pub model_map: Vec<(String, String)>,
    pub upstream_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub proxy: Option<String>,
    pub error_policy: Option<ErrorPolicy>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.upstream_base_url.is_some() {
            self.upstream_base_url = other.upstream_base_url;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        self.model_map.extend(other.model_map);
        if other.upstream_timeout_secs.is_some() {
            self.upstream_timeout_secs = other.upstream_timeout_secs;
        }
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.error_policy.is_some() {
            self.error_policy = other.error_policy;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, ConfigError> {
        let defaults = GlobalConfig::default();

        let upstream_base_url = self
            .upstream_base_url
            .unwrap_or(defaults.upstream_base_url)
            .trim_end_matches('/')
            .to_string();
        if upstream_base_url.is_empty() {
            return Err(ConfigError::MissingField("upstream_base_url"));
        }

        let upstream_timeout_secs = self
            .upstream_timeout_secs
            .unwrap_or(defaults.upstream_timeout_secs);
        if upstream_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("upstream_timeout_secs"));
        }
        let connect_timeout_secs = self
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs);
        if connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("connect_timeout_secs"));
        }

        let mut models = defaults.models;
        if let Some(default_model) = self.default_model {
            models = models.with_default(default_model);
        }
        for (alias, upstream_id) in self.model_map {
            models.insert(alias, upstream_id);
        }

        Ok(GlobalConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            upstream_base_url,
            models,
            upstream_timeout_secs,
            connect_timeout_secs,
            proxy: self.proxy,
            error_policy: self.error_policy.unwrap_or(defaults.error_policy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_yields_reference_defaults() {
        let config = GlobalConfigPatch::default().into_config().unwrap();
        assert_eq!(config, GlobalConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.upstream_timeout(), Duration::from_secs(1800));
        assert_eq!(config.models.len(), 4);
    }

    #[test]
    fn overlay_prefers_later_layer() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(8080),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9090),
            error_policy: Some(ErrorPolicy::Strict),
            model_map: vec![("gpt-4".to_string(), "ep-custom".to_string())],
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.error_policy, ErrorPolicy::Strict);
        assert_eq!(config.models.resolve("gpt-4"), "ep-custom");
        assert_eq!(
            config.models.resolve("deepseek-v3"),
            "ep-20250218170310-pvmdb"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = GlobalConfigPatch {
            upstream_base_url: Some("http://localhost:9000/api/v3/".to_string()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!(config.upstream_base_url, "http://localhost:9000/api/v3");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = GlobalConfigPatch {
            upstream_timeout_secs: Some(0),
            ..Default::default()
        }
        .into_config()
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroTimeout("upstream_timeout_secs"));
    }

    #[test]
    fn error_policy_parses_case_insensitively() {
        assert_eq!("Strict".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Strict));
        assert_eq!(" compat ".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Compat));
        assert!("lenient".parse::<ErrorPolicy>().is_err());
    }

    #[test]
    fn error_policy_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorPolicy::Strict).unwrap(),
            "\"strict\""
        );
    }
}
