use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use arkproxy_common::{ErrorPolicy, GlobalConfig, GlobalConfigPatch, ModelAliasTable};

use crate::proxy_engine::ProxyEngine;
use crate::upstream_client::{UpstreamClientConfig, WreqUpstreamClient};

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "arkproxy",
    version,
    about = "OpenAI-compatible chat-completions proxy with model aliasing"
)]
pub struct CliArgs {
    /// Bind host.
    #[arg(long, env = "ARKPROXY_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "ARKPROXY_PORT")]
    pub port: Option<String>,

    /// Upstream base URL; `/chat/completions` is appended.
    #[arg(long, env = "ARKPROXY_UPSTREAM_BASE_URL")]
    pub upstream_base_url: Option<String>,

    /// Upstream model id used for names without an alias entry.
    #[arg(long, env = "ARKPROXY_DEFAULT_MODEL")]
    pub default_model: Option<String>,

    /// Extra aliases as comma-separated `alias=upstream_id` pairs.
    #[arg(long, env = "ARKPROXY_MODEL_MAP")]
    pub model_map: Option<String>,

    /// Overall upstream request timeout in seconds.
    #[arg(long, env = "ARKPROXY_UPSTREAM_TIMEOUT_SECS")]
    pub upstream_timeout_secs: Option<String>,

    /// Upstream connect timeout in seconds.
    #[arg(long, env = "ARKPROXY_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<String>,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "ARKPROXY_PROXY")]
    pub proxy: Option<String>,

    /// `compat` (upstream failures as 200 + error chunk) or `strict` (502).
    #[arg(long, env = "ARKPROXY_ERROR_POLICY")]
    pub error_policy: Option<String>,
}

pub struct Bootstrap {
    pub config: Arc<GlobalConfig>,
    pub engine: Arc<ProxyEngine>,
}

pub fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args)
}

pub fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let config = Arc::new(load_config(args)?);
    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))
        .context("build upstream client")?;
    let engine = Arc::new(ProxyEngine::new(config.clone(), Arc::new(client)));
    Ok(Bootstrap { config, engine })
}

/// Merges CLI/ENV values (clap applies CLI > ENV) over built-in defaults.
pub fn load_config(args: CliArgs) -> anyhow::Result<GlobalConfig> {
    let patch = GlobalConfigPatch {
        host: sanitize_optional_env_value(args.host),
        port: parse_u16_env_value(args.port, "ARKPROXY_PORT")?,
        upstream_base_url: sanitize_optional_env_value(args.upstream_base_url),
        default_model: sanitize_optional_env_value(args.default_model),
        model_map: parse_model_map(args.model_map)?,
        upstream_timeout_secs: parse_u64_env_value(
            args.upstream_timeout_secs,
            "ARKPROXY_UPSTREAM_TIMEOUT_SECS",
        )?,
        connect_timeout_secs: parse_u64_env_value(
            args.connect_timeout_secs,
            "ARKPROXY_CONNECT_TIMEOUT_SECS",
        )?,
        proxy: sanitize_optional_env_value(args.proxy),
        error_policy: sanitize_optional_env_value(args.error_policy)
            .map(|raw| raw.parse::<ErrorPolicy>())
            .transpose()?,
    };

    let mut merged = GlobalConfigPatch::default();
    merged.overlay(patch);
    merged.into_config().context("finalize config")
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Some PaaS systems may inject unresolved placeholders like `${VAR}`.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u64>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_model_map(value: Option<String>) -> anyhow::Result<Vec<(String, String)>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| ModelAliasTable::parse_entry(entry).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load_config(CliArgs::default()).unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn placeholders_and_blanks_are_treated_as_unset() {
        let config = load_config(CliArgs {
            host: Some("${ARKPROXY_HOST}".to_string()),
            port: Some("   ".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn model_map_extends_reference_table() {
        let config = load_config(CliArgs {
            model_map: Some("gpt-4=ep-a, gpt-4o = ep-b,".to_string()),
            default_model: Some("ep-default".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.models.resolve("gpt-4"), "ep-a");
        assert_eq!(config.models.resolve("gpt-4o"), "ep-b");
        assert_eq!(config.models.resolve("deepseek-r1"), "ep-20250218144306-sshj5");
        assert_eq!(config.models.resolve("other"), "ep-default");
    }

    #[test]
    fn invalid_values_fail_with_context() {
        let err = load_config(CliArgs {
            port: Some("http".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("ARKPROXY_PORT"));

        assert!(
            load_config(CliArgs {
                model_map: Some("gpt-4".to_string()),
                ..Default::default()
            })
            .is_err()
        );
        assert!(
            load_config(CliArgs {
                error_policy: Some("lenient".to_string()),
                ..Default::default()
            })
            .is_err()
        );
    }

    #[test]
    fn strict_policy_and_timeouts_parse() {
        let config = load_config(CliArgs {
            error_policy: Some("strict".to_string()),
            upstream_timeout_secs: Some("60".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.error_policy, ErrorPolicy::Strict);
        assert_eq!(config.upstream_timeout_secs, 60);
    }
}
