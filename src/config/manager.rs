//! 配置管理器 - 负责环境选择和覆盖
//!
//! - 根据 UNIMARKET_ENV 加载环境特定配置
//! - 应用环境变量覆盖

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;
use tracing::debug;

use super::{ChatClientConfig, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称，未设置时为 "development"
    pub fn get_environment() -> String {
        env::var("UNIMARKET_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 加载 config/environments/{environment}.toml 并合并到基础配置
    pub fn load_environment_config(base_config: &mut ChatClientConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);
        Self::merge_environment_file(base_config, Path::new(&env_config_path))
    }

    /// 将单个环境配置文件合并到基础配置
    pub fn merge_environment_file(base_config: &mut ChatClientConfig, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read environment config: {}", path.display()))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("invalid environment config: {}", path.display()))?;

        let mut merged = Value::Table(Self::snapshot(base_config));
        merge_value(&mut merged, overlay);
        *base_config = merged
            .try_into()
            .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

        debug!(path = %path.display(), "environment config merged");
        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(config: &mut ChatClientConfig) {
        Self::apply_overrides(config, |name| env::var(name).ok());
    }

    pub(crate) fn apply_overrides(
        config: &mut ChatClientConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = lookup("UNIMARKET_API_URL") {
            config.rest.base_url = url;
        }
        if let Some(key) = lookup("UNIMARKET_REALTIME_KEY") {
            config.realtime.key = key;
        }
        if let Some(cluster) = lookup("UNIMARKET_REALTIME_CLUSTER") {
            config.realtime.cluster = cluster;
        }
        if let Some(host) = lookup("UNIMARKET_REALTIME_HOST") {
            config.realtime.host = Some(host);
        }
        if let Some(endpoint) = lookup("UNIMARKET_AUTH_ENDPOINT") {
            config.realtime.auth_endpoint = Some(endpoint);
        }
    }

    /// 配置转为 TOML 表，用于与环境配置合并
    fn snapshot(config: &ChatClientConfig) -> toml::Table {
        let mut rest = toml::Table::new();
        rest.insert("base_url".into(), config.rest.base_url.clone().into());
        rest.insert("timeout_ms".into(), (config.rest.timeout_ms as i64).into());
        rest.insert("refresh_path".into(), config.rest.refresh_path.clone().into());

        let rt = &config.realtime;
        let mut realtime = toml::Table::new();
        realtime.insert("key".into(), rt.key.clone().into());
        realtime.insert("cluster".into(), rt.cluster.clone().into());
        if let Some(host) = &rt.host {
            realtime.insert("host".into(), host.clone().into());
        }
        if let Some(endpoint) = &rt.auth_endpoint {
            realtime.insert("auth_endpoint".into(), endpoint.clone().into());
        }
        realtime.insert("channel_prefix".into(), rt.channel_prefix.clone().into());
        for (key, value) in [
            ("connect_timeout_ms", rt.connect_timeout_ms),
            ("subscribe_timeout_ms", rt.subscribe_timeout_ms),
            ("activity_timeout_ms", rt.activity_timeout_ms),
            ("pong_timeout_ms", rt.pong_timeout_ms),
            ("reconnect_interval_ms", rt.reconnect_interval_ms),
            ("max_reconnect_delay_ms", rt.max_reconnect_delay_ms),
            ("mailbox_capacity", rt.mailbox_capacity as u64),
        ] {
            realtime.insert(key.into(), (value as i64).into());
        }
        if let Some(attempts) = rt.max_reconnect_attempts {
            realtime.insert("max_reconnect_attempts".into(), i64::from(attempts).into());
        }

        let log = &config.logging;
        let mut logging = toml::Table::new();
        logging.insert("level".into(), log.level.clone().into());
        logging.insert("format".into(), log.format.as_str().into());
        logging.insert("with_target".into(), log.with_target.into());
        logging.insert("with_thread_ids".into(), log.with_thread_ids.into());
        logging.insert("with_file".into(), log.with_file.into());
        logging.insert("with_line_number".into(), log.with_line_number.into());

        let mut root = toml::Table::new();
        root.insert("rest".into(), Value::Table(rest));
        root.insert("realtime".into(), Value::Table(realtime));
        root.insert("logging".into(), Value::Table(logging));
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_replace_configured_values() {
        let vars: HashMap<&str, &str> = [
            ("UNIMARKET_API_URL", "https://api.example.com/api/"),
            ("UNIMARKET_REALTIME_KEY", "key-1"),
            ("UNIMARKET_AUTH_ENDPOINT", "https://api.example.com/api/chat/pusher/auth/"),
            ("UNIMARKET_REALTIME_CLUSTER", " "),
        ]
        .into_iter()
        .collect();

        let mut cfg = ChatClientConfig::default();
        ConfigManager::apply_overrides(&mut cfg, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.rest.base_url, "https://api.example.com/api/");
        assert_eq!(cfg.realtime.key, "key-1");
        assert_eq!(cfg.realtime.cluster, "mt1");
        assert!(cfg.realtime.auth_endpoint.is_some());
        assert!(cfg.realtime.host.is_none());
    }

    #[test]
    fn environment_file_merges_over_loaded_config() {
        let dir = std::env::temp_dir().join(format!(
            "unimarket-chat-env-{}",
            ulid::Ulid::new().to_string().to_lowercase()
        ));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("staging.toml");
        fs::write(&path, "[realtime]\nmax_reconnect_attempts = 5\n[rest]\ntimeout_ms = 2500\n")
            .unwrap();

        let mut cfg = ChatClientConfig::default();
        cfg.realtime.key = "abc".into();
        cfg.logging.format = LogFormat::Json;
        ConfigManager::merge_environment_file(&mut cfg, &path).unwrap();

        assert_eq!(cfg.realtime.max_reconnect_attempts, Some(5));
        assert_eq!(cfg.rest.timeout_ms, 2500);
        assert_eq!(cfg.realtime.key, "abc");
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }
}
