//! 聊天客户端配置模块
//!
//! - 配置文件 / 配置目录加载（`base.toml` + `overrides/*.toml`）
//! - 环境特定配置覆盖（`config/environments/{env}.toml`）
//! - 环境变量覆盖（后端地址、实时通道 key 等）

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 全局配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<ChatClientConfig> = OnceLock::new();

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// 每行一个 JSON 对象，便于日志采集
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            with_target: false,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// REST 后端配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// API 根地址（以 `/` 结尾）
    pub base_url: String,
    /// 单次请求超时（毫秒）
    pub timeout_ms: u64,
    /// 令牌刷新端点（相对 base_url）
    pub refresh_path: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            timeout_ms: 10_000,
            refresh_path: "auth/token/refresh/".to_string(),
        }
    }
}

impl RestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// API 根地址，补齐结尾的 `/` 以便拼接相对路径
    pub fn api_root(&self) -> Result<url::Url, url::ParseError> {
        let mut base = self.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        url::Url::parse(&base)
    }

    /// 令牌刷新端点
    pub fn refresh_url(&self) -> Result<url::Url, url::ParseError> {
        self.api_root()?.join(&self.refresh_path)
    }
}

/// 实时通道配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// 推送服务应用 key
    pub key: String,
    /// 集群（决定默认主机 `ws-<cluster>.pusher.com`）
    pub cluster: String,
    /// 显式 websocket 地址，优先于 cluster
    pub host: Option<String>,
    /// 私有频道授权端点，未配置时使用公开频道
    pub auth_endpoint: Option<String>,
    /// 频道名前缀
    pub channel_prefix: String,
    pub connect_timeout_ms: u64,
    pub subscribe_timeout_ms: u64,
    /// 空闲多久后发送 ping
    pub activity_timeout_ms: u64,
    /// ping 回复期限，超时即视为断线
    pub pong_timeout_ms: u64,
    /// 首次重连延迟
    pub reconnect_interval_ms: u64,
    /// 重连退避上限
    pub max_reconnect_delay_ms: u64,
    /// 最大重连次数，None 表示无限重试
    pub max_reconnect_attempts: Option<u32>,
    /// 每个订阅的事件信箱容量
    pub mailbox_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            cluster: "mt1".to_string(),
            host: None,
            auth_endpoint: None,
            channel_prefix: "private-".to_string(),
            connect_timeout_ms: 10_000,
            subscribe_timeout_ms: 10_000,
            activity_timeout_ms: 120_000,
            pong_timeout_ms: 30_000,
            reconnect_interval_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: None,
            mailbox_capacity: 256,
        }
    }
}

impl RealtimeConfig {
    /// websocket 连接地址（协议版本 7）
    pub fn socket_url(&self) -> String {
        let origin = match &self.host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("wss://ws-{}.pusher.com", self.cluster),
        };
        format!(
            "{origin}/app/{}?protocol=7&client=unimarket-chat&version={}",
            self.key,
            env!("CARGO_PKG_VERSION")
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_millis(self.activity_timeout_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

/// 聊天客户端配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChatClientConfig {
    pub rest: RestConfig,
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}

impl ChatClientConfig {
    /// 校验配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.rest.base_url.trim().is_empty() {
            return Err(anyhow!("rest.base_url must not be empty"));
        }
        url::Url::parse(&self.rest.base_url)
            .with_context(|| format!("invalid rest.base_url: {}", self.rest.base_url))?;
        if self.rest.timeout_ms == 0 {
            return Err(anyhow!("rest.timeout_ms must be greater than zero"));
        }
        if self.realtime.key.trim().is_empty() {
            return Err(anyhow!("realtime.key must be set"));
        }
        if self.realtime.connect_timeout_ms == 0 || self.realtime.subscribe_timeout_ms == 0 {
            return Err(anyhow!("realtime timeouts must be greater than zero"));
        }
        if self.realtime.activity_timeout_ms == 0 || self.realtime.pong_timeout_ms == 0 {
            return Err(anyhow!("realtime keepalive timeouts must be greater than zero"));
        }
        if self.realtime.mailbox_capacity == 0 {
            return Err(anyhow!("realtime.mailbox_capacity must be greater than zero"));
        }
        if self.realtime.max_reconnect_delay_ms < self.realtime.reconnect_interval_ms {
            return Err(anyhow!(
                "realtime.max_reconnect_delay_ms must not be below reconnect_interval_ms"
            ));
        }
        Ok(())
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if !self.rest.base_url.ends_with('/') {
            self.rest.base_url.push('/');
        }
        if self.realtime.cluster.is_empty() {
            self.realtime.cluster = "mt1".to_string();
        }
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static ChatClientConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
            warn!("failed to load environment config: {}", e);
        }
        ConfigManager::apply_env_overrides(&mut cfg);
        cfg.ensure_defaults();
        cfg
    })
}

/// 加载并校验配置
pub fn load_config_with_validation(path: Option<&str>) -> Result<&'static ChatClientConfig> {
    let cfg = load_config(path);
    cfg.validate().context("configuration validation failed")?;
    Ok(cfg)
}

/// 获取已加载的配置
pub fn app_config() -> Option<&'static ChatClientConfig> {
    APP_CONFIG.get()
}

fn load_with_fallback(candidates: &[PathBuf]) -> ChatClientConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    ChatClientConfig::default()
}

/// 从文件或目录加载配置（不含环境覆盖）
pub fn load_config_from_source(path: &Path) -> Result<ChatClientConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let mut cfg = if metadata.is_dir() {
        load_config_from_directory(path)?
    } else {
        load_config_from_file(path)?
    };
    cfg.ensure_defaults();
    Ok(cfg)
}

fn load_config_from_file(path: &Path) -> Result<ChatClientConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))
}

fn load_config_from_directory(path: &Path) -> Result<ChatClientConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;
    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("overrides"))?;

    merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))
}

fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))
}

/// 递归合并 TOML 值，overlay 覆盖 base
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
