//! 日志初始化

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// 从配置初始化日志系统
///
/// 优先使用环境变量 `RUST_LOG`，未设置时使用配置中的级别；
/// 未提供配置时使用 [`LoggingConfig::default`]。`format = "json"` 时输出结构化 JSON。
///
/// # 示例
/// ```rust,ignore
/// use unimarket_chat::config::LoggingConfig;
/// use unimarket_chat::logging::init_tracing_from_config;
///
/// init_tracing_from_config(Some(&LoggingConfig {
///     level: "debug".to_string(),
///     ..LoggingConfig::default()
/// }));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(config.level.as_str()),
    };

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };

    // 已有全局 subscriber 时（例如测试中重复初始化）保持现状
    if installed.is_err() {
        tracing::debug!("tracing subscriber already initialised");
    }
}
