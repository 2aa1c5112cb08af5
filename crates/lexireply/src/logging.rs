//! 日志初始化
//!
//! 基于 `tracing-subscriber` 的 fmt 输出，过滤规则优先读取环境变量
//! `LEXIREPLY_LOG`，未设置时使用配置的级别。

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// 日志过滤环境变量
pub const LOG_ENV_VAR: &str = "LEXIREPLY_LOG";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// 日志选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    /// 默认过滤规则，例如 `info` 或 `lexireply=debug`
    pub level: String,
    /// 是否输出 JSON
    pub json: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// 构造过滤器：环境变量优先
pub fn build_filter(options: &LoggingOptions) -> Result<EnvFilter, LoggingError> {
    let filter = std::env::var(LOG_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| options.level.clone());
    EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter {
        filter,
        reason: e.to_string(),
    })
}

/// 安装全局日志订阅器
///
/// 只能成功调用一次，重复调用返回 `AlreadyInitialized`。
pub fn init_logging(options: &LoggingOptions) -> Result<(), LoggingError> {
    let env_filter = build_filter(options)?;

    let result = if options.json {
        Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|_| LoggingError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter() {
        if std::env::var(LOG_ENV_VAR).is_ok() {
            return;
        }
        let options = LoggingOptions {
            level: "lexireply=notalevel".to_string(),
            json: false,
        };
        assert!(matches!(
            build_filter(&options),
            Err(LoggingError::InvalidFilter { .. })
        ));
        assert!(build_filter(&LoggingOptions::default()).is_ok());
    }
}
