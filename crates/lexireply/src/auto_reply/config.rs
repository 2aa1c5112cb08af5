//! 配置持久化
//!
//! 自动回复引擎配置的加载和保存。
//!
//! # 功能
//!
//! - 从 JSON 文件加载配置，缺省字段使用默认值
//! - 文件不存在时使用默认配置
//! - 解析错误时记录日志并使用默认配置
//! - 支持重新加载（返回错误而不是回退）
//! - 校验配置并返回警告
//! - 声明额外的命名词库，以及群组和用户对词库的选择
//!
//! # 示例
//!
//! ```rust,ignore
//! use std::path::Path;
//! use lexireply::auto_reply::ReplyConfig;
//!
//! let config = ReplyConfig::load(Path::new("lexireply.json"));
//! for warning in config.validate() {
//!     eprintln!("{}", warning);
//! }
//! config.save(Path::new("lexireply.json"))?;
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auto_reply::ignore::IgnoreList;
use crate::auto_reply::keyword_matcher::MatcherOptions;
use crate::auto_reply::lexicon::StoreOptions;
use crate::auto_reply::types::{CooldownScope, MatchMode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 默认词库的名称，选择它等于不做选择
pub const DEFAULT_LEXICON: &str = "default";

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplyConfig {
    /// 关键词匹配是否区分大小写
    pub case_sensitive: bool,
    /// 匹配前是否去除消息首尾空白
    pub trim_whitespace: bool,
    /// 新规则的默认匹配模式
    pub default_match_mode: MatchMode,
    /// 新规则的默认冷却作用域
    pub default_scope: CooldownScope,
    /// 新规则的默认冷却时间（秒）
    pub default_cooldown_seconds: u64,
    /// 是否把关键词中的全角括号和冒号转换为半角
    pub normalize_fullwidth: bool,
    /// 词库读写超时（毫秒）
    pub store_timeout_ms: u64,
    /// 时间占位符使用的时区（IANA 名称）
    pub timezone: String,
    /// 词库文件路径，为空时由调用方决定
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexicon_path: Option<PathBuf>,
    /// 忽略的群组
    pub ignored_groups: Vec<String>,
    /// 忽略的用户
    pub ignored_users: Vec<String>,
    /// 管理员用户，只有他们能触发仅管理员规则
    pub admin_ids: Vec<String>,
    /// 额外的命名词库：名称到文件路径
    pub lexicons: BTreeMap<String, PathBuf>,
    /// 群组选用的词库：群组 ID 到词库名称
    pub group_lexicons: BTreeMap<String, String>,
    /// 用户选用的词库，优先于群组的选择
    pub user_lexicons: BTreeMap<String, String>,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            trim_whitespace: true,
            default_match_mode: MatchMode::default(),
            default_scope: CooldownScope::default(),
            default_cooldown_seconds: 0,
            normalize_fullwidth: false,
            store_timeout_ms: 5000,
            timezone: "UTC".to_string(),
            lexicon_path: None,
            ignored_groups: Vec::new(),
            ignored_users: Vec::new(),
            admin_ids: Vec::new(),
            lexicons: BTreeMap::new(),
            group_lexicons: BTreeMap::new(),
            user_lexicons: BTreeMap::new(),
        }
    }
}

impl ReplyConfig {
    /// 从文件加载配置
    ///
    /// 文件不存在或解析失败时返回默认配置。
    pub fn load(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(config) => {
                info!("Loaded reply config from {:?}", path);
                config
            }
            Err(ConfigError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Reply config file not found at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                error!(
                    "Failed to load reply config from {:?}: {}, using defaults",
                    path, e
                );
                Self::default()
            }
        }
    }

    fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 重新加载配置，失败时返回错误
    pub fn reload(path: &Path) -> ConfigResult<Self> {
        let config = Self::load_from_file(path)?;
        info!("Reloaded reply config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved reply config to {:?}", path);
        Ok(())
    }

    /// 校验配置
    ///
    /// # 返回值
    ///
    /// 警告列表，为空表示配置没有问题。
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.timezone.parse::<Tz>().is_err() {
            warnings.push(format!(
                "Unknown timezone {:?}, falling back to UTC",
                self.timezone
            ));
        }
        if self.store_timeout_ms == 0 {
            warnings.push("store_timeout_ms is 0, every store operation will time out".to_string());
        }
        if self.ignored_groups.iter().any(|g| g.trim().is_empty()) {
            warnings.push("ignored_groups contains an empty group ID".to_string());
        }
        if self.ignored_users.iter().any(|u| u.trim().is_empty()) {
            warnings.push("ignored_users contains an empty user ID".to_string());
        }
        if self.lexicons.contains_key(DEFAULT_LEXICON) {
            warnings.push(format!(
                "Lexicon name {:?} is reserved for the default lexicon",
                DEFAULT_LEXICON
            ));
        }
        let selections = self
            .group_lexicons
            .iter()
            .map(|(group, name)| ("group", group, name))
            .chain(self.user_lexicons.iter().map(|(user, name)| ("user", user, name)));
        for (kind, id, name) in selections {
            if name != DEFAULT_LEXICON && !self.lexicons.contains_key(name) {
                warnings.push(format!(
                    "{} {:?} selects unknown lexicon {:?}",
                    kind, id, name
                ));
            }
        }

        for warning in &warnings {
            warn!("Config validation warning: {}", warning);
        }

        warnings
    }

    /// 时间占位符使用的时区，无法识别时为 UTC
    pub fn timezone(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(Tz::UTC)
    }

    pub fn matcher_options(&self) -> MatcherOptions {
        MatcherOptions {
            case_sensitive: self.case_sensitive,
            trim_whitespace: self.trim_whitespace,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            timeout: Duration::from_millis(self.store_timeout_ms),
            normalize_fullwidth: self.normalize_fullwidth,
        }
    }

    pub fn ignore_list(&self) -> IgnoreList {
        IgnoreList::from_lists(self.ignored_groups.clone(), self.ignored_users.clone())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|admin| admin == user_id)
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
