//! 基础类型定义
//!
//! 定义词库规则、匹配模式、冷却作用域和回复片段。
//!
//! # 主要类型
//!
//! - [`RuleId`] - 规则 ID，数值越小表示注册越早
//! - [`MatchMode`] - 关键词匹配模式
//! - [`CooldownScope`] - 冷却作用域及 scope key 推导
//! - [`Segment`] / [`ResolvedSegment`] - 回复模板片段与解析后的片段
//! - [`Rule`] / [`RulePatch`] / [`RuleFilter`] - 规则、局部更新和列表过滤

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auto_reply::lexicon::LexiconError;
use crate::auto_reply::pattern::CompiledPattern;

/// 规则 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl RuleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for RuleId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// 关键词匹配模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// 消息与关键词完全相同
    Exact,
    /// 消息包含关键词
    #[default]
    Contains,
    /// 消息以关键词开头
    Prefix,
    /// 通配符模式，两端锚定
    Pattern,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Contains => "contains",
            MatchMode::Prefix => "prefix",
            MatchMode::Pattern => "pattern",
        }
    }
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchMode::Exact),
            "contains" => Ok(MatchMode::Contains),
            "prefix" => Ok(MatchMode::Prefix),
            "pattern" => Ok(MatchMode::Pattern),
            other => Err(format!("unknown match mode: {}", other)),
        }
    }
}

/// 会话身份
///
/// 描述一条消息来自谁、来自哪里，用于推导冷却 scope key。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// 发送者 ID
    pub user_id: String,
    /// 群组 ID，私聊时为 None
    #[serde(default)]
    pub group_id: Option<String>,
}

impl SessionIdentity {
    pub fn direct(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: None,
        }
    }

    pub fn group(group_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: Some(group_id.into()),
        }
    }
}

/// 冷却作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// 全局共享一个冷却
    Global,
    /// 每个群组（私聊按用户）一个冷却
    PerGroup,
    /// 群内每个用户一个冷却
    #[default]
    PerUser,
}

impl CooldownScope {
    /// 根据会话身份推导 scope key
    ///
    /// ID 前带字节长度，ID 中含有 `:` 时不同会话也不会得到同一个 key。
    ///
    /// # 返回值
    ///
    /// - `Global` → `"global"`
    /// - `PerGroup` → `"group:{len}:{gid}"`，私聊为 `"direct:{len}:{uid}"`
    /// - `PerUser` → `"group:{len}:{gid}:user:{len}:{uid}"`，私聊为 `"direct:{len}:{uid}"`
    pub fn scope_key(&self, session: &SessionIdentity) -> String {
        let user = &session.user_id;
        match (self, session.group_id.as_deref()) {
            (CooldownScope::Global, _) => "global".to_string(),
            (CooldownScope::PerGroup, Some(group)) => format!("group:{}:{}", group.len(), group),
            (CooldownScope::PerUser, Some(group)) => format!(
                "group:{}:{}:user:{}:{}",
                group.len(),
                group,
                user.len(),
                user
            ),
            (_, None) => format!("direct:{}:{}", user.len(), user),
        }
    }
}

/// 冷却方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPolicy {
    /// 固定时长，取规则的 `cooldown_seconds`
    #[default]
    Fixed,
    /// 冷却到配置时区的下一个零点
    UntilMidnight,
}

impl CooldownPolicy {
    pub fn is_fixed(&self) -> bool {
        *self == CooldownPolicy::Fixed
    }
}

impl std::str::FromStr for CooldownScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "global" => Ok(CooldownScope::Global),
            "per_group" | "group" => Ok(CooldownScope::PerGroup),
            "per_user" | "user" => Ok(CooldownScope::PerUser),
            other => Err(format!("unknown cooldown scope: {}", other)),
        }
    }
}

/// 回复模板片段
///
/// 片段中的字符串可以包含 `{...}` 占位符。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    /// 文本
    Text(String),
    /// 图片路径或 URL
    Image(String),
    /// @提及，空字符串表示发送者
    Mention(String),
    /// 表情 ID
    Face(String),
    /// 引用回复，None 表示触发消息
    Quote(Option<String>),
    /// 语音路径或 URL
    Voice(String),
    /// 戳一戳，空字符串表示发送者
    Poke(String),
}

impl Segment {
    pub fn text(value: impl Into<String>) -> Self {
        Segment::Text(value.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::Image(_) => "image",
            Segment::Mention(_) => "mention",
            Segment::Face(_) => "face",
            Segment::Quote(_) => "quote",
            Segment::Voice(_) => "voice",
            Segment::Poke(_) => "poke",
        }
    }
}

/// 解析后的回复片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResolvedSegment {
    Text(String),
    Image(String),
    Mention(String),
    Face(String),
    Quote(String),
    Voice(String),
    Poke(String),
}

/// 词库规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// 规则 ID
    pub id: RuleId,
    /// 关键词集合
    pub keywords: BTreeSet<String>,
    /// 匹配模式
    #[serde(default)]
    pub match_mode: MatchMode,
    /// 主回复模板
    pub response_template: Vec<Segment>,
    /// 备选回复模板，触发时与主模板一起随机选取
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<Vec<Segment>>,
    /// 冷却时间（秒），0 表示不冷却
    #[serde(default)]
    pub cooldown_seconds: u64,
    /// 冷却方式，`UntilMidnight` 时忽略 `cooldown_seconds`
    #[serde(default, skip_serializing_if = "CooldownPolicy::is_fixed")]
    pub cooldown_policy: CooldownPolicy,
    /// 冷却作用域
    #[serde(default)]
    pub scope: CooldownScope,
    /// 是否只对管理员生效
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub admin_only: bool,
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// 创建新规则
    ///
    /// 默认 Contains 模式、PerUser 作用域、无冷却、启用。
    pub fn new<I, S>(id: u64, keywords: I, response_template: Vec<Segment>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: RuleId(id),
            keywords: keywords.into_iter().map(Into::into).collect(),
            match_mode: MatchMode::default(),
            response_template,
            alternates: Vec::new(),
            cooldown_seconds: 0,
            cooldown_policy: CooldownPolicy::default(),
            scope: CooldownScope::default(),
            admin_only: false,
            enabled: true,
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// 冷却到下一个零点
    pub fn with_cooldown_until_midnight(mut self) -> Self {
        self.cooldown_policy = CooldownPolicy::UntilMidnight;
        self
    }

    pub fn with_scope(mut self, scope: CooldownScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_admin_only(mut self, admin_only: bool) -> Self {
        self.admin_only = admin_only;
        self
    }

    pub fn with_alternate(mut self, template: Vec<Segment>) -> Self {
        self.alternates.push(template);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 所有可选回复模板（主模板在前）
    pub fn templates(&self) -> impl Iterator<Item = &Vec<Segment>> {
        std::iter::once(&self.response_template).chain(self.alternates.iter())
    }

    pub fn template_count(&self) -> usize {
        1 + self.alternates.len()
    }

    /// 规则是否有冷却
    pub fn has_cooldown(&self) -> bool {
        match self.cooldown_policy {
            CooldownPolicy::Fixed => self.cooldown_seconds > 0,
            CooldownPolicy::UntilMidnight => true,
        }
    }

    /// 规范化关键词
    ///
    /// 去除首尾空白；`fullwidth` 为 true 时把全角括号和冒号转换为半角。
    pub fn normalize_keywords(&mut self, fullwidth: bool) {
        self.keywords = self
            .keywords
            .iter()
            .map(|k| {
                let trimmed = k.trim();
                if fullwidth {
                    normalize_fullwidth(trimmed)
                } else {
                    trimmed.to_string()
                }
            })
            .collect();
    }

    /// 校验规则
    ///
    /// # 返回值
    ///
    /// 规则无效时返回 `LexiconError::InvalidRule`。
    pub fn validate(&self) -> Result<(), LexiconError> {
        if self.keywords.is_empty() {
            return Err(self.invalid("keyword set is empty"));
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(self.invalid("keyword is empty after trimming"));
        }
        if self.response_template.is_empty() {
            return Err(self.invalid("response template is empty"));
        }
        if self.alternates.iter().any(Vec::is_empty) {
            return Err(self.invalid("alternate response template is empty"));
        }
        if self.match_mode == MatchMode::Pattern {
            for keyword in &self.keywords {
                CompiledPattern::compile(keyword, true).map_err(|e| {
                    self.invalid(&format!("pattern {:?} is malformed: {}", keyword, e))
                })?;
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> LexiconError {
        LexiconError::InvalidRule(format!("rule {}: {}", self.id, reason))
    }

    /// 应用局部更新
    pub fn apply(&mut self, patch: RulePatch) {
        if let Some(keywords) = patch.keywords {
            self.keywords = keywords;
        }
        if let Some(mode) = patch.match_mode {
            self.match_mode = mode;
        }
        if let Some(template) = patch.response_template {
            self.response_template = template;
        }
        if let Some(alternates) = patch.alternates {
            self.alternates = alternates;
        }
        if let Some(seconds) = patch.cooldown_seconds {
            self.cooldown_seconds = seconds;
        }
        if let Some(policy) = patch.cooldown_policy {
            self.cooldown_policy = policy;
        }
        if let Some(scope) = patch.scope {
            self.scope = scope;
        }
        if let Some(admin_only) = patch.admin_only {
            self.admin_only = admin_only;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

/// 全角括号、冒号转半角
pub fn normalize_fullwidth(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '【' => '[',
            '】' => ']',
            '（' => '(',
            '）' => ')',
            '｛' => '{',
            '｝' => '}',
            '：' => ':',
            other => other,
        })
        .collect()
}

/// 规则局部更新
///
/// 为 None 的字段保持不变。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub keywords: Option<BTreeSet<String>>,
    #[serde(default)]
    pub match_mode: Option<MatchMode>,
    #[serde(default)]
    pub response_template: Option<Vec<Segment>>,
    #[serde(default)]
    pub alternates: Option<Vec<Vec<Segment>>>,
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
    #[serde(default)]
    pub cooldown_policy: Option<CooldownPolicy>,
    #[serde(default)]
    pub scope: Option<CooldownScope>,
    #[serde(default)]
    pub admin_only: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl RulePatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// 规则列表过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    /// 任一关键词包含该子串（大小写不敏感）
    pub keyword: Option<String>,
    pub enabled: Option<bool>,
    pub match_mode: Option<MatchMode>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &Rule) -> bool {
        if let Some(enabled) = self.enabled {
            if rule.enabled != enabled {
                return false;
            }
        }
        if let Some(mode) = self.match_mode {
            if rule.match_mode != mode {
                return false;
            }
        }
        if let Some(needle) = &self.keyword {
            let needle = needle.to_lowercase();
            if !rule
                .keywords
                .iter()
                .any(|k| k.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        true
    }
}
