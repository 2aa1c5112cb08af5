//! 消息和结果类型
//!
//! 定义入站消息、回复结果、未回复原因和诊断信息。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auto_reply::types::{ResolvedSegment, RuleId, SessionIdentity};

/// 入站消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// 消息 ID
    pub message_id: String,
    /// 消息内容
    pub text: String,
    /// 会话身份（发送者 + 群组）
    pub session: SessionIdentity,
    /// 发送者显示名称
    #[serde(default)]
    pub sender_name: Option<String>,
    /// 群组名称
    #[serde(default)]
    pub group_name: Option<String>,
    /// 机器人自身 ID
    #[serde(default)]
    pub bot_id: Option<String>,
    /// 随机种子，未设置时由引擎生成
    #[serde(default)]
    pub seed: Option<u64>,
}

impl IncomingMessage {
    /// 创建私聊消息
    pub fn direct(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(SessionIdentity::direct(user_id), text)
    }

    /// 创建群聊消息
    pub fn group(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(SessionIdentity::group(group_id, user_id), text)
    }

    pub fn new(session: SessionIdentity, text: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            session,
            sender_name: None,
            group_name: None,
            bot_id: None,
            seed: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = Some(name.into());
        self
    }

    pub fn with_bot_id(mut self, id: impl Into<String>) -> Self {
        self.bot_id = Some(id.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn sender_id(&self) -> &str {
        &self.session.user_id
    }

    pub fn group_id(&self) -> Option<&str> {
        self.session.group_id.as_deref()
    }
}

/// 诊断信息
///
/// 不影响回复结果，只用于记录和排查。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// 未知占位符，已替换为空字符串
    UnknownToken { token: String },
    /// 占位符参数错误或括号未闭合
    MalformedToken { token: String, reason: String },
    /// 格式错误的模式关键词，不参与匹配
    MalformedPattern {
        rule_id: RuleId,
        pattern: String,
        reason: String,
    },
}

/// 回复结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// 触发的规则
    pub rule_id: RuleId,
    /// 命中的关键词
    pub matched_keyword: String,
    /// 解析后的回复片段，按输出顺序
    pub segments: Vec<ResolvedSegment>,
    /// 解析过程中的诊断信息
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// 触发时间
    pub fired_at: DateTime<Utc>,
}

impl Reply {
    /// 拼接所有文本片段
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                ResolvedSegment::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// 未回复原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoMatch {
    /// 没有规则匹配
    #[error("no rule matched")]
    NoCandidate,
    /// 所有匹配的规则都在冷却中，附带最优规则的剩余时间
    #[error("rule {rule_id} is cooling down for {remaining:?}")]
    Suppressed { rule_id: RuleId, remaining: Duration },
    /// 群组或用户在忽略列表中
    #[error("message source is ignored")]
    Ignored,
    /// 规则匹配但回复中的条件不成立
    #[error("condition of rule {rule_id} is not met")]
    ConditionFailed { rule_id: RuleId },
}
