//! 关键词自动回复模块
//!
//! 词库驱动的自动回复：消息命中规则的关键词后，经过冷却检查，
//! 解析回复模板中的占位符并返回回复片段。
//!
//! # 主要组件
//!
//! - [`types`] - 规则、片段、匹配模式和冷却作用域
//! - [`clock`] - 时钟抽象
//! - [`pattern`] - 通配符模式
//! - [`template`] - 内联片段语法
//! - [`lexicon`] - 词库存储
//! - [`legacy`] - 旧词库导入
//! - [`keyword_matcher`] - 关键词匹配器
//! - [`variables`] - 占位符解析
//! - [`calc`] - 算术表达式求值
//! - [`cooldown`] - 冷却时间追踪器
//! - [`ignore`] - 忽略列表
//! - [`message`] - 入站消息和回复结果
//! - [`config`] - 配置持久化
//! - [`engine`] - 回复引擎
//!
//! # 示例
//!
//! ```rust,ignore
//! use lexireply::auto_reply::{IncomingMessage, NoMatch, ReplyEngine};
//!
//! match engine.handle(&IncomingMessage::group("g1", "alice", "天气")) {
//!     Ok(reply) => send(reply.segments),
//!     Err(NoMatch::Suppressed { remaining, .. }) => {
//!         // 可以提示用户等待 remaining
//!     }
//!     Err(_) => {}
//! }
//! ```

// 基础类型定义
pub mod types;
// 时钟
pub mod clock;
// 通配符模式
pub mod pattern;
// 内联片段语法
pub mod template;
// 词库存储
pub mod lexicon;
// 旧词库导入
pub mod legacy;
// 关键词匹配器
pub mod keyword_matcher;
// 占位符解析
pub mod variables;
// 算术表达式
pub mod calc;
// 冷却时间追踪器
pub mod cooldown;
// 忽略列表
pub mod ignore;
// 消息和结果类型
pub mod message;
// 配置持久化
pub mod config;
// 回复引擎
pub mod engine;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigResult, ReplyConfig, DEFAULT_LEXICON};
pub use cooldown::{CooldownCheckResult, CooldownEntry, CooldownTracker, CooldownWindow};
pub use engine::{EngineStats, ReplyEngine};
pub use ignore::IgnoreList;
pub use keyword_matcher::{KeywordMatcher, MatchCandidate, MatchReport, MatcherOptions};
pub use legacy::{LegacyImport, LegacyImportError};
pub use lexicon::{
    JsonFileBackend, LexiconBackend, LexiconDocument, LexiconError, LexiconResult, LexiconStore,
    MemoryBackend, StoreOptions,
};
pub use message::{Diagnostic, IncomingMessage, NoMatch, Reply};
pub use pattern::{CompiledPattern, PatternError};
pub use types::{
    CooldownPolicy, CooldownScope, MatchMode, ResolvedSegment, Rule, RuleFilter, RuleId, RulePatch, Segment,
    SessionIdentity,
};
pub use variables::{Resolution, ResolutionContext, VariableResolver};
