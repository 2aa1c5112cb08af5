//! Lexireply - 关键词词库自动回复引擎
//!
//! 根据词库规则匹配聊天消息，检查冷却后解析回复模板中的占位符，生成回复。

pub mod auto_reply;
pub mod logging;
