//! 关键词匹配器
//!
//! 在启用的规则中查找与消息匹配的候选规则，并按确定性顺序排序。
//!
//! # 功能
//!
//! - Exact / Contains / Prefix / Pattern 四种匹配模式
//! - 默认大小写不敏感，默认去除首尾空白
//! - 每条规则取最具体（最长）的命中关键词
//! - 排序：具体程度降序，相同时规则 ID 升序
//! - 格式错误的模式不匹配，返回诊断信息
//! - 编译后的模式带缓存
//!
//! # 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use lexireply::auto_reply::{KeywordMatcher, Rule, Segment};
//!
//! let matcher = KeywordMatcher::new();
//! let rules = vec![
//!     Arc::new(Rule::new(1, ["help"], vec![Segment::text("A")])),
//!     Arc::new(Rule::new(2, ["help me"], vec![Segment::text("B")])),
//! ];
//!
//! let candidates = matcher.find_candidates("please help me now", &rules);
//! assert_eq!(candidates[0].rule.id.get(), 2);
//! assert_eq!(candidates[1].rule.id.get(), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auto_reply::message::Diagnostic;
use crate::auto_reply::pattern::{fold_str, CompiledPattern, PatternError};
use crate::auto_reply::types::{MatchMode, Rule};

/// 匹配选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherOptions {
    /// 是否区分大小写
    pub case_sensitive: bool,
    /// 是否去除消息首尾空白
    pub trim_whitespace: bool,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            trim_whitespace: true,
        }
    }
}

/// 匹配候选
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    /// 命中的规则
    pub rule: Arc<Rule>,
    /// 命中的关键词（规则中的原始写法）
    pub matched_keyword: String,
    /// 具体程度，越大越优先
    pub specificity: usize,
    /// 模式捕获内容
    pub captures: BTreeMap<u8, String>,
}

/// 匹配报告
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub candidates: Vec<MatchCandidate>,
    pub diagnostics: Vec<Diagnostic>,
}

type CachedPattern = Result<Arc<CompiledPattern>, PatternError>;

/// 关键词匹配器
pub struct KeywordMatcher {
    options: MatcherOptions,
    /// (模式, 是否区分大小写) → 编译结果，错误也缓存，避免重复告警
    pattern_cache: DashMap<(String, bool), CachedPattern>,
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordMatcher {
    /// 创建使用默认选项的匹配器
    pub fn new() -> Self {
        Self::with_options(MatcherOptions::default())
    }

    pub fn with_options(options: MatcherOptions) -> Self {
        Self {
            options,
            pattern_cache: DashMap::new(),
        }
    }

    pub fn options(&self) -> MatcherOptions {
        self.options
    }

    /// 查找候选规则
    ///
    /// # 参数
    ///
    /// * `message` - 消息文本
    /// * `rules` - 启用的规则快照
    ///
    /// # 返回值
    ///
    /// 按优先级排序的候选列表，没有匹配时为空。
    pub fn find_candidates(&self, message: &str, rules: &[Arc<Rule>]) -> Vec<MatchCandidate> {
        self.find_candidates_with_report(message, rules).candidates
    }

    /// 查找候选规则，同时返回诊断信息
    pub fn find_candidates_with_report(&self, message: &str, rules: &[Arc<Rule>]) -> MatchReport {
        let text = if self.options.trim_whitespace {
            message.trim()
        } else {
            message
        };
        let folded = self.fold(text);

        let mut report = MatchReport::default();
        for rule in rules.iter().filter(|r| r.enabled) {
            let mut best: Option<(usize, &String, BTreeMap<u8, String>)> = None;

            for keyword in &rule.keywords {
                if keyword.trim().is_empty() {
                    continue;
                }
                let hit = match rule.match_mode {
                    MatchMode::Pattern => match self.compiled(keyword) {
                        Ok(pattern) => pattern
                            .match_text(text)
                            .map(|m| (pattern.literal_count(), m.captures)),
                        Err(e) => {
                            report.diagnostics.push(Diagnostic::MalformedPattern {
                                rule_id: rule.id,
                                pattern: keyword.clone(),
                                reason: e.to_string(),
                            });
                            None
                        }
                    },
                    mode => {
                        let needle = self.fold(keyword);
                        let matched = match mode {
                            MatchMode::Exact => folded == needle,
                            MatchMode::Prefix => folded.starts_with(&needle),
                            _ => folded.contains(&needle),
                        };
                        matched.then(|| (keyword.chars().count(), BTreeMap::new()))
                    }
                };

                if let Some((specificity, captures)) = hit {
                    // 关键词按字典序遍历，只有更具体时才替换，保证结果确定
                    if best.as_ref().map_or(true, |(s, _, _)| specificity > *s) {
                        best = Some((specificity, keyword, captures));
                    }
                }
            }

            if let Some((specificity, keyword, captures)) = best {
                report.candidates.push(MatchCandidate {
                    rule: Arc::clone(rule),
                    matched_keyword: keyword.clone(),
                    specificity,
                    captures,
                });
            }
        }

        report.candidates.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then_with(|| a.rule.id.cmp(&b.rule.id))
        });
        report
    }

    fn fold(&self, text: &str) -> String {
        if self.options.case_sensitive {
            text.to_string()
        } else {
            fold_str(text)
        }
    }

    /// 编译模式（带缓存）
    fn compiled(&self, pattern: &str) -> CachedPattern {
        let key = (pattern.to_string(), self.options.case_sensitive);
        if let Some(cached) = self.pattern_cache.get(&key) {
            return cached.value().clone();
        }
        let compiled = CompiledPattern::compile(pattern, key.1).map(Arc::new);
        if let Err(e) = &compiled {
            warn!("模式编译失败: {} - {}", pattern, e);
        }
        self.pattern_cache.insert(key, compiled.clone());
        compiled
    }

    /// 清空模式缓存
    pub fn clear_cache(&self) {
        self.pattern_cache.clear();
    }

    pub fn cached_patterns(&self) -> usize {
        self.pattern_cache.len()
    }
}
