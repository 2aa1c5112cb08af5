//! 关键词通配符模式
//!
//! Pattern 模式关键词使用的受限通配符语言，模式两端锚定：
//! - `*` 通配符：匹配任意数量的任意字符（包括零个）
//! - `?` 通配符：匹配单个任意字符
//! - `[n.K]` 捕获槽（K 为 1-9）：匹配至少一个字符，并把匹配内容存入槽 K
//! - `\` 转义下一个字符
//!
//! 匹配采用迭代回溯，只保留最后一个星号作为回溯点，
//! 时间复杂度为 O(文本长度 × 模式长度)，不会出现灾难性回溯。
//!
//! # 示例
//!
//! ```
//! use lexireply::auto_reply::pattern::CompiledPattern;
//!
//! let pattern = CompiledPattern::compile("[n.1]说[n.2]", false).unwrap();
//! let matched = pattern.match_text("小明说你好").unwrap();
//! assert_eq!(matched.capture(1), Some("小明"));
//! assert_eq!(matched.capture(2), Some("你好"));
//! ```

use std::collections::BTreeMap;

/// 模式最大字符数
pub const MAX_PATTERN_CHARS: usize = 256;

/// 单个模式允许的最大通配符数
pub const MAX_WILDCARDS: usize = 16;

/// 模式编译错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error("pattern has {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("pattern has {count} wildcards, limit is {max}")]
    TooManyWildcards { count: usize, max: usize },
    #[error("pattern ends with a dangling escape")]
    TrailingEscape,
    #[error("capture group starting at character {position} is not closed")]
    UnterminatedCapture { position: usize },
    #[error("invalid capture slot {0:?}, expected 1-9")]
    InvalidSlot(String),
    #[error("capture slot {0} is used more than once")]
    DuplicateSlot(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    Run { min: usize, slot: Option<u8> },
}

/// 编译后的模式
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    tokens: Vec<Token>,
    case_sensitive: bool,
    literal_count: usize,
}

/// 模式匹配结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMatch {
    /// 捕获槽内容，按槽号索引
    pub captures: BTreeMap<u8, String>,
}

impl PatternMatch {
    pub fn capture(&self, slot: u8) -> Option<&str> {
        self.captures.get(&slot).map(String::as_str)
    }
}

/// 单字符大小写折叠
///
/// 每个字符只映射到一个字符，保证折叠前后下标一一对应。
pub(crate) fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

pub(crate) fn fold_str(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

impl CompiledPattern {
    /// 编译模式
    ///
    /// # 参数
    ///
    /// * `pattern` - 模式字符串
    /// * `case_sensitive` - 是否区分大小写
    ///
    /// # 返回值
    ///
    /// 模式格式错误时返回 `PatternError`。
    pub fn compile(pattern: &str, case_sensitive: bool) -> Result<Self, PatternError> {
        let chars: Vec<char> = pattern.chars().collect();
        if chars.is_empty() {
            return Err(PatternError::Empty);
        }
        if chars.len() > MAX_PATTERN_CHARS {
            return Err(PatternError::TooLong {
                len: chars.len(),
                max: MAX_PATTERN_CHARS,
            });
        }

        let mut tokens = Vec::new();
        let mut used_slots = [false; 10];
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' => {
                    let escaped = *chars.get(i + 1).ok_or(PatternError::TrailingEscape)?;
                    tokens.push(Token::Literal(escaped));
                    i += 2;
                }
                '*' => {
                    tokens.push(Token::Run {
                        min: 0,
                        slot: None,
                    });
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyOne);
                    i += 1;
                }
                '[' if chars.get(i + 1) == Some(&'n') && chars.get(i + 2) == Some(&'.') => {
                    let close = chars[i + 3..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|offset| i + 3 + offset)
                        .ok_or(PatternError::UnterminatedCapture { position: i })?;
                    let digits: String = chars[i + 3..close].iter().collect();
                    let slot = match digits.parse::<u8>() {
                        Ok(slot @ 1..=9) if digits.len() == 1 => slot,
                        _ => return Err(PatternError::InvalidSlot(digits)),
                    };
                    if used_slots[slot as usize] {
                        return Err(PatternError::DuplicateSlot(slot));
                    }
                    used_slots[slot as usize] = true;
                    tokens.push(Token::Run {
                        min: 1,
                        slot: Some(slot),
                    });
                    i = close + 1;
                }
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        let wildcards = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Literal(_)))
            .count();
        if wildcards > MAX_WILDCARDS {
            return Err(PatternError::TooManyWildcards {
                count: wildcards,
                max: MAX_WILDCARDS,
            });
        }

        if !case_sensitive {
            for token in &mut tokens {
                if let Token::Literal(c) = token {
                    *c = fold_char(*c);
                }
            }
        }

        let literal_count = tokens.len() - wildcards;
        Ok(Self {
            source: pattern.to_string(),
            tokens,
            case_sensitive,
            literal_count,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 字面字符数，用作匹配优先级
    pub fn literal_count(&self) -> usize {
        self.literal_count
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.match_text(text).is_some()
    }

    /// 匹配整段文本
    ///
    /// # 返回值
    ///
    /// 匹配成功时返回捕获内容，捕获内容取自原始文本（不做大小写折叠）。
    pub fn match_text(&self, text: &str) -> Option<PatternMatch> {
        let original: Vec<char> = text.chars().collect();
        let folded: Vec<char> = if self.case_sensitive {
            original.clone()
        } else {
            original.iter().copied().map(fold_char).collect()
        };

        let spans = self.match_spans(&folded)?;

        let mut result = PatternMatch::default();
        for (token, span) in self.tokens.iter().zip(spans) {
            if let Token::Run {
                slot: Some(slot), ..
            } = token
            {
                let (start, end) = span;
                result
                    .captures
                    .insert(*slot, original[start..end].iter().collect());
            }
        }
        Some(result)
    }

    /// 迭代回溯匹配，返回每个 token 覆盖的文本区间
    fn match_spans(&self, value: &[char]) -> Option<Vec<(usize, usize)>> {
        let tokens = &self.tokens;
        let mut spans = vec![(0usize, 0usize); tokens.len()];
        let mut v_idx = 0;
        let mut p_idx = 0;
        // (星号所在 token 下标, 星号当前结束位置)
        let mut backtrack: Option<(usize, usize)> = None;

        while v_idx < value.len() {
            let advanced = match tokens.get(p_idx) {
                Some(Token::Literal(c)) if *c == value[v_idx] => {
                    spans[p_idx] = (v_idx, v_idx + 1);
                    v_idx += 1;
                    p_idx += 1;
                    true
                }
                Some(Token::AnyOne) => {
                    spans[p_idx] = (v_idx, v_idx + 1);
                    v_idx += 1;
                    p_idx += 1;
                    true
                }
                Some(Token::Run { min, .. }) if v_idx + min <= value.len() => {
                    // 先消耗最少字符，再记录回溯点
                    let end = v_idx + min;
                    spans[p_idx] = (v_idx, end);
                    backtrack = Some((p_idx, end));
                    v_idx = end;
                    p_idx += 1;
                    true
                }
                _ => false,
            };
            if advanced {
                continue;
            }

            // 回溯到上一个星号，让它多吞一个字符
            let (star, end) = backtrack?;
            if end >= value.len() {
                return None;
            }
            let end = end + 1;
            backtrack = Some((star, end));
            spans[star].1 = end;
            p_idx = star + 1;
            v_idx = end;
        }

        // 剩余 token 必须都是可以为空的星号
        while let Some(token) = tokens.get(p_idx) {
            match token {
                Token::Run { min: 0, .. } => {
                    spans[p_idx] = (value.len(), value.len());
                    p_idx += 1;
                }
                _ => return None,
            }
        }

        Some(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, value: &str) -> bool {
        CompiledPattern::compile(pattern, true)
            .map(|p| p.is_match(value))
            .unwrap_or(false)
    }

    #[test]
    fn test_exact_match() {
        assert!(matches("hello", "hello"));
        assert!(!matches("hello", "hello!"));
        assert!(!matches("hello", "hell"));
    }

    #[test]
    fn test_star() {
        assert!(matches("file_*", "file_read"));
        assert!(matches("*_read", "file_read"));
        assert!(matches("f*d", "file_read"));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(matches("abc*", "abc"));
        assert!(matches("*", ""));
        assert!(matches("*", "anything"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("ba?h", "bash"));
        assert!(!matches("ba?h", "bah"));
        assert!(!matches("ba?h", "baash"));
        assert!(matches("??", "你好"));
    }

    #[test]
    fn test_capture_slots() {
        let pattern = CompiledPattern::compile("[n.1]说[n.2]", true).unwrap();
        let m = pattern.match_text("小明说你好").unwrap();
        assert_eq!(m.capture(1), Some("小明"));
        assert_eq!(m.capture(2), Some("你好"));
        assert_eq!(m.capture(3), None);

        // 捕获槽至少匹配一个字符
        assert!(pattern.match_text("说你好").is_none());
        assert!(pattern.match_text("小明说").is_none());
    }

    #[test]
    fn test_capture_is_shortest_for_leading_slot() {
        let pattern = CompiledPattern::compile("[n.1]=[n.2]", true).unwrap();
        let m = pattern.match_text("a=b=c").unwrap();
        assert_eq!(m.capture(1), Some("a"));
        assert_eq!(m.capture(2), Some("b=c"));
    }

    #[test]
    fn test_capture_keeps_original_case() {
        let pattern = CompiledPattern::compile("Say [n.1]", false).unwrap();
        let m = pattern.match_text("say HeLLo").unwrap();
        assert_eq!(m.capture(1), Some("HeLLo"));
    }

    #[test]
    fn test_case_sensitivity() {
        let insensitive = CompiledPattern::compile("HeLLo*", false).unwrap();
        assert!(insensitive.is_match("hello world"));
        let sensitive = CompiledPattern::compile("HeLLo*", true).unwrap();
        assert!(!sensitive.is_match("hello world"));
    }

    #[test]
    fn test_escapes() {
        assert!(matches(r"what\?", "what?"));
        assert!(!matches(r"what\?", "whatx"));
        assert!(matches(r"\*star\*", "*star*"));
        assert!(matches(r"\[n.1]", "[n.1]"));
    }

    #[test]
    fn test_plain_bracket_is_literal() {
        assert!(matches("[ok]", "[ok]"));
        assert!(matches("[n]", "[n]"));
    }

    #[test]
    fn test_malformed_patterns() {
        assert_eq!(CompiledPattern::compile("", true).unwrap_err(), PatternError::Empty);
        assert_eq!(
            CompiledPattern::compile("abc\\", true).unwrap_err(),
            PatternError::TrailingEscape
        );
        assert!(matches!(
            CompiledPattern::compile("[n.1", true).unwrap_err(),
            PatternError::UnterminatedCapture { position: 0 }
        ));
        assert!(matches!(
            CompiledPattern::compile("[n.0]", true).unwrap_err(),
            PatternError::InvalidSlot(_)
        ));
        assert!(matches!(
            CompiledPattern::compile("[n.12]", true).unwrap_err(),
            PatternError::InvalidSlot(_)
        ));
        assert!(matches!(
            CompiledPattern::compile("[n.x]", true).unwrap_err(),
            PatternError::InvalidSlot(_)
        ));
        assert_eq!(
            CompiledPattern::compile("[n.1] [n.1]", true).unwrap_err(),
            PatternError::DuplicateSlot(1)
        );
    }

    #[test]
    fn test_limits() {
        let long = "a".repeat(MAX_PATTERN_CHARS + 1);
        assert!(matches!(
            CompiledPattern::compile(&long, true).unwrap_err(),
            PatternError::TooLong { .. }
        ));
        let stars = "*a".repeat(MAX_WILDCARDS + 1);
        assert!(matches!(
            CompiledPattern::compile(&stars, true).unwrap_err(),
            PatternError::TooManyWildcards { .. }
        ));
    }

    #[test]
    fn test_pathological_input_terminates() {
        let pattern = "*a".repeat(MAX_WILDCARDS);
        let compiled = CompiledPattern::compile(&pattern, true).unwrap();
        let value = format!("{}b", "a".repeat(2000));
        assert!(!compiled.is_match(&value));
    }

    #[test]
    fn test_literal_count() {
        let p = CompiledPattern::compile("hi [n.1]!", true).unwrap();
        assert_eq!(p.literal_count(), 4);
        let p = CompiledPattern::compile(r"\*", true).unwrap();
        assert_eq!(p.literal_count(), 1);
    }
}
