//! 旧词库导入
//!
//! 把旧版 `{"work": [{"关键词": {"r": [...], "s": 0}}]}` 格式的词库转换为规则。
//!
//! # 转换规则
//!
//! - `s = 1` 精确匹配，`s = 0` 模糊匹配；关键词含 `[n.K]` 时为模式匹配
//! - `s = 10` 为仅管理员可触发的精确匹配
//! - 第一条回复为主回复，其余为备选回复
//! - 回复中的旧变量转换为占位符：
//!
//! | 旧写法 | 占位符 |
//! |---|---|
//! | `[n.K]` / `[n.K.t]` | `{n.K}` / `{n.K.t}` |
//! | `[qq]` | `{sender_id}` |
//! | `[name]` / `[card]` | `{name}` |
//! | `[group]` | `{group_id}` |
//! | `[ai]` | `{bot_id}` |
//! | `[id]` / `[消息id]` | `{message_id}` |
//! | `(1-100)` | `{rand:1-100}` |
//! | `(Y)` `(M)` `(D)` `(h)` `(m)` `(s)` | `{year}` ... `{second}` |
//! | `(+1+2*3)` | `{calc:1+2*3}` |
//! | `(3600~)` | 规则冷却时间 3600 秒 |
//! | `(0~)` | 冷却到次日零点 |
//! | `{A>B}` / `{A<B}` / `{A=B}` | `{if:A>B}` 等条件 |
//!
//! 条件以外的 `{` `}` 会被转义为字面量。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auto_reply::template;
use crate::auto_reply::types::{MatchMode, Rule, Segment};

static CAPTURE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[n\.(\d+)(\.t)?\]").expect("Invalid capture regex"));

static VARIABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(qq|name|card|group|ai|id|消息id)\]").expect("Invalid variable regex")
});

static RANGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)-(\d+)\)").expect("Invalid range regex"));

static TIME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([YMDhms])\)").expect("Invalid time regex"));

static CALC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\+([^)]+)\)").expect("Invalid calc regex"));

static COOLDOWN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)~\)").expect("Invalid cooldown regex"));

static CONDITION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^{}]*?[><=][^{}]*?)\}").expect("Invalid condition regex")
});

/// 旧词库导入错误
#[derive(Debug, thiserror::Error)]
pub enum LegacyImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("legacy lexicon is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    work: Vec<BTreeMap<String, LegacyEntry>>,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    #[serde(default)]
    r: Vec<String>,
    #[serde(default)]
    s: i64,
}

/// 回复中的冷却指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CooldownDirective {
    Seconds(u64),
    UntilMidnight,
}

/// 跳过原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// 没有可用回复
    NoResponses,
    /// 未知匹配模式
    UnknownMode(i64),
    /// 转换后的规则无效
    Invalid(String),
}

/// 被跳过的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub keyword: String,
    pub reason: SkipReason,
}

/// 导入结果
#[derive(Debug, Clone, Default)]
pub struct LegacyImport {
    pub rules: Vec<Rule>,
    pub skipped: Vec<SkippedEntry>,
}

/// 导入旧词库，规则 ID 从 1 开始
pub fn import_document(json: &str) -> Result<Vec<Rule>, LegacyImportError> {
    Ok(import_with_report(json, 1)?.rules)
}

/// 从文件导入旧词库
pub fn import_file(path: &Path, first_id: u64) -> Result<LegacyImport, LegacyImportError> {
    let content = std::fs::read_to_string(path).map_err(|source| LegacyImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    import_with_report(&content, first_id)
}

/// 导入旧词库并报告跳过的条目
///
/// # 参数
///
/// * `json` - 旧词库文本
/// * `first_id` - 第一条规则的 ID，之后依次递增
pub fn import_with_report(json: &str, first_id: u64) -> Result<LegacyImport, LegacyImportError> {
    let document: LegacyDocument = serde_json::from_str(json)?;
    let mut import = LegacyImport::default();
    let mut next_id = first_id;

    for item in document.work {
        for (keyword, entry) in item {
            match convert_entry(next_id, &keyword, entry) {
                Ok(rule) => {
                    debug!("Imported legacy keyword {:?} as rule {}", keyword, rule.id);
                    import.rules.push(rule);
                    next_id = next_id.saturating_add(1);
                }
                Err(reason) => {
                    warn!("Skipped legacy keyword {:?}: {:?}", keyword, reason);
                    import.skipped.push(SkippedEntry { keyword, reason });
                }
            }
        }
    }
    Ok(import)
}

fn convert_entry(id: u64, keyword: &str, entry: LegacyEntry) -> Result<Rule, SkipReason> {
    let (mode, keyword) = if keyword.contains("[n.") {
        (MatchMode::Pattern, escape_pattern(keyword))
    } else {
        match entry.s {
            0 => (MatchMode::Contains, keyword.to_string()),
            1 | 10 => (MatchMode::Exact, keyword.to_string()),
            other => return Err(SkipReason::UnknownMode(other)),
        }
    };

    let mut cooldown = 0u64;
    let mut until_midnight = false;
    let mut templates: Vec<Vec<Segment>> = Vec::new();
    for response in &entry.r {
        let (text, directive) = convert_response(response);
        match directive {
            Some(CooldownDirective::Seconds(seconds)) => cooldown = cooldown.max(seconds),
            Some(CooldownDirective::UntilMidnight) => until_midnight = true,
            None => {}
        }
        let segments = template::parse_inline(&text);
        if !segments.is_empty() {
            templates.push(segments);
        }
    }

    let mut templates = templates.into_iter();
    let primary = templates.next().ok_or(SkipReason::NoResponses)?;
    let mut rule = Rule::new(id, [keyword], primary)
        .with_mode(mode)
        .with_cooldown(cooldown)
        .with_admin_only(entry.s == 10);
    if until_midnight {
        rule = rule.with_cooldown_until_midnight();
    }
    rule.alternates = templates.collect();
    rule.validate()
        .map_err(|e| SkipReason::Invalid(e.to_string()))?;
    Ok(rule)
}

/// 转义模式关键词中除捕获槽以外的通配符
fn escape_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '\\' | '*' | '?') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// 转义花括号，`{A>B}` 形式的条件转换为 `{if:A>B}`
fn escape_braces(response: &str) -> String {
    let escape = |text: &str| text.replace('{', "{{").replace('}', "}}");
    let mut out = String::with_capacity(response.len());
    let mut last = 0;
    for caps in CONDITION_REGEX.captures_iter(response) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&escape(&response[last..whole.start()]));
        out.push_str("{if:");
        out.push_str(&caps[1]);
        out.push('}');
        last = whole.end();
    }
    out.push_str(&escape(&response[last..]));
    out
}

/// 转换一条回复，返回新文本和其中的冷却指令
fn convert_response(response: &str) -> (String, Option<CooldownDirective>) {
    let text = escape_braces(response);

    let mut cooldown = None;
    for caps in COOLDOWN_REGEX.captures_iter(&text) {
        let directive = match caps[1].parse::<u64>() {
            Ok(0) => CooldownDirective::UntilMidnight,
            Ok(seconds) => CooldownDirective::Seconds(seconds),
            Err(_) => {
                warn!("Legacy cooldown directive {:?} is out of range", &caps[0]);
                continue;
            }
        };
        cooldown = match (cooldown, directive) {
            (Some(CooldownDirective::UntilMidnight), _)
            | (_, CooldownDirective::UntilMidnight) => Some(CooldownDirective::UntilMidnight),
            (Some(CooldownDirective::Seconds(a)), CooldownDirective::Seconds(b)) => {
                Some(CooldownDirective::Seconds(a.max(b)))
            }
            (None, directive) => Some(directive),
        };
    }
    let text = COOLDOWN_REGEX.replace_all(&text, "");

    let text = CAPTURE_REGEX.replace_all(&text, "{n.${1}${2}}");
    let text = VARIABLE_REGEX.replace_all(&text, |caps: &regex::Captures| {
        match &caps[1] {
            "qq" => "{sender_id}",
            "name" | "card" => "{name}",
            "group" => "{group_id}",
            "ai" => "{bot_id}",
            _ => "{message_id}",
        }
        .to_string()
    });
    let text = RANGE_REGEX.replace_all(&text, "{rand:${1}-${2}}");
    let text = TIME_REGEX.replace_all(&text, |caps: &regex::Captures| {
        match &caps[1] {
            "Y" => "{year}",
            "M" => "{month}",
            "D" => "{day}",
            "h" => "{hour}",
            "m" => "{minute}",
            _ => "{second}",
        }
        .to_string()
    });
    let text = CALC_REGEX.replace_all(&text, "{calc:${1}}");

    (text.into_owned(), cooldown)
}
