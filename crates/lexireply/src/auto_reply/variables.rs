//! 变量解析器
//!
//! 把回复模板中的 `{...}` 占位符替换为具体内容。
//!
//! # 占位符
//!
//! | 占位符 | 内容 |
//! |---|---|
//! | `{name}` | 发送者显示名称，没有时为发送者 ID |
//! | `{sender_id}` | 发送者 ID |
//! | `{group}` / `{group_id}` | 群组名称 / 群组 ID，私聊时为空 |
//! | `{bot_id}` | 机器人 ID |
//! | `{message_id}` / `{message}` | 触发消息 ID / 文本 |
//! | `{n.K}` / `{n.K.t}` | 模式捕获槽 K / 捕获内容中第一段类 URL 文本 |
//! | `{random:a\|b\|c}` | 随机选一个 |
//! | `{rand:A-B}` | [A, B] 内的随机整数 |
//! | `{counter}` | 规则触发次数（含本次） |
//! | `{year}` `{month}` `{day}` `{hour}` `{minute}` `{second}` | 当前时间（配置的时区） |
//! | `{calc:EXPR}` | 算术表达式结果 |
//! | `{if:A>B}` / `{if:A<B}` / `{if:A=B}` | 条件成立时为空，不成立时整条回复不发送 |
//!
//! 占位符可以嵌套（最多 4 层），内层先解析；`{{` 和 `}}` 输出字面括号。
//! 未知占位符替换为空字符串并产生 `UnknownToken` 诊断；参数错误或括号未闭合
//! 产生 `MalformedToken` 诊断。相同种子总是得到相同结果。
//!
//! 条件两侧都是整数时按数值比较，否则按字符串比较。

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::auto_reply::calc;
use crate::auto_reply::message::{Diagnostic, IncomingMessage};
use crate::auto_reply::types::{ResolvedSegment, Rule, Segment};

/// 占位符最大嵌套层数
pub const MAX_TOKEN_DEPTH: usize = 4;

/// `{n.K.t}` 提取的文本
static CLEAN_CAPTURE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9_/.:?=&%#+-]+").expect("Invalid capture cleanup regex")
});

/// `{rand:A-B}` 的参数
static RANGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d+)\s*-\s*(-?\d+)\s*$").expect("Invalid random range regex")
});

/// 解析上下文
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub bot_id: String,
    pub message_id: String,
    pub message_text: String,
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub seed: u64,
    pub captures: BTreeMap<u8, String>,
    pub fire_count: u64,
}

impl ResolutionContext {
    /// 从入站消息构造上下文
    pub fn from_message(message: &IncomingMessage, now: DateTime<Utc>, seed: u64) -> Self {
        Self {
            sender_id: message.session.user_id.clone(),
            sender_name: message.sender_name.clone(),
            group_id: message.session.group_id.clone(),
            group_name: message.group_name.clone(),
            bot_id: message.bot_id.clone().unwrap_or_default(),
            message_id: message.message_id.clone(),
            message_text: message.text.clone(),
            now,
            timezone: Tz::UTC,
            seed,
            captures: BTreeMap::new(),
            fire_count: 0,
        }
    }

    pub fn with_captures(mut self, captures: BTreeMap<u8, String>) -> Self {
        self.captures = captures;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_fire_count(mut self, count: u64) -> Self {
        self.fire_count = count;
        self
    }
}

/// 解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub segments: Vec<ResolvedSegment>,
    pub diagnostics: Vec<Diagnostic>,
    /// 选中的模板下标，0 为主模板
    pub template_index: usize,
    /// 有 `{if:...}` 条件不成立，回复不应发送
    pub suppressed: bool,
}

/// 变量解析器
#[derive(Debug, Clone, Default)]
pub struct VariableResolver;

impl VariableResolver {
    pub fn new() -> Self {
        Self
    }

    /// 为规则选取模板并解析
    ///
    /// 模板选择和占位符中的随机数共用同一个以 `ctx.seed` 初始化的随机源。
    pub fn resolve_rule(&self, rule: &Rule, ctx: &ResolutionContext) -> Resolution {
        let mut rng = StdRng::seed_from_u64(ctx.seed);
        let count = rule.template_count();
        let index = if count > 1 {
            rng.gen_range(0..count)
        } else {
            0
        };
        let template = rule
            .templates()
            .nth(index)
            .unwrap_or(&rule.response_template);

        let mut resolution = self.resolve_with_rng(template, ctx, &mut rng);
        resolution.template_index = index;
        resolution
    }

    /// 解析模板
    pub fn resolve(&self, template: &[Segment], ctx: &ResolutionContext) -> Resolution {
        let mut rng = StdRng::seed_from_u64(ctx.seed);
        self.resolve_with_rng(template, ctx, &mut rng)
    }

    fn resolve_with_rng(
        &self,
        template: &[Segment],
        ctx: &ResolutionContext,
        rng: &mut StdRng,
    ) -> Resolution {
        let mut diagnostics = Vec::new();
        let mut suppressed = false;
        let mut segments = Vec::with_capacity(template.len());

        for segment in template {
            let mut expand = |text: &str| {
                Expander::new(text, ctx, &mut *rng, &mut diagnostics, &mut suppressed).run()
            };

            let resolved = match segment {
                Segment::Text(text) => {
                    Some(expand(text)).filter(|s| !s.is_empty()).map(ResolvedSegment::Text)
                }
                Segment::Image(url) => {
                    Some(expand(url)).filter(|s| !s.is_empty()).map(ResolvedSegment::Image)
                }
                Segment::Voice(url) => {
                    Some(expand(url)).filter(|s| !s.is_empty()).map(ResolvedSegment::Voice)
                }
                Segment::Face(id) => {
                    Some(expand(id)).filter(|s| !s.is_empty()).map(ResolvedSegment::Face)
                }
                Segment::Mention(target) => {
                    let target = expand(target);
                    Some(ResolvedSegment::Mention(if target.is_empty() {
                        ctx.sender_id.clone()
                    } else {
                        target
                    }))
                }
                Segment::Poke(target) => {
                    let target = expand(target);
                    Some(ResolvedSegment::Poke(if target.is_empty() {
                        ctx.sender_id.clone()
                    } else {
                        target
                    }))
                }
                Segment::Quote(id) => {
                    let id = id.as_deref().map(&mut expand).unwrap_or_default();
                    Some(ResolvedSegment::Quote(if id.is_empty() {
                        ctx.message_id.clone()
                    } else {
                        id
                    }))
                }
            };
            segments.extend(resolved);
        }

        Resolution {
            segments,
            diagnostics,
            template_index: 0,
            suppressed,
        }
    }
}

/// 比较 `A>B`、`A<B` 或 `A=B`，没有比较符时返回 None
fn compare(condition: &str) -> Option<bool> {
    let index = condition.find(['>', '<', '='])?;
    let (left, rest) = condition.split_at(index);
    let op = rest.chars().next()?;
    let (left, right) = (left.trim(), rest[op.len_utf8()..].trim());

    let ordering = match (left.parse::<i64>(), right.parse::<i64>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        _ => left.cmp(right),
    };
    Some(match op {
        '>' => ordering.is_gt(),
        '<' => ordering.is_lt(),
        _ => ordering.is_eq(),
    })
}

/// 单段文本的占位符展开
struct Expander<'a> {
    chars: Vec<char>,
    pos: usize,
    ctx: &'a ResolutionContext,
    rng: &'a mut StdRng,
    diagnostics: &'a mut Vec<Diagnostic>,
    suppressed: &'a mut bool,
}

impl<'a> Expander<'a> {
    fn new(
        text: &str,
        ctx: &'a ResolutionContext,
        rng: &'a mut StdRng,
        diagnostics: &'a mut Vec<Diagnostic>,
        suppressed: &'a mut bool,
    ) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            ctx,
            rng,
            diagnostics,
            suppressed,
        }
    }

    fn next_is(&self, c: char) -> bool {
        self.chars.get(self.pos + 1) == Some(&c)
    }

    fn run(mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                '{' if self.next_is('{') => {
                    out.push('{');
                    self.pos += 2;
                }
                '}' if self.next_is('}') => {
                    out.push('}');
                    self.pos += 2;
                }
                '{' => {
                    let start = self.pos;
                    self.pos += 1;
                    match self.read_token(1) {
                        Some(body) => out.push_str(&self.evaluate(&body)),
                        None => {
                            let raw: String = self.chars[start..].iter().collect();
                            self.malformed(&raw, "unterminated placeholder");
                            out.push_str(&raw);
                            self.pos = self.chars.len();
                        }
                    }
                }
                c => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        out
    }

    /// 读取占位符内容直到对应的 `}`，内层占位符先解析
    ///
    /// 返回 None 表示括号未闭合。
    fn read_token(&mut self, depth: usize) -> Option<String> {
        let mut body = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            match c {
                '}' => return Some(body),
                '{' if depth >= MAX_TOKEN_DEPTH => {
                    let raw = self.skip_nested()?;
                    self.malformed(&raw, "placeholder nesting too deep");
                }
                '{' => {
                    let inner = self.read_token(depth + 1)?;
                    body.push_str(&self.evaluate(&inner));
                }
                c => body.push(c),
            }
        }
        None
    }

    /// 跳过过深的嵌套，返回原始文本
    fn skip_nested(&mut self) -> Option<String> {
        let start = self.pos;
        let mut level = 1usize;
        while let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            match c {
                '{' => level += 1,
                '}' => {
                    level -= 1;
                    if level == 0 {
                        return Some(self.chars[start..self.pos - 1].iter().collect());
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn malformed(&mut self, token: &str, reason: &str) {
        self.diagnostics.push(Diagnostic::MalformedToken {
            token: token.to_string(),
            reason: reason.to_string(),
        });
    }

    fn evaluate(&mut self, body: &str) -> String {
        let (name, arg) = match body.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg)),
            None => (body.trim(), None),
        };
        let ctx = self.ctx;
        let local = ctx.now.with_timezone(&ctx.timezone);

        match (name, arg) {
            ("name", None) => ctx
                .sender_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| ctx.sender_id.clone()),
            ("sender_id", None) => ctx.sender_id.clone(),
            ("group", None) => ctx.group_name.clone().unwrap_or_default(),
            ("group_id", None) => ctx.group_id.clone().unwrap_or_default(),
            ("bot_id", None) => ctx.bot_id.clone(),
            ("message_id", None) => ctx.message_id.clone(),
            ("message", None) => ctx.message_text.clone(),
            ("counter", None) => ctx.fire_count.to_string(),
            ("year", None) => local.year().to_string(),
            ("month", None) => local.month().to_string(),
            ("day", None) => local.day().to_string(),
            ("hour", None) => local.hour().to_string(),
            ("minute", None) => local.minute().to_string(),
            ("second", None) => local.second().to_string(),
            ("random", Some(choices)) => {
                let options: Vec<&str> = choices.split('|').collect();
                let index = self.rng.gen_range(0..options.len());
                options[index].to_string()
            }
            ("rand", Some(range)) => self.random_in_range(body, range),
            ("calc", Some(expr)) => match calc::evaluate_to_string(expr) {
                Ok(value) => value,
                Err(e) => {
                    self.malformed(body, &e.to_string());
                    String::new()
                }
            },
            ("if", Some(condition)) => {
                match compare(condition) {
                    Some(true) => {}
                    Some(false) => *self.suppressed = true,
                    None => self.malformed(body, "expected a comparison like a>b"),
                }
                String::new()
            }
            ("random" | "rand" | "calc" | "if", None) => {
                self.malformed(body, "missing argument");
                String::new()
            }
            (name, None) if name.starts_with("n.") => self.capture(body, name),
            _ => {
                self.diagnostics.push(Diagnostic::UnknownToken {
                    token: body.to_string(),
                });
                String::new()
            }
        }
    }

    fn random_in_range(&mut self, body: &str, range: &str) -> String {
        let bounds = RANGE_REGEX.captures(range).and_then(|caps| {
            let low = caps.get(1)?.as_str().parse::<i64>().ok()?;
            let high = caps.get(2)?.as_str().parse::<i64>().ok()?;
            (low <= high).then_some((low, high))
        });
        match bounds {
            Some((low, high)) => self.rng.gen_range(low..=high).to_string(),
            None => {
                self.malformed(body, "expected an integer range like 1-6");
                String::new()
            }
        }
    }

    /// `{n.K}` 和 `{n.K.t}`
    fn capture(&mut self, body: &str, name: &str) -> String {
        let mut parts = name.split('.').skip(1);
        let slot = parts.next().and_then(|s| s.parse::<u8>().ok());
        let modifier = parts.next();
        let extra = parts.next();

        match (slot, modifier, extra) {
            (Some(slot @ 1..=9), None, None) => {
                self.ctx.captures.get(&slot).cloned().unwrap_or_default()
            }
            (Some(slot @ 1..=9), Some("t"), None) => self
                .ctx
                .captures
                .get(&slot)
                .and_then(|value| CLEAN_CAPTURE_REGEX.find(value))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            _ => {
                self.diagnostics.push(Diagnostic::UnknownToken {
                    token: body.to_string(),
                });
                String::new()
            }
        }
    }
}
