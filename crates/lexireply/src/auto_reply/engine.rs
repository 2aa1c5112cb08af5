//! 回复引擎
//!
//! 核心引擎，集成词库、匹配器、冷却追踪和变量解析，处理入站消息。
//!
//! # 消息处理流程
//!
//! 1. 检查忽略列表
//! 2. 确定要查找的词库：用户或群组选中的命名词库在前，默认词库在后；
//!    第一个有候选规则的词库负责处理这条消息
//! 3. 取启用规则的快照，非管理员发送的消息跳过仅管理员规则，
//!    查找候选规则（已按优先级排序）
//! 4. 依次检查候选规则的冷却，第一条允许触发的规则被选中；
//!    前面的规则在冷却中时，后面的规则仍可触发
//! 5. 全部在冷却中时返回最优候选的剩余冷却时间
//! 6. 递增选中规则的触发计数，选取模板并解析占位符；
//!    回复中的条件不成立时撤销这次触发
//!
//! 每个词库有自己的冷却记录和触发计数。
//! `handle` 不会 panic，也不会把内部错误传给调用方。
//!
//! # 示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lexireply::auto_reply::{
//!     IncomingMessage, JsonFileBackend, ReplyConfig, ReplyEngine, SystemClock,
//! };
//!
//! let engine = ReplyEngine::init(
//!     ReplyConfig::default(),
//!     Arc::new(JsonFileBackend::new("lexicon.json")),
//!     Arc::new(SystemClock),
//! )
//! .await;
//!
//! match engine.handle(&IncomingMessage::group("g1", "alice", "hello")) {
//!     Ok(reply) => println!("{}", reply.plain_text()),
//!     Err(reason) => println!("no reply: {}", reason),
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auto_reply::clock::Clock;
use crate::auto_reply::config::{ReplyConfig, DEFAULT_LEXICON};
use crate::auto_reply::cooldown::{CooldownCheckResult, CooldownTracker, CooldownWindow};
use crate::auto_reply::ignore::IgnoreList;
use crate::auto_reply::keyword_matcher::{KeywordMatcher, MatchCandidate, MatchReport};
use crate::auto_reply::lexicon::{JsonFileBackend, LexiconBackend, LexiconResult, LexiconStore};
use crate::auto_reply::message::{Diagnostic, IncomingMessage, NoMatch, Reply};
use crate::auto_reply::types::{Rule, RuleId, SessionIdentity};
use crate::auto_reply::variables::{ResolutionContext, VariableResolver};

/// 引擎统计信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStats {
    /// 规则总数
    pub total_rules: usize,
    /// 启用的规则数
    pub enabled_rules: usize,
    /// 冷却记录数
    pub cooldown_entries: usize,
    /// 已编译的模式数
    pub cached_patterns: usize,
    /// 忽略的群组数
    pub ignored_groups: usize,
    /// 忽略的用户数
    pub ignored_users: usize,
    /// 现有规则的累计触发次数
    pub replies_sent: u64,
    /// 命名词库数，不含默认词库
    #[serde(default)]
    pub lexicons: usize,
}

/// 一个词库和它的运行时状态
struct LexiconSlot {
    store: Arc<LexiconStore>,
    cooldowns: CooldownTracker,
    /// 规则 → 触发次数，只在内存中
    fire_counts: DashMap<RuleId, u64>,
}

impl LexiconSlot {
    fn new(store: Arc<LexiconStore>) -> Self {
        Self {
            store,
            cooldowns: CooldownTracker::new(),
            fire_counts: DashMap::new(),
        }
    }

    fn fire_count(&self, id: RuleId) -> u64 {
        self.fire_counts.get(&id).map_or(0, |count| *count)
    }

    fn replies_sent(&self) -> u64 {
        self.fire_counts.iter().map(|entry| *entry.value()).sum()
    }
}

/// 回复引擎
pub struct ReplyEngine {
    config: ReplyConfig,
    default: LexiconSlot,
    /// 名称 → 命名词库
    named: RwLock<BTreeMap<String, Arc<LexiconSlot>>>,
    /// 群组 → 选中的词库名称
    group_selection: RwLock<BTreeMap<String, String>>,
    /// 用户 → 选中的词库名称
    user_selection: RwLock<BTreeMap<String, String>>,
    matcher: KeywordMatcher,
    resolver: VariableResolver,
    ignore: RwLock<IgnoreList>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl ReplyEngine {
    /// 创建引擎并加载词库
    ///
    /// 默认词库来自 `backend`，`config.lexicons` 中的命名词库从各自的 JSON 文件加载。
    /// 词库不可用时记录警告并以空词库启动。
    ///
    /// # 参数
    ///
    /// * `config` - 引擎配置
    /// * `backend` - 词库存储后端
    /// * `clock` - 时钟
    pub async fn init(
        config: ReplyConfig,
        backend: Arc<dyn LexiconBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(LexiconStore::new(backend, config.store_options()));
        if let Err(e) = store.load().await {
            warn!("Starting with an empty lexicon: {}", e);
        }
        let lexicons = config.lexicons.clone();
        let engine = Self::with_store(config, store, clock);

        for (name, path) in lexicons {
            let backend = Arc::new(JsonFileBackend::new(path));
            if let Err(e) = engine.attach_lexicon(&name, backend.clone()).await {
                warn!("Starting lexicon {} empty: {}", name, e);
                let store = LexiconStore::new(backend, engine.config.store_options());
                engine.attach_lexicon_store(&name, Arc::new(store));
            }
        }
        engine
    }

    /// 使用已有的词库存储创建引擎，不做 I/O
    pub fn with_store(config: ReplyConfig, store: Arc<LexiconStore>, clock: Arc<dyn Clock>) -> Self {
        config.validate();
        let engine = Self {
            matcher: KeywordMatcher::with_options(config.matcher_options()),
            resolver: VariableResolver::new(),
            ignore: RwLock::new(config.ignore_list()),
            timezone: config.timezone(),
            default: LexiconSlot::new(store),
            named: RwLock::new(BTreeMap::new()),
            group_selection: RwLock::new(config.group_lexicons.clone()),
            user_selection: RwLock::new(config.user_lexicons.clone()),
            config,
            clock,
        };
        info!(
            "Reply engine ready with {} rules ({} enabled)",
            engine.default.store.len(),
            engine.default.store.enabled_rules().len()
        );
        engine
    }

    /// 加载并挂载命名词库
    ///
    /// 加载失败时不挂载。同名词库会被替换，它的冷却记录和触发计数一并清空。
    ///
    /// # 返回值
    ///
    /// 加载的规则数
    pub async fn attach_lexicon(
        &self,
        name: &str,
        backend: Arc<dyn LexiconBackend>,
    ) -> LexiconResult<usize> {
        let store = Arc::new(LexiconStore::new(backend, self.config.store_options()));
        let rules = store.load().await?;
        self.attach_lexicon_store(name, store);
        Ok(rules.len())
    }

    /// 挂载已有的词库存储，不做 I/O
    pub fn attach_lexicon_store(&self, name: &str, store: Arc<LexiconStore>) {
        if name == DEFAULT_LEXICON {
            warn!("Lexicon name {:?} is reserved, not attaching", name);
            return;
        }
        info!("Attached lexicon {} with {} rules", name, store.len());
        self.named
            .write()
            .insert(name.to_string(), Arc::new(LexiconSlot::new(store)));
    }

    /// 卸下命名词库，选中它的群组和用户回到默认词库
    pub fn detach_lexicon(&self, name: &str) -> Option<Arc<LexiconStore>> {
        let slot = self.named.write().remove(name)?;
        self.group_selection.write().retain(|_, selected| selected != name);
        self.user_selection.write().retain(|_, selected| selected != name);
        Some(slot.store.clone())
    }

    /// 命名词库的存储
    pub fn lexicon(&self, name: &str) -> Option<Arc<LexiconStore>> {
        self.named.read().get(name).map(|slot| slot.store.clone())
    }

    pub fn lexicon_names(&self) -> Vec<String> {
        self.named.read().keys().cloned().collect()
    }

    /// 为群组选择词库
    ///
    /// 选择 [`DEFAULT_LEXICON`] 等于取消选择。词库不存在时返回 false。
    pub fn select_group_lexicon(&self, group_id: impl Into<String>, name: &str) -> bool {
        self.select(&self.group_selection, group_id.into(), name)
    }

    /// 为用户选择词库，优先于群组的选择
    pub fn select_user_lexicon(&self, user_id: impl Into<String>, name: &str) -> bool {
        self.select(&self.user_selection, user_id.into(), name)
    }

    fn select(&self, selection: &RwLock<BTreeMap<String, String>>, id: String, name: &str) -> bool {
        if name == DEFAULT_LEXICON {
            selection.write().remove(&id);
            return true;
        }
        if !self.named.read().contains_key(name) {
            return false;
        }
        selection.write().insert(id, name.to_string());
        true
    }

    /// 会话当前选中的词库名称
    pub fn selected_lexicon(&self, session: &SessionIdentity) -> String {
        self.selected_slot(session)
            .map(|(name, _)| name)
            .unwrap_or_else(|| DEFAULT_LEXICON.to_string())
    }

    fn selected_slot(&self, session: &SessionIdentity) -> Option<(String, Arc<LexiconSlot>)> {
        let name = self
            .user_selection
            .read()
            .get(&session.user_id)
            .cloned()
            .or_else(|| {
                let group = session.group_id.as_ref()?;
                self.group_selection.read().get(group).cloned()
            })?;
        let slot = self.named.read().get(&name).cloned();
        if slot.is_none() {
            debug!("Selected lexicon {} is not attached", name);
        }
        slot.map(|slot| (name, slot))
    }

    fn named_slots(&self) -> Vec<(String, Arc<LexiconSlot>)> {
        self.named
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect()
    }

    /// 处理入站消息
    ///
    /// # 返回值
    ///
    /// - `Ok(Reply)` - 有规则触发
    /// - `Err(NoMatch::Ignored)` - 消息来源在忽略列表中
    /// - `Err(NoMatch::NoCandidate)` - 没有规则匹配
    /// - `Err(NoMatch::Suppressed)` - 匹配的规则都在冷却中
    /// - `Err(NoMatch::ConditionFailed)` - 选中规则的回复条件不成立
    pub fn handle(&self, message: &IncomingMessage) -> Result<Reply, NoMatch> {
        if self.ignore.read().is_ignored(&message.session) {
            debug!(
                "Ignored message {} from {:?}",
                message.message_id, message.session
            );
            return Err(NoMatch::Ignored);
        }

        let is_admin = self.config.is_admin(&message.session.user_id);
        let selected = self.selected_slot(&message.session);
        let slots = selected
            .iter()
            .map(|(_, slot)| &**slot)
            .chain(std::iter::once(&self.default));

        for slot in slots {
            let rules: Vec<Arc<Rule>> = slot
                .store
                .enabled_rules()
                .into_iter()
                .filter(|rule| is_admin || !rule.admin_only)
                .collect();
            let report = self.matcher.find_candidates_with_report(&message.text, &rules);
            for diagnostic in &report.diagnostics {
                debug!("Match diagnostic: {:?}", diagnostic);
            }
            if !report.candidates.is_empty() {
                return self.handle_candidates(slot, message, report);
            }
        }
        Err(NoMatch::NoCandidate)
    }

    fn handle_candidates(
        &self,
        slot: &LexiconSlot,
        message: &IncomingMessage,
        report: MatchReport,
    ) -> Result<Reply, NoMatch> {
        let now = self.clock.now();
        let mut best_suppressed: Option<(RuleId, Duration)> = None;
        for candidate in report.candidates {
            let rule = &candidate.rule;
            let scope_key = rule.scope.scope_key(&message.session);
            let window = CooldownWindow::for_rule(rule, self.timezone);

            match slot
                .cooldowns
                .check_and_mark_window(rule.id, &scope_key, window, now)
            {
                CooldownCheckResult::Allowed => {
                    return self.fire(
                        slot,
                        message,
                        candidate,
                        &scope_key,
                        report.diagnostics,
                        now,
                    );
                }
                CooldownCheckResult::Suppressed { remaining } => {
                    debug!(
                        "Rule {} suppressed for {:?} in scope {}",
                        rule.id, remaining, scope_key
                    );
                    best_suppressed.get_or_insert((rule.id, remaining));
                }
            }
        }

        match best_suppressed {
            Some((rule_id, remaining)) => Err(NoMatch::Suppressed { rule_id, remaining }),
            None => Err(NoMatch::NoCandidate),
        }
    }

    fn fire(
        &self,
        slot: &LexiconSlot,
        message: &IncomingMessage,
        candidate: MatchCandidate,
        scope_key: &str,
        mut diagnostics: Vec<Diagnostic>,
        now: DateTime<Utc>,
    ) -> Result<Reply, NoMatch> {
        let rule = candidate.rule;
        let fire_count = {
            let mut count = slot.fire_counts.entry(rule.id).or_insert(0);
            *count += 1;
            *count
        };
        let seed = message.seed.unwrap_or_else(rand::random);

        let ctx = ResolutionContext::from_message(message, now, seed)
            .with_captures(candidate.captures)
            .with_timezone(self.timezone)
            .with_fire_count(fire_count);
        let resolution = self.resolver.resolve_rule(&rule, &ctx);
        for diagnostic in &resolution.diagnostics {
            debug!("Rule {} resolution diagnostic: {:?}", rule.id, diagnostic);
        }
        diagnostics.extend(resolution.diagnostics);

        // 条件不成立：撤销冷却记录和触发计数
        if resolution.suppressed {
            slot.cooldowns.reset(rule.id, scope_key);
            if let Some(mut count) = slot.fire_counts.get_mut(&rule.id) {
                *count = count.saturating_sub(1);
            }
            debug!(
                "Rule {} matched for {} but its condition is not met",
                rule.id, message.session.user_id
            );
            return Err(NoMatch::ConditionFailed { rule_id: rule.id });
        }

        info!(
            "Rule {} fired on {:?} for {} (template {})",
            rule.id, candidate.matched_keyword, message.session.user_id, resolution.template_index
        );

        Ok(Reply {
            rule_id: rule.id,
            matched_keyword: candidate.matched_keyword,
            segments: resolution.segments,
            diagnostics,
            fired_at: now,
        })
    }

    /// 默认词库
    pub fn store(&self) -> &Arc<LexiconStore> {
        &self.default.store
    }

    pub fn config(&self) -> &ReplyConfig {
        &self.config
    }

    /// 默认词库的冷却记录
    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.default.cooldowns
    }

    /// 从默认词库删除规则，同时清除它的冷却记录和触发计数
    pub fn remove_rule(&self, id: RuleId) -> LexiconResult<Rule> {
        let rule = self.default.store.remove(id)?;
        let cleared = self.default.cooldowns.clear_rule(id);
        self.default.fire_counts.remove(&id);
        debug!("Cleared {} cooldown entries of rule {}", cleared, id);
        Ok(rule)
    }

    /// 默认词库中规则的触发次数
    pub fn fire_count(&self, id: RuleId) -> u64 {
        self.default.fire_count(id)
    }

    /// 命名词库中规则的触发次数
    pub fn lexicon_fire_count(&self, name: &str, id: RuleId) -> u64 {
        self.named
            .read()
            .get(name)
            .map_or(0, |slot| slot.fire_count(id))
    }

    pub fn ignore_list(&self) -> IgnoreList {
        self.ignore.read().clone()
    }

    pub fn ignore_group(&self, group_id: impl Into<String>) -> bool {
        self.ignore.write().add_group(group_id)
    }

    pub fn unignore_group(&self, group_id: &str) -> bool {
        self.ignore.write().remove_group(group_id)
    }

    pub fn ignore_user(&self, user_id: impl Into<String>) -> bool {
        self.ignore.write().add_user(user_id)
    }

    pub fn unignore_user(&self, user_id: &str) -> bool {
        self.ignore.write().remove_user(user_id)
    }

    /// 清理所有词库中超过 `max_age` 的冷却记录
    pub fn cleanup_cooldowns(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        self.named_slots()
            .iter()
            .map(|(_, slot)| slot.cooldowns.cleanup_expired(now, max_age))
            .sum::<usize>()
            + self.default.cooldowns.cleanup_expired(now, max_age)
    }

    /// 从后端重新加载所有词库
    ///
    /// 失败的词库保留当前内容，返回第一个错误。
    ///
    /// # 返回值
    ///
    /// 加载的规则总数
    pub async fn reload(&self) -> LexiconResult<usize> {
        let mut total = self.default.store.load().await?.len();
        let mut result = Ok(());
        for (name, slot) in self.named_slots() {
            match slot.store.load().await {
                Ok(rules) => total += rules.len(),
                Err(e) => {
                    warn!("Keeping lexicon {} after failed reload: {}", name, e);
                    result = result.and(Err(e));
                }
            }
        }
        self.matcher.clear_cache();
        result.map(|()| total)
    }

    /// 持久化所有词库
    ///
    /// 某个词库失败时继续持久化其余词库，返回第一个错误。
    pub async fn persist(&self) -> LexiconResult<()> {
        let mut result = self.default.store.persist().await;
        for (name, slot) in self.named_slots() {
            if let Err(e) = slot.store.persist().await {
                warn!("Failed to persist lexicon {}: {}", name, e);
                result = result.and(Err(e));
            }
        }
        result
    }

    /// 关闭引擎，持久化所有词库
    pub async fn shutdown(&self) -> LexiconResult<()> {
        info!("Shutting down reply engine");
        self.persist().await
    }

    pub fn stats(&self) -> EngineStats {
        let named = self.named_slots();
        let slots = named
            .iter()
            .map(|(_, slot)| &**slot)
            .chain(std::iter::once(&self.default));

        let mut stats = EngineStats {
            total_rules: 0,
            enabled_rules: 0,
            cooldown_entries: 0,
            cached_patterns: self.matcher.cached_patterns(),
            ignored_groups: 0,
            ignored_users: 0,
            replies_sent: 0,
            lexicons: named.len(),
        };
        for slot in slots {
            stats.total_rules += slot.store.len();
            stats.enabled_rules += slot.store.enabled_rules().len();
            stats.cooldown_entries += slot.cooldowns.len();
            stats.replies_sent += slot.replies_sent();
        }

        let ignore = self.ignore.read();
        stats.ignored_groups = ignore.groups().count();
        stats.ignored_users = ignore.users().count();
        stats
    }
}
