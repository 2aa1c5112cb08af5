//! 词库存储
//!
//! 管理词库规则的增删改查和持久化。
//!
//! # 功能
//!
//! - 通过 [`LexiconBackend`] 加载和持久化词库，I/O 带超时
//! - 加载失败时保留内存中最后一次成功的词库
//! - 添加、删除、局部更新规则，修改失败时原规则不变
//! - 追加和删除备选回复
//! - 按条件列出规则，结果按 ID 排序
//!
//! # 并发
//!
//! 规则保存在 `RwLock<BTreeMap<RuleId, Arc<Rule>>>` 中。读取方拿到的是
//! `Arc<Rule>` 快照，匹配过程中不持有锁；写入方只在替换时持有写锁。
//!
//! # 示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lexireply::auto_reply::{JsonFileBackend, LexiconStore, Rule, Segment, StoreOptions};
//!
//! let backend = Arc::new(JsonFileBackend::new("lexicon.json"));
//! let store = LexiconStore::new(backend, StoreOptions::default());
//! store.load().await?;
//! store.add(Rule::new(store.next_id().get(), ["hello"], vec![Segment::text("hi {name}")]))?;
//! store.persist().await?;
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::auto_reply::types::{Rule, RuleFilter, RuleId, RulePatch, Segment};

/// 当前词库文档版本
pub const LEXICON_FORMAT_VERSION: u32 = 1;

/// 词库错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexiconError {
    /// 存储不可用（读写失败、超时、格式错误）
    #[error("lexicon store unavailable: {0}")]
    StoreUnavailable(String),
    /// 规则校验失败
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    /// 规则 ID 已存在
    #[error("rule {0} already exists")]
    DuplicateId(RuleId),
    /// 规则不存在
    #[error("rule {0} not found")]
    NotFound(RuleId),
}

pub type LexiconResult<T> = Result<T, LexiconError>;

/// 持久化的词库文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_version() -> u32 {
    LEXICON_FORMAT_VERSION
}

impl LexiconDocument {
    /// 由规则构造文档，规则按 ID 排序
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut rules: Vec<Rule> = rules.into_iter().collect();
        rules.sort_by_key(|rule| rule.id);
        Self {
            version: LEXICON_FORMAT_VERSION,
            rules,
        }
    }
}

/// 词库存储后端
#[async_trait]
pub trait LexiconBackend: Send + Sync {
    /// 读取文档，不存在时返回 None
    async fn read(&self) -> LexiconResult<Option<LexiconDocument>>;

    /// 写入文档
    async fn write(&self, document: &LexiconDocument) -> LexiconResult<()>;

    /// 后端描述，用于日志
    fn describe(&self) -> String;
}

/// JSON 文件后端
///
/// 写入时先在同一目录写一个唯一的临时文件再原子替换，并发写入互不干扰，
/// 也不会留下半个文件。
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 写入同目录下的临时文件后替换目标文件
fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl LexiconBackend for JsonFileBackend {
    async fn read(&self) -> LexiconResult<Option<LexiconDocument>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LexiconError::StoreUnavailable(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let document: LexiconDocument = serde_json::from_str(&content).map_err(|e| {
            LexiconError::StoreUnavailable(format!(
                "failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if document.version > LEXICON_FORMAT_VERSION {
            return Err(LexiconError::StoreUnavailable(format!(
                "{} has unsupported format version {}",
                self.path.display(),
                document.version
            )));
        }
        Ok(Some(document))
    }

    async fn write(&self, document: &LexiconDocument) -> LexiconResult<()> {
        let unavailable =
            |what: &str, e: &dyn std::fmt::Display| LexiconError::StoreUnavailable(format!(
                "failed to {} {}: {}",
                what,
                self.path.display(),
                e
            ));

        let mut content =
            serde_json::to_string_pretty(document).map_err(|e| unavailable("serialize", &e))?;
        content.push('\n');

        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomically(&path, &content))
            .await
            .map_err(|e| unavailable("join writer for", &e))?;
        written.map_err(|e| unavailable("write", &e))
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }
}

/// 内存后端
///
/// 可以注入读写失败和延迟。
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<Option<LexiconDocument>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: LexiconDocument) -> Self {
        let backend = Self::default();
        *backend.document.lock() = Some(document);
        backend
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// 当前保存的文档
    pub fn document(&self) -> Option<LexiconDocument> {
        self.document.lock().clone()
    }

    async fn wait(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LexiconBackend for MemoryBackend {
    async fn read(&self) -> LexiconResult<Option<LexiconDocument>> {
        self.wait().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LexiconError::StoreUnavailable(
                "memory backend read failure".to_string(),
            ));
        }
        Ok(self.document.lock().clone())
    }

    async fn write(&self, document: &LexiconDocument) -> LexiconResult<()> {
        self.wait().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LexiconError::StoreUnavailable(
                "memory backend write failure".to_string(),
            ));
        }
        *self.document.lock() = Some(document.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// 存储选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// 加载和持久化的超时时间
    pub timeout: Duration,
    /// 是否把关键词中的全角括号和冒号转换为半角
    pub normalize_fullwidth: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            normalize_fullwidth: false,
        }
    }
}

/// 词库存储
pub struct LexiconStore {
    backend: Arc<dyn LexiconBackend>,
    rules: RwLock<BTreeMap<RuleId, Arc<Rule>>>,
    options: StoreOptions,
}

impl LexiconStore {
    /// 创建空的词库存储
    ///
    /// # 参数
    ///
    /// * `backend` - 存储后端
    /// * `options` - 存储选项
    pub fn new(backend: Arc<dyn LexiconBackend>, options: StoreOptions) -> Self {
        Self {
            backend,
            rules: RwLock::new(BTreeMap::new()),
            options,
        }
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// 从后端加载词库
    ///
    /// # 返回值
    ///
    /// 成功时替换内存中的词库并返回按 ID 排序的规则快照；
    /// 失败时内存中的词库保持不变，返回 `StoreUnavailable`。
    pub async fn load(&self) -> LexiconResult<Vec<Arc<Rule>>> {
        let source = self.backend.describe();
        let document = match tokio::time::timeout(self.options.timeout, self.backend.read()).await
        {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                error!("Failed to load lexicon from {}: {}", source, e);
                return Err(e);
            }
            Err(_) => {
                error!(
                    "Loading lexicon from {} timed out after {:?}",
                    source, self.options.timeout
                );
                return Err(LexiconError::StoreUnavailable(format!(
                    "load from {} timed out after {:?}",
                    source, self.options.timeout
                )));
            }
        };

        let mut loaded = BTreeMap::new();
        match document {
            Some(document) => {
                for mut rule in document.rules {
                    if loaded.contains_key(&rule.id) {
                        warn!("Duplicate rule {} in {}, keeping the first", rule.id, source);
                        continue;
                    }
                    rule.normalize_keywords(self.options.normalize_fullwidth);
                    // 无效规则保留在词库中但强制停用
                    if let Err(e) = rule.validate() {
                        if rule.enabled {
                            warn!("Disabling rule loaded from {}: {}", source, e);
                            rule.enabled = false;
                        }
                    }
                    loaded.insert(rule.id, Arc::new(rule));
                }
                info!("Loaded {} lexicon rules from {}", loaded.len(), source);
            }
            None => {
                info!("Lexicon not found at {}, starting empty", source);
            }
        }

        let snapshot: Vec<Arc<Rule>> = loaded.values().cloned().collect();
        *self.rules.write() = loaded;
        Ok(snapshot)
    }

    /// 持久化词库
    pub async fn persist(&self) -> LexiconResult<()> {
        let document = self.document();
        let source = self.backend.describe();
        match tokio::time::timeout(self.options.timeout, self.backend.write(&document)).await {
            Ok(Ok(())) => {
                debug!("Persisted {} lexicon rules to {}", document.rules.len(), source);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to persist lexicon to {}: {}", source, e);
                Err(e)
            }
            Err(_) => {
                error!(
                    "Persisting lexicon to {} timed out after {:?}",
                    source, self.options.timeout
                );
                Err(LexiconError::StoreUnavailable(format!(
                    "persist to {} timed out after {:?}",
                    source, self.options.timeout
                )))
            }
        }
    }

    /// 当前词库的文档形式
    pub fn document(&self) -> LexiconDocument {
        let rules = self.rules.read();
        LexiconDocument::from_rules(rules.values().map(|rule| Rule::clone(rule)))
    }

    /// 添加规则
    ///
    /// # 返回值
    ///
    /// - `DuplicateId` - ID 已存在
    /// - `InvalidRule` - 规则校验失败
    pub fn add(&self, mut rule: Rule) -> LexiconResult<()> {
        rule.normalize_keywords(self.options.normalize_fullwidth);
        rule.validate()?;

        let mut rules = self.rules.write();
        if rules.contains_key(&rule.id) {
            return Err(LexiconError::DuplicateId(rule.id));
        }
        info!("Added lexicon rule {} ({:?})", rule.id, rule.keywords);
        rules.insert(rule.id, Arc::new(rule));
        Ok(())
    }

    /// 删除规则
    pub fn remove(&self, id: RuleId) -> LexiconResult<Rule> {
        let removed = self
            .rules
            .write()
            .remove(&id)
            .ok_or(LexiconError::NotFound(id))?;
        info!("Removed lexicon rule {}", id);
        Ok(Arc::unwrap_or_clone(removed))
    }

    /// 局部更新规则
    pub fn update(&self, id: RuleId, patch: RulePatch) -> LexiconResult<Rule> {
        self.modify(id, |rule| {
            rule.apply(patch);
            Ok(())
        })
    }

    /// 启用或禁用规则
    pub fn set_enabled(&self, id: RuleId, enabled: bool) -> LexiconResult<Rule> {
        self.update(id, RulePatch::enabled(enabled))
    }

    /// 追加备选回复
    pub fn add_response(&self, id: RuleId, template: Vec<Segment>) -> LexiconResult<Rule> {
        self.modify(id, |rule| {
            rule.alternates.push(template);
            Ok(())
        })
    }

    /// 删除第 `index` 个回复（0 为主回复，其后为备选回复）
    ///
    /// 删除主回复时第一个备选回复成为主回复；规则只剩一个回复时不能删除。
    pub fn remove_response(&self, id: RuleId, index: usize) -> LexiconResult<Rule> {
        self.modify(id, |rule| {
            let count = rule.template_count();
            if index >= count {
                return Err(LexiconError::InvalidRule(format!(
                    "rule {} has no response at index {}",
                    rule.id, index
                )));
            }
            if count == 1 {
                return Err(LexiconError::InvalidRule(format!(
                    "rule {} has only one response, remove the rule instead",
                    rule.id
                )));
            }
            if index == 0 {
                rule.response_template = rule.alternates.remove(0);
            } else {
                rule.alternates.remove(index - 1);
            }
            Ok(())
        })
    }

    /// 在副本上修改，校验通过后替换
    fn modify<F>(&self, id: RuleId, f: F) -> LexiconResult<Rule>
    where
        F: FnOnce(&mut Rule) -> LexiconResult<()>,
    {
        let mut rules = self.rules.write();
        let current = rules.get(&id).ok_or(LexiconError::NotFound(id))?;

        let mut updated = Rule::clone(current);
        f(&mut updated)?;
        updated.id = id;
        updated.normalize_keywords(self.options.normalize_fullwidth);
        updated.validate()?;

        rules.insert(id, Arc::new(updated.clone()));
        info!("Updated lexicon rule {}", id);
        Ok(updated)
    }

    pub fn get(&self, id: RuleId) -> Option<Arc<Rule>> {
        self.rules.read().get(&id).cloned()
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.rules.read().contains_key(&id)
    }

    /// 列出规则，按 ID 排序
    pub fn list(&self, filter: Option<&RuleFilter>) -> Vec<Rule> {
        self.rules
            .read()
            .values()
            .filter(|rule| filter.map_or(true, |f| f.matches(rule)))
            .map(|rule| Rule::clone(rule))
            .collect()
    }

    /// 启用规则的快照
    pub fn enabled_rules(&self) -> Vec<Arc<Rule>> {
        self.rules
            .read()
            .values()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect()
    }

    /// 下一个可用 ID（当前最大 ID + 1）
    pub fn next_id(&self) -> RuleId {
        self.rules
            .read()
            .keys()
            .next_back()
            .map_or(RuleId(1), |id| RuleId(id.0.saturating_add(1)))
    }

    /// 清空词库，返回删除的规则数
    pub fn clear(&self) -> usize {
        let mut rules = self.rules.write();
        let count = rules.len();
        rules.clear();
        info!("Cleared {} lexicon rules", count);
        count
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
