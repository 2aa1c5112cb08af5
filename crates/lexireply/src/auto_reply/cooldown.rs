//! 冷却时间追踪器
//!
//! 按 (规则 ID, scope key) 记录最后触发时间，防止同一规则被频繁触发。
//!
//! `check_and_mark` 通过 `DashMap::entry` 在分片写锁内完成检查和记录，
//! 同一个 key 上的并发调用只有一个能通过。被抑制的调用不会刷新最后触发时间。
//!
//! 冷却窗口可以是固定时长，也可以持续到某个时区的下一个零点。

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::auto_reply::types::{CooldownPolicy, Rule, RuleId};

/// 冷却窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownWindow {
    /// 固定时长
    Fixed(Duration),
    /// 到该时区的下一个零点
    UntilMidnight(Tz),
}

impl CooldownWindow {
    /// 规则的冷却窗口
    pub fn for_rule(rule: &Rule, timezone: Tz) -> Self {
        match rule.cooldown_policy {
            CooldownPolicy::Fixed => Self::Fixed(Duration::from_secs(rule.cooldown_seconds)),
            CooldownPolicy::UntilMidnight => Self::UntilMidnight(timezone),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Fixed(duration) if duration.is_zero())
    }
}

/// `last` 之后的第一个本地零点
fn next_midnight(last: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    last.with_timezone(&timezone)
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| timezone.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| last + chrono::Duration::days(1))
}

/// 冷却检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownCheckResult {
    /// 允许触发
    Allowed,
    /// 在冷却中
    Suppressed { remaining: Duration },
}

impl CooldownCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CooldownCheckResult::Allowed)
    }
}

/// 冷却记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub rule_id: RuleId,
    pub scope_key: String,
    pub last_fired_at: DateTime<Utc>,
}

/// 冷却时间追踪器
#[derive(Debug, Default)]
pub struct CooldownTracker {
    /// (规则, scope key) → 最后触发时间
    last_fired: DashMap<(RuleId, String), DateTime<Utc>>,
}

fn elapsed_between(last: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    // 时钟回拨按零处理
    (now - last).to_std().unwrap_or(Duration::ZERO)
}

fn evaluate(
    last: DateTime<Utc>,
    now: DateTime<Utc>,
    window: CooldownWindow,
) -> CooldownCheckResult {
    match window {
        CooldownWindow::Fixed(cooldown) => {
            let elapsed = elapsed_between(last, now);
            if elapsed >= cooldown {
                CooldownCheckResult::Allowed
            } else {
                CooldownCheckResult::Suppressed {
                    remaining: cooldown - elapsed,
                }
            }
        }
        CooldownWindow::UntilMidnight(timezone) => {
            let until = next_midnight(last, timezone);
            if now >= until {
                CooldownCheckResult::Allowed
            } else {
                CooldownCheckResult::Suppressed {
                    remaining: elapsed_between(now, until),
                }
            }
        }
    }
}

impl CooldownTracker {
    /// 创建新的冷却追踪器
    pub fn new() -> Self {
        Self::default()
    }

    /// 检查并记录触发
    ///
    /// # 参数
    ///
    /// * `rule_id` - 规则 ID
    /// * `scope_key` - 由冷却作用域推导出的 key
    /// * `cooldown` - 冷却时长，为零时总是允许且不记录
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 允许时已记录 `now` 为最后触发时间；被抑制时记录保持不变。
    pub fn check_and_mark(
        &self,
        rule_id: RuleId,
        scope_key: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> CooldownCheckResult {
        self.check_and_mark_window(rule_id, scope_key, CooldownWindow::Fixed(cooldown), now)
    }

    /// 按冷却窗口检查并记录触发
    pub fn check_and_mark_window(
        &self,
        rule_id: RuleId,
        scope_key: &str,
        window: CooldownWindow,
        now: DateTime<Utc>,
    ) -> CooldownCheckResult {
        if window.is_zero() {
            return CooldownCheckResult::Allowed;
        }

        match self.last_fired.entry((rule_id, scope_key.to_string())) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                CooldownCheckResult::Allowed
            }
            Entry::Occupied(mut entry) => {
                let result = evaluate(*entry.get(), now, window);
                if result.is_allowed() {
                    entry.insert(now);
                }
                result
            }
        }
    }

    /// 只检查不记录
    pub fn peek(
        &self,
        rule_id: RuleId,
        scope_key: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> CooldownCheckResult {
        self.peek_window(rule_id, scope_key, CooldownWindow::Fixed(cooldown), now)
    }

    pub fn peek_window(
        &self,
        rule_id: RuleId,
        scope_key: &str,
        window: CooldownWindow,
        now: DateTime<Utc>,
    ) -> CooldownCheckResult {
        if window.is_zero() {
            return CooldownCheckResult::Allowed;
        }
        match self.last_fired(rule_id, scope_key) {
            Some(last) => evaluate(last, now, window),
            None => CooldownCheckResult::Allowed,
        }
    }

    /// 获取最后触发时间
    pub fn last_fired(&self, rule_id: RuleId, scope_key: &str) -> Option<DateTime<Utc>> {
        self.last_fired
            .get(&(rule_id, scope_key.to_string()))
            .map(|entry| *entry.value())
    }

    /// 重置某个 key 的冷却
    pub fn reset(&self, rule_id: RuleId, scope_key: &str) -> bool {
        self.last_fired
            .remove(&(rule_id, scope_key.to_string()))
            .is_some()
    }

    /// 清除某条规则的所有冷却记录
    pub fn clear_rule(&self, rule_id: RuleId) -> usize {
        let before = self.last_fired.len();
        self.last_fired.retain(|(id, _), _| *id != rule_id);
        before.saturating_sub(self.last_fired.len())
    }

    pub fn clear(&self) {
        self.last_fired.clear();
    }

    /// 清理过期记录
    ///
    /// 删除最后触发时间早于 `now - max_age` 的记录，返回删除数量。
    pub fn cleanup_expired(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.last_fired.len();
        self.last_fired
            .retain(|_, last| elapsed_between(*last, now) < max_age);
        before.saturating_sub(self.last_fired.len())
    }

    /// 导出所有记录，按规则 ID 和 scope key 排序
    pub fn snapshot(&self) -> Vec<CooldownEntry> {
        let mut entries: Vec<CooldownEntry> = self
            .last_fired
            .iter()
            .map(|entry| CooldownEntry {
                rule_id: entry.key().0,
                scope_key: entry.key().1.clone(),
                last_fired_at: *entry.value(),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.rule_id
                .cmp(&b.rule_id)
                .then_with(|| a.scope_key.cmp(&b.scope_key))
        });
        entries
    }

    /// 导入记录，已存在的 key 取较新的时间
    pub fn restore(&self, entries: impl IntoIterator<Item = CooldownEntry>) {
        for entry in entries {
            self.last_fired
                .entry((entry.rule_id, entry.scope_key))
                .and_modify(|last| {
                    if entry.last_fired_at > *last {
                        *last = entry.last_fired_at;
                    }
                })
                .or_insert(entry.last_fired_at);
        }
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(seconds, 0).unwrap()
    }

    const RULE: RuleId = RuleId(1);

    // ============================================================================
    // Property-Based Tests
    // ============================================================================

    fn arb_scope_key() -> impl Strategy<Value = String> {
        "[a-z0-9:]{1,20}".prop_map(|s| s)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// 新 key 总是被允许
        #[test]
        fn prop_new_key_always_allowed(key in arb_scope_key(), cooldown in 1u64..3600) {
            let tracker = CooldownTracker::new();
            let result = tracker.check_and_mark(RULE, &key, Duration::from_secs(cooldown), at(0));
            prop_assert_eq!(result, CooldownCheckResult::Allowed);
        }

        /// 冷却期内被抑制，剩余时间 = 冷却 - 已过时间
        #[test]
        fn prop_remaining_is_exact(key in arb_scope_key(), cooldown in 2u64..3600, offset in 0u64..3600) {
            prop_assume!(offset < cooldown);
            let tracker = CooldownTracker::new();
            let cooldown_d = Duration::from_secs(cooldown);
            tracker.check_and_mark(RULE, &key, cooldown_d, at(0));

            let result = tracker.check_and_mark(RULE, &key, cooldown_d, at(offset as i64));
            prop_assert_eq!(
                result,
                CooldownCheckResult::Suppressed { remaining: Duration::from_secs(cooldown - offset) }
            );
            prop_assert_eq!(tracker.last_fired(RULE, &key), Some(at(0)));
        }

        /// 冷却结束后允许并刷新记录
        #[test]
        fn prop_allowed_after_cooldown(key in arb_scope_key(), cooldown in 1u64..3600, extra in 0u64..100) {
            let tracker = CooldownTracker::new();
            let cooldown_d = Duration::from_secs(cooldown);
            tracker.check_and_mark(RULE, &key, cooldown_d, at(0));

            let later = at((cooldown + extra) as i64);
            prop_assert!(tracker.check_and_mark(RULE, &key, cooldown_d, later).is_allowed());
            prop_assert_eq!(tracker.last_fired(RULE, &key), Some(later));
        }

        /// 不同 key 互不影响
        #[test]
        fn prop_independent_keys(k1 in arb_scope_key(), k2 in arb_scope_key()) {
            prop_assume!(k1 != k2);
            let tracker = CooldownTracker::new();
            let cooldown = Duration::from_secs(60);
            tracker.check_and_mark(RULE, &k1, cooldown, at(0));
            prop_assert!(tracker.check_and_mark(RULE, &k2, cooldown, at(1)).is_allowed());
            prop_assert!(!tracker.check_and_mark(RULE, &k1, cooldown, at(1)).is_allowed());
        }
    }

    // ============================================================
    // 单元测试
    // ============================================================

    #[test]
    fn test_allowed_suppressed_allowed_sequence() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);

        assert!(tracker.check_and_mark(RULE, "k", cooldown, at(0)).is_allowed());
        assert_eq!(
            tracker.check_and_mark(RULE, "k", cooldown, at(5)),
            CooldownCheckResult::Suppressed {
                remaining: Duration::from_secs(5)
            }
        );
        assert!(tracker.check_and_mark(RULE, "k", cooldown, at(10)).is_allowed());
    }

    #[test]
    fn test_suppressed_does_not_extend_window() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);

        tracker.check_and_mark(RULE, "k", cooldown, at(0));
        for t in 1..10 {
            assert!(!tracker.check_and_mark(RULE, "k", cooldown, at(t)).is_allowed());
        }
        // 窗口仍从第 0 秒开始计算
        assert!(tracker.check_and_mark(RULE, "k", cooldown, at(10)).is_allowed());
    }

    #[test]
    fn test_zero_cooldown_always_allowed() {
        let tracker = CooldownTracker::new();
        for _ in 0..5 {
            assert!(tracker
                .check_and_mark(RULE, "k", Duration::ZERO, at(0))
                .is_allowed());
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clock_going_backwards_counts_as_zero_elapsed() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);
        tracker.check_and_mark(RULE, "k", cooldown, at(100));
        assert_eq!(
            tracker.check_and_mark(RULE, "k", cooldown, at(50)),
            CooldownCheckResult::Suppressed {
                remaining: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn test_rules_are_independent() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);
        tracker.check_and_mark(RuleId(1), "k", cooldown, at(0));
        assert!(tracker
            .check_and_mark(RuleId(2), "k", cooldown, at(0))
            .is_allowed());
    }

    #[test]
    fn test_peek_does_not_mark() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);
        assert!(tracker.peek(RULE, "k", cooldown, at(0)).is_allowed());
        assert!(tracker.is_empty());

        tracker.check_and_mark(RULE, "k", cooldown, at(0));
        assert!(!tracker.peek(RULE, "k", cooldown, at(3)).is_allowed());
        assert_eq!(tracker.last_fired(RULE, "k"), Some(at(0)));
    }

    #[test]
    fn test_reset_and_clear_rule() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);
        tracker.check_and_mark(RuleId(1), "a", cooldown, at(0));
        tracker.check_and_mark(RuleId(1), "b", cooldown, at(0));
        tracker.check_and_mark(RuleId(2), "a", cooldown, at(0));

        assert!(tracker.reset(RuleId(1), "a"));
        assert!(!tracker.reset(RuleId(1), "a"));
        assert_eq!(tracker.clear_rule(RuleId(1)), 1);
        assert_eq!(tracker.len(), 1);

        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);
        tracker.check_and_mark(RULE, "old", cooldown, at(0));
        tracker.check_and_mark(RULE, "new", cooldown, at(90));

        let removed = tracker.cleanup_expired(at(100), Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(tracker.last_fired(RULE, "old").is_none());
        assert!(tracker.last_fired(RULE, "new").is_some());
    }

    #[test]
    fn test_snapshot_and_restore() {
        let tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(10);
        tracker.check_and_mark(RuleId(2), "b", cooldown, at(5));
        tracker.check_and_mark(RuleId(1), "a", cooldown, at(3));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot[0].rule_id, RuleId(1));
        assert_eq!(snapshot[1].rule_id, RuleId(2));

        let restored = CooldownTracker::new();
        restored.check_and_mark(RuleId(1), "a", cooldown, at(8));
        restored.restore(snapshot);
        assert_eq!(restored.len(), 2);
        // 已有的较新记录不会被覆盖
        assert_eq!(restored.last_fired(RuleId(1), "a"), Some(at(8)));
        assert_eq!(restored.last_fired(RuleId(2), "b"), Some(at(5)));
    }

    #[test]
    fn test_until_midnight_window() {
        let tz = chrono_tz::Asia::Shanghai;
        let window = CooldownWindow::UntilMidnight(tz);
        let tracker = CooldownTracker::new();
        // 2024-03-05 23:00 本地时间
        let fired = Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap();

        assert!(tracker.check_and_mark_window(RULE, "k", window, fired).is_allowed());
        assert_eq!(
            tracker.check_and_mark_window(
                RULE,
                "k",
                window,
                Utc.with_ymd_and_hms(2024, 3, 5, 15, 30, 0).unwrap()
            ),
            CooldownCheckResult::Suppressed {
                remaining: Duration::from_secs(30 * 60)
            }
        );
        // 本地零点
        let midnight = Utc.with_ymd_and_hms(2024, 3, 5, 16, 0, 0).unwrap();
        assert!(tracker.check_and_mark_window(RULE, "k", window, midnight).is_allowed());

        // 零点刚过触发，要等到第二天零点
        let almost = Utc.with_ymd_and_hms(2024, 3, 6, 15, 59, 0).unwrap();
        assert_eq!(
            tracker.check_and_mark_window(RULE, "k", window, almost),
            CooldownCheckResult::Suppressed {
                remaining: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_window_for_rule() {
        use crate::auto_reply::types::Segment;

        let rule = Rule::new(1, ["a"], vec![Segment::text("x")]).with_cooldown(30);
        assert_eq!(
            CooldownWindow::for_rule(&rule, Tz::UTC),
            CooldownWindow::Fixed(Duration::from_secs(30))
        );
        let rule = rule.with_cooldown_until_midnight();
        assert_eq!(
            CooldownWindow::for_rule(&rule, Tz::UTC),
            CooldownWindow::UntilMidnight(Tz::UTC)
        );
        assert!(CooldownWindow::Fixed(Duration::ZERO).is_zero());
        assert!(!CooldownWindow::UntilMidnight(Tz::UTC).is_zero());
    }

    #[test]
    fn test_concurrent_check_and_mark_allows_exactly_one() {
        let tracker = Arc::new(CooldownTracker::new());
        let cooldown = Duration::from_secs(60);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    tracker
                        .check_and_mark(RULE, "shared", cooldown, at(0))
                        .is_allowed()
                })
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(allowed, 1);
    }
}
