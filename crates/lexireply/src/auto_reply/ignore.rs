//! 忽略列表
//!
//! 管理不触发自动回复的群组和用户。
//!
//! # 功能
//!
//! - 忽略整个群组：群内所有消息都不回复
//! - 忽略用户：该用户在私聊和任何群组中的消息都不回复
//! - 空列表时不忽略任何消息
//!
//! # 示例
//!
//! ```rust
//! use lexireply::auto_reply::{IgnoreList, SessionIdentity};
//!
//! let mut ignore = IgnoreList::new();
//! ignore.add_group("g1");
//!
//! assert!(ignore.is_ignored(&SessionIdentity::group("g1", "alice")));
//! assert!(!ignore.is_ignored(&SessionIdentity::group("g2", "alice")));
//! assert!(!ignore.is_ignored(&SessionIdentity::direct("alice")));
//! ```

use std::collections::BTreeSet;

use crate::auto_reply::types::SessionIdentity;

/// 忽略列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    groups: BTreeSet<String>,
    users: BTreeSet<String>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从群组和用户列表创建
    ///
    /// # 参数
    ///
    /// * `groups` - 忽略的群组 ID
    /// * `users` - 忽略的用户 ID
    pub fn from_lists<G, U>(groups: G, users: U) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    /// 检查消息来源是否被忽略
    ///
    /// # 返回值
    ///
    /// 发送者被忽略，或消息来自被忽略的群组时返回 `true`。
    pub fn is_ignored(&self, session: &SessionIdentity) -> bool {
        if self.users.contains(&session.user_id) {
            return true;
        }
        session
            .group_id
            .as_ref()
            .is_some_and(|group| self.groups.contains(group))
    }

    pub fn add_group(&mut self, group_id: impl Into<String>) -> bool {
        self.groups.insert(group_id.into())
    }

    pub fn remove_group(&mut self, group_id: &str) -> bool {
        self.groups.remove(group_id)
    }

    pub fn add_user(&mut self, user_id: impl Into<String>) -> bool {
        self.users.insert(user_id.into())
    }

    pub fn remove_user(&mut self, user_id: &str) -> bool {
        self.users.remove(user_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &String> {
        self.groups.iter()
    }

    pub fn users(&self) -> impl Iterator<Item = &String> {
        self.users.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_ignores_nothing() {
        let ignore = IgnoreList::new();
        assert!(ignore.is_empty());
        assert!(!ignore.is_ignored(&SessionIdentity::direct("u1")));
        assert!(!ignore.is_ignored(&SessionIdentity::group("g1", "u1")));
    }

    #[test]
    fn test_ignored_user_everywhere() {
        let ignore = IgnoreList::from_lists(Vec::<String>::new(), ["spammer"]);
        assert!(ignore.is_ignored(&SessionIdentity::direct("spammer")));
        assert!(ignore.is_ignored(&SessionIdentity::group("g1", "spammer")));
        assert!(!ignore.is_ignored(&SessionIdentity::group("g1", "alice")));
    }

    #[test]
    fn test_add_remove() {
        let mut ignore = IgnoreList::new();
        assert!(ignore.add_group("g1"));
        assert!(!ignore.add_group("g1"));
        assert!(ignore.remove_group("g1"));
        assert!(!ignore.remove_group("g1"));

        ignore.add_user("u1");
        assert_eq!(ignore.users().count(), 1);
        ignore.clear();
        assert!(ignore.is_empty());
    }
}
