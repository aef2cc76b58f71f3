//! 订阅表
//!
//! 按连接维护订阅的频道集合和 debug session 关注。连接断开时
//! 显式移除（不依赖任何隐式回收），保证资源释放是确定性的。

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// 连接 ID
pub type ConnId = u64;

/// 单个连接的订阅状态
#[derive(Debug, Default)]
struct ConnState {
    /// 订阅的频道；空集合 = 接收全部事件
    channels: HashSet<String>,
    /// 该连接关注的 debug session
    debug_sessions: HashSet<String>,
}

/// 订阅表
///
/// 不校验频道名：未知频道不会匹配任何真实事件，是惰性的而非错误。
pub struct SubscriptionRegistry {
    conns: RwLock<HashMap<ConnId, ConnState>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
        }
    }

    /// 登记新连接（空订阅集合 = 接收全部）
    pub fn register(&self, conn_id: ConnId) {
        self.conns.write().insert(conn_id, ConnState::default());
    }

    /// 添加频道订阅，返回订阅后的完整集合（用于回执），按字典序
    pub fn subscribe(&self, conn_id: ConnId, channels: &[String]) -> Vec<String> {
        let mut conns = self.conns.write();
        let Some(state) = conns.get_mut(&conn_id) else {
            return Vec::new();
        };
        for channel in channels {
            state.channels.insert(channel.clone());
        }
        let mut all: Vec<String> = state.channels.iter().cloned().collect();
        all.sort();
        all
    }

    /// 移除频道订阅
    pub fn unsubscribe(&self, conn_id: ConnId, channels: &[String]) {
        if let Some(state) = self.conns.write().get_mut(&conn_id) {
            for channel in channels {
                state.channels.remove(channel);
            }
        }
    }

    /// 连接是否想要收到属于这些频道的事件
    ///
    /// 空订阅集合匹配一切；否则求交集。未登记的连接不匹配
    /// （断开与投递竞争时允许静默丢弃该次投递）。
    pub fn matches(&self, conn_id: ConnId, event_channels: &[String]) -> bool {
        let conns = self.conns.read();
        let Some(state) = conns.get(&conn_id) else {
            return false;
        };
        state.channels.is_empty()
            || event_channels
                .iter()
                .any(|channel| state.channels.contains(channel))
    }

    /// 记录连接对 debug session 的关注；返回该 session 是否从
    /// 无人关注变为有人关注
    pub fn add_debug_interest(&self, conn_id: ConnId, session_id: &str) -> bool {
        let mut conns = self.conns.write();
        let already_interested = conns
            .values()
            .any(|state| state.debug_sessions.contains(session_id));
        if let Some(state) = conns.get_mut(&conn_id) {
            state.debug_sessions.insert(session_id.to_string());
            !already_interested
        } else {
            false
        }
    }

    /// 移除连接对 debug session 的关注；返回该 session 是否已无
    /// 任何关注者
    pub fn remove_debug_interest(&self, conn_id: ConnId, session_id: &str) -> bool {
        let mut conns = self.conns.write();
        if let Some(state) = conns.get_mut(&conn_id) {
            state.debug_sessions.remove(session_id);
        }
        !conns
            .values()
            .any(|state| state.debug_sessions.contains(session_id))
    }

    /// 移除连接的全部订阅状态；每个连接生命周期内恰好调用一次
    ///
    /// 返回因此失去全部关注者的 debug session 列表，调用方据此
    /// 停止对应的 tail I/O。
    pub fn drop_conn(&self, conn_id: ConnId) -> Vec<String> {
        let mut conns = self.conns.write();
        let Some(state) = conns.remove(&conn_id) else {
            return Vec::new();
        };
        state
            .debug_sessions
            .into_iter()
            .filter(|session_id| {
                !conns
                    .values()
                    .any(|other| other.debug_sessions.contains(session_id))
            })
            .collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chans(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_set_matches_everything() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);

        assert!(registry.matches(1, &chans(&["team:alpha"])));
        assert!(registry.matches(1, &chans(&["debug:sess-1"])));
        // 空事件频道列表（watch-error）也命中接收全部的连接
        assert!(registry.matches(1, &[]));
    }

    #[test]
    fn test_narrow_subscription_filters() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);
        registry.subscribe(1, &chans(&["debug:abc"]));

        assert!(registry.matches(1, &chans(&["debug:abc"])));
        // debug:abc 订阅者收不到 xyz 团队的任务事件
        assert!(!registry.matches(1, &chans(&["team:xyz", "tasks:xyz"])));
        assert!(!registry.matches(1, &[]));
    }

    #[test]
    fn test_subscribe_returns_full_set() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);

        let all = registry.subscribe(1, &chans(&["b:1", "a:1"]));
        assert_eq!(all, chans(&["a:1", "b:1"]));

        let all = registry.subscribe(1, &chans(&["c:1"]));
        assert_eq!(all, chans(&["a:1", "b:1", "c:1"]));

        registry.unsubscribe(1, &chans(&["b:1"]));
        assert!(!registry.matches(1, &chans(&["b:1"])));
        assert!(registry.matches(1, &chans(&["a:1"])));
    }

    #[test]
    fn test_unknown_conn_never_matches() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.matches(42, &chans(&["team:alpha"])));
    }

    #[test]
    fn test_debug_interest_refcounting() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);
        registry.register(2);

        // 首个关注者
        assert!(registry.add_debug_interest(1, "sess"));
        // 第二个关注者不再是"首个"
        assert!(!registry.add_debug_interest(2, "sess"));

        // 移除一个，还有人关注
        assert!(!registry.remove_debug_interest(1, "sess"));
        // 最后一个移除后无人关注
        assert!(registry.remove_debug_interest(2, "sess"));
    }

    #[test]
    fn test_drop_conn_reports_orphaned_sessions() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);
        registry.register(2);
        registry.add_debug_interest(1, "only-mine");
        registry.add_debug_interest(1, "shared");
        registry.add_debug_interest(2, "shared");

        let orphaned = registry.drop_conn(1);
        assert_eq!(orphaned, vec!["only-mine".to_string()]);

        // 连接已移除，不再匹配任何事件
        assert!(!registry.matches(1, &chans(&["team:alpha"])));

        // 重复 drop 无副作用
        assert!(registry.drop_conn(1).is_empty());
    }
}
