//! Monitor 模块 - 文件监听 + 事件归一化 + 订阅扇出
//!
//! 数据流：文件系统变更 → ChangeWatcher 归类（debug 场景经
//! TailTracker 取增量）→ Broadcaster 按订阅表扇出 → 两类传输投递。

mod broadcaster;
mod handler;
mod server;
mod subscriptions;
mod tail;
mod watcher;

pub use broadcaster::Broadcaster;
pub use handler::{Handler, MONITOR_VERSION};
pub use server::{cleanup_stale_monitor, is_monitor_running, Monitor};
pub use subscriptions::{ConnId, SubscriptionRegistry};
pub use tail::TailTracker;
pub use watcher::ChangeWatcher;
