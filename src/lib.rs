//! agent-teams-monitor - Agent Teams 状态监控
//!
//! 监听外部多 Agent 运行时写入的进程本地状态文件（团队花名册、
//! 任务记录、收件箱、debug 日志），把变更归一化为类型化事件，
//! 推送给两类传输上的订阅者。事件流只做"有变化，去重取"的提示
//! 和日志增量；全量状态始终以快照读取为准。
//!
//! # 核心功能
//!
//! - **变更检测**: 目录监听 + 防抖重读 + 日志增量 tail
//! - **订阅扇出**: 按频道过滤的控制连接 + 无条件广播的事件连接
//! - **快照读取**: 团队 / 任务 / 收件箱 / debug 日志按需读取
//! - **命令投递**: 向 Agent 收件箱写入控制消息
//!
//! # Feature Flags
//!
//! - `reader`: 快照读取能力
//! - `writer`: 收件箱命令投递能力
//! - `monitor`: 监控守护进程（文件监听 + 事件推送）
//! - `client`: Monitor Client（供仪表盘等组件使用）
//!
//! # 架构
//!
//! 文件系统变更 → ChangeWatcher 归类（debug 场景经 TailTracker
//! 取增量）→ Broadcaster 按 SubscriptionRegistry 扇出 → 传输投递。
//! 投递 fire-and-forget：不确认、不重试、不排队，慢客户端丢消息，
//! 客户端靠快照重取恢复。

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

#[cfg(feature = "reader")]
pub mod reader;

#[cfg(feature = "writer")]
pub mod writer;

#[cfg(feature = "monitor")]
pub mod monitor;

#[cfg(feature = "client")]
pub mod client;

// Re-exports
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use protocol::{
    channel, label, now_ms, ControlAction, Event, Push, QueryType, Request, Response,
};
pub use types::{DebugLog, DebugSessionInfo, Team, TeamMember, TeamSummary, WatchPaths};

#[cfg(feature = "reader")]
pub use reader::{SnapshotReader, DEFAULT_LOG_LINES, DEFAULT_TAIL_LINES};

#[cfg(feature = "writer")]
pub use writer::CommandWriter;

#[cfg(feature = "monitor")]
pub use monitor::{cleanup_stale_monitor, is_monitor_running, Monitor, MONITOR_VERSION};

#[cfg(feature = "client")]
pub use client::{connect_monitor, ClientConfig, MonitorClient};
