//! 文件监听器
//!
//! 监听三个状态根目录（teams / tasks / debug），把嘈杂的原始文件
//! 系统通知归一化为少量领域事件，每个逻辑变更至多一次（防抖合并）。
//!
//! 防抖窗口兼作写入稳定等待：通知静默一小段时间后才重读文件，
//! 降低读到写一半内容的概率。重读解析失败一律吞掉，等下次通知重试。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::broadcaster::Broadcaster;
use super::tail::TailTracker;
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::protocol::Event;

/// 文件监听器
pub struct ChangeWatcher {
    config: MonitorConfig,
    /// 广播器（事件经 mpsc 通道流入分发任务后调用）
    broadcaster: Arc<Broadcaster>,
    /// DebugSession 表 + 增量读取
    tail: TailTracker,
    /// 防抖器句柄；stop() 释放后全部监听停止
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher>>>,
}

impl ChangeWatcher {
    /// 创建文件监听器
    pub fn new(config: MonitorConfig, broadcaster: Arc<Broadcaster>) -> Arc<Self> {
        Arc::new(Self {
            config,
            broadcaster,
            tail: TailTracker::new(),
            debouncer: Mutex::new(None),
        })
    }

    /// 启动监听
    ///
    /// 不存在的根目录静默跳过（外部运行时可能尚未创建）；某个根
    /// 监听建立失败只影响该根，以 watch-error 事件上报，其余照常。
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);

        let mut debouncer = new_debouncer(
            Duration::from_millis(self.config.debounce_ms),
            move |res: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                if let Ok(events) = res {
                    for event in events {
                        if event.kind == DebouncedEventKind::Any {
                            let _ = tx.blocking_send(event.path);
                        }
                    }
                }
            },
        )
        .map_err(|e| Error::Watch(e.to_string()))?;

        let roots = [self.config.teams_dir(), self.config.tasks_dir(), self.config.debug_dir()];
        let mut watched = 0usize;

        for root in &roots {
            if !root.exists() {
                tracing::debug!("跳过不存在的监听根目录: {:?}", root);
                continue;
            }

            match debouncer.watcher().watch(root, RecursiveMode::Recursive) {
                Ok(_) => {
                    watched += 1;
                    tracing::info!("👁️ 监听目录: {:?}", root);
                }
                Err(e) => {
                    self.broadcaster.broadcast(Event::WatchError {
                        message: format!("Failed to watch {}: {}", root.display(), e),
                    });
                }
            }
        }

        if watched == 0 {
            tracing::warn!("⚠️ 没有可监听的根目录");
        }

        *self.debouncer.lock() = Some(debouncer);

        // 分发任务：防抖后的路径经通道流入，逐个归类并广播
        let watcher = self.clone();
        tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                watcher.handle_change(&path).await;
            }
        });

        tracing::info!("🔄 文件监听服务已启动 ({}/{} 个根目录)", watched, roots.len());
        Ok(())
    }

    /// 释放全部监听句柄；幂等
    pub fn stop(&self) {
        if self.debouncer.lock().take().is_some() {
            tracing::info!("🛑 文件监听已停止");
        }
    }

    /// 关注 debug session；幂等
    ///
    /// 这是 debug 日志开始产生 debug-appended 事件的唯一途径：
    /// 目录扫描自动发现的新日志只会变得可关注，不会自动推送。
    pub fn watch_debug_session(&self, session_id: &str) {
        self.tail
            .watch(session_id, &self.config.debug_log_path(session_id));
        tracing::debug!("🔍 关注 debug session: {}", session_id);
    }

    /// 取消关注 debug session，立即停止该 session 的增量 I/O
    pub fn unwatch_debug_session(&self, session_id: &str) {
        self.tail.unwatch(session_id);
        tracing::debug!("🔕 取消关注 debug session: {}", session_id);
    }

    /// session 当前是否被关注（测试与诊断用）
    pub fn is_debug_session_watched(&self, session_id: &str) -> bool {
        self.tail.is_interested(session_id)
    }

    /// 处理一条防抖后的变更通知
    async fn handle_change(&self, path: &Path) {
        let teams_dir = self.config.teams_dir();
        let tasks_dir = self.config.tasks_dir();
        let debug_dir = self.config.debug_dir();

        if let Ok(rel) = path.strip_prefix(&teams_dir) {
            match classify_team_path(rel) {
                Some(TeamChange::Config { team }) => {
                    if let Some(data) = read_json(path).await {
                        self.broadcaster
                            .broadcast(Event::TeamConfigChanged { team, data });
                    }
                }
                Some(TeamChange::Inbox { team, agent }) => {
                    if let Some(data) = read_json(path).await {
                        self.broadcaster
                            .broadcast(Event::InboxChanged { team, agent, data });
                    }
                }
                None => {}
            }
        } else if let Ok(rel) = path.strip_prefix(&tasks_dir) {
            if let Some((team, task_id)) = classify_task_path(rel) {
                if let Some(data) = read_json(path).await {
                    self.broadcaster
                        .broadcast(Event::TaskChanged { team, task_id, data });
                }
            }
        } else if let Ok(rel) = path.strip_prefix(&debug_dir) {
            if let Some(session_id) = classify_debug_path(rel) {
                self.handle_debug_change(session_id, path);
            }
        }
    }

    /// debug 根目录下的变更：登记 session，已关注时读增量并广播
    fn handle_debug_change(&self, session_id: String, path: &Path) {
        self.tail.register(&session_id);

        // 未关注的 session 不做 I/O（drain 内部同样把关）
        let lines = self.tail.drain(&session_id, path);
        if !lines.is_empty() {
            self.broadcaster
                .broadcast(Event::DebugAppended { session_id, lines });
        }
    }
}

/// 团队根目录下的变更类别
#[derive(Debug, PartialEq, Eq)]
enum TeamChange {
    Config { team: String },
    Inbox { team: String, agent: String },
}

fn components(rel: &Path) -> Vec<String> {
    rel.components()
        .filter_map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect()
}

/// `<team>/config.json` 或 `<team>/inboxes/<agent>.json`；其余忽略
fn classify_team_path(rel: &Path) -> Option<TeamChange> {
    let parts = components(rel);
    match parts.as_slice() {
        [team, file] if file == "config.json" => Some(TeamChange::Config { team: team.clone() }),
        [team, dir, file] if dir == "inboxes" => {
            let agent = file.strip_suffix(".json")?;
            Some(TeamChange::Inbox {
                team: team.clone(),
                agent: agent.to_string(),
            })
        }
        _ => None,
    }
}

/// `<team>/<taskId>.json`，排除保留的锁标记名；其余忽略
fn classify_task_path(rel: &Path) -> Option<(String, String)> {
    let parts = components(rel);
    match parts.as_slice() {
        [team, file] if file != ".lock" => {
            let task_id = file.strip_suffix(".json")?;
            Some((team.clone(), task_id.to_string()))
        }
        _ => None,
    }
}

/// 根目录直下的 `<sessionId>.txt`；其余忽略
fn classify_debug_path(rel: &Path) -> Option<String> {
    let parts = components(rel);
    match parts.as_slice() {
        [file] => Some(file.strip_suffix(".txt")?.to_string()),
        _ => None,
    }
}

/// 重读变更后的 JSON 文件；失败吞掉（文件可能写入中，下次通知重试）
async fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!("重读文件失败 {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("解析文件失败 {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_team_config() {
        assert_eq!(
            classify_team_path(Path::new("alpha/config.json")),
            Some(TeamChange::Config {
                team: "alpha".to_string()
            })
        );
        // 团队目录本身、别的文件都忽略
        assert_eq!(classify_team_path(Path::new("alpha")), None);
        assert_eq!(classify_team_path(Path::new("alpha/notes.txt")), None);
        assert_eq!(
            classify_team_path(Path::new("alpha/deep/config.json")),
            None
        );
    }

    #[test]
    fn test_classify_team_inbox() {
        assert_eq!(
            classify_team_path(Path::new("alpha/inboxes/worker.json")),
            Some(TeamChange::Inbox {
                team: "alpha".to_string(),
                agent: "worker".to_string(),
            })
        );
        assert_eq!(classify_team_path(Path::new("alpha/inboxes")), None);
        assert_eq!(
            classify_team_path(Path::new("alpha/inboxes/worker.tmp")),
            None
        );
        assert_eq!(
            classify_team_path(Path::new("alpha/other/worker.json")),
            None
        );
    }

    #[test]
    fn test_classify_task_path() {
        assert_eq!(
            classify_task_path(Path::new("alpha/task-1.json")),
            Some(("alpha".to_string(), "task-1".to_string()))
        );
        // 保留的锁标记名不产生事件
        assert_eq!(classify_task_path(Path::new("alpha/.lock")), None);
        assert_eq!(classify_task_path(Path::new("alpha/task-1.tmp")), None);
        assert_eq!(classify_task_path(Path::new("alpha")), None);
        assert_eq!(classify_task_path(Path::new("alpha/sub/task-1.json")), None);
    }

    #[test]
    fn test_classify_debug_path() {
        assert_eq!(
            classify_debug_path(Path::new("sess-1.txt")),
            Some("sess-1".to_string())
        );
        assert_eq!(classify_debug_path(Path::new("sess-1.log")), None);
        assert_eq!(classify_debug_path(Path::new("nested/sess-1.txt")), None);
    }
}
