//! Monitor 配置
//!
//! 解析三个被监听的状态根目录（teams / tasks / debug）以及
//! socket、PID 等运行时文件的路径。

use std::path::PathBuf;

use crate::types::WatchPaths;

/// Monitor 配置
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// 状态目录（默认 ~/.claude），外部多 Agent 运行时在其下写入状态文件
    pub state_dir: PathBuf,
    /// 防抖窗口（毫秒）。兼作写入稳定等待：通知在窗口静默后才触发重读
    pub debounce_ms: u64,
    /// 空闲超时（秒），无连接达到该时长后退出；0 表示永不退出
    pub idle_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude");

        Self {
            state_dir,
            debounce_ms: 50,
            idle_timeout_secs: 300,
        }
    }
}

impl MonitorConfig {
    /// 从环境变量或默认路径创建配置
    ///
    /// `TEAMS_MONITOR_STATE_DIR` 覆盖状态目录（测试和多实例场景用）
    pub fn from_env() -> Self {
        if let Ok(dir) = std::env::var("TEAMS_MONITOR_STATE_DIR") {
            return Self {
                state_dir: PathBuf::from(dir),
                ..Default::default()
            };
        }
        Self::default()
    }

    /// 团队状态根目录
    pub fn teams_dir(&self) -> PathBuf {
        self.state_dir.join("teams")
    }

    /// 任务状态根目录
    pub fn tasks_dir(&self) -> PathBuf {
        self.state_dir.join("tasks")
    }

    /// Debug 日志根目录
    pub fn debug_dir(&self) -> PathBuf {
        self.state_dir.join("debug")
    }

    /// 某个 debug session 的日志文件路径
    pub fn debug_log_path(&self, session_id: &str) -> PathBuf {
        self.debug_dir().join(format!("{session_id}.txt"))
    }

    /// Monitor 运行时文件目录（socket / PID）
    pub fn run_dir(&self) -> PathBuf {
        self.state_dir.join("monitor")
    }

    /// 控制 socket 路径（双向，频道过滤投递）
    pub fn socket_path(&self) -> PathBuf {
        self.run_dir().join("monitor.sock")
    }

    /// 事件 socket 路径（单向，全量广播）
    pub fn events_socket_path(&self) -> PathBuf {
        self.run_dir().join("monitor-events.sock")
    }

    /// PID 文件路径
    pub fn pid_path(&self) -> PathBuf {
        self.run_dir().join("monitor.pid")
    }

    /// 三个监听根目录的快照（路径 + 存在标记）
    ///
    /// 存在性按需检查；不存在的根目录不是错误，外部运行时可能尚未创建
    pub fn watch_paths(&self) -> WatchPaths {
        let teams_dir = self.teams_dir();
        let tasks_dir = self.tasks_dir();
        let debug_dir = self.debug_dir();

        WatchPaths {
            teams_exists: teams_dir.exists(),
            tasks_exists: tasks_dir.exists(),
            debug_exists: debug_dir.exists(),
            teams_dir,
            tasks_dir,
            debug_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let config = MonitorConfig {
            state_dir: PathBuf::from("/tmp/claude-test"),
            ..Default::default()
        };

        assert_eq!(config.teams_dir(), PathBuf::from("/tmp/claude-test/teams"));
        assert_eq!(config.tasks_dir(), PathBuf::from("/tmp/claude-test/tasks"));
        assert_eq!(config.debug_dir(), PathBuf::from("/tmp/claude-test/debug"));
        assert_eq!(
            config.debug_log_path("sess-1"),
            PathBuf::from("/tmp/claude-test/debug/sess-1.txt")
        );
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/tmp/claude-test/monitor/monitor.sock")
        );
    }

    #[test]
    fn test_watch_paths_existence() {
        let temp = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            state_dir: temp.path().to_path_buf(),
            ..Default::default()
        };

        let paths = config.watch_paths();
        assert!(!paths.teams_exists);
        assert!(!paths.debug_exists);

        std::fs::create_dir_all(config.teams_dir()).unwrap();
        let paths = config.watch_paths();
        assert!(paths.teams_exists);
        assert!(!paths.tasks_exists);
    }
}
