//! 快照读取器
//!
//! 按需读取当前状态文件（团队 / 任务 / 收件箱 / debug 日志），
//! 供请求处理器和事件校验使用。事件流只是优化，快照才是事实来源。
//!
//! 所有读取都把"不存在"作为显式的缺席信号（None / 空集合）返回，
//! 不视为错误；解析失败的文件同样跳过（可能正在写入中）。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde_json::Value;

use crate::config::MonitorConfig;
use crate::types::{DebugLog, DebugSessionInfo, Team, TeamSummary, WatchPaths};

/// 日志全量视图的默认窗口（行）
pub const DEFAULT_LOG_LINES: usize = 500;
/// 日志短尾视图的默认窗口（行）
pub const DEFAULT_TAIL_LINES: usize = 50;

/// 读取并解析 JSON 文件；任何失败返回 None
fn read_json_safe(path: &Path) -> Option<Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// 快照读取器
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    config: MonitorConfig,
}

impl SnapshotReader {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    /// 扫描团队根目录，列出所有可解析的团队
    pub fn list_teams(&self) -> Vec<TeamSummary> {
        let teams_dir = self.config.teams_dir();
        let Ok(entries) = fs::read_dir(&teams_dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();

        names
            .iter()
            .filter_map(|name| self.get_team(name))
            .map(|team| {
                let member_count = team.members.len();
                TeamSummary { team, member_count }
            })
            .collect()
    }

    /// 读取一个团队的详情；不存在或配置无法解析返回 None
    pub fn get_team(&self, team_name: &str) -> Option<Team> {
        let config_path = self.config.teams_dir().join(team_name).join("config.json");
        let value = read_json_safe(&config_path)?;
        serde_json::from_value(value).ok()
    }

    /// 列出一个团队的任务，按数字 id 升序
    ///
    /// 任务记录是运行时自有的 JSON，这里原样透传，只要求 id 字段存在
    pub fn list_tasks(&self, team_name: &str) -> Vec<Value> {
        let tasks_dir = self.config.tasks_dir().join(team_name);
        let Ok(entries) = fs::read_dir(&tasks_dir) else {
            return Vec::new();
        };

        let mut tasks: Vec<Value> = entries
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(".json"))
            })
            .filter_map(|e| read_json_safe(&e.path()))
            .filter(|task| task.get("id").is_some())
            .collect();

        tasks.sort_by(|a, b| {
            task_id_num(a)
                .partial_cmp(&task_id_num(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tasks
    }

    /// 读取单个任务；不存在返回 None
    pub fn get_task(&self, team_name: &str, task_id: &str) -> Option<Value> {
        let task_path = self
            .config
            .tasks_dir()
            .join(team_name)
            .join(format!("{task_id}.json"));
        read_json_safe(&task_path)
    }

    /// 读取一个 Agent 的收件箱；不存在视为空收件箱
    pub fn get_inbox(&self, team_name: &str, agent_name: &str) -> Vec<Value> {
        let inbox_path = self
            .config
            .teams_dir()
            .join(team_name)
            .join("inboxes")
            .join(format!("{agent_name}.json"));

        read_json_safe(&inbox_path)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// 列出一个团队的全部收件箱（agent 名 → 消息列表）
    pub fn list_inboxes(&self, team_name: &str) -> BTreeMap<String, Vec<Value>> {
        let inbox_dir = self.config.teams_dir().join(team_name).join("inboxes");
        let Ok(entries) = fs::read_dir(&inbox_dir) else {
            return BTreeMap::new();
        };

        let mut inboxes = BTreeMap::new();
        for entry in entries.flatten() {
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(agent_name) = file_name.strip_suffix(".json") else {
                continue;
            };
            let messages = read_json_safe(&entry.path())
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            inboxes.insert(agent_name.to_string(), messages);
        }
        inboxes
    }

    /// 读取一个 debug session 的最后 tail_lines 行；session 不存在返回 None
    pub fn get_debug_log(&self, session_id: &str, tail_lines: usize) -> Option<DebugLog> {
        let log_path = self.config.debug_log_path(session_id);
        let content = fs::read_to_string(&log_path).ok()?;

        let all_lines: Vec<&str> = content.split('\n').collect();
        let start = all_lines.len().saturating_sub(tail_lines);

        Some(DebugLog {
            total_lines: all_lines.len(),
            lines: all_lines[start..].iter().map(|s| s.to_string()).collect(),
            truncated: start > 0,
        })
    }

    /// 列出全部 debug session（id、大小、最后修改时间），最新的在前
    pub fn list_debug_sessions(&self) -> Vec<DebugSessionInfo> {
        let debug_dir = self.config.debug_dir();
        let Ok(entries) = fs::read_dir(&debug_dir) else {
            return Vec::new();
        };

        let mut sessions: Vec<DebugSessionInfo> = entries
            .flatten()
            .filter_map(|entry| {
                let file_name = entry.file_name();
                let session_id = file_name.to_str()?.strip_suffix(".txt")?.to_string();
                let meta = entry.metadata().ok()?;
                let modified_at = meta
                    .modified()
                    .ok()?
                    .duration_since(UNIX_EPOCH)
                    .ok()?
                    .as_millis() as i64;
                Some(DebugSessionInfo {
                    session_id,
                    size: meta.len(),
                    modified_at,
                })
            })
            .collect();

        sessions.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        sessions
    }

    /// 三个监听根目录的路径与存在标记
    pub fn watch_paths(&self) -> WatchPaths {
        self.config.watch_paths()
    }
}

/// 任务 id 的数字序（字符串形式的数字同样参与排序）
fn task_id_num(task: &Value) -> f64 {
    match task.get("id") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::MAX),
        Some(Value::String(s)) => s.parse().unwrap_or(f64::MAX),
        _ => f64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_reader() -> (TempDir, SnapshotReader) {
        let temp = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            state_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        (temp, SnapshotReader::new(config))
    }

    fn write_team(reader: &SnapshotReader, name: &str, config: &str) {
        let dir = reader.config.teams_dir().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), config).unwrap();
    }

    #[test]
    fn test_list_teams_missing_root() {
        let (_temp, reader) = test_reader();
        assert!(reader.list_teams().is_empty());
    }

    #[test]
    fn test_list_teams_skips_unparseable() {
        let (_temp, reader) = test_reader();
        write_team(&reader, "alpha", r#"{"name":"alpha","members":[{"name":"w1"}]}"#);
        write_team(&reader, "broken", "{не json");

        let teams = reader.list_teams();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].team.name, "alpha");
        assert_eq!(teams[0].member_count, 1);
    }

    #[test]
    fn test_get_team_absent() {
        let (_temp, reader) = test_reader();
        assert!(reader.get_team("nope").is_none());
    }

    #[test]
    fn test_list_tasks_sorted_numeric() {
        let (_temp, reader) = test_reader();
        let tasks_dir = reader.config.tasks_dir().join("alpha");
        fs::create_dir_all(&tasks_dir).unwrap();
        fs::write(tasks_dir.join("10.json"), r#"{"id":"10","subject":"b"}"#).unwrap();
        fs::write(tasks_dir.join("2.json"), r#"{"id":2,"subject":"a"}"#).unwrap();
        // 没有 id 字段的文件被跳过
        fs::write(tasks_dir.join("junk.json"), r#"{"subject":"x"}"#).unwrap();

        let tasks = reader.list_tasks("alpha");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0]["id"], 2);
        assert_eq!(tasks[1]["id"], "10");
    }

    #[test]
    fn test_get_inbox_defaults_empty() {
        let (_temp, reader) = test_reader();
        assert!(reader.get_inbox("alpha", "worker").is_empty());

        let inbox_dir = reader.config.teams_dir().join("alpha").join("inboxes");
        fs::create_dir_all(&inbox_dir).unwrap();
        fs::write(
            inbox_dir.join("worker.json"),
            r#"[{"from":"lead","text":"hi"}]"#,
        )
        .unwrap();

        let inbox = reader.get_inbox("alpha", "worker");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0]["from"], "lead");

        let inboxes = reader.list_inboxes("alpha");
        assert_eq!(inboxes.len(), 1);
        assert!(inboxes.contains_key("worker"));
    }

    #[test]
    fn test_debug_log_tail_window() {
        let (_temp, reader) = test_reader();
        fs::create_dir_all(reader.config.debug_dir()).unwrap();
        let content: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        fs::write(reader.config.debug_log_path("sess-1"), content).unwrap();

        // 10 行 + 末尾空片段
        let log = reader.get_debug_log("sess-1", 3).unwrap();
        assert_eq!(log.total_lines, 11);
        assert_eq!(log.lines, vec!["line9", "line10", ""]);
        assert!(log.truncated);

        let log = reader.get_debug_log("sess-1", 100).unwrap();
        assert!(!log.truncated);

        assert!(reader.get_debug_log("missing", 10).is_none());
    }

    #[test]
    fn test_list_debug_sessions_newest_first() {
        let (_temp, reader) = test_reader();
        let debug_dir = reader.config.debug_dir();
        fs::create_dir_all(&debug_dir).unwrap();
        fs::write(debug_dir.join("old.txt"), "a\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(debug_dir.join("new.txt"), "bb\n").unwrap();
        // 非 .txt 文件忽略
        fs::write(debug_dir.join("note.md"), "x").unwrap();

        let sessions = reader.list_debug_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "new");
        assert_eq!(sessions[1].session_id, "old");
        assert_eq!(sessions[1].size, 2);
    }
}
