//! 数据类型定义
//!
//! 快照接口返回的客户端可见结构。统一使用 camelCase 序列化，
//! 与状态文件及 JSON API 的字段风格保持一致。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// 团队成员（来自 `<team>/config.json` 的 members 数组）
///
/// 除 name 外全部可缺省：运行时版本之间字段并不稳定，
/// 未知字段忽略，缺失字段给默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub joined_at: Option<Value>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub backend_type: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tmux_pane_id: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<Value>,
    #[serde(default)]
    pub plan_mode_required: bool,
}

/// 团队详情（`<team>/config.json` 的解析结果）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub lead_agent_id: Option<String>,
    #[serde(default)]
    pub lead_session_id: Option<String>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

/// 团队列表项（详情 + 成员数）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    #[serde(flatten)]
    pub team: Team,
    pub member_count: usize,
}

/// Debug session 元信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSessionInfo {
    pub session_id: String,
    /// 日志文件大小（字节）
    pub size: u64,
    /// 最后修改时间（毫秒时间戳）
    pub modified_at: i64,
}

/// Debug 日志窗口（最后 N 行）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLog {
    pub total_lines: usize,
    pub lines: Vec<String>,
    /// 是否省略了更早的内容
    pub truncated: bool,
}

/// 监听根目录快照（路径 + 存在标记）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPaths {
    pub teams_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub teams_exists: bool,
    pub tasks_exists: bool,
    pub debug_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_config_deserialize_minimal() {
        // 只有 name 的最小配置
        let json = r#"{"name": "alpha"}"#;
        let team: Team = serde_json::from_str(json).unwrap();
        assert_eq!(team.name, "alpha");
        assert!(team.members.is_empty());
        assert!(team.lead_session_id.is_none());
    }

    #[test]
    fn test_team_config_deserialize_full() {
        let json = r#"{
            "name": "alpha",
            "description": "test team",
            "createdAt": 1720000000000,
            "leadAgentId": "lead-1",
            "members": [
                {"agentId": "a1", "name": "worker", "agentType": "general", "planModeRequired": true},
                {"name": "minimal"}
            ]
        }"#;

        let team: Team = serde_json::from_str(json).unwrap();
        assert_eq!(team.members.len(), 2);
        assert_eq!(team.members[0].agent_id.as_deref(), Some("a1"));
        assert!(team.members[0].plan_mode_required);
        assert!(!team.members[1].plan_mode_required);
    }

    #[test]
    fn test_team_summary_flatten() {
        let team: Team = serde_json::from_str(r#"{"name": "alpha"}"#).unwrap();
        let member_count = team.members.len();
        let summary = TeamSummary { team, member_count };

        let json = serde_json::to_value(&summary).unwrap();
        // flatten：name 与 memberCount 在同一层
        assert_eq!(json["name"], "alpha");
        assert_eq!(json["memberCount"], 0);
    }

    #[test]
    fn test_debug_session_info_camel_case() {
        let info = DebugSessionInfo {
            session_id: "sess-1".to_string(),
            size: 42,
            modified_at: 1720000000000,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"sessionId\":\"sess-1\""));
        assert!(json.contains("\"modifiedAt\""));
    }
}
