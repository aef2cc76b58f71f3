//! IPC 协议定义
//!
//! 通信方式：Unix Socket + JSONL（每条消息一行 JSON + '\n'）。
//! 控制 socket 双向：客户端发 [`Request`]，服务端回 [`Response`] 并
//! 按频道推送 [`Push`]；事件 socket 单向：只推送 [`Push`]。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 当前毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 频道名（`kind:scope` 形式），用于路由事件到订阅者
pub mod channel {
    pub fn team(team: &str) -> String {
        format!("team:{team}")
    }

    pub fn messages(team: &str) -> String {
        format!("messages:{team}")
    }

    pub fn tasks(team: &str) -> String {
        format!("tasks:{team}")
    }

    pub fn debug(session_id: &str) -> String {
        format!("debug:{session_id}")
    }

    /// 从 `debug:<id>` 频道名反解 session id
    pub fn debug_session_id(channel: &str) -> Option<&str> {
        channel.strip_prefix("debug:").filter(|id| !id.is_empty())
    }
}

/// 外发事件标签
///
/// 部分变更会以两个标签重复推送（专用标签 + 通用 updated 标签），
/// 客户端可以按需订阅窄或宽的一侧。
pub mod label {
    pub const TEAM_CONFIG: &str = "team:config";
    pub const TEAM_UPDATED: &str = "team:updated";
    pub const TEAM_INBOX: &str = "team:inbox";
    pub const MESSAGE_NEW: &str = "message:new";
    pub const TASK_UPDATE: &str = "task:update";
    pub const TASK_UPDATED: &str = "task:updated";
    pub const DEBUG_UPDATE: &str = "debug:update";
    pub const DEBUG_LINE: &str = "debug:line";
    pub const WATCH_ERROR: &str = "watch:error";
}

/// 请求类型（Client → Monitor）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// 握手（可选，客户端可以跳过直接订阅）
    Handshake {
        /// 组件名称
        component: String,
        /// 组件版本（用于日志和诊断）
        version: String,
    },

    /// 订阅频道。订阅 `debug:<id>` 频道会同时开始关注对应 session
    Subscribe { channels: Vec<String> },

    /// 取消订阅
    Unsubscribe { channels: Vec<String> },

    /// 关注 debug session（幂等），隐式订阅 `debug:<id>` 频道
    WatchDebug {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// 取消关注 debug session，移除隐式频道订阅；无回执
    UnwatchDebug {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// 心跳（保持连接）
    Heartbeat,

    /// 快照查询
    Query { query: QueryType },

    /// 向某个 Agent 的收件箱投递消息
    SendAgentMessage {
        team: String,
        agent: String,
        message: Value,
    },

    /// 向某个 Agent 发送 pause / resume / restart 控制请求
    ControlAgent {
        team: String,
        agent: String,
        action: ControlAction,
    },

    /// 向某个 Agent 发送关闭请求
    ShutdownAgent { team: String, agent: String },
}

/// 响应类型（Monitor → Client）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// 成功
    Ok,

    /// 错误
    Error { code: i32, message: String },

    /// 握手成功
    HandshakeOk {
        #[serde(rename = "monitorVersion")]
        monitor_version: String,
    },

    /// 连接确认（连接建立后、任何领域事件之前发送）
    Connected { timestamp: i64 },

    /// 订阅回执，携带该连接订阅后的完整频道集合
    Subscribed { channels: Vec<String> },

    /// 退订回执，回显请求移除的频道
    Unsubscribed { channels: Vec<String> },

    /// debug session 关注回执
    WatchingDebug {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// 查询结果
    QueryResult { data: Value },
}

/// 查询类型，对应快照读取面
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum QueryType {
    /// Monitor 状态（监听路径 + 团队概览）
    Status,
    ListTeams,
    GetTeam {
        team: String,
    },
    ListTasks {
        team: String,
    },
    GetTask {
        team: String,
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ListInboxes {
        team: String,
    },
    GetInbox {
        team: String,
        agent: String,
    },
    ListDebugSessions,
    /// 日志窗口，lines 缺省 500
    GetDebugLog {
        #[serde(rename = "sessionId")]
        session_id: String,
        lines: Option<usize>,
    },
    /// 短尾窗口，lines 缺省 50
    GetDebugTail {
        #[serde(rename = "sessionId")]
        session_id: String,
        lines: Option<usize>,
    },
    /// 仪表盘聚合（团队 + 任务 + 消息计数）
    Dashboard,
}

/// Agent 控制动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Restart,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlAction::Pause => write!(f, "pause"),
            ControlAction::Resume => write!(f, "resume"),
            ControlAction::Restart => write!(f, "restart"),
        }
    }
}

/// 领域事件（内部使用，ChangeWatcher → Broadcaster）
///
/// 事件是值：负载在构造时拷贝完成，跨越 watcher→broadcaster 边界
/// 不共享可变状态。
#[derive(Debug, Clone)]
pub enum Event {
    /// `<team>/config.json` 变更，携带重读后的配置
    TeamConfigChanged { team: String, data: Value },
    /// `<team>/inboxes/<agent>.json` 变更
    InboxChanged {
        team: String,
        agent: String,
        data: Value,
    },
    /// `<team>/<taskId>.json` 变更
    TaskChanged {
        team: String,
        task_id: String,
        data: Value,
    },
    /// Debug 日志追加，携带新增的非空行
    DebugAppended {
        session_id: String,
        lines: Vec<String>,
    },
    /// 监听建立失败（该根目录失效，其余根不受影响）
    WatchError { message: String },
}

impl Event {
    /// 事件所属的频道列表
    ///
    /// WatchError 不属于任何频道：只有空订阅集合（接收全部）的
    /// 客户端和事件 socket 能收到。
    pub fn channels(&self) -> Vec<String> {
        match self {
            Event::TeamConfigChanged { team, .. } => vec![channel::team(team)],
            Event::InboxChanged { team, .. } => {
                vec![channel::team(team), channel::messages(team)]
            }
            Event::TaskChanged { team, .. } => {
                vec![channel::team(team), channel::tasks(team)]
            }
            Event::DebugAppended { session_id, .. } => vec![channel::debug(session_id)],
            Event::WatchError { .. } => Vec::new(),
        }
    }

    /// 展开为外发推送
    ///
    /// 一个事件可能产生多条推送：专用标签 + 通用标签，以及
    /// debug 追加时逐行的 `debug:line`（每条携带单行，按文件顺序）。
    pub fn to_pushes(&self) -> Vec<Push> {
        match self {
            Event::TeamConfigChanged { team, data } => {
                let payload = serde_json::json!({ "teamName": team, "data": data });
                vec![
                    Push::new(label::TEAM_CONFIG, payload.clone()),
                    Push::new(label::TEAM_UPDATED, payload),
                ]
            }
            Event::InboxChanged { team, agent, data } => {
                let payload = serde_json::json!({
                    "teamName": team,
                    "agentName": agent,
                    "data": data,
                });
                vec![
                    Push::new(label::TEAM_INBOX, payload.clone()),
                    Push::new(label::MESSAGE_NEW, payload),
                ]
            }
            Event::TaskChanged {
                team,
                task_id,
                data,
            } => {
                let payload = serde_json::json!({
                    "teamName": team,
                    "taskId": task_id,
                    "data": data,
                });
                vec![
                    Push::new(label::TASK_UPDATE, payload.clone()),
                    Push::new(label::TASK_UPDATED, payload),
                ]
            }
            Event::DebugAppended { session_id, lines } => {
                let mut pushes = vec![Push::new(
                    label::DEBUG_UPDATE,
                    serde_json::json!({ "sessionId": session_id, "lines": lines }),
                )];
                for line in lines {
                    pushes.push(Push::new(
                        label::DEBUG_LINE,
                        serde_json::json!({ "sessionId": session_id, "line": line }),
                    ));
                }
                pushes
            }
            Event::WatchError { message } => vec![Push::new(
                label::WATCH_ERROR,
                serde_json::json!({ "message": message }),
            )],
        }
    }
}

/// 推送事件（Monitor → 订阅者），两种传输共用同一信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Push {
    /// 事件标签（如 `team:config`、`debug:line`）
    #[serde(rename = "type")]
    pub event: String,
    /// 标签对应的负载
    pub data: Value,
    /// 投递时间戳（毫秒）
    pub timestamp: i64,
}

impl Push {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_wire_format() {
        // 仪表盘发送的订阅消息
        let json = r#"{"type":"subscribe","channels":["team:alpha","tasks:alpha"]}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::Subscribe { channels } => {
                assert_eq!(channels, vec!["team:alpha", "tasks:alpha"]);
            }
            _ => panic!("Expected Subscribe"),
        }
    }

    #[test]
    fn test_watch_debug_wire_format() {
        let json = r#"{"type":"watch_debug","sessionId":"sess-1"}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::WatchDebug { session_id } => assert_eq!(session_id, "sess-1"),
            _ => panic!("Expected WatchDebug"),
        }

        let response = Response::WatchingDebug {
            session_id: "sess-1".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"type\":\"watching_debug\""));
        assert!(json.contains("\"sessionId\":\"sess-1\""));
    }

    #[test]
    fn test_unknown_request_type_rejected() {
        // 未知 type 解析失败，由调用方静默忽略
        let json = r#"{"type":"bogus","channels":[]}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }

    #[test]
    fn test_query_wire_format() {
        let json = r#"{"type":"query","query":{"query":"get_debug_log","sessionId":"s1","lines":100}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::Query {
                query: QueryType::GetDebugLog { session_id, lines },
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(lines, Some(100));
            }
            _ => panic!("Expected GetDebugLog query"),
        }
    }

    #[test]
    fn test_control_action_serde() {
        let request: Request = serde_json::from_str(
            r#"{"type":"control_agent","team":"alpha","agent":"worker","action":"pause"}"#,
        )
        .unwrap();
        match request {
            Request::ControlAgent { action, .. } => assert_eq!(action, ControlAction::Pause),
            _ => panic!("Expected ControlAgent"),
        }
        assert_eq!(ControlAction::Restart.to_string(), "restart");
    }

    #[test]
    fn test_event_channels() {
        let event = Event::InboxChanged {
            team: "alpha".to_string(),
            agent: "worker".to_string(),
            data: serde_json::json!([]),
        };
        assert_eq!(event.channels(), vec!["team:alpha", "messages:alpha"]);

        let event = Event::TaskChanged {
            team: "alpha".to_string(),
            task_id: "3".to_string(),
            data: serde_json::json!({}),
        };
        assert_eq!(event.channels(), vec!["team:alpha", "tasks:alpha"]);

        // WatchError 不属于任何频道
        let event = Event::WatchError {
            message: "boom".to_string(),
        };
        assert!(event.channels().is_empty());
    }

    #[test]
    fn test_team_config_pushes_dual_label() {
        let event = Event::TeamConfigChanged {
            team: "alpha".to_string(),
            data: serde_json::json!({"name": "alpha"}),
        };
        let pushes = event.to_pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].event, label::TEAM_CONFIG);
        assert_eq!(pushes[1].event, label::TEAM_UPDATED);
        assert_eq!(pushes[0].data["teamName"], "alpha");
        assert_eq!(pushes[0].data, pushes[1].data);
    }

    #[test]
    fn test_debug_pushes_per_line_fanout() {
        let event = Event::DebugAppended {
            session_id: "sess-1".to_string(),
            lines: vec!["line1".to_string(), "line2".to_string()],
        };
        let pushes = event.to_pushes();

        // 一条批量 debug:update + 每行一条 debug:line，按文件顺序
        assert_eq!(pushes.len(), 3);
        assert_eq!(pushes[0].event, label::DEBUG_UPDATE);
        assert_eq!(pushes[0].data["lines"][0], "line1");
        assert_eq!(pushes[1].event, label::DEBUG_LINE);
        assert_eq!(pushes[1].data["line"], "line1");
        assert_eq!(pushes[2].event, label::DEBUG_LINE);
        assert_eq!(pushes[2].data["line"], "line2");
    }

    #[test]
    fn test_push_envelope() {
        let push = Push::new(label::TASK_UPDATE, serde_json::json!({"taskId": "1"}));
        let json = serde_json::to_value(&push).unwrap();
        assert_eq!(json["type"], "task:update");
        assert_eq!(json["data"]["taskId"], "1");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_channel_helpers() {
        assert_eq!(channel::team("alpha"), "team:alpha");
        assert_eq!(channel::debug_session_id("debug:sess-1"), Some("sess-1"));
        assert_eq!(channel::debug_session_id("debug:"), None);
        assert_eq!(channel::debug_session_id("tasks:alpha"), None);
    }
}
