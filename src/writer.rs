//! Agent 命令投递
//!
//! 向 Agent 的收件箱文件追加控制消息。收件箱是外部运行时轮询的
//! JSON 数组；这里只负责写入，投递与执行由运行时自己完成。

use std::fs;

use serde_json::Value;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::protocol::{now_ms, ControlAction};

/// 收件箱命令写入器
#[derive(Debug, Clone)]
pub struct CommandWriter {
    config: MonitorConfig,
}

impl CommandWriter {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    /// 向 Agent 收件箱追加一条消息
    ///
    /// 基础字段（from/text/timestamp/read）先填默认值，再被 message
    /// 自身的同名字段覆盖；收件箱文件不存在时创建。
    pub fn send_message_to_agent(
        &self,
        team_name: &str,
        agent_name: &str,
        message: &Value,
    ) -> Result<()> {
        let inbox_dir = self.config.teams_dir().join(team_name).join("inboxes");
        let inbox_path = inbox_dir.join(format!("{agent_name}.json"));

        let mut inbox: Vec<Value> = if inbox_path.exists() {
            serde_json::from_str(&fs::read_to_string(&inbox_path)?)?
        } else {
            Vec::new()
        };

        let text = match message.get("text") {
            Some(Value::String(s)) => Value::String(s.clone()),
            Some(other) => Value::String(other.to_string()),
            None => Value::String(String::new()),
        };

        let mut entry = serde_json::json!({
            "from": "dashboard",
            "text": text,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "read": false,
        });
        if let (Some(base), Some(overlay)) = (entry.as_object_mut(), message.as_object()) {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        }

        inbox.push(entry);

        fs::create_dir_all(&inbox_dir)?;
        fs::write(&inbox_path, serde_json::to_string_pretty(&inbox)?)?;

        tracing::debug!(
            "📨 消息已投递: team={}, agent={}",
            team_name,
            agent_name
        );
        Ok(())
    }

    /// 发送关闭请求
    pub fn shutdown_agent(&self, team_name: &str, agent_name: &str) -> Result<()> {
        let message = serde_json::json!({
            "text": {
                "type": "shutdown_request",
                "requestId": format!("shutdown-{}@{}", now_ms(), agent_name),
                "content": "Shutdown requested from monitoring dashboard",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
        });
        self.send_message_to_agent(team_name, agent_name, &message)
    }

    /// 发送 pause / resume / restart 控制请求
    pub fn control_agent(
        &self,
        team_name: &str,
        agent_name: &str,
        action: ControlAction,
    ) -> Result<()> {
        let message = serde_json::json!({
            "text": {
                "type": "control_request",
                "action": action,
                "requestId": format!("control-{}@{}", now_ms(), agent_name),
                "content": format!("{action} requested from monitoring dashboard"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
        });
        self.send_message_to_agent(team_name, agent_name, &message)
    }
}
