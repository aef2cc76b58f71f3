//! 请求处理器
//!
//! 处理控制连接上的各类请求：订阅管理、debug session 关注、
//! 快照查询、Agent 命令投递。

use std::sync::Arc;

use super::broadcaster::Broadcaster;
use super::subscriptions::{ConnId, SubscriptionRegistry};
use super::watcher::ChangeWatcher;
use crate::config::MonitorConfig;
use crate::protocol::{channel, now_ms, QueryType, Request, Response};
use crate::reader::{SnapshotReader, DEFAULT_LOG_LINES, DEFAULT_TAIL_LINES};
use crate::writer::CommandWriter;

/// Monitor 版本号（跟随 crate 版本）
pub const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 请求处理器
pub struct Handler {
    reader: SnapshotReader,
    writer: CommandWriter,
    registry: Arc<SubscriptionRegistry>,
    #[allow(dead_code)] // 预留，定向推送场景使用
    broadcaster: Arc<Broadcaster>,
    watcher: Arc<ChangeWatcher>,
}

impl Handler {
    pub fn new(
        config: MonitorConfig,
        registry: Arc<SubscriptionRegistry>,
        broadcaster: Arc<Broadcaster>,
        watcher: Arc<ChangeWatcher>,
    ) -> Self {
        Self {
            reader: SnapshotReader::new(config.clone()),
            writer: CommandWriter::new(config),
            registry,
            broadcaster,
            watcher,
        }
    }

    /// 处理请求；返回 None 的请求没有回执
    pub async fn handle(&self, conn_id: ConnId, request: Request) -> Option<Response> {
        match request {
            Request::Handshake { component, version } => {
                tracing::info!(
                    "🤝 握手: conn_id={}, component={}, version={}",
                    conn_id,
                    component,
                    version
                );
                Some(Response::HandshakeOk {
                    monitor_version: MONITOR_VERSION.to_string(),
                })
            }

            Request::Subscribe { channels } => {
                let all = self.registry.subscribe(conn_id, &channels);

                // 订阅 debug:<id> 频道即视同 watch_debug
                for ch in &channels {
                    if let Some(session_id) = channel::debug_session_id(ch) {
                        self.watch_debug(conn_id, session_id);
                    }
                }

                tracing::debug!("📡 订阅: conn_id={}, channels={:?}", conn_id, channels);
                Some(Response::Subscribed { channels: all })
            }

            Request::Unsubscribe { channels } => {
                self.registry.unsubscribe(conn_id, &channels);
                tracing::debug!("📡 退订: conn_id={}, channels={:?}", conn_id, channels);
                Some(Response::Unsubscribed { channels })
            }

            Request::WatchDebug { session_id } => {
                self.registry
                    .subscribe(conn_id, &[channel::debug(&session_id)]);
                self.watch_debug(conn_id, &session_id);
                Some(Response::WatchingDebug { session_id })
            }

            Request::UnwatchDebug { session_id } => {
                self.registry
                    .unsubscribe(conn_id, &[channel::debug(&session_id)]);
                if self.registry.remove_debug_interest(conn_id, &session_id) {
                    self.watcher.unwatch_debug_session(&session_id);
                }
                None
            }

            Request::Heartbeat => Some(Response::Ok),

            Request::Query { query } => Some(self.handle_query(query)),

            Request::SendAgentMessage {
                team,
                agent,
                message,
            } => Some(self.write_result(
                self.writer.send_message_to_agent(&team, &agent, &message),
                "Failed to send message",
            )),

            Request::ControlAgent {
                team,
                agent,
                action,
            } => Some(self.write_result(
                self.writer.control_agent(&team, &agent, action),
                "Failed to send control request",
            )),

            Request::ShutdownAgent { team, agent } => Some(self.write_result(
                self.writer.shutdown_agent(&team, &agent),
                "Failed to send shutdown request",
            )),
        }
    }

    /// 记录连接对 session 的关注并启动 tail
    fn watch_debug(&self, conn_id: ConnId, session_id: &str) {
        self.registry.add_debug_interest(conn_id, session_id);
        self.watcher.watch_debug_session(session_id);
    }

    fn write_result(&self, result: crate::error::Result<()>, context: &str) -> Response {
        match result {
            Ok(()) => Response::Ok,
            Err(e) => {
                tracing::error!("{}: {}", context, e);
                Response::Error {
                    code: 500,
                    message: format!("{context}: {e}"),
                }
            }
        }
    }

    /// 处理快照查询
    fn handle_query(&self, query: QueryType) -> Response {
        match query {
            QueryType::Status => {
                let teams = self.reader.list_teams();
                let names: Vec<&str> = teams.iter().map(|t| t.team.name.as_str()).collect();
                query_result(serde_json::json!({
                    "status": "ok",
                    "timestamp": now_ms(),
                    "monitorVersion": MONITOR_VERSION,
                    "paths": self.reader.watch_paths(),
                    "teamCount": teams.len(),
                    "teams": names,
                }))
            }

            QueryType::ListTeams => query_result(serde_json::json!(self.reader.list_teams())),

            QueryType::GetTeam { team } => match self.reader.get_team(&team) {
                Some(team) => query_result(serde_json::json!(team)),
                None => not_found("Team not found"),
            },

            QueryType::ListTasks { team } => {
                query_result(serde_json::json!(self.reader.list_tasks(&team)))
            }

            QueryType::GetTask { team, task_id } => match self.reader.get_task(&team, &task_id) {
                Some(task) => query_result(task),
                None => not_found("Task not found"),
            },

            QueryType::ListInboxes { team } => {
                query_result(serde_json::json!(self.reader.list_inboxes(&team)))
            }

            QueryType::GetInbox { team, agent } => {
                query_result(serde_json::json!(self.reader.get_inbox(&team, &agent)))
            }

            QueryType::ListDebugSessions => {
                query_result(serde_json::json!(self.reader.list_debug_sessions()))
            }

            QueryType::GetDebugLog { session_id, lines } => {
                let lines = lines.unwrap_or(DEFAULT_LOG_LINES);
                match self.reader.get_debug_log(&session_id, lines) {
                    Some(log) => query_result(serde_json::json!(log)),
                    None => not_found("Debug session not found"),
                }
            }

            QueryType::GetDebugTail { session_id, lines } => {
                let lines = lines.unwrap_or(DEFAULT_TAIL_LINES);
                match self.reader.get_debug_log(&session_id, lines) {
                    Some(log) => query_result(serde_json::json!(log)),
                    None => not_found("Debug session not found"),
                }
            }

            QueryType::Dashboard => query_result(self.dashboard()),
        }
    }

    /// 仪表盘聚合：团队 + 任务 + 消息计数，一次取全
    fn dashboard(&self) -> serde_json::Value {
        let teams = self.reader.list_teams();
        let dashboard: Vec<serde_json::Value> = teams
            .into_iter()
            .map(|summary| {
                let name = summary.team.name.clone();
                let tasks = self.reader.list_tasks(&name);
                let inboxes = self.reader.list_inboxes(&name);
                let message_count: usize = inboxes.values().map(|msgs| msgs.len()).sum();

                serde_json::json!({
                    "name": summary.team.name,
                    "description": summary.team.description,
                    "createdAt": summary.team.created_at,
                    "leadAgentId": summary.team.lead_agent_id,
                    "leadSessionId": summary.team.lead_session_id,
                    "members": summary.team.members,
                    "memberCount": summary.member_count,
                    "tasks": tasks,
                    "messageCount": message_count,
                })
            })
            .collect();

        serde_json::json!(dashboard)
    }
}

fn query_result(data: serde_json::Value) -> Response {
    Response::QueryResult { data }
}

fn not_found(message: &str) -> Response {
    Response::Error {
        code: 404,
        message: message.to_string(),
    }
}
