//! Monitor Client
//!
//! 供仪表盘后端等组件连接控制 socket：请求/响应 + 事件接收。
//! 同一条连接上响应和推送混流，读取任务按消息形状分拣到两条通道。

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::protocol::{Push, QueryType, Request, Response};

/// Client 配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 状态目录（默认 ~/.claude），socket 路径由此导出
    pub state_dir: PathBuf,
    /// 组件名称
    pub component: String,
    /// 组件版本
    pub version: String,
    /// 连接重试次数
    pub connect_retries: u32,
    /// 重试间隔（毫秒）
    pub retry_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude");

        Self {
            state_dir,
            component: "unknown".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connect_retries: 3,
            retry_interval_ms: 500,
        }
    }
}

impl ClientConfig {
    /// 创建新的配置
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            ..Default::default()
        }
    }

    /// 控制 socket 路径
    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("monitor").join("monitor.sock")
    }

    /// 事件 socket 路径
    pub fn events_socket_path(&self) -> PathBuf {
        self.state_dir.join("monitor").join("monitor-events.sock")
    }
}

/// Monitor Client
pub struct MonitorClient {
    config: ClientConfig,
    /// 写入端
    writer: OwnedWriteHalf,
    /// 响应接收通道
    resp_rx: mpsc::Receiver<Response>,
    /// 推送接收通道
    push_rx: mpsc::Receiver<Push>,
}

/// 连接 Monitor 控制 socket（带重试），并等待 connected 确认
pub async fn connect_monitor(config: ClientConfig) -> Result<MonitorClient> {
    let socket_path = config.socket_path();

    for attempt in 1..=config.connect_retries {
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                tracing::debug!("连接 Monitor 成功 (attempt={})", attempt);
                return finish_connect(config, stream).await;
            }
            Err(e) => {
                tracing::debug!("连接 Monitor 失败 (attempt={}): {}", attempt, e);
                if attempt < config.connect_retries {
                    sleep(Duration::from_millis(config.retry_interval_ms)).await;
                }
            }
        }
    }

    Err(Error::Connection(format!(
        "无法连接 Monitor: {:?}",
        socket_path
    )))
}

/// 完成连接：启动分拣任务，等待 connected
async fn finish_connect(config: ClientConfig, stream: UnixStream) -> Result<MonitorClient> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(16);
    let (push_tx, push_rx) = mpsc::channel::<Push>(256);

    // 读取任务：按形状分拣（先 Response 后 Push，认不出的行忽略）
    tokio::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // 连接关闭
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Ok(response) = serde_json::from_str::<Response>(trimmed) {
                        if resp_tx.send(response).await.is_err() {
                            break;
                        }
                    } else if let Ok(push) = serde_json::from_str::<Push>(trimmed) {
                        if push_tx.send(push).await.is_err() {
                            break;
                        }
                    } else {
                        tracing::debug!("忽略无法识别的行: {}", trimmed);
                    }
                }
                Err(_) => break,
            }
        }
    });

    // 服务端承诺 connected 先于一切领域事件
    match resp_rx.recv().await {
        Some(Response::Connected { .. }) => {}
        Some(other) => {
            return Err(Error::Connection(format!("连接确认异常: {:?}", other)));
        }
        None => return Err(Error::Connection("连接已关闭".to_string())),
    }

    Ok(MonitorClient {
        config,
        writer,
        resp_rx,
        push_rx,
    })
}

impl MonitorClient {
    /// 发送请求（不等待回执；用于 unwatch_debug 这类无回执请求）
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.writer
            .write_all(format!("{}\n", json).as_bytes())
            .await?;
        Ok(())
    }

    /// 发送请求并等待响应
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.resp_rx
            .recv()
            .await
            .ok_or_else(|| Error::Connection("连接已关闭".to_string()))
    }

    /// 握手，返回 Monitor 版本
    pub async fn handshake(&mut self) -> Result<String> {
        let request = Request::Handshake {
            component: self.config.component.clone(),
            version: self.config.version.clone(),
        };
        match self.request(&request).await? {
            Response::HandshakeOk { monitor_version } => Ok(monitor_version),
            Response::Error { code, message } => Err(Error::Connection(format!(
                "握手失败: {} (code={})",
                message, code
            ))),
            other => Err(Error::Connection(format!("握手响应异常: {:?}", other))),
        }
    }

    /// 订阅频道，返回订阅后的完整集合
    pub async fn subscribe(&mut self, channels: Vec<String>) -> Result<Vec<String>> {
        match self.request(&Request::Subscribe { channels }).await? {
            Response::Subscribed { channels } => Ok(channels),
            other => Err(Error::Connection(format!("订阅响应异常: {:?}", other))),
        }
    }

    /// 退订频道
    pub async fn unsubscribe(&mut self, channels: Vec<String>) -> Result<()> {
        match self.request(&Request::Unsubscribe { channels }).await? {
            Response::Unsubscribed { .. } => Ok(()),
            other => Err(Error::Connection(format!("退订响应异常: {:?}", other))),
        }
    }

    /// 关注 debug session（隐式订阅 `debug:<id>` 频道）
    pub async fn watch_debug(&mut self, session_id: &str) -> Result<()> {
        let request = Request::WatchDebug {
            session_id: session_id.to_string(),
        };
        match self.request(&request).await? {
            Response::WatchingDebug { .. } => Ok(()),
            other => Err(Error::Connection(format!("关注响应异常: {:?}", other))),
        }
    }

    /// 取消关注 debug session；无回执
    pub async fn unwatch_debug(&mut self, session_id: &str) -> Result<()> {
        self.send(&Request::UnwatchDebug {
            session_id: session_id.to_string(),
        })
        .await
    }

    /// 快照查询
    pub async fn query(&mut self, query: QueryType) -> Result<Value> {
        match self.request(&Request::Query { query }).await? {
            Response::QueryResult { data } => Ok(data),
            Response::Error { code, message } => Err(Error::Connection(format!(
                "查询失败: {} (code={})",
                message, code
            ))),
            other => Err(Error::Connection(format!("查询响应异常: {:?}", other))),
        }
    }

    /// 接收推送事件
    pub async fn recv_push(&mut self) -> Option<Push> {
        self.push_rx.recv().await
    }

    /// 获取推送接收器（用于 select!）
    pub fn push_receiver(&mut self) -> &mut mpsc::Receiver<Push> {
        &mut self.push_rx
    }
}
