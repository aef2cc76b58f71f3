//! Monitor 服务器
//!
//! 两个 Unix Socket 监听：
//! - 控制 socket（双向）：JSONL 请求/响应 + 按订阅过滤的事件推送
//! - 事件 socket（单向）：无条件推送全部事件，无订阅概念
//!
//! 连接建立后先发送 connected 确认，之后才会有领域事件。

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::interval;

use super::broadcaster::Broadcaster;
use super::handler::Handler;
use super::subscriptions::SubscriptionRegistry;
use super::watcher::ChangeWatcher;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::protocol::{now_ms, Request, Response};

/// 出站通道容量（每连接）；满了按 fire-and-forget 丢弃
const OUTBOUND_BUFFER: usize = 256;

/// Monitor 服务
pub struct Monitor {
    config: MonitorConfig,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Arc<Broadcaster>,
    watcher: Arc<ChangeWatcher>,
    handler: Arc<Handler>,
    shutdown: Arc<AtomicBool>,
}

impl Monitor {
    /// 创建 Monitor
    pub fn new(config: MonitorConfig) -> Result<Self> {
        fs::create_dir_all(config.run_dir()).context("创建运行目录失败")?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let watcher = ChangeWatcher::new(config.clone(), broadcaster.clone());
        let handler = Arc::new(Handler::new(
            config.clone(),
            registry.clone(),
            broadcaster.clone(),
            watcher.clone(),
        ));

        Ok(Self {
            config,
            registry,
            broadcaster,
            watcher,
            handler,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 运行 Monitor，直到收到中断信号或空闲超时
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.write_pid_file()?;

        let control_listener = self.bind_socket(&self.config.socket_path())?;
        let events_listener = self.bind_socket(&self.config.events_socket_path())?;

        tracing::info!(
            "🚀 Monitor 启动: control={:?}, events={:?}",
            self.config.socket_path(),
            self.config.events_socket_path()
        );

        // 启动文件监听
        self.watcher.clone().start().await?;

        // 启动空闲检测
        let monitor_for_idle = self.clone();
        tokio::spawn(async move {
            monitor_for_idle.idle_checker().await;
        });

        // 接受连接
        loop {
            // shutdown 信号发出且无活跃连接时才退出；
            // 新连接进来可以取消退出
            if self.shutdown.load(Ordering::Relaxed) && !self.broadcaster.has_connections() {
                break;
            }

            tokio::select! {
                result = control_listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let monitor = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = monitor.handle_control_connection(stream).await {
                                    tracing::error!("处理控制连接失败: {}", e);
                                }
                            });
                        }
                        Err(e) => tracing::error!("接受控制连接失败: {}", e),
                    }
                }
                result = events_listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let monitor = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = monitor.handle_events_connection(stream).await {
                                    tracing::error!("处理事件连接失败: {}", e);
                                }
                            });
                        }
                        Err(e) => tracing::error!("接受事件连接失败: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("收到中断信号，准备退出...");
                    break;
                }
            }
        }

        self.watcher.stop();
        self.cleanup();
        Ok(())
    }

    /// 绑定 Unix Socket（清理旧文件，权限 0600）
    fn bind_socket(&self, path: &std::path::Path) -> Result<UnixListener> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path).context("绑定 socket 失败")?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }

    /// 处理控制连接（双向）
    async fn handle_control_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

        // connected 确认先入队，保证先于任何领域事件送出
        let _ = tx.try_send(jsonl(&Response::Connected {
            timestamp: now_ms(),
        })?);

        let conn_id = self.broadcaster.register(tx);
        tracing::debug!("📥 新控制连接: conn_id={}", conn_id);

        // 发送任务
        let write_handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if writer.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // 读取请求
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // 连接关闭
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    // 格式错误 / 未知类型的消息直接忽略，不关闭连接
                    let request: Request = match serde_json::from_str(&line) {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::debug!("忽略无法解析的消息: {}", e);
                            continue;
                        }
                    };

                    if let Some(response) = self.handler.handle(conn_id, request).await {
                        if !self.broadcaster.send_to(conn_id, jsonl(&response)?).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("读取失败: {}", e);
                    break;
                }
            }
        }

        // 清理：注销连接，停掉只有该连接关注的 debug session
        let orphaned = self.broadcaster.unregister(conn_id);
        for session_id in orphaned {
            self.watcher.unwatch_debug_session(&session_id);
        }
        write_handle.abort();
        tracing::debug!("📤 控制连接关闭: conn_id={}", conn_id);

        Ok(())
    }

    /// 处理事件连接（单向广播）
    async fn handle_events_connection(&self, stream: UnixStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let _ = tx.try_send(jsonl(&Response::Connected {
            timestamp: now_ms(),
        })?);

        let conn_id = self.broadcaster.register_firehose(tx);
        tracing::debug!("📥 新事件连接: conn_id={}", conn_id);

        let write_handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if writer.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // 入站数据忽略，只用于感知断开
        let mut buf = [0u8; 256];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }

        self.broadcaster.unregister_firehose(conn_id);
        write_handle.abort();
        tracing::debug!("📤 事件连接关闭: conn_id={}", conn_id);

        Ok(())
    }

    /// 空闲检测：持续无连接达到超时后请求退出
    async fn idle_checker(&self) {
        if self.config.idle_timeout_secs == 0 {
            return;
        }

        let mut check_interval = interval(Duration::from_secs(5));
        let mut idle_count = 0u64;
        let idle_threshold = (self.config.idle_timeout_secs / 5).max(1);

        loop {
            check_interval.tick().await;

            if self.broadcaster.has_connections() {
                idle_count = 0;
                if self.shutdown.load(Ordering::Relaxed) {
                    tracing::info!("🔄 有新连接，取消退出");
                    self.shutdown.store(false, Ordering::Relaxed);
                }
            } else {
                idle_count += 1;
                if idle_count >= idle_threshold && !self.shutdown.load(Ordering::Relaxed) {
                    tracing::info!(
                        "⏰ 空闲超时 ({}s)，准备退出...",
                        self.config.idle_timeout_secs
                    );
                    self.shutdown.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    /// 写入 PID 文件
    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();
        let pid_path = self.config.pid_path();
        fs::write(&pid_path, pid.to_string())?;
        fs::set_permissions(&pid_path, fs::Permissions::from_mode(0o600))?;
        tracing::debug!("📝 写入 PID 文件: {} (pid={})", pid_path.display(), pid);
        Ok(())
    }

    /// 清理资源
    fn cleanup(&self) {
        for path in [
            self.config.socket_path(),
            self.config.events_socket_path(),
            self.config.pid_path(),
        ] {
            if path.exists() {
                let _ = fs::remove_file(&path);
            }
        }
        tracing::info!("🧹 Monitor 清理完成");
    }

    /// 订阅表（测试与诊断用）
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// 文件监听器（测试与诊断用）
    pub fn watcher(&self) -> &Arc<ChangeWatcher> {
        &self.watcher
    }
}

/// JSONL 编码：一行 JSON + '\n'
fn jsonl<T: Serialize>(value: &T) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string(value)?))
}

/// 检查 Monitor 是否正在运行（PID 文件 + 进程存活）
pub fn is_monitor_running(config: &MonitorConfig) -> bool {
    let pid_path = config.pid_path();
    if !pid_path.exists() {
        return false;
    }

    let pid_str = match fs::read_to_string(&pid_path) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let pid: i32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => return false,
    };

    unsafe { libc::kill(pid, 0) == 0 }
}

/// 清理残留的 Monitor 状态（上次异常退出遗留的 socket / PID 文件）
pub fn cleanup_stale_monitor(config: &MonitorConfig) -> Result<()> {
    for path in [
        config.socket_path(),
        config.events_socket_path(),
        config.pid_path(),
    ] {
        if path.exists() {
            fs::remove_file(&path)?;
            tracing::debug!("🧹 删除残留文件: {:?}", path);
        }
    }
    Ok(())
}
