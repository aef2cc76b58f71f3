//! teams-monitor - Agent Teams 状态监控守护进程
//!
//! 负责：
//! - 监听团队 / 任务 / debug 三个状态根目录
//! - 归一化变更为领域事件并按订阅扇出
//! - 提供快照查询与 Agent 命令投递

use std::sync::Arc;

use agent_teams_monitor::monitor::{cleanup_stale_monitor, is_monitor_running, Monitor};
use agent_teams_monitor::MonitorConfig;
use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("agent_teams_monitor=debug".parse()?))
        .init();

    tracing::info!("🚀 teams-monitor v{}", env!("CARGO_PKG_VERSION"));

    // 解析配置
    let config = MonitorConfig::from_env();

    // 检查是否已有 Monitor 运行
    if is_monitor_running(&config) {
        tracing::error!("❌ Monitor is already running, exiting");
        std::process::exit(1);
    }

    // 清理残留状态
    if let Err(e) = cleanup_stale_monitor(&config) {
        tracing::warn!("Failed to cleanup stale state: {}", e);
    }

    // 创建并运行 Monitor
    let monitor = Arc::new(Monitor::new(config)?);
    monitor.run().await?;

    tracing::info!("👋 teams-monitor exiting");
    Ok(())
}
