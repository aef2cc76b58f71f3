//! 事件广播器
//!
//! 接收 ChangeWatcher 归一化后的领域事件，展开为外发推送，
//! 投递给两类传输的连接：控制连接按订阅表过滤，事件连接无条件全量。
//!
//! 投递是 fire-and-forget：每个连接一条有界出站通道，`try_send`
//! 满了丢弃新消息，慢客户端不会阻塞整体扇出。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::subscriptions::{ConnId, SubscriptionRegistry};
use crate::protocol::Event;

/// 消息发送通道
pub type MessageSender = mpsc::Sender<String>;

/// 事件广播器
pub struct Broadcaster {
    /// 订阅表（与 handler 共享）
    registry: Arc<SubscriptionRegistry>,
    /// 控制连接：ConnId → 发送通道（按频道过滤投递）
    senders: RwLock<HashMap<ConnId, MessageSender>>,
    /// 事件连接：ConnId → 发送通道（无条件投递，无订阅概念）
    firehose: RwLock<HashMap<ConnId, MessageSender>>,
    /// 下一个连接 ID
    next_conn_id: RwLock<ConnId>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            senders: RwLock::new(HashMap::new()),
            firehose: RwLock::new(HashMap::new()),
            next_conn_id: RwLock::new(1),
        })
    }

    fn alloc_conn_id(&self) -> ConnId {
        let mut next_id = self.next_conn_id.write();
        let conn_id = *next_id;
        *next_id += 1;
        conn_id
    }

    /// 注册控制连接，返回连接 ID
    pub fn register(&self, sender: MessageSender) -> ConnId {
        let conn_id = self.alloc_conn_id();
        self.senders.write().insert(conn_id, sender);
        self.registry.register(conn_id);
        tracing::debug!("📡 控制连接注册: conn_id={}", conn_id);
        conn_id
    }

    /// 注册事件连接（单向广播），返回连接 ID
    pub fn register_firehose(&self, sender: MessageSender) -> ConnId {
        let conn_id = self.alloc_conn_id();
        self.firehose.write().insert(conn_id, sender);
        tracing::debug!("📡 事件连接注册: conn_id={}", conn_id);
        conn_id
    }

    /// 注销控制连接
    ///
    /// 返回因此失去全部关注者的 debug session 列表（调用方负责
    /// 停掉对应的 tail）。
    pub fn unregister(&self, conn_id: ConnId) -> Vec<String> {
        self.senders.write().remove(&conn_id);
        let orphaned = self.registry.drop_conn(conn_id);
        tracing::debug!("📡 控制连接注销: conn_id={}", conn_id);
        orphaned
    }

    /// 注销事件连接
    pub fn unregister_firehose(&self, conn_id: ConnId) {
        self.firehose.write().remove(&conn_id);
        tracing::debug!("📡 事件连接注销: conn_id={}", conn_id);
    }

    /// 广播事件给所有匹配的连接（非阻塞，fire-and-forget）
    pub fn broadcast(&self, event: Event) {
        if let Event::WatchError { message } = &event {
            tracing::error!("⚠️ 监听错误: {}", message);
        }

        let channels = event.channels();
        let pushes = event.to_pushes();

        // 每条推送序列化一次（JSONL），所有连接复用
        let mut lines = Vec::with_capacity(pushes.len());
        for push in &pushes {
            match serde_json::to_string(push) {
                Ok(json) => lines.push(format!("{}\n", json)),
                Err(e) => {
                    tracing::error!("事件序列化失败: {}", e);
                    return;
                }
            }
        }

        // 控制连接按订阅表过滤；事件连接全量
        let targets: Vec<(ConnId, MessageSender)> = {
            let senders = self.senders.read();
            senders
                .iter()
                .filter(|(conn_id, _)| self.registry.matches(**conn_id, &channels))
                .map(|(conn_id, sender)| (*conn_id, sender.clone()))
                .collect()
        };
        let firehose_targets: Vec<(ConnId, MessageSender)> = {
            let firehose = self.firehose.read();
            firehose
                .iter()
                .map(|(conn_id, sender)| (*conn_id, sender.clone()))
                .collect()
        };

        if targets.is_empty() && firehose_targets.is_empty() {
            return;
        }

        tracing::trace!(
            "📡 广播事件: pushes={}, 控制连接={}, 事件连接={}",
            lines.len(),
            targets.len(),
            firehose_targets.len()
        );

        for (conn_id, sender) in targets.into_iter().chain(firehose_targets) {
            for line in &lines {
                match sender.try_send(line.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // 慢客户端：丢弃而不是阻塞扇出
                        tracing::warn!("📡 出站通道已满，丢弃消息: conn_id={}", conn_id);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("📡 出站通道已关闭: conn_id={}", conn_id);
                        break;
                    }
                }
            }
        }
    }

    /// 当前连接数（两类传输合计）
    pub fn connection_count(&self) -> usize {
        self.senders.read().len() + self.firehose.read().len()
    }

    /// 是否有活跃连接
    pub fn has_connections(&self) -> bool {
        self.connection_count() > 0
    }

    /// 发送消息到指定控制连接（等待通道空位）
    pub async fn send_to(&self, conn_id: ConnId, message: String) -> bool {
        let sender = {
            let senders = self.senders.read();
            senders.get(&conn_id).cloned()
        };

        if let Some(sender) = sender {
            sender.send(message).await.is_ok()
        } else {
            false
        }
    }

    /// 尝试发送消息到指定控制连接（非阻塞）
    pub fn try_send_to(&self, conn_id: ConnId, message: String) -> bool {
        let sender = {
            let senders = self.senders.read();
            senders.get(&conn_id).cloned()
        };

        if let Some(sender) = sender {
            sender.try_send(message).is_ok()
        } else {
            false
        }
    }
}
