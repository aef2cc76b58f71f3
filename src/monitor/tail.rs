//! Debug 日志增量读取
//!
//! 按 session 维护最后已知的字节长度，变更通知到来时只读取
//! 新追加的字节区间，解码为非空行列表。

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;

/// 单个 debug session 的 tail 状态
#[derive(Debug, Default)]
struct DebugSession {
    /// 最后已知字节长度。惰性初始化：首次关注时取当前文件大小，
    /// 之后只推送在此之后追加的内容
    last_len: Option<u64>,
    /// 是否有客户端关注；false 时该 session 不做任何 I/O
    interested: bool,
}

/// 增量 tail 读取器（DebugSession 表）
pub struct TailTracker {
    sessions: Mutex<HashMap<String, DebugSession>>,
}

impl TailTracker {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 登记一个已知 session（目录扫描发现新日志文件时调用）
    ///
    /// 只让 session 变得可关注，不触发 I/O，也不产生事件
    pub fn register(&self, session_id: &str) {
        self.sessions
            .lock()
            .entry(session_id.to_string())
            .or_default();
    }

    /// 标记 session 为已关注；幂等
    pub fn watch(&self, session_id: &str, log_path: &Path) {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        session.interested = true;
        if session.last_len.is_none() {
            if let Ok(meta) = std::fs::metadata(log_path) {
                session.last_len = Some(meta.len());
            }
            // 文件尚不存在：首次出现的大小作为基准，见 drain
        }
    }

    /// 取消关注；重新关注时以届时的文件大小为基准
    pub fn unwatch(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.interested = false;
            session.last_len = None;
        }
    }

    pub fn is_interested(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.interested)
            .unwrap_or(false)
    }

    /// 提取自上次检查以来新追加的非空行
    ///
    /// 文件未增长（含截断，视为"无新内容"）返回空列表；读取失败时
    /// 偏移保持不变，下一次成功读取恢复正确的增量。
    pub fn drain(&self, session_id: &str, log_path: &Path) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return Vec::new();
        };
        if !session.interested {
            return Vec::new();
        }

        let new_len = match std::fs::metadata(log_path) {
            Ok(meta) => meta.len(),
            Err(_) => return Vec::new(),
        };

        let last_len = match session.last_len {
            Some(len) => len,
            None => {
                // 关注时文件尚不存在：首次观测到的大小即基准
                session.last_len = Some(new_len);
                return Vec::new();
            }
        };

        if new_len <= last_len {
            return Vec::new();
        }

        match read_range(log_path, last_len, new_len) {
            Ok(bytes) => {
                session.last_len = Some(new_len);
                String::from_utf8_lossy(&bytes)
                    .split('\n')
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            Err(e) => {
                tracing::debug!("读取日志增量失败 {:?}: {}", log_path, e);
                Vec::new()
            }
        }
    }
}

impl Default for TailTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 精确读取 `[start, end)` 字节区间
fn read_range(path: &Path, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
