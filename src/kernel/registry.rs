//! 内核会话注册表
//!
//! conversation_id -> KernelHandle + 最近活跃时间。每个会话最多一个活内核；
//! get 在任何慢操作之前先刷新活跃时间，保证正在使用的会话不会被并发的回收扫描摘除。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// 已开通内核的句柄：网关地址、内核 id 与执行通道地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelHandle {
    pub kernel_id: String,
    pub base_url: String,
    pub ws_url: String,
    pub session_id: String,
}

struct KernelSession {
    handle: KernelHandle,
    last_used: Instant,
}

/// 注册表：RwLock<HashMap>，回收扫描与 get/put 可并发
#[derive(Default)]
pub struct KernelRegistry {
    sessions: RwLock<HashMap<String, KernelSession>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取会话句柄并刷新活跃时间（使用即续期）
    pub async fn get(&self, conv_id: &str) -> Option<KernelHandle> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(conv_id).map(|s| {
            s.last_used = Instant::now();
            s.handle.clone()
        })
    }

    pub async fn put(&self, conv_id: &str, handle: KernelHandle) {
        self.sessions.write().await.insert(
            conv_id.to_string(),
            KernelSession {
                handle,
                last_used: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, conv_id: &str) -> Option<KernelHandle> {
        self.sessions
            .write()
            .await
            .remove(conv_id)
            .map(|s| s.handle)
    }

    /// 摘除所有空闲超过 ttl 的会话并返回（供调用方善后内核本体）。
    /// 判定与摘除在同一把写锁内完成，期间不可能有 get 续期被漏看。
    pub async fn expire_idle(&self, ttl: Duration) -> Vec<(String, KernelHandle)> {
        let mut sessions = self.sessions.write().await;
        let dead: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.last_used.elapsed() > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        dead.into_iter()
            .filter_map(|id| sessions.remove(&id).map(|s| (id, s.handle)))
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
