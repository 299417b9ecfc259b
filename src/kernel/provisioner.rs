//! 内核开通：懒创建 + 并发去重
//!
//! ensure 先查注册表，未命中时在创建锁内二次确认后才真正开通：
//! 轮询网关控制面直到就绪（有界重试），POST 创建内核，拼出执行通道地址并登记。
//! 同一会话的并发 ensure 只会产生一个内核，后到者复用先到者的句柄。

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;

use crate::config::KernelSection;
use crate::error::OrchestratorError;
use crate::kernel::registry::{KernelHandle, KernelRegistry};

/// 内核开通器：持有 HTTP 客户端、网关配置与注册表
pub struct KernelProvisioner {
    http: reqwest::Client,
    cfg: KernelSection,
    registry: Arc<KernelRegistry>,
    /// 串行化开通过程：同一会话的并发 ensure 不得产生两个后端
    create_lock: Mutex<()>,
}

impl KernelProvisioner {
    pub fn new(cfg: KernelSection, registry: Arc<KernelRegistry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.startup_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            cfg,
            registry,
            create_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    /// 取得（必要时开通）会话的内核句柄，并刷新其活跃时间
    pub async fn ensure(&self, conv_id: &str) -> Result<KernelHandle, OrchestratorError> {
        if let Some(handle) = self.registry.get(conv_id).await {
            return Ok(handle);
        }

        let _guard = self.create_lock.lock().await;
        // 锁内二次确认：等待期间别的调用可能已完成开通
        if let Some(handle) = self.registry.get(conv_id).await {
            return Ok(handle);
        }

        self.wait_ready().await?;
        let handle = self.create_kernel(conv_id).await?;
        self.registry.put(conv_id, handle.clone()).await;
        tracing::info!(conv_id = %conv_id, kernel_id = %handle.kernel_id, "kernel provisioned");
        Ok(handle)
    }

    /// 轮询控制面 GET /api 直到可达，重试预算耗尽则开通失败
    async fn wait_ready(&self) -> Result<(), OrchestratorError> {
        let url = format!("{}/api", self.cfg.gateway_url);
        let interval = Duration::from_millis(self.cfg.ready_interval_ms);
        for _ in 0..self.cfg.ready_attempts {
            if self.http.get(&url).send().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        Err(OrchestratorError::Provisioning(format!(
            "gateway {} not reachable after {} attempts",
            self.cfg.gateway_url, self.cfg.ready_attempts
        )))
    }

    async fn create_kernel(&self, conv_id: &str) -> Result<KernelHandle, OrchestratorError> {
        let url = format!(
            "{}/api/kernels?token={}",
            self.cfg.gateway_url, self.cfg.token
        );
        let resp = self
            .http
            .post(&url)
            .json(&json!({"name": "python3"}))
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::Provisioning(format!(
                    "failed to create kernel for conversation {}: {}",
                    conv_id, e
                ))
            })?;
        let resp = resp.error_for_status().map_err(|e| {
            OrchestratorError::Provisioning(format!(
                "kernel creation rejected for conversation {}: {}",
                conv_id, e
            ))
        })?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| OrchestratorError::Provisioning(format!("kernel create response: {}", e)))?;
        let kernel_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OrchestratorError::Provisioning("kernel create response missing id".to_string())
            })?
            .to_string();

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let ws_base = self.cfg.gateway_url.replacen("http", "ws", 1);
        let ws_url = format!(
            "{}/api/kernels/{}/channels?token={}&session={}",
            ws_base, kernel_id, self.cfg.token, session_id
        );

        Ok(KernelHandle {
            kernel_id,
            base_url: self.cfg.gateway_url.clone(),
            ws_url,
            session_id,
        })
    }

    /// 显式清理某会话的内核（删除失败只告警，登记必须摘除）
    pub async fn cleanup(&self, conv_id: &str) {
        if let Some(handle) = self.registry.remove(conv_id).await {
            self.delete_kernel(&handle).await;
        }
    }

    /// 回收所有空闲超过 ttl 的内核，返回回收数量
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let expired = self.registry.expire_idle(ttl).await;
        let count = expired.len();
        for (conv_id, handle) in expired {
            tracing::info!(conv_id = %conv_id, kernel_id = %handle.kernel_id, "reclaiming idle kernel");
            self.delete_kernel(&handle).await;
        }
        count
    }

    async fn delete_kernel(&self, handle: &KernelHandle) {
        let url = format!(
            "{}/api/kernels/{}?token={}",
            handle.base_url, handle.kernel_id, self.cfg.token
        );
        if let Err(e) = self.http.delete(&url).send().await {
            tracing::warn!(kernel_id = %handle.kernel_id, "kernel teardown failed: {}", e);
        }
    }
}
