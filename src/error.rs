//! 服务错误类型
//!
//! 仅覆盖「对本轮对话致命」的失败：内核开通失败与 LLM 调用失败。
//! 工具执行与内核超时不在此列，它们被归一化为文本返回给模型（见 tools/registry 与 kernel/client）。

use thiserror::Error;

/// 编排过程中可能出现的致命错误（HTTP 层映射为 500 / error 事件）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 执行后端在重试预算内不可达，或内核创建被网关拒绝
    #[error("Kernel provisioning failed: {0}")]
    Provisioning(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
