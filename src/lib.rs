//! Nectar - 会话编排服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 会话消息存储（内存态，按轮提交）
//! - **error**: 对本轮致命的错误类型
//! - **kernel**: 内核会话注册表、懒开通与 WebSocket 双工执行通道
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **orchestrator**: 回合编排（同步与流式事件序列）
//! - **server**: HTTP API（axum 路由与 SSE）
//! - **tools**: 工具箱（python、browser）与注册分发

pub mod config;
pub mod conversation;
pub mod error;
pub mod kernel;
pub mod llm;
pub mod orchestrator;
pub mod server;
pub mod tools;
