//! 内核会话管理：按会话隔离的 Python 执行后端
//!
//! - **registry**: conversation_id -> 内核句柄 + 最近活跃时间，支持空闲回收
//! - **provisioner**: 懒开通内核（就绪轮询 + 创建），并发 ensure 不产生重复后端
//! - **client**: WebSocket 双工执行通道（Jupyter 协议，按关联 id 过滤响应帧）

pub mod client;
pub mod provisioner;
pub mod registry;

pub use client::{execute_on_kernel, ExecOutcome};
pub use provisioner::KernelProvisioner;
pub use registry::{KernelHandle, KernelRegistry};
