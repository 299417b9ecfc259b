//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式增量）。
//! 与上层的数据交换用本 crate 的 Message / ToolCallData，转换为具体 API 格式在实现内部完成。

pub mod mock;
pub mod openai;

use std::pin::Pin;

use async_openai::types::ChatCompletionTool;
use async_trait::async_trait;
use futures_util::Stream;

use crate::conversation::{Message, ToolCallData};

pub use mock::{MockLlm, MockTurn};
pub use openai::OpenAiLlm;

/// 非流式完成的结果：正文与（可选的）工具调用
#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallData>,
}

/// 流式工具调用增量：按 index 定位同一调用的多个片段
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// 流式增量：一段正文和/或若干工具调用片段
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

/// 流式完成返回的增量流
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, String>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成
///
/// tools 为 None 时不向模型提供任何工具（工具执行后的第二次调用走此分支）。
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ChatCompletionTool]>,
    ) -> Result<AssistantReply, String>;

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ChatCompletionTool]>,
    ) -> Result<DeltaStream, String>;
}
