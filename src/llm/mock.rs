//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 预先编排好每次调用的回复：complete 返回整条回复，complete_stream 按给定增量逐条吐出。
//! 调用次数超出脚本时返回错误，便于测试断言模型只被调用了期望的次数。

use async_openai::types::ChatCompletionTool;
use async_trait::async_trait;
use futures_util::stream;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::conversation::Message;
use crate::llm::{AssistantReply, DeltaStream, LlmClient, StreamDelta};

/// 一次模型调用的脚本：非流式回复 + 可选的流式增量序列
pub struct MockTurn {
    pub reply: AssistantReply,
    /// None 时流式路径把 reply.content 作为单条增量发出
    pub deltas: Option<Vec<StreamDelta>>,
}

impl MockTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            reply: AssistantReply {
                content: Some(content.into()),
                tool_calls: Vec::new(),
            },
            deltas: None,
        }
    }

    pub fn with_deltas(reply: AssistantReply, deltas: Vec<StreamDelta>) -> Self {
        Self {
            reply,
            deltas: Some(deltas),
        }
    }
}

/// Mock 客户端：按脚本顺序消费，每次调用取出一个 MockTurn
#[derive(Default)]
pub struct MockLlm {
    turns: Mutex<VecDeque<MockTurn>>,
}

impl MockLlm {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    fn next_turn(&self) -> Result<MockTurn, String> {
        self.turns
            .lock()
            .expect("mock turns lock")
            .pop_front()
            .ok_or_else(|| "mock llm: no scripted turn left".to_string())
    }

    /// 剩余未消费的脚本条数
    pub fn remaining(&self) -> usize {
        self.turns.lock().expect("mock turns lock").len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(
        &self,
        _messages: &[Message],
        _tools: Option<&[ChatCompletionTool]>,
    ) -> Result<AssistantReply, String> {
        Ok(self.next_turn()?.reply)
    }

    async fn complete_stream(
        &self,
        _messages: &[Message],
        _tools: Option<&[ChatCompletionTool]>,
    ) -> Result<DeltaStream, String> {
        let turn = self.next_turn()?;
        let deltas = turn.deltas.unwrap_or_else(|| {
            vec![StreamDelta {
                content: turn.reply.content.clone(),
                tool_calls: Vec::new(),
            }]
        });
        let items: Vec<Result<StreamDelta, String>> = deltas.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}
