//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持本地 llama-server、OpenAI、自建代理等。
//! 工具调用走 chat completions 的 tools / tool_choice="auto" 协议，流式路径透传按 index 编址的调用片段。

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::LlmSection;
use crate::conversation::{Message, Role, ToolCallData};
use crate::llm::{AssistantReply, DeltaStream, LlmClient, StreamDelta, ToolCallDelta};

/// OpenAI 兼容客户端：持有 Client、model 名与温度
pub struct OpenAiLlm {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiLlm {
    pub fn new(cfg: &LlmSection) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(&cfg.base_url)
            .with_api_key(&cfg.api_key);
        Self {
            client: Client::with_config(config),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
        }
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let content = m.content.clone().unwrap_or_default();
                let converted = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::Assistant => {
                        let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                        args.content(content);
                        if !m.tool_calls.is_empty() {
                            args.tool_calls(
                                m.tool_calls
                                    .iter()
                                    .map(|c| ChatCompletionMessageToolCall {
                                        id: c.id.clone(),
                                        r#type: ChatCompletionToolType::Function,
                                        function: FunctionCall {
                                            name: c.name.clone(),
                                            arguments: c.arguments.clone(),
                                        },
                                    })
                                    .collect::<Vec<_>>(),
                            );
                        }
                        ChatCompletionRequestMessage::Assistant(
                            args.build().map_err(|e| e.to_string())?,
                        )
                    }
                    Role::Tool => ChatCompletionRequestMessage::Tool(
                        ChatCompletionRequestToolMessageArgs::default()
                            .content(content)
                            .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                };
                Ok(converted)
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ChatCompletionTool]>,
        stream: bool,
    ) -> Result<async_openai::types::CreateChatCompletionRequest, String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(self.temperature)
            .stream(stream);
        if let Some(tools) = tools {
            args.tools(tools.to_vec())
                .tool_choice(ChatCompletionToolChoiceOption::Auto);
        }
        args.build().map_err(|e| e.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiLlm {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ChatCompletionTool]>,
    ) -> Result<AssistantReply, String> {
        let request = self.build_request(messages, tools, false)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let msg = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "empty choices in completion response".to_string())?
            .message;

        let tool_calls = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCallData {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(AssistantReply {
            content: msg.content,
            tool_calls,
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ChatCompletionTool]>,
    ) -> Result<DeltaStream, String> {
        let request = self.build_request(messages, tools, true)?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| e.to_string())?;

        let deltas = stream.map(|chunk| {
            let chunk = chunk.map_err(|e| e.to_string())?;
            let mut delta = StreamDelta::default();
            if let Some(choice) = chunk.choices.into_iter().next() {
                delta.content = choice.delta.content;
                for tc in choice.delta.tool_calls.unwrap_or_default() {
                    delta.tool_calls.push(ToolCallDelta {
                        index: tc.index as usize,
                        id: tc.id,
                        name: tc.function.as_ref().and_then(|f| f.name.clone()),
                        arguments: tc.function.as_ref().and_then(|f| f.arguments.clone()),
                    });
                }
            }
            Ok(delta)
        });

        Ok(Box::pin(deltas))
    }
}
