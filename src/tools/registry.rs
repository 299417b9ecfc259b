//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! ToolRegistry 按名注册与查找。dispatch 是全函数：未知工具与执行失败都归一化为文本，
//! 绝不向上抛错：工具内部的任何失败必须以可见文本回到模型，而不是中断整轮对话。

use std::collections::HashMap;
use std::sync::Arc;

use async_openai::types::{ChatCompletionTool, ChatCompletionToolType, FunctionObject};
use async_trait::async_trait;
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
///
/// execute 收到的 conv_id 用于定位会话专属资源（如该会话的内核）。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型在 tool call 中引用的名字）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, conv_id: &str, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 暴露给模型的 OpenAI 格式工具定义
    pub fn definitions(&self) -> Vec<ChatCompletionTool> {
        self.tools
            .values()
            .map(|tool| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name: tool.name().to_string(),
                    description: Some(tool.description().to_string()),
                    parameters: Some(tool.parameters_schema()),
                    strict: None,
                },
            })
            .collect()
    }

    /// 按名分发执行；总是返回文本，绝不抛错
    pub async fn dispatch(&self, name: &str, args: Value, conv_id: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Unknown tool: {}", name);
        };
        match tool.execute(conv_id, args).await {
            Ok(text) => text,
            Err(e) => format!("Tool execution error: {}", e),
        }
    }
}
