//! 会话存储：conversation_id -> 有序消息列表
//!
//! 仅内存态，进程退出即丢弃。会话在首次引用时懒创建并注入 system 提示；
//! 历史只由 TurnOrchestrator 在一轮结束时整体提交（commit），中途失败不落任何半成品状态。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 懒创建会话时注入的 system 提示
pub const SYSTEM_PROMPT: &str =
    "You can call the python and browser tools. Use %pip to install packages if needed.";

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发出的一次完整工具调用（关联 id 由模型分配）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub id: String,
    pub name: String,
    /// 参数原文（JSON 文本，流式路径下按片段拼接而成）
    pub arguments: String,
}

/// 会话内的一条消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// assistant 消息携带的待执行工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallData>,
    /// tool 消息回答的调用 id（必须对应紧邻的上一条 assistant 消息中的调用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallData>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// 会话存储：RwLock<HashMap>，提交粒度为整个消息列表
#[derive(Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取会话历史的工作副本；不存在则懒创建（注入 system 提示）
    pub async fn get_or_seed(&self, conv_id: &str) -> Vec<Message> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conv_id.to_string())
            .or_insert_with(|| vec![Message::system(SYSTEM_PROMPT)])
            .clone()
    }

    /// 只读取历史，不创建（会话不存在返回 None，供 GET /conversations 使用）
    pub async fn history(&self, conv_id: &str) -> Option<Vec<Message>> {
        self.conversations.read().await.get(conv_id).cloned()
    }

    /// 提交一轮对话后的完整历史
    pub async fn save(&self, conv_id: &str, messages: Vec<Message>) {
        self.conversations
            .write()
            .await
            .insert(conv_id.to_string(), messages);
    }

    /// 删除会话（不存在时为 no-op）
    pub async fn delete(&self, conv_id: &str) {
        self.conversations.write().await.remove(conv_id);
    }

    /// 所有会话 id
    pub async fn list(&self) -> Vec<String> {
        self.conversations.read().await.keys().cloned().collect()
    }
}
