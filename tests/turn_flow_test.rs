//! 回合流程集成测试：Mock LLM + 桩工具跑通同步与流式两条路径

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use nectar::conversation::{ConversationStore, Role, ToolCallData};
    use nectar::llm::{AssistantReply, MockLlm, MockTurn, StreamDelta, ToolCallDelta};
    use nectar::orchestrator::{TurnEvent, TurnOrchestrator};
    use nectar::tools::{Tool, ToolRegistry};

    /// 桩 python 工具：固定返回 "2"
    struct StubPython;

    #[async_trait]
    impl Tool for StubPython {
        fn name(&self) -> &str {
            "python"
        }

        fn description(&self) -> &str {
            "stub kernel execution"
        }

        async fn execute(
            &self,
            _conv_id: &str,
            args: serde_json::Value,
        ) -> Result<String, String> {
            let code = args
                .get("code")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "Missing code".to_string())?;
            assert_eq!(code, "1+1");
            Ok("2".to_string())
        }
    }

    fn build(
        llm: Arc<MockLlm>,
        with_python: bool,
    ) -> (TurnOrchestrator, Arc<ConversationStore>) {
        let mut tools = ToolRegistry::new();
        if with_python {
            tools.register(StubPython);
        }
        let conversations = Arc::new(ConversationStore::new());
        let orchestrator = TurnOrchestrator::new(
            llm,
            Arc::new(tools),
            Arc::clone(&conversations),
        );
        (orchestrator, conversations)
    }

    async fn collect_stream(
        orchestrator: &TurnOrchestrator,
        conv_id: &str,
        message: &str,
    ) -> Vec<TurnEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        orchestrator.chat_stream(conv_id, message, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    fn event_types(events: &[TurnEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                TurnEvent::ConversationId { .. } => "conversation_id",
                TurnEvent::Content { .. } => "content",
                TurnEvent::ToolStart { .. } => "tool_start",
                TurnEvent::ToolsExecuting => "tools_executing",
                TurnEvent::ToolExecuting { .. } => "tool_executing",
                TurnEvent::ToolResult { .. } => "tool_result",
                TurnEvent::FinalResponseStart => "final_response_start",
                TurnEvent::Complete => "complete",
                TurnEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[tokio::test]
    async fn test_stream_without_tool_calls() {
        let llm = Arc::new(MockLlm::new(vec![MockTurn::with_deltas(
            AssistantReply::default(),
            vec![
                StreamDelta {
                    content: Some("4".to_string()),
                    tool_calls: Vec::new(),
                },
                StreamDelta {
                    content: Some(" is the answer".to_string()),
                    tool_calls: Vec::new(),
                },
            ],
        )]));
        let (orchestrator, conversations) = build(Arc::clone(&llm), true);

        let events = collect_stream(&orchestrator, "conv-1", "2+2?").await;
        let types = event_types(&events);
        assert_eq!(
            types,
            vec!["conversation_id", "content", "content", "complete"]
        );

        // 模型只调一次
        assert_eq!(llm.remaining(), 0);

        // 历史恰好增长 2 条：user 与 assistant（system 为懒创建注入）
        let history = conversations.history("conv-1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].content.as_deref(), Some("4 is the answer"));
    }

    #[tokio::test]
    async fn test_stream_with_one_python_call() {
        let tool_deltas = vec![
            StreamDelta {
                content: Some("Let me compute that.".to_string()),
                tool_calls: Vec::new(),
            },
            StreamDelta {
                content: None,
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("call_1".to_string()),
                    name: Some("python".to_string()),
                    arguments: Some("{\"code\": ".to_string()),
                }],
            },
            StreamDelta {
                content: None,
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments: Some("\"1+1\"}".to_string()),
                }],
            },
        ];
        let final_deltas = vec![StreamDelta {
            content: Some("The result is 2.".to_string()),
            tool_calls: Vec::new(),
        }];
        let llm = Arc::new(MockLlm::new(vec![
            MockTurn::with_deltas(AssistantReply::default(), tool_deltas),
            MockTurn::with_deltas(AssistantReply::default(), final_deltas),
        ]));
        let (orchestrator, conversations) = build(llm, true);

        let events = collect_stream(&orchestrator, "conv-1", "what is 1+1?").await;
        let types = event_types(&events);
        assert_eq!(
            types,
            vec![
                "conversation_id",
                "content",
                "tool_start",
                "tools_executing",
                "tool_executing",
                "tool_result",
                "final_response_start",
                "content",
                "complete",
            ]
        );

        let result = events
            .iter()
            .find_map(|e| match e {
                TurnEvent::ToolResult { result, tool_name } => {
                    assert_eq!(tool_name, "python");
                    Some(result.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(result, "2");

        // 历史恰好增长 4 条：user、带调用的 assistant、tool 结果、最终 assistant
        let history = conversations.history("conv-1").await.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].tool_calls.len(), 1);
        assert_eq!(history[3].role, Role::Tool);
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(history[3].content.as_deref(), Some("2"));
        assert_eq!(history[4].role, Role::Assistant);
        assert_eq!(history[4].content.as_deref(), Some("The result is 2."));
    }

    #[tokio::test]
    async fn test_sync_without_tool_calls_uses_single_model_call() {
        let llm = Arc::new(MockLlm::new(vec![
            MockTurn::text("4"),
            MockTurn::text("unused"),
        ]));
        let (orchestrator, conversations) = build(Arc::clone(&llm), true);

        let reply = orchestrator.chat_sync("conv-1", "2+2?").await.unwrap();
        assert_eq!(reply, "4");

        let history = conversations.history("conv-1").await.unwrap();
        assert_eq!(history.len(), 3);

        // 第二条脚本未被消费：模型只调了一次
        assert_eq!(llm.remaining(), 1);
    }

    #[tokio::test]
    async fn test_sync_with_python_call() {
        let llm = Arc::new(MockLlm::new(vec![
            MockTurn {
                reply: AssistantReply {
                    content: None,
                    tool_calls: vec![ToolCallData {
                        id: "call_1".to_string(),
                        name: "python".to_string(),
                        arguments: "{\"code\": \"1+1\"}".to_string(),
                    }],
                },
                deltas: None,
            },
            MockTurn::text("The result is 2."),
        ]));
        let (orchestrator, conversations) = build(llm, true);

        let reply = orchestrator
            .chat_sync("conv-1", "what is 1+1?")
            .await
            .unwrap();
        assert_eq!(reply, "The result is 2.");

        let history = conversations.history("conv-1").await.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[3].content.as_deref(), Some("2"));
    }
}
