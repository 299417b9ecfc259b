//! 双工执行通道：Jupyter execute_request over WebSocket
//!
//! 一次执行 = 一个带唯一 msg_id 的请求信封 + 读响应帧直到「本请求的 idle 状态帧」或超时。
//! 通道可能复用并混入其他活动的帧，凡 parent_header.msg_id 不匹配的一律忽略。
//! 对调用方永不抛错：连接失败、超时、运行时异常都归约为 ExecOutcome，最终渲染为文本交还模型。

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// 一次执行的归约结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// 正常输出：execute_result 的 text/plain 在前，流式 stdout 紧随其后
    Output(String),
    /// 运行期失败：traceback 或通道错误（stderr 优先于任何正常输出）
    RuntimeError(String),
    /// 超时前既无 idle 信号也无任何输出
    Timeout,
}

impl ExecOutcome {
    /// 渲染为交给模型的文本；失败带错误标记而不是抛出
    pub fn into_text(self) -> String {
        match self {
            ExecOutcome::Output(text) => text,
            ExecOutcome::RuntimeError(detail) => format!("[python error]\n{}", detail),
            ExecOutcome::Timeout => "[python error] timeout".to_string(),
        }
    }
}

/// 响应帧的累积状态
#[derive(Debug, Default)]
struct FrameAccumulator {
    stdout: String,
    stderr: String,
    result: Option<String>,
    idle: bool,
}

impl FrameAccumulator {
    /// 处理一帧（已通过关联 id 过滤）
    fn apply(&mut self, msg_type: &str, content: &Value) {
        match msg_type {
            "stream" => {
                let text = content.get("text").and_then(|v| v.as_str()).unwrap_or("");
                if content.get("name").and_then(|v| v.as_str()) == Some("stdout") {
                    self.stdout.push_str(text);
                } else {
                    self.stderr.push_str(text);
                }
            }
            "execute_result" => {
                // 多个 result 帧时后到覆盖先到
                if let Some(text) = content
                    .get("data")
                    .and_then(|d| d.get("text/plain"))
                    .and_then(|v| v.as_str())
                {
                    self.result = Some(text.to_string());
                }
            }
            "error" => {
                let traceback = content
                    .get("traceback")
                    .and_then(|v| v.as_array())
                    .map(|lines| {
                        lines
                            .iter()
                            .filter_map(|l| l.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();
                self.stderr.push_str(&traceback);
            }
            "status" => {
                if content.get("execution_state").and_then(|v| v.as_str()) == Some("idle") {
                    self.idle = true;
                }
            }
            _ => {}
        }
    }

    fn reduce(self) -> ExecOutcome {
        if !self.idle && self.result.is_none() && self.stdout.is_empty() && self.stderr.is_empty() {
            return ExecOutcome::Timeout;
        }
        if !self.stderr.is_empty() {
            return ExecOutcome::RuntimeError(self.stderr);
        }
        ExecOutcome::Output(self.result.unwrap_or_default() + &self.stdout)
    }
}

/// 解析一帧：非本请求的帧（parent_header.msg_id 不匹配）返回 None
fn parse_frame(raw: &str, request_id: &str) -> Option<(String, Value)> {
    let m: Value = serde_json::from_str(raw).ok()?;
    let parent_id = m
        .get("parent_header")
        .and_then(|h| h.get("msg_id"))
        .and_then(|v| v.as_str())?;
    if parent_id != request_id {
        return None;
    }
    let msg_type = m
        .get("msg_type")
        .or_else(|| m.get("msg"))
        .and_then(|v| v.as_str())?
        .to_string();
    let content = m.get("content").cloned().unwrap_or_else(|| json!({}));
    Some((msg_type, content))
}

fn execute_envelope(request_id: &str, session: &str, code: &str) -> Value {
    json!({
        "header": {
            "msg_id": request_id,
            "username": "user",
            "session": session,
            "date": "",
            "msg_type": "execute_request",
            "version": "5.3"
        },
        "parent_header": {},
        "metadata": {},
        "content": {
            "code": code,
            "silent": false,
            "store_history": true,
            "allow_stdin": false,
            "stop_on_error": true
        }
    })
}

/// 在内核执行通道上跑一段代码，阻塞至 idle 或超时
pub async fn execute_on_kernel(ws_url: &str, code: &str, timeout: Duration) -> ExecOutcome {
    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let session = uuid::Uuid::new_v4().simple().to_string();
    let envelope = execute_envelope(&request_id, &session, code);

    let (ws, _) = match connect_async(ws_url).await {
        Ok(ok) => ok,
        Err(e) => return ExecOutcome::RuntimeError(format!("kernel channel connect: {}", e)),
    };
    let (mut write, mut read) = ws.split();

    if let Err(e) = write.send(WsMessage::Text(envelope.to_string())).await {
        return ExecOutcome::RuntimeError(format!("kernel channel send: {}", e));
    }

    let mut acc = FrameAccumulator::default();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(d) if !d.is_zero() => d,
            _ => break,
        };
        let frame = match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(WsMessage::Text(raw)))) => raw,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                tracing::warn!("kernel channel read error: {}", e);
                break;
            }
            // 对端关闭或超时
            Ok(None) | Err(_) => break,
        };

        if let Some((msg_type, content)) = parse_frame(&frame, &request_id) {
            acc.apply(&msg_type, &content);
            if acc.idle {
                break;
            }
        }
    }

    acc.reduce()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(parent_id: &str, msg_type: &str, content: Value) -> String {
        json!({
            "header": {"msg_id": "reply-1", "msg_type": msg_type},
            "parent_header": {"msg_id": parent_id},
            "content": content
        })
        .to_string()
    }

    #[test]
    fn test_foreign_frames_are_ignored() {
        let raw = frame("other-request", "stream", json!({"name": "stdout", "text": "hi"}));
        assert!(parse_frame(&raw, "my-request").is_none());

        let raw = frame("my-request", "stream", json!({"name": "stdout", "text": "hi"}));
        assert!(parse_frame(&raw, "my-request").is_some());
    }

    #[test]
    fn test_reduce_stderr_wins_over_output() {
        let mut acc = FrameAccumulator::default();
        acc.apply("stream", &json!({"name": "stdout", "text": "partial"}));
        acc.apply("execute_result", &json!({"data": {"text/plain": "42"}}));
        acc.apply("error", &json!({"traceback": ["Traceback:", "ZeroDivisionError"]}));
        acc.apply("status", &json!({"execution_state": "idle"}));

        assert_eq!(
            acc.reduce(),
            ExecOutcome::RuntimeError("Traceback:\nZeroDivisionError".to_string())
        );
    }

    #[test]
    fn test_reduce_result_precedes_stdout() {
        let mut acc = FrameAccumulator::default();
        acc.apply("stream", &json!({"name": "stdout", "text": "printed\n"}));
        acc.apply("execute_result", &json!({"data": {"text/plain": "42"}}));
        acc.apply("status", &json!({"execution_state": "idle"}));

        assert_eq!(acc.reduce(), ExecOutcome::Output("42printed\n".to_string()));
    }

    #[test]
    fn test_reduce_timeout_when_nothing_observed() {
        let acc = FrameAccumulator::default();
        assert_eq!(acc.reduce(), ExecOutcome::Timeout);
        assert_eq!(
            ExecOutcome::Timeout.into_text(),
            "[python error] timeout".to_string()
        );
    }

    #[test]
    fn test_reduce_partial_output_without_idle_is_kept() {
        // 超时但已有输出：不按 timeout 处理
        let mut acc = FrameAccumulator::default();
        acc.apply("stream", &json!({"name": "stdout", "text": "slow..."}));
        assert_eq!(acc.reduce(), ExecOutcome::Output("slow...".to_string()));
    }

    #[test]
    fn test_last_result_frame_wins() {
        let mut acc = FrameAccumulator::default();
        acc.apply("execute_result", &json!({"data": {"text/plain": "first"}}));
        acc.apply("execute_result", &json!({"data": {"text/plain": "second"}}));
        acc.apply("status", &json!({"execution_state": "idle"}));

        assert_eq!(acc.reduce(), ExecOutcome::Output("second".to_string()));
    }

    #[test]
    fn test_stderr_stream_routed_to_stderr() {
        let mut acc = FrameAccumulator::default();
        acc.apply("stream", &json!({"name": "stderr", "text": "warning"}));
        acc.apply("status", &json!({"execution_state": "idle"}));

        let text = acc.reduce().into_text();
        assert!(text.starts_with("[python error]"));
        assert!(text.contains("warning"));
    }
}
