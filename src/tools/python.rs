//! Python 工具：在会话的持久内核中执行代码
//!
//! 内核按会话懒开通，%pip 安装的包与变量在同一会话的多次调用间保持。
//! 执行失败（超时、traceback、通道故障）以 [python error] 文本返回，由模型自行处置。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::kernel::{execute_on_kernel, KernelProvisioner};
use crate::tools::Tool;

pub struct PythonTool {
    provisioner: Arc<KernelProvisioner>,
    exec_timeout: Duration,
}

impl PythonTool {
    pub fn new(provisioner: Arc<KernelProvisioner>, exec_timeout_secs: u64) -> Self {
        Self {
            provisioner,
            exec_timeout: Duration::from_secs(exec_timeout_secs),
        }
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn name(&self) -> &str {
        "python"
    }

    fn description(&self) -> &str {
        "Execute Python code in a stateful Jupyter kernel. Use %pip to install packages."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string"}
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, conv_id: &str, args: Value) -> Result<String, String> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing code".to_string())?;

        let handle = self
            .provisioner
            .ensure(conv_id)
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(conv_id = %conv_id, kernel_id = %handle.kernel_id, "executing python code");
        Ok(execute_on_kernel(&handle.ws_url, code, self.exec_timeout)
            .await
            .into_text())
    }
}
