//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NECTAR__*` 覆盖（双下划线表示嵌套，如 `NECTAR__LLM__MODEL=gpt-oss-20b`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub kernel: KernelSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [llm] 段：OpenAI 兼容端点与模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "http://llama-server:8502/v1".to_string(),
            api_key: "dummy".to_string(),
            model: "gpt-oss-20b".to_string(),
            temperature: 1.0,
        }
    }
}

/// [kernel] 段：Kernel Gateway 地址、令牌与执行超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    pub gateway_url: String,
    pub token: String,
    /// 就绪轮询最大次数（控制面 GET /api）
    pub ready_attempts: u32,
    /// 就绪轮询间隔（毫秒）
    pub ready_interval_ms: u64,
    /// 内核创建请求超时（秒）
    pub startup_timeout_secs: u64,
    /// 单次代码执行超时（秒）
    pub exec_timeout_secs: u64,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            gateway_url: "http://jupyter-gateway:8888".to_string(),
            token: "token123".to_string(),
            ready_attempts: 50,
            ready_interval_ms: 200,
            startup_timeout_secs: 5,
            exec_timeout_secs: 30,
        }
    }
}

/// [session] 段：内核会话 TTL 与后台回收间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 空闲多久后回收内核（秒）
    pub ttl_secs: u64,
    /// 后台回收任务的运行间隔（秒）
    pub gc_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: 7200,
            gc_interval_secs: 300,
        }
    }
}

/// [web] 段：HTTP 服务监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// [tools] 段：浏览器工具参数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsSection {
    #[serde(default)]
    pub browser: BrowserSection,
}

/// [tools.browser] 段：搜索条数、页面截断与抓取超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub search_limit: usize,
    pub open_max_chars: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            search_limit: 5,
            open_max_chars: 2000,
            fetch_timeout_secs: 15,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmSection::default(),
            kernel: KernelSection::default(),
            session: SessionSection::default(),
            web: WebSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 NECTAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NECTAR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NECTAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.session.ttl_secs, 7200);
        assert_eq!(cfg.session.gc_interval_secs, 300);
        assert_eq!(cfg.kernel.ready_attempts, 50);
        assert_eq!(cfg.tools.browser.open_max_chars, 2000);
    }
}
