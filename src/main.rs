//! nectar 服务入口
//!
//! 装配顺序：配置 -> 内核注册表/开通器 -> 工具箱 -> LLM 客户端 -> 回合编排器 -> HTTP 路由。
//! 空闲内核回收作为后台任务随进程生命周期启停。

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nectar::config::load_config;
use nectar::conversation::ConversationStore;
use nectar::kernel::{KernelProvisioner, KernelRegistry};
use nectar::llm::{LlmClient, OpenAiLlm};
use nectar::orchestrator::TurnOrchestrator;
use nectar::server::{build_router, AppState};
use nectar::tools::{BrowserTool, PythonTool, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_default();

    let registry = Arc::new(KernelRegistry::new());
    let provisioner = Arc::new(KernelProvisioner::new(
        cfg.kernel.clone(),
        Arc::clone(&registry),
    ));

    let mut tools = ToolRegistry::new();
    tools.register(PythonTool::new(
        Arc::clone(&provisioner),
        cfg.kernel.exec_timeout_secs,
    ));
    tools.register(BrowserTool::new(&cfg.tools.browser));

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiLlm::new(&cfg.llm));
    let conversations = Arc::new(ConversationStore::new());
    let orchestrator = Arc::new(TurnOrchestrator::new(
        llm,
        Arc::new(tools),
        Arc::clone(&conversations),
    ));

    let state = Arc::new(AppState {
        orchestrator,
        conversations,
        provisioner: Arc::clone(&provisioner),
    });
    let app = build_router(state);

    // 空闲内核回收：固定间隔扫描，过期即摘除登记并尽力删除内核
    let ttl = Duration::from_secs(cfg.session.ttl_secs);
    let gc_interval = Duration::from_secs(cfg.session.gc_interval_secs);
    let gc_provisioner = Arc::clone(&provisioner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(gc_interval);
        interval.tick().await; // 跳过启动后立即执行
        loop {
            interval.tick().await;
            let swept = gc_provisioner.sweep_idle(ttl).await;
            if swept > 0 {
                tracing::info!("swept {} idle kernel sessions", swept);
            }
        }
    });

    let addr = format!("{}:{}", cfg.web.host, cfg.web.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("nectar listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
