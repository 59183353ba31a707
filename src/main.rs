use anyhow::Context;
use clap::Parser;
use relaygate::config::Config;
use relaygate::{server, AppContext};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "relaygate")]
#[command(about = "多后端 LLM / 存储 / CV 路由网关", long_about = None)]
struct Args {
    /// 配置文件路径，不存在时从环境变量读取
    #[arg(short, long, default_value = "relaygate.yaml")]
    config: String,

    /// 监听地址
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let config = if Path::new(&args.config).exists() {
        info!("加载配置文件: {}", args.config);
        Config::from_file(&args.config)
            .with_context(|| format!("failed to load config from {}", args.config))?
    } else {
        info!("配置文件 {} 不存在，从环境变量读取配置", args.config);
        Config::from_env().context("failed to build config from environment")?
    };

    let ctx = AppContext::from_config(&config)
        .await
        .context("failed to initialize backends")?;

    // 解析监听地址
    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", args.bind))?;

    // 启动服务器
    server::start_server(Arc::new(ctx), addr).await?;

    Ok(())
}
