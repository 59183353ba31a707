pub mod body;
pub mod cv;
pub mod handlers;
pub mod params;
pub mod response;

use crate::context::AppContext;
use crate::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// 关闭时等待已有连接完成的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 启动 HTTP 服务器（带优雅关闭）
pub async fn start_server(ctx: Arc<AppContext>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("RelayGate 服务器运行在 http://{}", listener.local_addr()?);

    serve(listener, ctx, shutdown_signal()).await
}

/// 在给定的 listener 上处理连接，直到 shutdown 完成
pub async fn serve<F>(listener: TcpListener, ctx: Arc<AppContext>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let ctx = Arc::clone(&ctx);
                let service = service_fn(move |req| {
                    let ctx = Arc::clone(&ctx);
                    handlers::handle_request(req, ctx)
                });

                let conn = graceful.watch(http1::Builder::new().serve_connection(io, service));
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!("服务连接错误 ({}): {}", peer, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("收到关闭信号，停止接受新连接");
                break;
            }
        }
    }

    // 等待现有连接处理完成
    tokio::select! {
        _ = graceful.shutdown() => info!("服务器已优雅关闭"),
        _ = tokio::time::sleep(DRAIN_TIMEOUT) => warn!("等待连接关闭超时，强制退出"),
    }
    Ok(())
}

/// SIGINT 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("设置 Ctrl+C 信号处理失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("设置 SIGTERM 信号处理失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("收到 Ctrl+C 信号，开始优雅关闭..."),
        _ = terminate => warn!("收到 SIGTERM 信号，开始优雅关闭..."),
    }
}
