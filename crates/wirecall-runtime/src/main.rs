//! wirecall server.
//!
//! - Loads `wirecall.yaml` (or the path given as the first argument)
//! - Registers the built-in `echo` and `ping` services
//! - Serves TCP, plus `POST /rpc`, `/metrics`, `/healthz` when `server.http_listen` is set
//! - Ctrl-C stops accepting; open connections close after their current request

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

use wirecall_core::error::Result;
use wirecall_runtime::{
    app_state, config,
    dispatch::{Processor, ProcessorOptions},
    router, services,
    transport::{CodecSpec, Server},
};

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wirecall.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let spec = CodecSpec::from_config(&cfg)?;

    let processor = Processor::new(spec).with_options(ProcessorOptions::from(&cfg.server));
    services::register_builtin(&processor);
    let processor = Arc::new(processor);

    let server = Server::new(Arc::clone(&processor), cfg.server.transport);
    let shutdown = server.shutdown_handle();

    if let Some(http_listen) = cfg.server.http_listen_addr()? {
        let app = router::build_router(app_state::AppState::new(Arc::clone(&processor)));
        let listener = TcpListener::bind(http_listen).await?;
        tracing::info!(%http_listen, "wirecall http endpoint starting");

        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "http endpoint failed");
            }
        });
    }

    let listen = cfg.server.listen_addr()?;
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, protocol = spec.protocol.as_str(), "wirecall-server starting");

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            on_signal.shutdown();
        }
    });

    server.serve(listener).await
}
