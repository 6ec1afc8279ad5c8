//! Standalone RPC server binary
//!
//! Usage:
//!   remote-server --bind 0.0.0.0:16415
//!   remote-server --bind 127.0.0.1:0 --log-level debug

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use object::TypeRegistry;
use proxy::{Environment, EnvironmentFactory, LocalEnvironment};
use remote::{RemoteServer, ServerConfig, DEFAULT_MAX_FRAME_SIZE};

#[derive(Parser, Debug)]
#[command(name = "remote-server")]
#[command(about = "Serves local environments to remote clients")]
#[command(version)]
struct Args {
    /// Address to listen on (port 0 picks a free port)
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Maximum accepted frame size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let registry = Arc::new(TypeRegistry::with_builtins());
    let factory = Arc::new(EnvironmentFactory::new());
    let maker_registry = Arc::clone(&registry);
    factory.register("local", move |_args| {
        Ok(LocalEnvironment::new(Arc::clone(&maker_registry)) as Arc<dyn Environment>)
    });

    let config = ServerConfig {
        bind_address: args.bind,
        max_frame_size: args.max_frame_size,
    };
    let server = RemoteServer::bind(factory, registry, config).await?;
    info!(addr = %server.local_addr()?, "remote server ready");

    tokio::select! {
        outcome = server.run() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();
}
