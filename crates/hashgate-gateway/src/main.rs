//! Gateway entry point.
//!
//! ```bash
//! hashgate-gateway -b 0.0.0.0:3000 --backend-host lb.internal --backend-port 9485
//! ```

use anyhow::Result;
use argh::FromArgs;
use tracing::info;

use hashgate_client::{HashClient, PoolConfig};

/// HTTP front end for the load-balanced hashing service
#[derive(FromArgs)]
struct Args {
    /// address to bind the HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:3000\".into()")]
    bind: String,

    /// hostname of the hashing backend (typically the load balancer)
    #[argh(option, default = "\"127.0.0.1\".into()")]
    backend_host: String,

    /// port of the hashing backend
    #[argh(option, default = "9485")]
    backend_port: u16,

    /// maximum pooled connections to the backend
    #[argh(option, default = "20")]
    max_connections: usize,

    /// maximum concurrent requests per pooled connection
    #[argh(option, default = "10")]
    max_requests_per_connection: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Args = argh::from_env();
    let config = PoolConfig {
        host: args.backend_host,
        port: args.backend_port,
        max_connections: args.max_connections,
        max_requests_per_connection: args.max_requests_per_connection,
        ..Default::default()
    };
    info!(backend = %config.addr(), "connecting pool to hashing backend");

    let client = HashClient::new(config)?;
    let app = hashgate_gateway::app::router(client);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("hashgate listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
