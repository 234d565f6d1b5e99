use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use privd_compat::CompatBackend;
use privd_compat::CompatService;
use privd_core::Broker;
use privd_core::BrokerConfig;
use privd_server::ConnectionServer;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "privd", about = "Privileged local command broker daemon.")]
struct Args {
    /// Configuration file; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the text-protocol listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BrokerConfig::load(path)?,
        None => BrokerConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    let broker = Broker::new(config).context("failed to initialize broker state")?;
    // Grants flagged temporary in the previous run downgrade to plain grants
    // across a restart.
    broker
        .store()
        .clear_temporary_grants()
        .context("failed to downgrade temporary grants")?;

    if broker.executor().elevation_available().await {
        info!("elevation helper answers with uid 0");
    } else {
        warn!(
            "elevation helper {} does not grant uid 0; EXEC will fail",
            broker.config().elevation_helper.display()
        );
    }

    let server = ConnectionServer::bind(broker.clone())
        .await
        .context("failed to bind text protocol listener")?;
    info!("text protocol on {}", server.local_addr()?);
    let shutdown = server.shutdown_token();

    let compat_task = if broker.config().compat_enabled {
        let backend = CompatBackend::probe(broker.clone()).await;
        let socket = broker.config().compat_socket_path.clone();
        let service = CompatService::bind(backend, &socket, shutdown.child_token())
            .context("failed to bind transactional interface socket")?;
        info!("transactional interface on {}", socket.display());
        Some(tokio::spawn(service.run()))
    } else {
        None
    };
    let server_task = tokio::spawn(server.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("shutdown requested");
    shutdown.cancel();

    server_task.await.context("server task panicked")??;
    if let Some(task) = compat_task {
        match task.await {
            Ok(result) => result?,
            Err(err) => warn!("transactional interface task failed: {err}"),
        }
    }
    info!("stopped");
    Ok(())
}
