use crate::commands::parse_arg;
use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use clusterq::nameservice::NameServer;
use clusterq::network::listener::Listener;
use log::{LevelFilter, info};
use simplelog::{Config, SimpleLogger};
use tokio_util::sync::CancellationToken;

pub async fn handle_nameserver_command(matches: &ArgMatches) -> CliResult<()> {
    let port: u16 = parse_arg(matches, "port")?;
    let host = matches.value_of("host").unwrap_or("0.0.0.0");
    let _ = SimpleLogger::init(LevelFilter::Info, Config::default());

    let listener = Listener::bind("SDP-Listener", host, port)
        .await
        .map_err(|e| CliError::StartupFailure(e.to_string()))?;
    println!("Name service listening on {}", listener.local_addr());

    let server = NameServer::new();
    let shutdown = CancellationToken::new();
    let task = server.spawn(listener, shutdown.clone());

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping name service ({} entries)", server.len());
    shutdown.cancel();
    let _ = task.await;
    Ok(())
}
