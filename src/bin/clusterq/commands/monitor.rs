use crate::commands::parse_arg;
use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use clusterq::monitoring::MonitoringServer;
use log::{LevelFilter, info};
use simplelog::{Config, SimpleLogger};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

pub async fn handle_monitor_command(matches: &ArgMatches) -> CliResult<()> {
    let port: u16 = parse_arg(matches, "port")?;
    let interval_secs: u64 = parse_arg(matches, "report-interval-secs")?;
    if interval_secs == 0 {
        return Err(CliError::ParseError {
            field: "report-interval-secs".to_string(),
            message: "Report interval must be at least 1 second.".to_string(),
        });
    }
    let host = matches.value_of("host").unwrap_or("0.0.0.0");
    let _ = SimpleLogger::init(LevelFilter::Info, Config::default());

    let socket = UdpSocket::bind((host, port))
        .await
        .map_err(|e| CliError::StartupFailure(format!("{}:{}: {}", host, port, e)))?;
    println!("Monitoring server listening on {}", socket.local_addr()?);

    let server = MonitoringServer::new();
    let shutdown = CancellationToken::new();
    let task = server.spawn(socket, shutdown.clone());

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                println!("Received messages: {}", server.received_messages());
                print!("{}", server.statistics());
            }
        }
    }

    info!("Interrupt received, stopping monitoring server");
    shutdown.cancel();
    let _ = task.await;
    Ok(())
}
