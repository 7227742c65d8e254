use clap::{App, Arg, SubCommand};
use std::error::Error;

mod commands;
mod error;

use commands::*;
use error::CliError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = App::new("clusterq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Clustered message broker CLI")
        .subcommand(
            SubCommand::with_name("broker")
                .about("Run a broker until interrupted")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("CONFIG")
                        .help("Path to the broker configuration file (toml, yaml or json)")
                        .required(true),
                )
                .arg(
                    Arg::new("log-level")
                        .short('l')
                        .long("log-level")
                        .value_name("LEVEL")
                        .help("Overrides the configured log level (error, warn, info, debug, trace)")
                        .required(false),
                ),
        )
        .subcommand(
            SubCommand::with_name("nameserver")
                .about("Run the name resolution service")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("TCP port to listen on")
                        .required(true),
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Address to bind to")
                        .default_value("0.0.0.0"),
                ),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Collect publish statistics and print them periodically")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("UDP port to listen on")
                        .required(true),
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Address to bind to")
                        .default_value("0.0.0.0"),
                )
                .arg(
                    Arg::new("report-interval-secs")
                        .short('r')
                        .long("report-interval-secs")
                        .value_name("SECONDS")
                        .help("Seconds between statistics reports")
                        .default_value("10"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("broker", sub_matches)) => handle_broker_command(sub_matches).await,
        Some(("nameserver", sub_matches)) => handle_nameserver_command(sub_matches).await,
        Some(("monitor", sub_matches)) => handle_monitor_command(sub_matches).await,
        Some((cmd, _)) => Err(CliError::UnknownCommand(cmd.to_string())),
        None => Err(CliError::NoCommand),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
