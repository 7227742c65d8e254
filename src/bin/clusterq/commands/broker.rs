use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use clusterq::broker::Broker;
use clusterq::config::ClusterConfig;
use log::info;
use simplelog::{Config, SimpleLogger};
use std::path::Path;

fn load_config(matches: &ArgMatches) -> CliResult<ClusterConfig> {
    let path = matches.value_of("config").ok_or_else(|| CliError::ParseError {
        field: "config".to_string(),
        message: "Configuration file not specified. Please use the --config option.".to_string(),
    })?;

    let mut config = ClusterConfig::load(Path::new(path))?;
    if let Some(level) = matches.value_of("log-level") {
        config.logging.level = level.to_string();
    }

    config
        .validate()
        .map_err(|errors| CliError::ConfigurationError(errors.join("; ")))?;
    Ok(config)
}

pub async fn handle_broker_command(matches: &ArgMatches) -> CliResult<()> {
    let config = load_config(matches)?;
    let _ = SimpleLogger::init(config.log_level(), Config::default());

    let broker = Broker::start(config).await?;
    println!(
        "Broker {} started: messaging on {}, election on {}",
        broker.config().broker.component_id,
        broker.messaging_addr(),
        broker.election_addr()
    );

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    broker.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{App, Arg};
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn matches_for(args: &[&str]) -> ArgMatches {
        App::new("broker")
            .arg(Arg::new("config").long("config").takes_value(true))
            .arg(Arg::new("log-level").long("log-level").takes_value(true))
            .get_matches_from(args)
    }

    #[test]
    fn test_missing_config_file_is_configuration_error() {
        let matches = matches_for(&["broker", "--config", "/nonexistent/broker.toml"]);
        let err = load_config(&matches).unwrap_err();
        assert!(matches!(err, CliError::ConfigurationError(_)));
    }

    #[test]
    fn test_log_level_flag_overrides_config() {
        let file = write_config("[broker]\ncomponent_id = \"broker-1\"\n");
        let path = file.path().to_str().unwrap().to_string();

        let matches = matches_for(&["broker", "--config", &path, "--log-level", "debug"]);
        let config = load_config(&matches).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let file = write_config("[broker]\ncomponent_id = \"broker-1\"\n");
        let path = file.path().to_str().unwrap().to_string();

        let matches = matches_for(&["broker", "--config", &path, "--log-level", "loud"]);
        assert!(matches!(
            load_config(&matches),
            Err(CliError::ConfigurationError(_))
        ));
    }
}
