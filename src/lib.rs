//! # clusterq
//!
//! clusterq is a clustered publish/subscribe message broker. Every broker
//! serves a line-based messaging protocol (exchanges, queues, bindings) and,
//! next to it, a peer-to-peer election protocol so that exactly one broker of
//! a cluster is recognised as leader and registered with the name service.
//!
//! ## Features
//!
//! - Direct, fanout and topic exchanges (`*` and `#` wildcards)
//! - Unbounded in-memory queues with push delivery to subscribers
//! - Ring, bully and majority-vote leader election
//! - Heartbeat-driven failure detection and re-election
//! - Name resolution service for leader discovery
//! - UDP publish statistics
//! - CLI based console
//!
//! ## Basic Usage
//!
//! ```no_run
//! use clusterq::broker::Broker;
//! use clusterq::config::ClusterConfig;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClusterConfig::load(Path::new("broker-1.toml")).expect("invalid config");
//!     let broker = Broker::start(config).await.expect("failed to start broker");
//!     println!("Messaging on {}", broker.messaging_addr());
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     broker.shutdown().await;
//! }
//! ```
//!
//! A client then talks to the messaging port line by line:
//!
//! ```text
//! < ok SMQP
//! > exchange topic stocks
//! < ok
//! > queue eu-prices
//! < ok
//! > bind stock.eu.#
//! < ok
//! > publish stock.eu.sap 142.10
//! < ok
//! > subscribe
//! < ok
//! < 142.10
//! > stop
//! > exit
//! < ok bye
//! ```
//!
//! ## CLI Features
//!
//! ### broker
//! Runs a broker until interrupted.
//! ```bash
//! clusterq broker --config broker-1.toml [--log-level debug]
//! ```
//!
//! ### nameserver
//! Runs the name resolution service.
//! ```bash
//! clusterq nameserver --port 18000
//! ```
//!
//! ### monitor
//! Collects publish statistics and prints them periodically.
//! ```bash
//! clusterq monitor --port 17000 --report-interval-secs 10
//! ```

pub mod broker;
pub mod config;
pub mod monitoring;
pub mod nameservice;
pub mod network;
pub mod protocol;

pub use broker::Broker;
pub use broker::leader::{ElectionMode, Role};
pub use config::ClusterConfig;
