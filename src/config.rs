use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use crate::client::{ClientOptions, ResendPolicy};
use crate::codec::MAX_FIELD_VALUE;
use crate::params::{MeasurementKind, SessionParameters};

pub const DEFAULT_PROBES: u32 = 20;
pub const DEFAULT_MEASURE: &str = "rtt";
pub const DEFAULT_DELAY_MS: u64 = 0;
pub const DEFAULT_RESEND_ATTEMPTS: u32 = 0;
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_OUTPUT_MODE: &str = "normal";
pub const DEFAULT_LISTEN_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputMode {
    Silent,
    Normal,
    Json,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "silent" => Ok(OutputMode::Silent),
            "normal" => Ok(OutputMode::Normal),
            "json" => Ok(OutputMode::Json),
            _ => Err(format!("Unknown output mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    pub host: String,
    pub server: SocketAddr,
    pub measurement_kind: MeasurementKind,
    pub probe_count: u32,
    pub artificial_delay_ms: u64,
    pub payload_sizes: Vec<usize>,
    pub parallel: bool,
    pub output_mode: OutputMode,
    pub options: ClientOptions,
}

pub fn client_command() -> Command {
    Command::new("tcpprobe-client")
        .about("Measures round-trip time and throughput against a tcpprobe server")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("server")
                .index(1)
                .required(true)
                .help("Server host name or IP address"),
        )
        .arg(
            Arg::new("port")
                .index(2)
                .required(true)
                .value_parser(clap::value_parser!(u16).range(1..))
                .help("Server port"),
        )
        .arg(
            Arg::new("probes")
                .short('p')
                .long("probes")
                .value_parser(clap::value_parser!(u32).range(1..=MAX_FIELD_VALUE as i64))
                .help("Number of probes per session"),
        )
        .arg(
            Arg::new("measure")
                .short('m')
                .long("measure")
                .value_parser(clap::value_parser!(MeasurementKind))
                .default_value(DEFAULT_MEASURE)
                .help("rtt or thput"),
        )
        .arg(
            Arg::new("delay")
                .short('d')
                .long("delay")
                .value_parser(clap::value_parser!(u64).range(0..=MAX_FIELD_VALUE))
                .help("Milliseconds the server waits before answering each probe"),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(clap::value_parser!(u32).range(0..=MAX_FIELD_VALUE as i64))
                .help("Run a single session with this payload size instead of the sweep"),
        )
        .arg(
            Arg::new("resend")
                .long("resend")
                .value_parser(clap::value_parser!(u32))
                .help("Retransmit a rejected probe up to N times instead of aborting"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .action(ArgAction::SetTrue)
                .help("Run the sessions of a sweep concurrently"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(clap::value_parser!(OutputMode))
                .default_value(DEFAULT_OUTPUT_MODE)
                .help("silent, normal or json"),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .value_parser(clap::value_parser!(u64))
                .help("Seconds to wait for the connection, 0 to wait forever"),
        )
}

impl ClientConfig {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let host = matches
            .get_one::<String>("server")
            .ok_or_else(|| anyhow!("No server address provided"))?
            .to_string();
        let port = *matches
            .get_one::<u16>("port")
            .ok_or_else(|| anyhow!("No server port provided"))?;
        let server = (host.as_str(), port)
            .to_socket_addrs()
            .with_context(|| format!("could not resolve {}", host))?
            .next()
            .ok_or_else(|| anyhow!("{} has no address", host))?;

        let measurement_kind = matches
            .get_one::<MeasurementKind>("measure")
            .copied()
            .unwrap_or(MeasurementKind::Rtt);
        let probe_count = matches
            .get_one::<u32>("probes")
            .copied()
            .unwrap_or(DEFAULT_PROBES);
        let artificial_delay_ms = matches
            .get_one::<u64>("delay")
            .copied()
            .unwrap_or(DEFAULT_DELAY_MS);
        let payload_sizes = match matches.get_one::<u32>("size") {
            Some(size) => vec![*size as usize],
            None => measurement_kind.payload_sizes().to_vec(),
        };

        let resend = match matches
            .get_one::<u32>("resend")
            .copied()
            .unwrap_or(DEFAULT_RESEND_ATTEMPTS)
        {
            0 => ResendPolicy::Abort,
            n => ResendPolicy::Resend { max_attempts: n },
        };
        let connect_timeout = match matches
            .get_one::<u64>("connect-timeout")
            .copied()
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECONDS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let output_mode = matches
            .get_one::<OutputMode>("output")
            .copied()
            .unwrap_or(OutputMode::Normal);

        Ok(ClientConfig {
            host,
            server,
            measurement_kind,
            probe_count,
            artificial_delay_ms,
            payload_sizes,
            parallel: matches.get_flag("parallel"),
            output_mode,
            options: ClientOptions {
                connect_timeout,
                resend,
            },
        })
    }

    /// One parameter set per payload size, in sweep order.
    pub fn sessions(&self) -> anyhow::Result<Vec<SessionParameters>> {
        self.payload_sizes
            .iter()
            .map(|size| {
                SessionParameters::new(
                    self.measurement_kind,
                    self.probe_count,
                    *size,
                    self.artificial_delay_ms,
                )
                .map_err(|e| anyhow!(e))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

pub fn server_command() -> Command {
    Command::new("tcpprobe-server")
        .about("Answers tcpprobe measurement sessions, one thread per connection")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("port")
                .index(1)
                .required(true)
                .value_parser(clap::value_parser!(u16).range(1..))
                .help("Port to listen on"),
        )
        .arg(
            Arg::new("addr")
                .long("addr")
                .value_parser(clap::value_parser!(IpAddr))
                .help("Address to listen on"),
        )
}

impl ServerConfig {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let port = *matches
            .get_one::<u16>("port")
            .ok_or_else(|| anyhow!("No port provided"))?;
        let ip = matches
            .get_one::<IpAddr>("addr")
            .copied()
            .unwrap_or(DEFAULT_LISTEN_ADDR);
        Ok(ServerConfig {
            addr: SocketAddr::new(ip, port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(args: &[&str]) -> anyhow::Result<ClientConfig> {
        let matches = client_command().try_get_matches_from(args)?;
        ClientConfig::from_matches(&matches)
    }

    #[test]
    fn client_defaults() {
        let config = client(&["tcpprobe-client", "127.0.0.1", "7000"]).unwrap();
        assert_eq!(config.server, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.measurement_kind, MeasurementKind::Rtt);
        assert_eq!(config.probe_count, DEFAULT_PROBES);
        assert_eq!(config.artificial_delay_ms, 0);
        assert_eq!(config.payload_sizes, vec![1, 100, 200, 400, 800, 1000]);
        assert_eq!(config.options.resend, ResendPolicy::Abort);
        assert_eq!(config.output_mode, OutputMode::Normal);
        assert!(!config.parallel);
        assert_eq!(config.sessions().unwrap().len(), 6);
    }

    #[test]
    fn client_flags() {
        let config = client(&[
            "tcpprobe-client",
            "127.0.0.1",
            "7000",
            "--probes",
            "5",
            "-m",
            "thput",
            "-d",
            "30",
            "--resend",
            "2",
            "-o",
            "json",
            "--connect-timeout",
            "0",
        ])
        .unwrap();
        assert_eq!(config.measurement_kind, MeasurementKind::Throughput);
        assert_eq!(config.probe_count, 5);
        assert_eq!(config.artificial_delay_ms, 30);
        assert_eq!(config.payload_sizes, vec![1000, 2000, 4000, 16000, 32000]);
        assert_eq!(
            config.options.resend,
            ResendPolicy::Resend { max_attempts: 2 }
        );
        assert_eq!(config.options.connect_timeout, None);
        assert_eq!(config.output_mode, OutputMode::Json);
    }

    #[test]
    fn single_size() {
        let config = client(&["tcpprobe-client", "127.0.0.1", "7000", "-s", "64"]).unwrap();
        let sessions = config.sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].payload_size, 64);
    }

    #[test]
    fn client_rejects_bad_values() {
        assert!(client(&["tcpprobe-client", "127.0.0.1", "7000", "-p", "0"]).is_err());
        assert!(client(&["tcpprobe-client", "127.0.0.1", "7000", "-m", "udp"]).is_err());
        assert!(client(&["tcpprobe-client", "127.0.0.1", "7000", "-d", "100000"]).is_err());
        assert!(client(&["tcpprobe-client", "127.0.0.1"]).is_err());
    }

    #[test]
    fn server_port_and_addr() {
        let matches = server_command()
            .try_get_matches_from(["tcpprobe-server", "9000", "--addr", "127.0.0.1"])
            .unwrap();
        let config = ServerConfig::from_matches(&matches).unwrap();
        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());

        let matches = server_command()
            .try_get_matches_from(["tcpprobe-server", "9000"])
            .unwrap();
        assert_eq!(
            ServerConfig::from_matches(&matches).unwrap().addr,
            "0.0.0.0:9000".parse().unwrap()
        );
        assert!(server_command()
            .try_get_matches_from(["tcpprobe-server", "0"])
            .is_err());
    }
}
