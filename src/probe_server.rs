use anyhow::Context;

use tcpprobe::config::{server_command, ServerConfig};
use tcpprobe::logging::setup_logging;
use tcpprobe::server::Server;

fn main() -> anyhow::Result<()> {
    setup_logging();

    let matches = server_command().get_matches();
    let config = ServerConfig::from_matches(&matches)?;
    let server =
        Server::bind(config.addr).with_context(|| format!("could not bind {}", config.addr))?;
    server.run();
    Ok(())
}
