use std::net::SocketAddr;

use calproxy_core::config::UpstreamArgs;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(about = "Serve the calendars listed in an upstream index as one iCalendar")]
pub struct Arguments {
    /// host:port to serve on, a bare port or `:port` listens on all interfaces
    #[arg(long, env = "PORT", default_value = ":8080", value_parser = parse_addr)]
    pub addr: SocketAddr,
    #[command(flatten)]
    pub upstream: UpstreamArgs,
    /// deadline of a whole calendar request in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,
}

fn parse_addr(addr: &str) -> Result<SocketAddr, String> {
    let addr = addr.trim();
    let full = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None if addr.parse::<u16>().is_ok() => format!("0.0.0.0:{addr}"),
        None => addr.to_owned(),
    };
    full.parse()
        .map_err(|err| format!("invalid address {addr:?}: {err}"))
}
