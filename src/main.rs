use std::fs::OpenOptions;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dhcp6load::config::{Exchange, ExtraOption, Followup, HostnameMode, LeaseKind};
use dhcp6load::lease::{read_lease_file, write_lease_file};
use dhcp6load::transport::local_address_for;
use dhcp6load::{Config, Engine, Error, MacAddr, Result, UdpTransport};

#[derive(Parser)]
#[command(name = "dhcp6load")]
#[command(author, version, about = "A DHCPv6 load and conformance generator", long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    #[arg(long, action = ArgAction::Help, help = "Print help")]
    help: Option<bool>,

    /// JSON config file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server addresses, comma separated
    #[arg(short = 'i', long = "servers", value_delimiter = ',')]
    servers: Vec<Ipv6Addr>,

    /// Number of sessions to run
    #[arg(short = 'n', long = "requests")]
    requests: Option<u32>,

    /// Concurrent sessions per server
    #[arg(short = 'q', long = "max-sessions")]
    max_sessions: Option<usize>,

    /// Reply timeout in milliseconds
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Retransmissions per phase before a session fails
    #[arg(short = 'R', long)]
    retransmit: Option<u32>,

    /// Retransmit until answered
    #[arg(short = 'N', long)]
    until_answered: bool,

    /// Stop each session once the SOLICIT is answered
    #[arg(short = 'p', long)]
    ping: bool,

    /// Send RENEW instead of REQUEST
    #[arg(short = 'w', long, conflicts_with = "info_request")]
    renew: bool,

    /// Send INFORMATION-REQUEST instead of REQUEST
    #[arg(long)]
    info_request: bool,

    /// Release each lease once it is confirmed
    #[arg(short = 'r', long, conflicts_with = "decline")]
    release: bool,

    /// Decline each lease once it is confirmed
    #[arg(short = 'e', long)]
    decline: bool,

    /// Request delegated prefixes (IA_PD) instead of addresses
    #[arg(short = 'P', long)]
    prefix: bool,

    /// Simulate a relay agent
    #[arg(short = 'A', long)]
    relay: bool,

    /// Source address to bind and to use as the relay link address
    #[arg(short = 'c', long = "source")]
    source: Option<Ipv6Addr>,

    /// Relay link address, if different from the source address
    #[arg(long)]
    link_address: Option<Ipv6Addr>,

    /// First MAC address (colon hex or decimal); MACs then count up
    #[arg(short = 'a', long = "first-mac", value_parser = parse_first_mac)]
    first_mac: Option<MacAddr>,

    /// Sequential MACs starting from 00:00:00:00:00:00
    #[arg(short = 'm', long)]
    sequential_mac: bool,

    /// Send a CLIENT_FQDN derived from the MAC
    #[arg(short = 'h', long)]
    hostname: bool,

    /// Send a random CLIENT_FQDN
    #[arg(short = 'H', long)]
    random_hostname: bool,

    /// Domain appended to generated hostnames
    #[arg(short = 'D', long)]
    domain: Option<String>,

    /// Option codes to list in the ORO, separated by commas or semicolons
    #[arg(short = 'I', long = "request-options", value_parser = parse_option_list)]
    request_options: Vec<OptionList>,

    /// Extra option as <code>:<hex>, repeatable
    #[arg(short = 'O', long = "option")]
    options: Vec<ExtraOption>,

    /// Delay in milliseconds before each new session
    #[arg(short = 'd', long)]
    delay: Option<u64>,

    /// Lease file to replay
    #[arg(short = 'f', long)]
    input: Option<PathBuf>,

    /// Where to write confirmed leases
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,

    /// Log every packet (same as --log-level debug)
    #[arg(short = 'v', long)]
    verbose: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
}

fn parse_first_mac(value: &str) -> Result<MacAddr> {
    if value.contains(':') {
        return value.parse();
    }
    let number = value
        .parse::<u64>()
        .map_err(|_| Error::InvalidConfig(format!("invalid MAC address '{}'", value)))?;
    let bytes = number.to_be_bytes();
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&bytes[2..]);
    Ok(MacAddr::new(octets))
}

#[derive(Debug, Clone)]
struct OptionList(Vec<u16>);

fn parse_option_list(value: &str) -> Result<OptionList> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            code.parse::<u16>()
                .map_err(|_| Error::InvalidConfig(format!("invalid option code '{}'", code)))
        })
        .collect::<Result<Vec<_>>>()
        .map(OptionList)
}

impl Cli {
    fn build_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if !self.servers.is_empty() {
            config.servers = self.servers.clone();
        }
        if let Some(requests) = self.requests {
            config.total_requests = requests;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.max_sessions = max_sessions;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }
        if let Some(retransmit) = self.retransmit {
            config.retransmit = retransmit;
        }
        config.until_answered |= self.until_answered;
        config.ping |= self.ping;
        if self.renew {
            config.exchange = Exchange::Renew;
        }
        if self.info_request {
            config.exchange = Exchange::InformationRequest;
        }
        if self.release {
            config.followup = Followup::Release;
        }
        if self.decline {
            config.followup = Followup::Decline;
        }
        if self.prefix {
            config.lease_kind = LeaseKind::Prefix;
        }
        config.relay |= self.relay;
        if let Some(source) = self.source {
            config.source_address = source;
        }
        if let Some(link_address) = self.link_address {
            config.link_address = link_address;
        }
        if self.first_mac.is_some() {
            config.first_mac = self.first_mac;
        } else if self.sequential_mac && config.first_mac.is_none() {
            config.first_mac = Some(MacAddr::default());
        }
        if self.random_hostname {
            config.hostname = HostnameMode::Random;
        } else if self.hostname {
            config.hostname = HostnameMode::Mac;
        }
        if self.domain.is_some() {
            config.domain = self.domain.clone();
        }
        if !self.request_options.is_empty() {
            config.requested_options = self
                .request_options
                .iter()
                .flat_map(|list| list.0.iter().copied())
                .collect();
        }
        if !self.options.is_empty() {
            config.extra_options = self.options.clone();
        }
        if let Some(delay) = self.delay {
            config.send_delay_ms = delay;
        }
        if self.input.is_some() {
            config.lease_input = self.input.clone();
        }
        if self.output.is_some() {
            config.lease_output = self.output.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn init_logging(&self) -> Result<()> {
        let level = if self.verbose { "debug" } else { self.log_level.as_str() };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        match &self.log_file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok(())
    }
}

/// Fills in the source and link addresses the kernel would pick when none
/// were given.
fn resolve_addresses(config: &mut Config) {
    if config.source_address.is_unspecified() {
        match config.servers.first().map(|server| local_address_for(*server)) {
            Some(Ok(address)) => {
                info!("Using local address {}", address);
                config.source_address = address;
            }
            Some(Err(error)) => warn!("Could not determine a local address: {}", error),
            None => {}
        }
    }
    if config.link_address.is_unspecified() {
        config.link_address = config.source_address;
    }
}

async fn run(mut config: Config) -> Result<i32> {
    resolve_addresses(&mut config);

    let leases = match &config.lease_input {
        Some(path) => Some(read_lease_file(path).await?),
        None => None,
    };
    let output = config.lease_output.clone();

    let transport = UdpTransport::bind(&config)?;
    let mut engine = Engine::new(config, transport, leases)?;

    tokio::select! {
        _ = engine.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, reporting results so far");
        }
    }

    println!("{}", engine.report());

    if let Some(path) = output {
        write_lease_file(&path, engine.leased()).await?;
    }

    Ok(engine.exit_code())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging()?;

    let config = cli.build_config()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let code = run(config).await?;
            std::process::exit(code);
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(args: &[&str]) -> Config {
        let mut argv = vec!["dhcp6load"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).build_config().unwrap()
    }

    #[test]
    fn test_timeout_is_milliseconds() {
        let config = config_from(&["-t", "100"]);
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.timeout(), std::time::Duration::from_millis(100));
    }

    #[test]
    fn test_request_options_accept_commas_and_semicolons() {
        let config = config_from(&["-I", "23,24;39"]);
        assert_eq!(config.requested_options, vec![23, 24, 39]);

        let config = config_from(&["-I", "23", "-I", "24"]);
        assert_eq!(config.requested_options, vec![23, 24]);

        assert!(Cli::try_parse_from(["dhcp6load", "-I", "23;dns"]).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = config_from(&["-n", "10", "-q", "4", "-R", "2", "-p", "-A", "-a", "1"]);
        assert_eq!(config.total_requests, 10);
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.retransmit, 2);
        assert!(config.ping);
        assert!(config.relay);
        assert_eq!(config.first_mac, Some(MacAddr::new([0, 0, 0, 0, 0, 1])));
    }
}
