use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::MessageType;
use crate::session::MacAddr;

/// Maximum data length of an operator-supplied extra option.
const MAX_EXTRA_OPTION_LEN: usize = 255;

/// Budget for the ORO plus all extra options, so a client message stays
/// within one datagram at the IPv6 minimum MTU.
const MAX_CONFIGURED_OPTIONS_LEN: usize = 1232;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servers: Vec<Ipv6Addr>,
    pub source_address: Ipv6Addr,
    pub link_address: Ipv6Addr,
    pub total_requests: u32,
    pub max_sessions: usize,
    pub timeout_ms: u64,
    pub retransmit: u32,
    pub until_answered: bool,
    pub ping: bool,
    pub exchange: Exchange,
    pub followup: Followup,
    pub lease_kind: LeaseKind,
    pub relay: bool,
    pub hostname: HostnameMode,
    pub domain: Option<String>,
    pub requested_options: Vec<u16>,
    pub extra_options: Vec<ExtraOption>,
    pub first_mac: Option<MacAddr>,
    pub send_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub socket_buffer_size: usize,
    pub lease_input: Option<PathBuf>,
    pub lease_output: Option<PathBuf>,
}

/// The message sent once a SOLICIT has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    #[default]
    Request,
    Renew,
    InformationRequest,
}

impl Exchange {
    pub fn message_type(self) -> MessageType {
        match self {
            Self::Request => MessageType::Request,
            Self::Renew => MessageType::Renew,
            Self::InformationRequest => MessageType::InformationRequest,
        }
    }
}

/// What to do with a lease once the server has confirmed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Followup {
    #[default]
    None,
    Release,
    Decline,
}

/// Whether sessions ask for an address (IA_NA) or a prefix (IA_PD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseKind {
    #[default]
    Address,
    Prefix,
}

/// How synthetic sessions name themselves in the CLIENT_FQDN option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostnameMode {
    #[default]
    None,
    /// `h<mac>.<domain>`
    Mac,
    /// `h<random><random>.<domain>`
    Random,
}

/// A raw option appended verbatim to every outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraOption {
    pub code: u16,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl std::str::FromStr for ExtraOption {
    type Err = Error;

    /// Parses `<code>:<hex data>`; the code may be decimal or `0x`-prefixed.
    fn from_str(value: &str) -> Result<Self> {
        let (code, data) = value.split_once(':').ok_or_else(|| {
            Error::InvalidConfig(format!("extra option '{}' is not <code>:<hex>", value))
        })?;

        let code = match code.strip_prefix("0x") {
            Some(hex_code) => u16::from_str_radix(hex_code, 16),
            None => code.parse::<u16>(),
        }
        .map_err(|_| Error::InvalidConfig(format!("invalid option code '{}'", code)))?;

        if data.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "extra option {} has no data",
                code
            )));
        }

        let data = hex::decode(data)
            .map_err(|error| Error::InvalidConfig(format!("option {} data: {}", code, error)))?;

        Ok(Self { code, data })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: vec![Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 1, 3)],
            source_address: Ipv6Addr::UNSPECIFIED,
            link_address: Ipv6Addr::UNSPECIFIED,
            total_requests: 1,
            max_sessions: 25,
            timeout_ms: 5000,
            retransmit: 0,
            until_answered: false,
            ping: false,
            exchange: Exchange::Request,
            followup: Followup::None,
            lease_kind: LeaseKind::Address,
            relay: false,
            hostname: HostnameMode::None,
            domain: None,
            requested_options: Vec::new(),
            extra_options: Vec::new(),
            first_mac: None,
            send_delay_ms: 0,
            poll_interval_ms: 20,
            socket_buffer_size: 128 * 1024,
            lease_input: None,
            lease_output: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one server address is required".to_string(),
            ));
        }

        if self.max_sessions == 0 {
            return Err(Error::InvalidConfig(
                "max_sessions must be greater than 0".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.exchange == Exchange::InformationRequest && self.followup != Followup::None {
            return Err(Error::InvalidConfig(
                "information-request does not obtain a lease to release or decline".to_string(),
            ));
        }

        for option in &self.extra_options {
            if option.code == 0 {
                return Err(Error::InvalidConfig(
                    "extra option code must not be 0".to_string(),
                ));
            }
            if option.data.len() > MAX_EXTRA_OPTION_LEN {
                return Err(Error::InvalidConfig(format!(
                    "extra option {} is {} bytes, maximum is {}",
                    option.code,
                    option.data.len(),
                    MAX_EXTRA_OPTION_LEN
                )));
            }
        }

        let configured = 4
            + self.requested_options.len() * 2
            + self
                .extra_options
                .iter()
                .map(|option| 4 + option.data.len())
                .sum::<usize>();
        if configured > MAX_CONFIGURED_OPTIONS_LEN {
            return Err(Error::InvalidConfig(format!(
                "requested and extra options take {} bytes, maximum is {}",
                configured, MAX_CONFIGURED_OPTIONS_LEN
            )));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_servers() {
        let config = Config {
            servers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let config = Config {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_total_option_size_is_capped() {
        let extra = |code| ExtraOption {
            code,
            data: vec![0; MAX_EXTRA_OPTION_LEN],
        };
        let config = Config {
            extra_options: (1..=4).map(extra).collect(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            extra_options: (1..=5).map(extra).collect(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config {
            requested_options: vec![23; 1000],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_information_request_with_release_rejected() {
        let config = Config {
            exchange: Exchange::InformationRequest,
            followup: Followup::Release,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extra_option_parsing() {
        let option: ExtraOption = "16:0000a0ff".parse().unwrap();
        assert_eq!(option.code, 16);
        assert_eq!(option.data, vec![0, 0, 0xa0, 0xff]);

        let option: ExtraOption = "0x25:01".parse().unwrap();
        assert_eq!(option.code, 0x25);

        assert!("16".parse::<ExtraOption>().is_err());
        assert!("16:".parse::<ExtraOption>().is_err());
        assert!("16:abc".parse::<ExtraOption>().is_err());
        assert!("x:00".parse::<ExtraOption>().is_err());
    }

    #[test]
    fn test_oversized_extra_option_rejected() {
        let config = Config {
            extra_options: vec![ExtraOption {
                code: 16,
                data: vec![0; 256],
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config {
            relay: true,
            followup: Followup::Decline,
            first_mac: Some("00:11:22:33:44:55".parse().unwrap()),
            extra_options: vec![ExtraOption {
                code: 16,
                data: vec![1, 2],
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"0102\""));
        assert!(json.contains("\"00:11:22:33:44:55\""));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert!(parsed.relay);
        assert_eq!(parsed.followup, Followup::Decline);
        assert_eq!(parsed.first_mac, config.first_mac);
        assert_eq!(parsed.extra_options, config.extra_options);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"max_sessions": 3}"#).unwrap();
        assert_eq!(parsed.max_sessions, 3);
        assert_eq!(parsed.timeout_ms, 5000);
        assert_eq!(parsed.poll_interval_ms, 20);
    }
}
