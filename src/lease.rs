//! Lease record text files.
//!
//! A lease file holds one record per line, fields separated by whitespace:
//!
//! ```text
//! <mac> <iaid> <address|address/len|SOLICIT> [<server duid hex>|-] [<hostname>|-]
//! ```
//!
//! Input files seed lease-reuse sessions. A record whose address is the
//! `SOLICIT` sentinel has no lease yet and starts from a SOLICIT. Output
//! files use the same format, so a run's output can drive the next run.

use std::fmt;
use std::net::Ipv6Addr;
use std::path::Path;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::session::{Identity, MacAddr, Session};

/// Address tokens starting with this prefix mean "no lease yet".
const SOLICIT_SENTINEL: &str = "SOLIC";

/// Placeholder for an absent DUID or hostname.
const NONE_MARKER: &str = "-";

/// One client identity as stored in a lease file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub mac: MacAddr,
    pub iaid: u32,
    /// `None` when the client has not been leased anything yet.
    pub address: Option<Ipv6Addr>,
    /// Non-zero for delegated prefixes.
    pub prefix_len: u8,
    pub server_duid: Option<Vec<u8>>,
    pub hostname: Option<String>,
}

impl LeaseRecord {
    /// Captures the lease a finished session holds.
    pub fn from_session(session: &Session) -> Self {
        Self {
            mac: session.mac,
            iaid: session.iaid,
            address: Some(session.address),
            prefix_len: session.prefix_len,
            server_duid: session.server_duid.clone(),
            hostname: session.hostname.clone(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            mac: self.mac,
            iaid: self.iaid,
            address: self.address.unwrap_or(Ipv6Addr::UNSPECIFIED),
            prefix_len: self.prefix_len,
            server_duid: self.server_duid.clone(),
            hostname: self.hostname.clone(),
        }
    }

    /// Whether the record names an address to renew rather than solicit.
    pub fn has_lease(&self) -> bool {
        self.address.is_some_and(|address| !address.is_unspecified())
    }
}

fn parse_address(token: &str) -> Result<(Option<Ipv6Addr>, u8)> {
    if token.starts_with(SOLICIT_SENTINEL) {
        return Ok((None, 0));
    }

    let invalid = || Error::InvalidLease(format!("invalid address '{}'", token));
    match token.split_once('/') {
        Some((address, len)) => {
            let address = address.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            let len = len.parse::<u8>().ok().filter(|len| *len <= 128).ok_or_else(invalid)?;
            Ok((Some(address), len))
        }
        None => Ok((Some(token.parse::<Ipv6Addr>().map_err(|_| invalid())?), 0)),
    }
}

impl FromStr for LeaseRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(Error::InvalidLease(format!(
                "too few fields: {} (minimum 3)",
                tokens.len()
            )));
        }

        let mac = tokens[0]
            .parse::<MacAddr>()
            .map_err(|_| Error::InvalidLease(format!("invalid MAC '{}'", tokens[0])))?;
        let iaid = tokens[1]
            .parse::<u32>()
            .map_err(|_| Error::InvalidLease(format!("invalid IAID '{}'", tokens[1])))?;
        let (address, prefix_len) = parse_address(tokens[2])?;

        let server_duid = match tokens.get(3) {
            None => None,
            Some(&NONE_MARKER) => None,
            Some(duid) => Some(
                hex::decode(duid)
                    .map_err(|error| Error::InvalidLease(format!("server DUID: {}", error)))?,
            ),
        };

        let hostname = match tokens.get(4) {
            None | Some(&NONE_MARKER) => None,
            Some(hostname) => Some(hostname.to_string()),
        };

        Ok(Self {
            mac,
            iaid,
            address,
            prefix_len,
            server_duid,
            hostname,
        })
    }
}

impl fmt::Display for LeaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.mac, self.iaid)?;
        match self.address {
            Some(address) if self.prefix_len > 0 => write!(f, "{}/{}", address, self.prefix_len)?,
            Some(address) => write!(f, "{}", address)?,
            None => write!(f, "SOLICIT")?,
        }
        match &self.server_duid {
            Some(duid) if !duid.is_empty() => write!(f, " {}", hex::encode(duid))?,
            _ => write!(f, " {}", NONE_MARKER)?,
        }
        write!(f, " {}", self.hostname.as_deref().unwrap_or(NONE_MARKER))
    }
}

/// Parses lease records from file content. Blank lines and `#` comments are
/// ignored; malformed lines are logged and skipped.
pub fn parse_leases(content: &str) -> Vec<LeaseRecord> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.parse::<LeaseRecord>() {
                Ok(record) => Some(record),
                Err(error) => {
                    warn!("Skipping lease line {}: {}", index + 1, error);
                    None
                }
            }
        })
        .collect()
}

/// Reads a lease input file.
pub async fn read_lease_file<P: AsRef<Path>>(path: P) -> Result<Vec<LeaseRecord>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;
    let records = parse_leases(&content);
    info!("Loaded {} lease record(s) from {}", records.len(), path.display());
    Ok(records)
}

/// Writes `records` in lease file format, replacing the file.
pub async fn write_lease_file<P: AsRef<Path>>(path: P, records: &[LeaseRecord]) -> Result<()> {
    let path = path.as_ref();
    let mut content = String::new();
    for record in records {
        content.push_str(&record.to_string());
        content.push('\n');
    }
    tokio::fs::write(path, content).await?;
    info!("Wrote {} lease record(s) to {}", records.len(), path.display());
    Ok(())
}
