//! DHCPv6 message types, option codes and options as defined in RFC 8415.
//!
//! Every DHCPv6 option is a TLV: a 2-byte code, a 2-byte length (both
//! big-endian) and `length` bytes of data. IA_NA, IA_TA and IA_PD carry a
//! 12-byte fixed header (IAID, T1, T2) followed by nested options in the
//! same format.
//!
//! Only the options a client needs to obtain, renew, release or decline a
//! lease are modelled. Anything else is carried as [`DhcpOption::Unknown`].
//!
//! # References
//!
//! - RFC 8415: Dynamic Host Configuration Protocol for IPv6
//! - RFC 4704: The DHCPv6 Client FQDN Option

use std::net::Ipv6Addr;

use crate::error::{Error, Result};

/// Size of an option header (code + length).
pub const OPTION_HEADER_LEN: usize = 4;

/// Size of the IAID + T1 + T2 block at the start of an IA option.
pub const IA_HEADER_LEN: usize = 12;

/// Length of an IAADDR option value: address + preferred + valid lifetimes.
pub const IAADDR_LEN: usize = 24;

/// Length of an IAPREFIX option value: lifetimes + prefix length + prefix.
pub const IAPREFIX_LEN: usize = 25;

/// DUID-LLT time field used for every synthetic client identifier.
const DUID_LLT_TIME: [u8; 4] = [0x88; 4];

/// DHCPv6 option codes.
///
/// Only codes used by this implementation are defined; unknown codes
/// are handled via [`DhcpOption::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OptionCode {
    /// Client DUID (RFC 8415 §21.2).
    ClientId = 1,
    /// Server DUID (RFC 8415 §21.3).
    ServerId = 2,
    /// Identity Association for Non-temporary Addresses (RFC 8415 §21.4).
    IaNa = 3,
    /// Identity Association for Temporary Addresses (RFC 8415 §21.5).
    IaTa = 4,
    /// IA Address, nested inside IA_NA/IA_TA (RFC 8415 §21.6).
    IaAddr = 5,
    /// Option Request Option (RFC 8415 §21.7).
    Oro = 6,
    /// Relay message, carries the encapsulated message (RFC 8415 §21.10).
    RelayMsg = 9,
    /// Status code (RFC 8415 §21.13).
    StatusCode = 13,
    /// Identity Association for Prefix Delegation (RFC 8415 §21.21).
    IaPd = 25,
    /// IA Prefix, nested inside IA_PD (RFC 8415 §21.22).
    IaPrefix = 26,
    /// Client FQDN (RFC 4704).
    ClientFqdn = 39,
}

impl TryFrom<u16> for OptionCode {
    type Error = u16;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ClientId),
            2 => Ok(Self::ServerId),
            3 => Ok(Self::IaNa),
            4 => Ok(Self::IaTa),
            5 => Ok(Self::IaAddr),
            6 => Ok(Self::Oro),
            9 => Ok(Self::RelayMsg),
            13 => Ok(Self::StatusCode),
            25 => Ok(Self::IaPd),
            26 => Ok(Self::IaPrefix),
            39 => Ok(Self::ClientFqdn),
            other => Err(other),
        }
    }
}

impl OptionCode {
    /// Returns true for the identity association options whose value
    /// carries nested suboptions after a 12-byte header.
    pub fn is_identity_association(code: u16) -> bool {
        code == Self::IaNa as u16 || code == Self::IaTa as u16 || code == Self::IaPd as u16
    }
}

/// DHCPv6 message types (RFC 8415 §7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client multicast to locate servers.
    Solicit = 1,
    /// Server response to SOLICIT.
    Advertise = 2,
    /// Client request for the advertised configuration.
    Request = 3,
    /// Client asks whether its addresses are still on-link.
    Confirm = 4,
    /// Client extends the lifetimes of its leases.
    Renew = 5,
    /// Client extends lifetimes via any server.
    Rebind = 6,
    /// Server answer to REQUEST, RENEW, RELEASE, DECLINE, INFORMATION-REQUEST.
    Reply = 7,
    /// Client gives its leases back.
    Release = 8,
    /// Client reports an assigned address is in use elsewhere.
    Decline = 9,
    /// Server-initiated reconfiguration.
    Reconfigure = 10,
    /// Client asks for configuration without an address.
    InformationRequest = 11,
    /// Relay agent forwarding a client message.
    RelayForw = 12,
    /// Server reply to a relay agent.
    RelayRepl = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Solicit),
            2 => Ok(Self::Advertise),
            3 => Ok(Self::Request),
            4 => Ok(Self::Confirm),
            5 => Ok(Self::Renew),
            6 => Ok(Self::Rebind),
            7 => Ok(Self::Reply),
            8 => Ok(Self::Release),
            9 => Ok(Self::Decline),
            10 => Ok(Self::Reconfigure),
            11 => Ok(Self::InformationRequest),
            12 => Ok(Self::RelayForw),
            13 => Ok(Self::RelayRepl),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solicit => write!(f, "SOLICIT"),
            Self::Advertise => write!(f, "ADVERTISE"),
            Self::Request => write!(f, "REQUEST"),
            Self::Confirm => write!(f, "CONFIRM"),
            Self::Renew => write!(f, "RENEW"),
            Self::Rebind => write!(f, "REBIND"),
            Self::Reply => write!(f, "REPLY"),
            Self::Release => write!(f, "RELEASE"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Reconfigure => write!(f, "RECONFIGURE"),
            Self::InformationRequest => write!(f, "INFORMATION-REQUEST"),
            Self::RelayForw => write!(f, "RELAY-FORW"),
            Self::RelayRepl => write!(f, "RELAY-REPL"),
        }
    }
}

/// DHCPv6 status codes (RFC 8415 §21.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    Success = 0,
    UnspecFail = 1,
    NoAddrsAvail = 2,
    NoBinding = 3,
    NotOnLink = 4,
    UseMulticast = 5,
    NoPrefixAvail = 6,
}

/// A DHCPv6 option with its data decoded.
///
/// Used to build outgoing messages and to interpret the handful of
/// inbound options the client cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Client DUID.
    ClientId(Vec<u8>),
    /// Server DUID, opaque and of any length.
    ServerId(Vec<u8>),
    /// Status code plus optional UTF-8 message.
    StatusCode(u16, String),
    /// IA_NA: IAID, T1, T2 and nested options.
    IaNa {
        iaid: u32,
        t1: u32,
        t2: u32,
        options: Vec<DhcpOption>,
    },
    /// IA_PD: IAID, T1, T2 and nested options.
    IaPd {
        iaid: u32,
        t1: u32,
        t2: u32,
        options: Vec<DhcpOption>,
    },
    /// IAADDR: an assigned address and its lifetimes.
    IaAddr {
        address: Ipv6Addr,
        preferred: u32,
        valid: u32,
    },
    /// IAPREFIX: a delegated prefix and its lifetimes.
    IaPrefix {
        preferred: u32,
        valid: u32,
        prefix_len: u8,
        prefix: Ipv6Addr,
    },
    /// Option Request Option: list of option codes the client wants back.
    Oro(Vec<u16>),
    /// Client FQDN: flags byte plus a domain-label-encoded name.
    ClientFqdn { flags: u8, name: String },
    /// Unknown or raw option preserved as-is.
    Unknown(u16, Vec<u8>),
}

impl DhcpOption {
    /// Builds the synthetic DUID-LLT client identifier for a MAC address:
    /// DUID type 1, hardware type 1 (Ethernet), a fixed time and the MAC.
    pub fn client_id_for_mac(mac: [u8; 6]) -> Self {
        let mut duid = Vec::with_capacity(14);
        duid.extend_from_slice(&1u16.to_be_bytes());
        duid.extend_from_slice(&1u16.to_be_bytes());
        duid.extend_from_slice(&DUID_LLT_TIME);
        duid.extend_from_slice(&mac);
        Self::ClientId(duid)
    }

    /// Returns the option code for this option.
    pub fn option_code(&self) -> u16 {
        match self {
            Self::ClientId(_) => OptionCode::ClientId as u16,
            Self::ServerId(_) => OptionCode::ServerId as u16,
            Self::StatusCode(..) => OptionCode::StatusCode as u16,
            Self::IaNa { .. } => OptionCode::IaNa as u16,
            Self::IaPd { .. } => OptionCode::IaPd as u16,
            Self::IaAddr { .. } => OptionCode::IaAddr as u16,
            Self::IaPrefix { .. } => OptionCode::IaPrefix as u16,
            Self::Oro(_) => OptionCode::Oro as u16,
            Self::ClientFqdn { .. } => OptionCode::ClientFqdn as u16,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses an option from its code and data bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if a known option has an invalid length.
    /// Unknown options are returned as [`DhcpOption::Unknown`].
    pub fn parse(code: u16, data: &[u8]) -> Result<Self> {
        let Ok(known) = OptionCode::try_from(code) else {
            return Ok(Self::Unknown(code, data.to_vec()));
        };

        match known {
            OptionCode::ClientId => Ok(Self::ClientId(data.to_vec())),
            OptionCode::ServerId => Ok(Self::ServerId(data.to_vec())),
            OptionCode::StatusCode => {
                if data.len() < 2 {
                    return Err(Error::InvalidPacket(
                        "Status code option too short".to_string(),
                    ));
                }
                let status = u16::from_be_bytes([data[0], data[1]]);
                let message = String::from_utf8_lossy(&data[2..]).into_owned();
                Ok(Self::StatusCode(status, message))
            }
            OptionCode::IaNa | OptionCode::IaPd => {
                if data.len() < IA_HEADER_LEN {
                    return Err(Error::InvalidPacket(format!(
                        "IA option {} shorter than {} bytes",
                        code, IA_HEADER_LEN
                    )));
                }
                let iaid = read_u32(data, 0);
                let t1 = read_u32(data, 4);
                let t2 = read_u32(data, 8);
                let mut options = Vec::new();
                for raw in crate::packet::OptionIter::new(&data[IA_HEADER_LEN..]) {
                    let raw = raw?;
                    options.push(Self::parse(raw.code, raw.value)?);
                }
                if known == OptionCode::IaNa {
                    Ok(Self::IaNa {
                        iaid,
                        t1,
                        t2,
                        options,
                    })
                } else {
                    Ok(Self::IaPd {
                        iaid,
                        t1,
                        t2,
                        options,
                    })
                }
            }
            OptionCode::IaAddr => {
                if data.len() < IAADDR_LEN {
                    return Err(Error::InvalidPacket(
                        "IAADDR option too short".to_string(),
                    ));
                }
                Ok(Self::IaAddr {
                    address: read_ipv6(data, 0),
                    preferred: read_u32(data, 16),
                    valid: read_u32(data, 20),
                })
            }
            OptionCode::IaPrefix => {
                if data.len() < IAPREFIX_LEN {
                    return Err(Error::InvalidPacket(
                        "IAPREFIX option too short".to_string(),
                    ));
                }
                Ok(Self::IaPrefix {
                    preferred: read_u32(data, 0),
                    valid: read_u32(data, 4),
                    prefix_len: data[8],
                    prefix: read_ipv6(data, 9),
                })
            }
            OptionCode::Oro => {
                if data.len() % 2 != 0 {
                    return Err(Error::InvalidPacket(
                        "ORO length must be a multiple of 2".to_string(),
                    ));
                }
                Ok(Self::Oro(
                    data.chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect(),
                ))
            }
            OptionCode::ClientFqdn => {
                if data.is_empty() {
                    return Err(Error::InvalidPacket("Empty CLIENT_FQDN option".to_string()));
                }
                Ok(Self::ClientFqdn {
                    flags: data[0],
                    name: decode_domain(&data[1..]),
                })
            }
            _ => Ok(Self::Unknown(code, data.to_vec())),
        }
    }

    /// Encodes this option to wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.encode_into(&mut buffer);
        buffer
    }

    /// Appends this option in wire format to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        let start = buffer.len();
        buffer.extend_from_slice(&self.option_code().to_be_bytes());
        buffer.extend_from_slice(&[0, 0]);

        match self {
            Self::ClientId(duid) | Self::ServerId(duid) => buffer.extend_from_slice(duid),
            Self::StatusCode(status, message) => {
                buffer.extend_from_slice(&status.to_be_bytes());
                buffer.extend_from_slice(message.as_bytes());
            }
            Self::IaNa {
                iaid,
                t1,
                t2,
                options,
            }
            | Self::IaPd {
                iaid,
                t1,
                t2,
                options,
            } => {
                buffer.extend_from_slice(&iaid.to_be_bytes());
                buffer.extend_from_slice(&t1.to_be_bytes());
                buffer.extend_from_slice(&t2.to_be_bytes());
                for option in options {
                    option.encode_into(buffer);
                }
            }
            Self::IaAddr {
                address,
                preferred,
                valid,
            } => {
                buffer.extend_from_slice(&address.octets());
                buffer.extend_from_slice(&preferred.to_be_bytes());
                buffer.extend_from_slice(&valid.to_be_bytes());
            }
            Self::IaPrefix {
                preferred,
                valid,
                prefix_len,
                prefix,
            } => {
                buffer.extend_from_slice(&preferred.to_be_bytes());
                buffer.extend_from_slice(&valid.to_be_bytes());
                buffer.push(*prefix_len);
                buffer.extend_from_slice(&prefix.octets());
            }
            Self::Oro(codes) => {
                for code in codes {
                    buffer.extend_from_slice(&code.to_be_bytes());
                }
            }
            Self::ClientFqdn { flags, name } => {
                buffer.push(*flags);
                encode_domain(name, buffer);
            }
            Self::Unknown(_, data) => buffer.extend_from_slice(data),
        }

        let length = (buffer.len() - start - OPTION_HEADER_LEN) as u16;
        buffer[start + 2..start + 4].copy_from_slice(&length.to_be_bytes());
    }
}

/// Encodes a domain name as DNS wire-format labels, terminated by a zero
/// length byte. A trailing dot is ignored.
pub fn encode_domain(domain: &str, buffer: &mut Vec<u8>) {
    for label in domain.split('.').filter(|label| !label.is_empty()) {
        let bytes = &label.as_bytes()[..label.len().min(63)];
        buffer.push(bytes.len() as u8);
        buffer.extend_from_slice(bytes);
    }
    buffer.push(0);
}

/// Decodes DNS wire-format labels back into a dotted name.
///
/// Stops at the terminating zero or at the end of the data; a label that
/// runs past the end is truncated.
pub fn decode_domain(data: &[u8]) -> String {
    let mut labels = Vec::new();
    let mut index = 0;
    while index < data.len() {
        let length = data[index] as usize;
        if length == 0 {
            break;
        }
        let end = (index + 1 + length).min(data.len());
        labels.push(String::from_utf8_lossy(&data[index + 1..end]).into_owned());
        index = end;
    }
    labels.join(".")
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_ipv6(data: &[u8], offset: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[offset..offset + 16]);
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversions() {
        for value in 1..=13u8 {
            let msg_type = MessageType::try_from(value).unwrap();
            assert_eq!(msg_type as u8, value);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(14).is_err());
    }

    #[test]
    fn test_option_encode_decode_roundtrip() {
        let options: Vec<DhcpOption> = vec![
            DhcpOption::client_id_for_mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            DhcpOption::ServerId(vec![0, 1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]),
            DhcpOption::StatusCode(StatusCode::NoAddrsAvail as u16, "none left".to_string()),
            DhcpOption::IaNa {
                iaid: 7,
                t1: 100,
                t2: 200,
                options: vec![DhcpOption::IaAddr {
                    address: "2001:db8::10".parse().unwrap(),
                    preferred: 300,
                    valid: 400,
                }],
            },
            DhcpOption::IaPd {
                iaid: 9,
                t1: 0,
                t2: 0,
                options: vec![DhcpOption::IaPrefix {
                    preferred: 1,
                    valid: 2,
                    prefix_len: 56,
                    prefix: "2001:db8:100::".parse().unwrap(),
                }],
            },
            DhcpOption::Oro(vec![23, 24]),
            DhcpOption::ClientFqdn {
                flags: 1,
                name: "host.example.com".to_string(),
            },
            DhcpOption::Unknown(1000, vec![1, 2, 3]),
        ];

        for original in options {
            let encoded = original.encode();
            let code = u16::from_be_bytes([encoded[0], encoded[1]]);
            let decoded = DhcpOption::parse(code, &encoded[OPTION_HEADER_LEN..]).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_client_id_layout() {
        let encoded = DhcpOption::client_id_for_mac([1, 2, 3, 4, 5, 6]).encode();
        assert_eq!(
            encoded,
            vec![0, 1, 0, 14, 0, 1, 0, 1, 0x88, 0x88, 0x88, 0x88, 1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn test_option_invalid_lengths() {
        assert!(DhcpOption::parse(OptionCode::StatusCode as u16, &[0]).is_err());
        assert!(DhcpOption::parse(OptionCode::IaNa as u16, &[0; 11]).is_err());
        assert!(DhcpOption::parse(OptionCode::IaAddr as u16, &[0; 23]).is_err());
        assert!(DhcpOption::parse(OptionCode::IaPrefix as u16, &[0; 24]).is_err());
        assert!(DhcpOption::parse(OptionCode::Oro as u16, &[0; 3]).is_err());
    }

    #[test]
    fn test_encode_domain() {
        let mut buffer = Vec::new();
        encode_domain("h1.example.", &mut buffer);
        assert_eq!(buffer, b"\x02h1\x07example\x00");
        assert_eq!(decode_domain(&buffer), "h1.example");
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(format!("{}", MessageType::Solicit), "SOLICIT");
        assert_eq!(format!("{}", MessageType::Advertise), "ADVERTISE");
        assert_eq!(format!("{}", MessageType::Reply), "REPLY");
        assert_eq!(
            format!("{}", MessageType::InformationRequest),
            "INFORMATION-REQUEST"
        );
        assert_eq!(format!("{}", MessageType::RelayForw), "RELAY-FORW");
    }
}
