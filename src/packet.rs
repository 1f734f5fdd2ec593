//! DHCPv6 message encoding and option stream decoding.
//!
//! A DHCPv6 client/server message is a 1-byte message type, a 3-byte
//! transaction id and a contiguous stream of TLV options:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    msg-type   |               transaction-id                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            options                            |
//! |                           (variable)                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! When relay simulation is enabled the message is wrapped in a
//! [`RelayHeader`] whose layout is fixed: the inner message always starts
//! at byte [`RELAY_HEADER_LEN`].
//!
//! Decoding never copies: [`OptionIter`] walks a borrowed buffer and yields
//! [`RawOption`] views, rejecting zero codes and truncated options instead
//! of reading past the end.

use std::net::Ipv6Addr;

use crate::config::{Config, LeaseKind};
use crate::error::{Error, Result};
use crate::options::{
    DhcpOption, IA_HEADER_LEN, MessageType, OPTION_HEADER_LEN, OptionCode, StatusCode,
};
use crate::session::Session;

/// Size of the message header (type + transaction id).
pub const HEADER_LEN: usize = 4;

/// Offset of the encapsulated message inside a relay frame.
pub const RELAY_HEADER_LEN: usize = 38;

/// FQDN flags: S=1 (server performs the AAAA update), O=0, N=0.
const FQDN_FLAGS: u8 = 0x01;

/// A 3-byte DHCPv6 transaction id.
pub type TransactionId = [u8; 3];

/// A single option as it appears on the wire, borrowed from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOption<'a> {
    pub code: u16,
    pub value: &'a [u8],
}

impl<'a> RawOption<'a> {
    /// Returns an iterator over the nested options of an IA_NA, IA_TA or
    /// IA_PD option, skipping the IAID, T1 and T2 fields.
    ///
    /// Returns `None` for other option codes or if the value is too short
    /// to hold the IA header.
    pub fn suboptions(&self) -> Option<OptionIter<'a>> {
        if !OptionCode::is_identity_association(self.code) || self.value.len() < IA_HEADER_LEN {
            return None;
        }
        Some(OptionIter::new(&self.value[IA_HEADER_LEN..]))
    }

    /// Decodes the option value into a typed [`DhcpOption`].
    pub fn decode(&self) -> Result<DhcpOption> {
        DhcpOption::parse(self.code, self.value)
    }
}

/// Lazy, bounds-checked iterator over a TLV option stream.
///
/// The iterator is `Clone`, so the same stream can be walked more than once.
/// On the first malformed option it yields a single error and then stops.
#[derive(Debug, Clone)]
pub struct OptionIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> OptionIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            done: false,
        }
    }

    fn fail(&mut self, reason: &'static str) -> Option<Result<RawOption<'a>>> {
        self.done = true;
        Some(Err(Error::MalformedOption {
            offset: self.offset,
            reason,
        }))
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<RawOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        if remaining.len() < OPTION_HEADER_LEN {
            return self.fail("truncated option header");
        }

        let code = u16::from_be_bytes([remaining[0], remaining[1]]);
        if code == 0 {
            return self.fail("zero option code");
        }

        let length = u16::from_be_bytes([remaining[2], remaining[3]]) as usize;
        let end = OPTION_HEADER_LEN + length;
        if end > remaining.len() {
            return self.fail("option length exceeds buffer");
        }

        self.offset += end;
        Some(Ok(RawOption {
            code,
            value: &remaining[OPTION_HEADER_LEN..end],
        }))
    }
}

/// A parsed client/server message header with a borrowed option stream.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub msg_type: u8,
    pub transaction_id: TransactionId,
    pub options: &'a [u8],
}

impl<'a> Message<'a> {
    /// Splits a datagram into header and option stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the datagram is shorter than the
    /// 4-byte header.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidPacket(format!(
                "message too short: {} bytes (minimum {})",
                data.len(),
                HEADER_LEN
            )));
        }

        Ok(Self {
            msg_type: data[0],
            transaction_id: [data[1], data[2], data[3]],
            options: &data[HEADER_LEN..],
        })
    }

    /// Returns the decoded message type, if it is one this crate knows.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.msg_type).ok()
    }

    pub fn iter_options(&self) -> OptionIter<'a> {
        OptionIter::new(self.options)
    }

    /// Renders the message as a one-line summary for debug logging.
    pub fn summary(&self) -> String {
        let kind = self
            .message_type()
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| format!("TYPE-{}", self.msg_type));
        let codes: Vec<String> = self
            .iter_options()
            .map(|option| match option {
                Ok(option) => option.code.to_string(),
                Err(_) => "!".to_string(),
            })
            .collect();
        format!(
            "{} txn {} options [{}]",
            kind,
            hex::encode(self.transaction_id),
            codes.join(",")
        )
    }
}

/// The fixed-layout relay envelope used when simulating a relay agent.
///
/// | Offset | Size | Field                    |
/// |--------|------|--------------------------|
/// | 0      | 1    | msg-type (RELAY-FORW/-REPL) |
/// | 1      | 1    | hop-count                |
/// | 2      | 16   | link-address             |
/// | 18     | 16   | peer-address             |
/// | 34     | 2    | RELAY_MSG option code    |
/// | 36     | 2    | RELAY_MSG option length  |
/// | 38     | -    | encapsulated message     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    pub msg_type: u8,
    pub hops: u8,
    pub link_address: Ipv6Addr,
    pub peer_address: Ipv6Addr,
}

impl RelayHeader {
    pub const MSG_TYPE_OFFSET: usize = 0;
    pub const HOPS_OFFSET: usize = 1;
    pub const LINK_ADDRESS_OFFSET: usize = 2;
    pub const PEER_ADDRESS_OFFSET: usize = 18;
    pub const RELAY_MSG_CODE_OFFSET: usize = 34;
    pub const RELAY_MSG_LEN_OFFSET: usize = 36;

    /// A relay-forward header as the simulated relay agent emits it.
    pub fn forward(link_address: Ipv6Addr, peer_address: Ipv6Addr) -> Self {
        Self {
            msg_type: MessageType::RelayForw as u8,
            hops: 1,
            link_address,
            peer_address,
        }
    }

    /// Wraps `inner` in this envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if `inner` is too long for the
    /// RELAY_MSG length field.
    pub fn wrap(&self, inner: &[u8]) -> Result<Vec<u8>> {
        let length = option_length("RELAY_MSG", inner.len())?;
        let mut frame = vec![0u8; RELAY_HEADER_LEN];
        frame[Self::MSG_TYPE_OFFSET] = self.msg_type;
        frame[Self::HOPS_OFFSET] = self.hops;
        frame[Self::LINK_ADDRESS_OFFSET..Self::PEER_ADDRESS_OFFSET]
            .copy_from_slice(&self.link_address.octets());
        frame[Self::PEER_ADDRESS_OFFSET..Self::RELAY_MSG_CODE_OFFSET]
            .copy_from_slice(&self.peer_address.octets());
        frame[Self::RELAY_MSG_CODE_OFFSET..Self::RELAY_MSG_LEN_OFFSET]
            .copy_from_slice(&(OptionCode::RelayMsg as u16).to_be_bytes());
        frame[Self::RELAY_MSG_LEN_OFFSET..RELAY_HEADER_LEN]
            .copy_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(inner);
        Ok(frame)
    }

    /// Splits a relay frame into its header and the encapsulated message.
    ///
    /// The encapsulated message is assumed to be the first relay option,
    /// exactly as [`RelayHeader::wrap`] produces it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the frame is shorter than the
    /// envelope, the first option is not RELAY_MSG, or its length runs past
    /// the end of the frame.
    pub fn strip(frame: &[u8]) -> Result<(Self, &[u8])> {
        if frame.len() < RELAY_HEADER_LEN {
            return Err(Error::InvalidPacket(format!(
                "relay frame too short: {} bytes (minimum {})",
                frame.len(),
                RELAY_HEADER_LEN
            )));
        }

        let code = u16::from_be_bytes([
            frame[Self::RELAY_MSG_CODE_OFFSET],
            frame[Self::RELAY_MSG_CODE_OFFSET + 1],
        ]);
        if code != OptionCode::RelayMsg as u16 {
            return Err(Error::InvalidPacket(format!(
                "relay frame carries option {} where RELAY_MSG was expected",
                code
            )));
        }

        let length = u16::from_be_bytes([
            frame[Self::RELAY_MSG_LEN_OFFSET],
            frame[Self::RELAY_MSG_LEN_OFFSET + 1],
        ]) as usize;
        let inner = frame
            .get(RELAY_HEADER_LEN..RELAY_HEADER_LEN + length)
            .ok_or_else(|| Error::InvalidPacket("RELAY_MSG length exceeds frame".to_string()))?;

        let mut link = [0u8; 16];
        link.copy_from_slice(&frame[Self::LINK_ADDRESS_OFFSET..Self::PEER_ADDRESS_OFFSET]);
        let mut peer = [0u8; 16];
        peer.copy_from_slice(&frame[Self::PEER_ADDRESS_OFFSET..Self::RELAY_MSG_CODE_OFFSET]);

        let header = Self {
            msg_type: frame[Self::MSG_TYPE_OFFSET],
            hops: frame[Self::HOPS_OFFSET],
            link_address: Ipv6Addr::from(link),
            peer_address: Ipv6Addr::from(peer),
        };
        Ok((header, inner))
    }
}

/// Builds the wire frame for `message_type` on behalf of `session`.
///
/// SOLICIT and RENEW carry a fresh CLIENT_ID, a Success STATUS_CODE and an
/// IA_NA or IA_PD block. REQUEST, RELEASE and DECLINE echo the options of
/// the last accepted server message byte for byte. INFORMATION-REQUEST
/// carries only the CLIENT_ID. Every message then gets SERVERID (when
/// known), CLIENT_FQDN (when the session has a hostname), the ORO and the
/// configured extra options, and is finally wrapped in a relay envelope if
/// relay simulation is on.
///
/// # Errors
///
/// Returns [`Error::UnsupportedMessage`] for message types a client never
/// sends, and [`Error::InvalidPacket`] when an option or the relayed
/// message would not fit its 16-bit length field.
pub fn encode(message_type: MessageType, session: &Session, config: &Config) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(256);
    buffer.push(message_type as u8);
    buffer.extend_from_slice(&session.transaction_id);

    match message_type {
        MessageType::Solicit | MessageType::Renew => {
            DhcpOption::client_id_for_mac(session.mac.octets()).encode_into(&mut buffer);
            DhcpOption::StatusCode(StatusCode::Success as u16, String::new())
                .encode_into(&mut buffer);
            identity_association(session, config.lease_kind).encode_into(&mut buffer);
        }
        MessageType::Request | MessageType::Release | MessageType::Decline => {
            buffer.extend_from_slice(&session.last_options);
        }
        MessageType::InformationRequest => {
            DhcpOption::client_id_for_mac(session.mac.octets()).encode_into(&mut buffer);
        }
        other => return Err(Error::UnsupportedMessage(other as u8)),
    }

    if let Some(duid) = &session.server_duid {
        DhcpOption::ServerId(duid.clone()).encode_into(&mut buffer);
    }

    if let Some(hostname) = &session.hostname {
        option_length("CLIENT_FQDN", hostname.len() + 2)?;
        DhcpOption::ClientFqdn {
            flags: FQDN_FLAGS,
            name: hostname.clone(),
        }
        .encode_into(&mut buffer);
    }

    option_length("ORO", config.requested_options.len() * 2)?;
    DhcpOption::Oro(config.requested_options.clone()).encode_into(&mut buffer);

    for extra in &config.extra_options {
        option_length("extra option", extra.data.len())?;
        DhcpOption::Unknown(extra.code, extra.data.clone()).encode_into(&mut buffer);
    }

    if config.relay {
        let header = RelayHeader::forward(config.link_address, session.address);
        return header.wrap(&buffer);
    }

    Ok(buffer)
}

fn option_length(name: &str, length: usize) -> Result<u16> {
    u16::try_from(length).map_err(|_| {
        Error::InvalidPacket(format!(
            "{} is {} bytes, more than an option length can hold",
            name, length
        ))
    })
}

fn identity_association(session: &Session, kind: LeaseKind) -> DhcpOption {
    match kind {
        LeaseKind::Address => DhcpOption::IaNa {
            iaid: session.iaid,
            t1: 0,
            t2: 0,
            options: vec![DhcpOption::IaAddr {
                address: session.address,
                preferred: 0,
                valid: 0,
            }],
        },
        LeaseKind::Prefix => DhcpOption::IaPd {
            iaid: session.iaid,
            t1: 0,
            t2: 0,
            options: vec![DhcpOption::IaPrefix {
                preferred: 0,
                valid: 0,
                prefix_len: session.prefix_len,
                prefix: session.address,
            }],
        },
    }
}

/// Whether a server message accepted or refused the client's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ack,
    Nak,
}

/// Classifies a server message by its STATUS_CODE options.
///
/// A message is a NAK if any top-level STATUS_CODE, or any STATUS_CODE
/// nested inside an IA option, carries a non-Success code. Without any
/// STATUS_CODE the message is an ACK.
///
/// # Errors
///
/// Propagates [`Error::MalformedOption`] from the option walk, and rejects
/// a STATUS_CODE too short to hold a code.
pub fn classify(options: OptionIter<'_>) -> Result<Classification> {
    let mut result = Classification::Ack;

    for option in options {
        let option = option?;
        if status_is_failure(&option)? {
            result = Classification::Nak;
        }

        if let Some(suboptions) = option.suboptions() {
            for suboption in suboptions {
                if status_is_failure(&suboption?)? {
                    result = Classification::Nak;
                }
            }
        }
    }

    Ok(result)
}

fn status_is_failure(option: &RawOption<'_>) -> Result<bool> {
    if option.code != OptionCode::StatusCode as u16 {
        return Ok(false);
    }
    match option.value {
        [high, low, ..] => Ok(u16::from_be_bytes([*high, *low]) != StatusCode::Success as u16),
        _ => Err(Error::MalformedOption {
            offset: 0,
            reason: "status code shorter than 2 bytes",
        }),
    }
}

/// Lease data picked out of a server message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeasePeek {
    pub server_duid: Option<Vec<u8>>,
    pub address: Option<Ipv6Addr>,
    pub prefix: Option<(Ipv6Addr, u8)>,
}

impl LeasePeek {
    /// Extracts the server DUID, the first IAADDR of an IA_NA and the first
    /// IAPREFIX of an IA_PD.
    ///
    /// # Errors
    ///
    /// Propagates malformed options; IA suboptions that fail to decode are
    /// reported as [`Error::InvalidPacket`].
    pub fn scan(options: OptionIter<'_>) -> Result<Self> {
        let mut peek = Self::default();

        for option in options {
            let option = option?;
            if option.code == OptionCode::ServerId as u16 {
                peek.server_duid = Some(option.value.to_vec());
                continue;
            }

            let Some(suboptions) = option.suboptions() else {
                continue;
            };
            for suboption in suboptions {
                match suboption?.decode()? {
                    DhcpOption::IaAddr { address, .. } if peek.address.is_none() => {
                        peek.address = Some(address);
                    }
                    DhcpOption::IaPrefix {
                        prefix, prefix_len, ..
                    } if peek.prefix.is_none() => {
                        peek.prefix = Some((prefix, prefix_len));
                    }
                    _ => {}
                }
            }
        }

        Ok(peek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtraOption;
    use crate::session::MacAddr;

    fn test_session() -> Session {
        let mut session = Session::default();
        session.transaction_id = [0x01, 0x02, 0x03];
        session.mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        session.iaid = 42;
        session
    }

    fn ia_na_with_status(status: StatusCode) -> Vec<u8> {
        let mut options = Vec::new();
        DhcpOption::ServerId(vec![0, 1, 0, 1, 9, 9, 9, 9, 1, 2, 3, 4, 5, 6]).encode_into(&mut options);
        DhcpOption::IaNa {
            iaid: 42,
            t1: 100,
            t2: 200,
            options: vec![
                DhcpOption::IaAddr {
                    address: "2001:db8::42".parse().unwrap(),
                    preferred: 300,
                    valid: 600,
                },
                DhcpOption::StatusCode(status as u16, String::new()),
            ],
        }
        .encode_into(&mut options);
        options
    }

    #[test]
    fn test_iterator_walks_options_in_order() {
        let mut data = Vec::new();
        DhcpOption::Unknown(7, vec![255]).encode_into(&mut data);
        DhcpOption::Oro(vec![23]).encode_into(&mut data);

        let options: Vec<RawOption> = OptionIter::new(&data).map(|o| o.unwrap()).collect();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].code, 7);
        assert_eq!(options[0].value, &[255]);
        assert_eq!(options[1].code, 6);
        assert_eq!(options[1].value, &[0, 23]);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let data = ia_na_with_status(StatusCode::Success);
        let iter = OptionIter::new(&data);
        let first: Vec<u16> = iter.clone().map(|o| o.unwrap().code).collect();
        let second: Vec<u16> = iter.map(|o| o.unwrap().code).collect();
        assert_eq!(first, vec![2, 3]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_iterator_rejects_zero_code() {
        let data = [0, 0, 0, 2, 1, 2];
        let mut iter = OptionIter::new(&data);
        assert!(matches!(
            iter.next(),
            Some(Err(Error::MalformedOption { offset: 0, .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_iterator_rejects_truncation() {
        assert!(OptionIter::new(&[0, 1, 0]).next().unwrap().is_err());
        assert!(OptionIter::new(&[0, 1, 0, 5, 1, 2]).next().unwrap().is_err());
        assert!(OptionIter::new(&[]).next().is_none());
    }

    #[test]
    fn test_nested_suboptions() {
        let data = ia_na_with_status(StatusCode::Success);
        let ia = OptionIter::new(&data)
            .map(|o| o.unwrap())
            .find(|o| o.code == OptionCode::IaNa as u16)
            .unwrap();
        let codes: Vec<u16> = ia.suboptions().unwrap().map(|o| o.unwrap().code).collect();
        assert_eq!(codes, vec![5, 13]);

        let server_id = OptionIter::new(&data).next().unwrap().unwrap();
        assert!(server_id.suboptions().is_none());
    }

    #[test]
    fn test_classify_nested_status() {
        let ack = ia_na_with_status(StatusCode::Success);
        assert_eq!(classify(OptionIter::new(&ack)).unwrap(), Classification::Ack);

        let nak = ia_na_with_status(StatusCode::NoAddrsAvail);
        assert_eq!(classify(OptionIter::new(&nak)).unwrap(), Classification::Nak);
    }

    #[test]
    fn test_classify_top_level_status() {
        let mut data = Vec::new();
        DhcpOption::StatusCode(StatusCode::NoBinding as u16, "gone".to_string())
            .encode_into(&mut data);
        assert_eq!(classify(OptionIter::new(&data)).unwrap(), Classification::Nak);

        assert_eq!(classify(OptionIter::new(&[])).unwrap(), Classification::Ack);
    }

    #[test]
    fn test_classify_malformed() {
        let data = [0, 13, 0, 1, 0];
        assert!(classify(OptionIter::new(&data)).is_err());
        assert!(classify(OptionIter::new(&[0, 0, 0, 0])).is_err());
    }

    #[test]
    fn test_lease_peek() {
        let data = ia_na_with_status(StatusCode::Success);
        let peek = LeasePeek::scan(OptionIter::new(&data)).unwrap();
        assert_eq!(
            peek.server_duid,
            Some(vec![0, 1, 0, 1, 9, 9, 9, 9, 1, 2, 3, 4, 5, 6])
        );
        assert_eq!(peek.address, Some("2001:db8::42".parse().unwrap()));
        assert_eq!(peek.prefix, None);
    }

    #[test]
    fn test_lease_peek_prefix() {
        let mut data = Vec::new();
        DhcpOption::IaPd {
            iaid: 1,
            t1: 0,
            t2: 0,
            options: vec![DhcpOption::IaPrefix {
                preferred: 1,
                valid: 2,
                prefix_len: 48,
                prefix: "2001:db8:1::".parse().unwrap(),
            }],
        }
        .encode_into(&mut data);
        let peek = LeasePeek::scan(OptionIter::new(&data)).unwrap();
        assert_eq!(peek.prefix, Some(("2001:db8:1::".parse().unwrap(), 48)));
    }

    #[test]
    fn test_encode_solicit() {
        let session = test_session();
        let config = Config {
            requested_options: vec![23, 24],
            ..Default::default()
        };
        let frame = encode(MessageType::Solicit, &session, &config).unwrap();
        let message = Message::parse(&frame).unwrap();

        assert_eq!(message.message_type(), Some(MessageType::Solicit));
        assert_eq!(message.transaction_id, [1, 2, 3]);
        let codes: Vec<u16> = message.iter_options().map(|o| o.unwrap().code).collect();
        assert_eq!(codes, vec![1, 13, 3, 6]);

        let ia = message
            .iter_options()
            .map(|o| o.unwrap())
            .find(|o| o.code == 3)
            .unwrap();
        assert_eq!(&ia.value[..4], &42u32.to_be_bytes());
        let iaaddr = ia.suboptions().unwrap().next().unwrap().unwrap();
        assert_eq!(iaaddr.code, OptionCode::IaAddr as u16);
        assert_eq!(iaaddr.value.len(), 24);
    }

    #[test]
    fn test_encode_solicit_prefix() {
        let session = test_session();
        let config = Config {
            lease_kind: LeaseKind::Prefix,
            ..Default::default()
        };
        let frame = encode(MessageType::Solicit, &session, &config).unwrap();
        let message = Message::parse(&frame).unwrap();
        let codes: Vec<u16> = message.iter_options().map(|o| o.unwrap().code).collect();
        assert_eq!(codes, vec![1, 13, 25, 6]);
    }

    #[test]
    fn test_encode_request_echoes_last_options() {
        let mut session = test_session();
        session.last_options = ia_na_with_status(StatusCode::Success);
        session.server_duid = Some(vec![1, 2, 3]);
        session.hostname = Some("h1.example.com".to_string());
        let config = Config {
            extra_options: vec![ExtraOption {
                code: 16,
                data: vec![0xde, 0xad],
            }],
            ..Default::default()
        };

        let frame = encode(MessageType::Request, &session, &config).unwrap();
        assert_eq!(frame[0], MessageType::Request as u8);
        assert_eq!(&frame[4..4 + session.last_options.len()], session.last_options.as_slice());

        let message = Message::parse(&frame).unwrap();
        let options: Vec<RawOption> = message.iter_options().map(|o| o.unwrap()).collect();
        let codes: Vec<u16> = options.iter().map(|o| o.code).collect();
        assert_eq!(codes, vec![2, 3, 2, 39, 6, 16]);
        assert_eq!(options[2].value, &[1, 2, 3]);
        assert_eq!(options[3].value[0], FQDN_FLAGS);
        assert_eq!(options[5].value, &[0xde, 0xad]);
    }

    #[test]
    fn test_encode_information_request() {
        let session = test_session();
        let frame = encode(MessageType::InformationRequest, &session, &Config::default()).unwrap();
        let message = Message::parse(&frame).unwrap();
        let codes: Vec<u16> = message.iter_options().map(|o| o.unwrap().code).collect();
        assert_eq!(codes, vec![1, 6]);
    }

    #[test]
    fn test_encode_rejects_server_messages() {
        let session = test_session();
        assert!(matches!(
            encode(MessageType::Advertise, &session, &Config::default()),
            Err(Error::UnsupportedMessage(2))
        ));
    }

    #[test]
    fn test_relay_envelope_layout() {
        let session = test_session();
        let config = Config {
            relay: true,
            link_address: "2001:db8::1".parse().unwrap(),
            ..Default::default()
        };
        let frame = encode(MessageType::Solicit, &session, &config).unwrap();

        assert_eq!(frame[0], MessageType::RelayForw as u8);
        assert_eq!(frame[1], 1);
        assert_eq!(&frame[2..18], &"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        assert_eq!(&frame[34..36], &[0, 9]);
        let inner_len = u16::from_be_bytes([frame[36], frame[37]]) as usize;
        assert_eq!(inner_len, frame.len() - RELAY_HEADER_LEN);
        assert_eq!(frame[RELAY_HEADER_LEN], MessageType::Solicit as u8);
        assert_eq!(&frame[39..42], &[1, 2, 3]);

        let (header, inner) = RelayHeader::strip(&frame).unwrap();
        assert_eq!(header.msg_type, MessageType::RelayForw as u8);
        assert_eq!(header.link_address, config.link_address);
        assert_eq!(inner, &frame[RELAY_HEADER_LEN..]);
    }

    #[test]
    fn test_relay_strip_rejects_bad_frames() {
        assert!(RelayHeader::strip(&[13; 37]).is_err());

        let mut frame = RelayHeader::forward(Ipv6Addr::UNSPECIFIED, Ipv6Addr::UNSPECIFIED)
            .wrap(&[7, 1, 2, 3])
            .unwrap();
        frame[37] = 200;
        assert!(RelayHeader::strip(&frame).is_err());

        frame[34] = 0;
        frame[35] = 1;
        assert!(RelayHeader::strip(&frame).is_err());
    }

    #[test]
    fn test_encode_rejects_oversized_options() {
        let session = test_session();

        let config = Config {
            requested_options: vec![23; 40_000],
            ..Default::default()
        };
        assert!(matches!(
            encode(MessageType::Solicit, &session, &config),
            Err(Error::InvalidPacket(_))
        ));

        let config = Config {
            relay: true,
            extra_options: (1..=300)
                .map(|code| ExtraOption {
                    code,
                    data: vec![0xab; 255],
                })
                .collect(),
            ..Default::default()
        };
        assert!(matches!(
            encode(MessageType::Solicit, &session, &config),
            Err(Error::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_relay_wrap_rejects_oversized_message() {
        let header = RelayHeader::forward(Ipv6Addr::UNSPECIFIED, Ipv6Addr::UNSPECIFIED);
        assert!(header.wrap(&vec![0; u16::MAX as usize]).is_ok());
        assert!(header.wrap(&vec![0; u16::MAX as usize + 1]).is_err());
    }

    #[test]
    fn test_message_parse_too_short() {
        assert!(Message::parse(&[7, 1, 2]).is_err());
        let message = Message::parse(&[7, 1, 2, 3]).unwrap();
        assert_eq!(message.message_type(), Some(MessageType::Reply));
        assert!(message.options.is_empty());
    }

    #[test]
    fn test_summary() {
        let mut data = vec![2, 0, 0, 9];
        data.extend(ia_na_with_status(StatusCode::Success));
        let message = Message::parse(&data).unwrap();
        assert_eq!(message.summary(), "ADVERTISE txn 000009 options [2,3]");
    }
}
