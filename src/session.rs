//! Per-client session records and the fixed-capacity pools that hold them.
//!
//! Each server owns one [`SessionPool`]: a slot arena of `max_sessions`
//! [`Session`]s scanned linearly from slot 0. A slot is free while its
//! [`SessionState`] is empty. Allocation stamps the next value of the pool's
//! 24-bit [`TransactionCounter`] into the slot, which keeps transaction ids
//! unique among the pool's live sessions.

use std::fmt;
use std::net::Ipv6Addr;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{Config, HostnameMode};
use crate::error::{Error, Result};
use crate::options::MessageType;
use crate::packet::TransactionId;

/// A 6-byte hardware address, written as colon-separated hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns the next address, carrying from the last byte upwards and
    /// wrapping after `ff:ff:ff:ff:ff:ff`.
    pub fn next(self) -> Self {
        let value = u64::from_be_bytes([0, 0, self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]]);
        let bytes = (value.wrapping_add(1) & 0xffff_ffff_ffff).to_be_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[2..]);
        Self(octets)
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 6 {
            return Err(Error::InvalidConfig(format!("invalid MAC address '{}'", value)));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.is_empty() || part.len() > 2 {
                return Err(Error::InvalidConfig(format!("invalid MAC address '{}'", value)));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidConfig(format!("invalid MAC address '{}'", value)))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// Accumulated protocol history of a session.
///
/// Flags only ever get added while a session is live; the set is cleared
/// when the slot is freed. The state machine keys its decisions on the
/// exact set, see [`crate::fsm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionState(u32);

impl SessionState {
    pub const UNALLOCATED: Self = Self(0);
    pub const ALLOCATED: Self = Self(1 << 0);
    pub const SOLICIT_SENT: Self = Self(1 << 1);
    pub const SOLICIT_ACK: Self = Self(1 << 2);
    pub const SOLICIT_NAK: Self = Self(1 << 3);
    pub const REQUEST_SENT: Self = Self(1 << 4);
    pub const REQUEST_ACK: Self = Self(1 << 5);
    pub const REQUEST_NAK: Self = Self(1 << 6);
    pub const DECLINE_SENT: Self = Self(1 << 7);
    pub const DECLINE_ACK: Self = Self(1 << 8);
    pub const DECLINE_NAK: Self = Self(1 << 9);
    pub const RELEASE_SENT: Self = Self(1 << 10);
    pub const RELEASE_ACK: Self = Self(1 << 11);
    pub const RELEASE_NAK: Self = Self(1 << 12);
    pub const PACKET_ERROR: Self = Self(1 << 13);

    const NAMES: [(Self, &'static str); 14] = [
        (Self::ALLOCATED, "ALLOCATED"),
        (Self::SOLICIT_SENT, "SOLICIT_SENT"),
        (Self::SOLICIT_ACK, "SOLICIT_ACK"),
        (Self::SOLICIT_NAK, "SOLICIT_NAK"),
        (Self::REQUEST_SENT, "REQUEST_SENT"),
        (Self::REQUEST_ACK, "REQUEST_ACK"),
        (Self::REQUEST_NAK, "REQUEST_NAK"),
        (Self::DECLINE_SENT, "DECLINE_SENT"),
        (Self::DECLINE_ACK, "DECLINE_ACK"),
        (Self::DECLINE_NAK, "DECLINE_NAK"),
        (Self::RELEASE_SENT, "RELEASE_SENT"),
        (Self::RELEASE_ACK, "RELEASE_ACK"),
        (Self::RELEASE_NAK, "RELEASE_NAK"),
        (Self::PACKET_ERROR, "PACKET_ERROR"),
    ];

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SessionState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for SessionState {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "UNALLOCATED");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// A request/response round of a session.
///
/// `Request` also covers RENEW and INFORMATION-REQUEST, whichever the
/// session uses as its second exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Solicit,
    Request,
    Decline,
    Release,
}

impl Phase {
    pub fn index(self) -> usize {
        match self {
            Self::Solicit => 0,
            Self::Request => 1,
            Self::Decline => 2,
            Self::Release => 3,
        }
    }

    pub fn sent_flag(self) -> SessionState {
        match self {
            Self::Solicit => SessionState::SOLICIT_SENT,
            Self::Request => SessionState::REQUEST_SENT,
            Self::Decline => SessionState::DECLINE_SENT,
            Self::Release => SessionState::RELEASE_SENT,
        }
    }

    pub fn ack_flag(self) -> SessionState {
        match self {
            Self::Solicit => SessionState::SOLICIT_ACK,
            Self::Request => SessionState::REQUEST_ACK,
            Self::Decline => SessionState::DECLINE_ACK,
            Self::Release => SessionState::RELEASE_ACK,
        }
    }

    pub fn nak_flag(self) -> SessionState {
        match self {
            Self::Solicit => SessionState::SOLICIT_NAK,
            Self::Request => SessionState::REQUEST_NAK,
            Self::Decline => SessionState::DECLINE_NAK,
            Self::Release => SessionState::RELEASE_NAK,
        }
    }

    /// The phase a client message belongs to, if it starts one.
    pub fn of_message(message_type: MessageType) -> Option<Self> {
        match message_type {
            MessageType::Solicit => Some(Self::Solicit),
            MessageType::Request | MessageType::Renew | MessageType::InformationRequest => {
                Some(Self::Request)
            }
            MessageType::Decline => Some(Self::Decline),
            MessageType::Release => Some(Self::Release),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Solicit => write!(f, "solicit"),
            Self::Request => write!(f, "request"),
            Self::Decline => write!(f, "decline"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// One simulated client transaction.
#[derive(Debug, Clone)]
pub struct Session {
    pub transaction_id: TransactionId,
    pub state: SessionState,
    /// Options of the last accepted ADVERTISE/REPLY, echoed verbatim.
    pub last_options: Vec<u8>,
    pub mac: MacAddr,
    pub iaid: u32,
    /// Assigned address, or delegated prefix when leasing prefixes.
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub server_duid: Option<Vec<u8>>,
    pub hostname: Option<String>,
    /// Message used for the second exchange (REQUEST, RENEW or
    /// INFORMATION-REQUEST).
    pub exchange: MessageType,
    /// Retransmissions in the current phase.
    pub retries: u32,
    sent: [Option<Instant>; 4],
    received: [Option<Instant>; 4],
}

impl Default for Session {
    fn default() -> Self {
        Self {
            transaction_id: [0; 3],
            state: SessionState::UNALLOCATED,
            last_options: Vec::new(),
            mac: MacAddr::default(),
            iaid: 0,
            address: Ipv6Addr::UNSPECIFIED,
            prefix_len: 0,
            server_duid: None,
            hostname: None,
            exchange: MessageType::Request,
            retries: 0,
            sent: [None; 4],
            received: [None; 4],
        }
    }
}

impl Session {
    pub fn is_allocated(&self) -> bool {
        !self.state.is_empty()
    }

    pub fn sent_at(&self, phase: Phase) -> Option<Instant> {
        self.sent[phase.index()]
    }

    pub fn received_at(&self, phase: Phase) -> Option<Instant> {
        self.received[phase.index()]
    }

    pub fn mark_sent(&mut self, phase: Phase, now: Instant) {
        self.sent[phase.index()] = Some(now);
        self.state |= phase.sent_flag();
    }

    pub fn mark_received(&mut self, phase: Phase, now: Instant) {
        self.received[phase.index()] = Some(now);
    }

    /// Copies identity data into a freshly allocated slot.
    pub fn populate(&mut self, identity: Identity) {
        self.mac = identity.mac;
        self.iaid = identity.iaid;
        self.address = identity.address;
        self.prefix_len = identity.prefix_len;
        self.server_duid = identity.server_duid;
        self.hostname = identity.hostname;
    }
}

/// Who a session claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub mac: MacAddr,
    pub iaid: u32,
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub server_duid: Option<Vec<u8>>,
    pub hostname: Option<String>,
}

/// A 24-bit wrapping counter handing out transaction ids.
#[derive(Debug, Clone)]
pub struct TransactionCounter {
    next: u32,
}

impl TransactionCounter {
    const MASK: u32 = 0x00ff_ffff;

    pub fn new(start: u32) -> Self {
        Self {
            next: start & Self::MASK,
        }
    }

    pub fn next_id(&mut self) -> TransactionId {
        let value = self.next;
        self.next = value.wrapping_add(1) & Self::MASK;
        let bytes = value.to_be_bytes();
        [bytes[1], bytes[2], bytes[3]]
    }
}

/// Fixed-capacity slot arena for one server's sessions.
#[derive(Debug)]
pub struct SessionPool {
    slots: Vec<Session>,
    active: usize,
    counter: TransactionCounter,
}

impl SessionPool {
    pub fn new(capacity: usize, first_transaction: u32) -> Self {
        Self {
            slots: vec![Session::default(); capacity],
            active: 0,
            counter: TransactionCounter::new(first_transaction),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Claims the lowest free slot, marks it `ALLOCATED` and gives it the
    /// next transaction id. Returns `None` when every slot is live.
    pub fn allocate(&mut self) -> Option<usize> {
        if self.active == self.slots.len() {
            return None;
        }

        let index = self.slots.iter().position(|slot| !slot.is_allocated())?;
        let slot = &mut self.slots[index];
        slot.state = SessionState::ALLOCATED;
        slot.transaction_id = self.counter.next_id();
        self.active += 1;
        Some(index)
    }

    /// Resets the slot and returns it to the pool.
    pub fn free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if slot.is_allocated() {
            *slot = Session::default();
            self.active -= 1;
        }
    }

    pub fn get(&self, index: usize) -> &Session {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Session {
        &mut self.slots[index]
    }

    /// Index of the live session holding `transaction_id`.
    pub fn find(&self, transaction_id: TransactionId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_allocated() && slot.transaction_id == transaction_id)
    }

    /// Indices of every live slot, in slot order.
    pub fn live(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_allocated())
            .map(|(index, _)| index)
            .collect()
    }
}

/// Generates identities for synthetic sessions.
///
/// MACs are sequential from the configured first address, or random when
/// none is configured. IAIDs count up from 1.
#[derive(Debug, Clone)]
pub struct IdentitySource {
    next_mac: Option<MacAddr>,
    next_iaid: u32,
    hostname: HostnameMode,
    domain: String,
}

impl IdentitySource {
    pub fn new(config: &Config) -> Self {
        Self {
            next_mac: config.first_mac,
            next_iaid: 1,
            hostname: config.hostname,
            domain: config.domain.clone().unwrap_or_default(),
        }
    }

    fn take_mac(&mut self) -> MacAddr {
        match self.next_mac {
            Some(mac) => {
                self.next_mac = Some(mac.next());
                mac
            }
            None => MacAddr::new(rand::thread_rng().r#gen()),
        }
    }

    /// Advances the MAC sequence without producing an identity, so the
    /// address a server sees does not depend on which pool was full.
    pub fn skip(&mut self) {
        if let Some(mac) = self.next_mac {
            self.next_mac = Some(mac.next());
        }
    }

    pub fn next_identity(&mut self) -> Identity {
        let mac = self.take_mac();
        let iaid = self.next_iaid;
        self.next_iaid = self.next_iaid.wrapping_add(1);

        let hostname = match self.hostname {
            HostnameMode::None => None,
            HostnameMode::Mac => {
                let [a, b, c, d, e, f] = mac.octets();
                Some(format!(
                    "h{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}.{}",
                    a, b, c, d, e, f, self.domain
                ))
            }
            HostnameMode::Random => {
                let mut rng = rand::thread_rng();
                Some(format!(
                    "h{}{}.{}",
                    rng.r#gen::<u32>(),
                    rng.r#gen::<u32>(),
                    self.domain
                ))
            }
        };

        Identity {
            mac,
            iaid,
            address: Ipv6Addr::UNSPECIFIED,
            prefix_len: 0,
            server_duid: None,
            hostname,
        }
    }
}
