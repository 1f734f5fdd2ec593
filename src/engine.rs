//! The single-threaded scheduler that drives every session.
//!
//! Each [`Engine::tick`] does three things in a fixed order:
//!
//! 1. issue at most one new session on the current server,
//! 2. drain every datagram the transport has, matching each to a session
//!    by transaction id and feeding it to the state machine,
//! 3. sweep every live session of every server through [`fsm::step`],
//!    sending, retransmitting or finishing as the table says.
//!
//! The current server then advances round-robin. The engine owns all
//! servers, pools and counters, so nothing here needs a lock.

use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV6};

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, LeaseKind};
use crate::error::{Error, Result};
use crate::fsm::{self, Outcome, Reception, RetryDecision, Step, Workflow};
use crate::lease::LeaseRecord;
use crate::options::MessageType;
use crate::packet::{self, LeasePeek, Message, RelayHeader, TransactionId};
use crate::session::{IdentitySource, Phase, SessionPool, SessionState};
use crate::stats::{Report, Statistics};
use crate::transport::{DHCP6_SERVER_PORT, Datagram, Transport};

/// Size of the transaction id space shared out between servers.
const TRANSACTION_SPACE: u64 = 1 << 24;

/// One target server with its session pool and counters.
#[derive(Debug)]
pub struct Server {
    pub address: SocketAddr,
    pub pool: SessionPool,
    pub stats: Statistics,
}

impl Server {
    fn new(address: SocketAddr, capacity: usize, first_transaction: u32) -> Self {
        Self {
            address,
            pool: SessionPool::new(capacity, first_transaction),
            stats: Statistics::default(),
        }
    }
}

pub struct Engine<T> {
    config: Config,
    workflow: Workflow,
    transport: T,
    servers: Vec<Server>,
    current: usize,
    identities: IdentitySource,
    leases: VecDeque<LeaseRecord>,
    lease_mode: bool,
    total: u64,
    issued: u64,
    leased: Vec<LeaseRecord>,
    started: DateTime<Local>,
}

impl<T: Transport> Engine<T> {
    /// Builds an engine for `config`. With `leases`, sessions are seeded
    /// from the records instead of synthetic identities and the run issues
    /// one session per record.
    pub fn new(config: Config, transport: T, leases: Option<Vec<LeaseRecord>>) -> Result<Self> {
        config.validate()?;

        let server_count = config.servers.len() as u64;
        let servers = config
            .servers
            .iter()
            .enumerate()
            .map(|(index, address)| {
                let offset = (index as u64 * TRANSACTION_SPACE / server_count) as u32;
                let address = SocketAddr::V6(SocketAddrV6::new(*address, DHCP6_SERVER_PORT, 0, 0));
                Server::new(address, config.max_sessions, offset)
            })
            .collect();

        let lease_mode = leases.is_some();
        let leases: VecDeque<LeaseRecord> = leases.unwrap_or_default().into();
        if lease_mode && leases.is_empty() {
            return Err(Error::InvalidConfig(
                "lease input contains no usable records".to_string(),
            ));
        }
        let total = if lease_mode {
            leases.len() as u64
        } else {
            u64::from(config.total_requests)
        };

        Ok(Self {
            workflow: Workflow::from_config(&config),
            identities: IdentitySource::new(&config),
            config,
            transport,
            servers,
            current: 0,
            leases,
            lease_mode,
            total,
            issued: 0,
            leased: Vec::new(),
            started: Local::now(),
        })
    }

    /// Ticks until every session has finished.
    pub async fn run(&mut self) {
        self.started = Local::now();
        info!(
            "Starting {} session(s) against {} server(s), at most {} concurrent per server",
            self.total,
            self.servers.len(),
            self.config.max_sessions
        );

        while !self.tick().await {}

        let (completed, failed) = self.totals();
        info!(
            "Run finished: {} issued, {} completed, {} failed",
            self.issued, completed, failed
        );
    }

    /// Runs one scheduler round. Returns `true` once the run is complete.
    pub async fn tick(&mut self) -> bool {
        self.issue().await;
        self.drain().await;
        self.sweep().await;
        self.current = (self.current + 1) % self.servers.len();
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        if self.issued < self.total {
            return false;
        }
        let (completed, failed) = self.totals();
        if self.config.until_answered {
            completed >= self.total
        } else {
            completed + failed >= self.total
        }
    }

    fn totals(&self) -> (u64, u64) {
        self.servers.iter().fold((0, 0), |(completed, failed), server| {
            (completed + server.stats.completed, failed + server.stats.failed)
        })
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Leases held by sessions that finished without a followup.
    pub fn leased(&self) -> &[LeaseRecord] {
        &self.leased
    }

    pub fn report(&self) -> Report<'_> {
        Report {
            started: self.started,
            exchange: self.config.exchange,
            servers: self
                .servers
                .iter()
                .map(|server| match server.address {
                    SocketAddr::V6(address) => (*address.ip(), &server.stats),
                    SocketAddr::V4(address) => (address.ip().to_ipv6_mapped(), &server.stats),
                })
                .collect(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.report().exit_code()
    }

    async fn issue(&mut self) {
        let server_index = self.current;

        if self.lease_mode {
            let Some(record) = self.leases.pop_front() else {
                return;
            };
            let Some(slot) = self.servers[server_index].pool.allocate() else {
                self.leases.push_front(record);
                return;
            };

            let renew = record.has_lease();
            let session = self.servers[server_index].pool.get_mut(slot);
            session.populate(record.identity());
            if renew {
                session.state = fsm::LEASE_REUSE_START;
                session.exchange = MessageType::Renew;
            } else {
                session.exchange = self.config.exchange.message_type();
            }
            self.issued += 1;

            self.pace().await;
            let first = if renew {
                MessageType::Renew
            } else {
                MessageType::Solicit
            };
            self.send(server_index, slot, first).await;
            return;
        }

        if self.issued >= self.total {
            return;
        }

        match self.servers[server_index].pool.allocate() {
            Some(slot) => {
                let identity = self.identities.next_identity();
                let session = self.servers[server_index].pool.get_mut(slot);
                session.populate(identity);
                session.exchange = self.config.exchange.message_type();
                self.issued += 1;

                self.pace().await;
                self.send(server_index, slot, MessageType::Solicit).await;
            }
            // Keep the MAC a server sees independent of which pool was full.
            None if self.servers.len() > 1 => self.identities.skip(),
            None => {}
        }
    }

    async fn pace(&self) {
        let delay = self.config.send_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(&mut self, server_index: usize, slot: usize, message_type: MessageType) {
        let now = Instant::now();
        let server = &mut self.servers[server_index];
        let session = server.pool.get_mut(slot);

        let Some(phase) = Phase::of_message(message_type) else {
            error!("{} does not start a client exchange", message_type);
            session.state = SessionState::PACKET_ERROR;
            return;
        };

        let frame = match packet::encode(message_type, session, &self.config) {
            Ok(frame) => frame,
            Err(error) => {
                error!("Failed to encode {} for {}: {}", message_type, session.mac, error);
                session.state = SessionState::PACKET_ERROR;
                return;
            }
        };

        session.mark_sent(phase, now);
        server.stats.record_sent(phase, now);
        debug!(
            "{} to {} for {} txn {}",
            message_type,
            server.address,
            session.mac,
            hex::encode(session.transaction_id)
        );

        if let Err(error) = self.transport.send_to(&frame, server.address).await {
            warn!("Failed to send {} to {}: {}", message_type, server.address, error);
        }
    }

    async fn drain(&mut self) {
        let mut wait = self.config.poll_interval();
        loop {
            match self.transport.recv(wait).await {
                Ok(Some(datagram)) => {
                    self.handle_datagram(&datagram);
                    wait = std::time::Duration::ZERO;
                }
                Ok(None) => break,
                Err(error) => {
                    warn!("Error receiving packet: {}", error);
                    break;
                }
            }
        }
    }

    fn find_session(&self, transaction_id: TransactionId) -> Option<(usize, usize)> {
        self.servers
            .iter()
            .enumerate()
            .find_map(|(index, server)| server.pool.find(transaction_id).map(|slot| (index, slot)))
    }

    fn handle_datagram(&mut self, datagram: &Datagram) {
        let frame = if self.config.relay
            && datagram.data.first() == Some(&(MessageType::RelayRepl as u8))
        {
            match RelayHeader::strip(&datagram.data) {
                Ok((_, inner)) => inner,
                Err(error) => {
                    debug!("Dropping relay frame: {}", error);
                    return;
                }
            }
        } else {
            &datagram.data[..]
        };

        let message = match Message::parse(frame) {
            Ok(message) => message,
            Err(error) => {
                debug!("Dropping datagram: {}", error);
                return;
            }
        };

        let Some((server_index, slot)) = self.find_session(message.transaction_id) else {
            debug!("No session for {}", message.summary());
            return;
        };
        debug!("Received {}", message.summary());

        let lease_kind = self.config.lease_kind;
        let server = &mut self.servers[server_index];
        let session = server.pool.get_mut(slot);

        let phase = match fsm::receive(session.state, message.msg_type) {
            Reception::Accept(phase) => phase,
            Reception::Stale => {
                debug!(
                    "Ignoring type {} for {} in state {}",
                    message.msg_type, session.mac, session.state
                );
                return;
            }
            Reception::Malformed => {
                warn!(
                    "Unexpected message type {} from {} for {}",
                    message.msg_type, server.address, session.mac
                );
                session.state = SessionState::PACKET_ERROR;
                return;
            }
        };

        let options = message.iter_options();
        let inspected = packet::classify(options.clone())
            .and_then(|classification| Ok((classification, LeasePeek::scan(options)?)));
        let (classification, peek) = match inspected {
            Ok(inspected) => inspected,
            Err(error) => {
                warn!("Malformed {} from {}: {}", phase, server.address, error);
                session.state = SessionState::PACKET_ERROR;
                return;
            }
        };

        if peek.server_duid.is_some() {
            session.server_duid = peek.server_duid;
        }
        match lease_kind {
            LeaseKind::Address => {
                if let Some(address) = peek.address {
                    session.address = address;
                }
            }
            LeaseKind::Prefix => {
                if let Some((prefix, prefix_len)) = peek.prefix {
                    session.address = prefix;
                    session.prefix_len = prefix_len;
                }
            }
        }

        let latency = session
            .sent_at(phase)
            .map(|sent| datagram.received_at.saturating_duration_since(sent));
        session.mark_received(phase, datagram.received_at);
        session.state = fsm::acknowledge(session.state, phase, classification);
        session.last_options = message.options.to_vec();
        server
            .stats
            .record_reply(phase, classification, latency, datagram.received_at);
    }

    async fn sweep(&mut self) {
        let now = Instant::now();
        for server_index in 0..self.servers.len() {
            for slot in self.servers[server_index].pool.live() {
                self.advance(server_index, slot, now).await;
            }
        }
    }

    async fn advance(&mut self, server_index: usize, slot: usize, now: Instant) {
        let session = self.servers[server_index].pool.get(slot);
        match fsm::step(session.state, session.exchange, &self.workflow) {
            Step::Idle => {}
            Step::Await(phase) => {
                let timeout = self.config.timeout();
                let expired = session
                    .sent_at(phase)
                    .is_none_or(|sent| now.saturating_duration_since(sent) > timeout);
                if !expired {
                    return;
                }

                let retries = session.retries;
                let message_type = fsm::phase_message(phase, session.exchange);
                self.servers[server_index].stats.record_timeout(phase);

                match fsm::retry_decision(retries, self.config.retransmit, self.config.until_answered) {
                    RetryDecision::Retransmit => {
                        self.servers[server_index].pool.get_mut(slot).retries += 1;
                        debug!("Retransmitting {} (attempt {})", message_type, retries + 1);
                        self.send(server_index, slot, message_type).await;
                    }
                    RetryDecision::GiveUp => {
                        debug!("{} timed out after {} retransmission(s)", message_type, retries);
                        self.finish(server_index, slot, Outcome::Failed);
                    }
                }
            }
            Step::Send(message_type) => {
                self.servers[server_index].pool.get_mut(slot).retries = 0;
                self.send(server_index, slot, message_type).await;
            }
            Step::Finish(outcome) => self.finish(server_index, slot, outcome),
            Step::Undefined => {
                error!(
                    "Undefined session state {} for {} (solicit sent {:?}, advertise {:?}, {} sent {:?}, reply {:?})",
                    session.state,
                    session.mac,
                    session.sent_at(Phase::Solicit),
                    session.received_at(Phase::Solicit),
                    session.exchange,
                    session.sent_at(Phase::Request),
                    session.received_at(Phase::Request)
                );
                self.finish(server_index, slot, Outcome::Error);
            }
        }
    }

    fn finish(&mut self, server_index: usize, slot: usize, outcome: Outcome) {
        let server = &mut self.servers[server_index];
        let stats = &mut server.stats;
        match outcome {
            Outcome::Completed => stats.completed += 1,
            Outcome::Leased => {
                stats.completed += 1;
                let session = server.pool.get(slot);
                if self.config.lease_output.is_some()
                    && session.exchange != MessageType::InformationRequest
                {
                    self.leased.push(LeaseRecord::from_session(session));
                }
            }
            Outcome::Failed => stats.failed += 1,
            Outcome::Error => {
                stats.errors += 1;
                stats.failed += 1;
            }
        }
        server.pool.free(slot);
    }
}
