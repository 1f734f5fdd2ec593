//! # dhcp6load
//!
//! A DHCPv6 load and conformance generator. It simulates many concurrent
//! DHCPv6 clients against one or more servers over a single UDP socket and
//! reports latency and success/failure counts per server.
//!
//! ## Features
//!
//! - SOLICIT/ADVERTISE/REQUEST/REPLY, plus RENEW, RELEASE, DECLINE and
//!   INFORMATION-REQUEST exchanges
//! - Address (IA_NA) and prefix delegation (IA_PD) leases
//! - Relay agent simulation (RELAY-FORW / RELAY-REPL)
//! - Timeouts with bounded or unbounded retransmission
//! - Lease files to replay identities and renew earlier leases
//! - Single-threaded scheduler on Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhcp6load::{Config, Engine, UdpTransport};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> dhcp6load::Result<()> {
//!     let config = Config {
//!         total_requests: 100,
//!         ..Default::default()
//!     };
//!     let transport = UdpTransport::bind(&config)?;
//!     let mut engine = Engine::new(config, transport, None)?;
//!     engine.run().await;
//!     println!("{}", engine.report());
//!     std::process::exit(engine.exit_code());
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Run configuration (servers, session limits, workflow)
//! - [`Engine`] - Scheduler: issues sessions, matches replies, retries
//! - [`fsm`] - Session state machine as an explicit transition table
//! - [`packet`] - DHCPv6 message encoding and bounds-checked option decoding
//! - [`SessionPool`] - Fixed-capacity session slots per server
//! - [`Statistics`] - Per-server counters and the run report
//! - [`Transport`] - Datagram I/O seam, with [`UdpTransport`] for real runs

pub mod config;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod lease;
pub mod options;
pub mod packet;
pub mod session;
pub mod stats;
pub mod transport;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use lease::LeaseRecord;
pub use options::{DhcpOption, MessageType};
pub use session::{MacAddr, SessionPool, SessionState};
pub use stats::Statistics;
pub use transport::{Transport, UdpTransport};
