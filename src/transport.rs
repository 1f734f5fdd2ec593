//! The datagram socket the engine sends and receives through.
//!
//! [`Transport`] is the seam between the engine and the network: the
//! production [`UdpTransport`] wraps a non-blocking UDP socket bound to the
//! DHCPv6 client port, and tests drive the engine with an in-memory
//! implementation.

use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

pub const DHCP6_CLIENT_PORT: u16 = 546;
pub const DHCP6_SERVER_PORT: u16 = 547;

const RECV_BUFFER_SIZE: usize = 1500;

/// A received frame and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub received_at: Instant,
}

/// Datagram I/O used by the engine.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send_to(&mut self, frame: &[u8], destination: SocketAddr) -> io::Result<()>;

    /// Waits up to `wait` for one datagram; `Ok(None)` when none arrived.
    /// A zero `wait` only returns what is already queued.
    async fn recv(&mut self, wait: Duration) -> io::Result<Option<Datagram>>;
}

pub struct UdpTransport {
    socket: UdpSocket,
    buffer: Box<[u8; RECV_BUFFER_SIZE]>,
}

impl UdpTransport {
    /// Binds `[source_address]:546` with the configured socket buffers.
    pub fn bind(config: &Config) -> Result<Self> {
        let socket = Self::create_socket(config.source_address, config.socket_buffer_size)?;
        info!(
            "Client socket bound to [{}]:{}",
            config.source_address, DHCP6_CLIENT_PORT
        );
        Ok(Self {
            socket,
            buffer: Box::new([0u8; RECV_BUFFER_SIZE]),
        })
    }

    fn create_socket(address: Ipv6Addr, buffer_size: usize) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        if let Err(error) = socket.set_recv_buffer_size(buffer_size) {
            warn!("Failed to set SO_RCVBUF to {}: {}", buffer_size, error);
        }
        if let Err(error) = socket.set_send_buffer_size(buffer_size) {
            warn!("Failed to set SO_SNDBUF to {}: {}", buffer_size, error);
        }

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV6::new(address, DHCP6_CLIENT_PORT, 0, 0);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }
}

impl Transport for UdpTransport {
    async fn send_to(&mut self, frame: &[u8], destination: SocketAddr) -> io::Result<()> {
        self.socket.send_to(frame, destination).await.map(|_| ())
    }

    async fn recv(&mut self, wait: Duration) -> io::Result<Option<Datagram>> {
        let received = if wait.is_zero() {
            match self.socket.try_recv_from(&mut self.buffer[..]) {
                Ok(received) => received,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(error) => return Err(error),
            }
        } else {
            match tokio::time::timeout(wait, self.socket.recv_from(&mut self.buffer[..])).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            }
        };

        let (size, _source) = received;
        Ok(Some(Datagram {
            data: self.buffer[..size].to_vec(),
            received_at: Instant::now(),
        }))
    }
}

/// Finds the local address the kernel would use to reach `destination`, by
/// connecting an unbound UDP socket. No packet is sent.
pub fn local_address_for(destination: Ipv6Addr) -> Result<Ipv6Addr> {
    let socket = std::net::UdpSocket::bind(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0))?;
    socket.connect(SocketAddrV6::new(destination, DHCP6_SERVER_PORT, 0, 0))?;
    match socket.local_addr()? {
        SocketAddr::V6(address) => Ok(*address.ip()),
        SocketAddr::V4(address) => Err(Error::Socket(format!(
            "no IPv6 route to {}, local address is {}",
            destination, address
        ))),
    }
}
