//! IPv4 socket address, convertible to/from `std::net::SocketAddr` and the
//! raw `sockaddr_in` the platform layer reads back from `getsockname` /
//! `getpeername`.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::sys::socket;

/// An IPv4 address and port.
///
/// `Connection` captures one of these for the local and one for the peer
/// side at construction time; both are cheap `Copy` values afterward.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    addr: Ipv4Addr,
    port: u16,
}

impl Address {
    pub fn new(addr: Ipv4Addr, port: u16) -> Address {
        Address { addr, port }
    }

    /// Reads the local address of a bound/connected socket.
    pub fn local(fd: socket::RawSocket) -> std::io::Result<Address> {
        socket::getsockname(fd)
    }

    /// Reads the peer address of a connected socket.
    pub fn peer(fd: socket::RawSocket) -> std::io::Result<Address> {
        socket::getpeername(fd)
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddrV4> for Address {
    fn from(a: SocketAddrV4) -> Address {
        Address::new(*a.ip(), a.port())
    }
}

impl From<Address> for SocketAddr {
    fn from(a: Address) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(a.addr, a.port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
