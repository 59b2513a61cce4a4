//! Self-connected loopback TCP pair, Windows' substitute for `pipe(2)`.
//!
//! Windows has no anonymous non-blocking pipe usable with `select`, so the
//! wakeup channel is instead a listener bound to `127.0.0.1:0`, a connector
//! socket, and the accepted peer of that connector — three sockets for a
//! moment, collapsing to two once the listener is closed.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::socket::{self, RawSocket};

pub struct Pipe {
    reader: RawSocket,
    writer: RawSocket,
}

impl Pipe {
    pub fn new() -> io::Result<Pipe> {
        match Self::construct() {
            Ok(p) => Ok(p),
            Err(e) => {
                log::error!("failed to construct loopback pipe: {}", e);
                Err(e)
            }
        }
    }

    fn construct() -> io::Result<Pipe> {
        let loopback = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        let listener = socket::listen(loopback, 1)?;
        let bound_addr = socket::getsockname(listener)?;

        let connector = socket::new_tcp_socket()?;
        let connect_addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, bound_addr.port());
        // best-effort: a non-blocking connect to a local listener with a
        // backlog of 1 resolves practically instantly.
        if let Err(e) = socket::connect(connector, connect_addr) {
            socket::close(listener);
            socket::close(connector);
            return Err(e);
        }

        let accepted = loop {
            match socket::accept(listener) {
                Ok(sock) => break sock,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    socket::close(listener);
                    socket::close(connector);
                    return Err(e);
                }
            }
        };
        socket::close(listener);

        Ok(Pipe { reader: accepted, writer: connector })
    }

    pub fn read_fd(&self) -> RawSocket {
        self.reader
    }

    pub fn write_fd(&self) -> RawSocket {
        self.writer
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        socket::write(self.writer, buf)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            windows_sys::Win32::Networking::WinSock::recv(
                self.reader as windows_sys::Win32::Networking::WinSock::SOCKET,
                buf.as_mut_ptr(),
                buf.len() as i32,
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::from_raw_os_error(unsafe {
                windows_sys::Win32::Networking::WinSock::WSAGetLastError()
            }));
        }
        Ok(n as usize)
    }

    pub fn drain(&mut self) {
        let mut scratch = [0u8; 4096];
        loop {
            match self.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        socket::close(self.reader);
        socket::close(self.writer);
    }
}
