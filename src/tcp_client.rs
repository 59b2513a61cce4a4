//! A thin listener/connector pair over [`Connection`] and [`EventLoop`].
//! Carries no protocol logic of its own — just enough glue to drive the
//! hard core over a real socket.

use std::io;
use std::net::SocketAddrV4;
use std::sync::Arc;

use crate::connection::{Connection, ConnectionHook, ConnectionState};
use crate::event_loop::{EventLoop, Interest};
use crate::sys::socket;

/// Invoked with each freshly accepted connection.
pub type AcceptHook = Box<dyn Fn(&mut EventLoop, Arc<Connection>) + Send>;

/// A non-blocking listener registered for `Read` on an event loop: each
/// readiness notification drains as many pending `accept()`s as are queued.
pub struct TcpListener {
    fd: socket::RawSocket,
}

impl TcpListener {
    /// `on_message`/`on_close` are shared (via `Arc`) across every
    /// connection this listener accepts, rather than built per-connection.
    pub fn bind(
        event_loop: &mut EventLoop,
        addr: SocketAddrV4,
        backlog: i32,
        next_id: Arc<std::sync::atomic::AtomicU64>,
        on_accept: AcceptHook,
        on_message: Option<ConnectionHook>,
        on_close: Option<ConnectionHook>,
    ) -> io::Result<TcpListener> {
        let fd = socket::listen(addr, backlog)?;
        let acceptor = move |event_loop: &mut EventLoop| loop {
            match socket::accept(fd) {
                Ok(accepted_fd) => {
                    let id = next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let name = format!("conn-{}", id);
                    match Connection::new(
                        event_loop,
                        id,
                        name,
                        accepted_fd,
                        ConnectionState::Connected,
                        on_message.clone(),
                        on_close.clone(),
                    ) {
                        Ok(conn) => on_accept(event_loop, conn),
                        Err(e) => log::error!("failed to register accepted connection: {}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("accept failed: {}", e);
                    break;
                }
            }
        };
        event_loop.register_io(fd, Interest::READABLE, Some(Box::new(acceptor)), None)?;
        Ok(TcpListener { fd })
    }

    pub fn local_addr(&self) -> io::Result<crate::Address> {
        socket::getsockname(self.fd)
    }
}

/// Creates a non-blocking socket, starts a POSIX `connect()`, and registers
/// the result as a `Connecting` connection watching `Write` for completion.
pub fn connect(
    event_loop: &mut EventLoop,
    addr: SocketAddrV4,
    id: u64,
    name: String,
    on_message: Option<ConnectionHook>,
    on_close: Option<ConnectionHook>,
) -> io::Result<Arc<Connection>> {
    let fd = socket::new_tcp_socket()?;
    socket::connect(fd, addr)?;
    Connection::new(event_loop, id, name, fd, ConnectionState::Connecting, on_message, on_close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn listener_accepts_and_connector_completes() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ev = EventLoop::new(Config::new()).unwrap();

        let accepted = Arc::new(AtomicUsize::new(0));
        let accepted_cb = accepted.clone();
        let listener = TcpListener::bind(
            &mut ev,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            16,
            Arc::new(AtomicU64::new(0)),
            Box::new(move |_loop_, _conn| {
                accepted_cb.fetch_add(1, Ordering::SeqCst);
            }),
            None,
            None,
        )
        .unwrap();

        let addr = listener.local_addr().unwrap();
        let client = connect(
            &mut ev,
            SocketAddrV4::new(*addr.ip(), addr.port()),
            100,
            "client".into(),
            None,
            None,
        )
        .unwrap();

        for _ in 0..50 {
            ev.run_once().unwrap();
            if accepted.load(Ordering::SeqCst) == 1 && client.state() == ConnectionState::Connected {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }
}
