//! A full-duplex, non-blocking TCP connection built on a loop-registered fd,
//! a read buffer, and a mutex-guarded write buffer.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel_table::{EventId, INVALID_EVENT_ID};
use crate::debug::{DebugSink, NoopDebugSink};
use crate::event_loop::{EventLoop, Interest, Sender};
use crate::ringbuf::RingBuf;
use crate::sys::socket::{self, RawSocket};
use crate::Address;

/// The connection's lifecycle. No transition leaves `Disconnected`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnectionState {
    /// fd is mid-`connect()`; loop watches `Write` for completion.
    Connecting,
    /// Normal data flow.
    Connected,
    /// `shutdown()` was requested; draining remaining writes before close.
    Disconnecting,
    /// Socket closed, event deleted, buffers reset. Terminal.
    Disconnected,
}

impl ConnectionState {
    fn from_u8(v: u8) -> ConnectionState {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Disconnecting => 2,
            ConnectionState::Disconnected => 3,
        }
    }
}

/// Callback invoked with a full message having just arrived, or the
/// connection having just closed. `Arc`, not `Box`, so one hook can be
/// shared across every connection a listener accepts.
pub type ConnectionHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// A full-duplex TCP connection: fd, read/write buffers, addresses, and an
/// atomic state machine, registered with exactly one [`EventLoop`].
///
/// Handed out as `Arc<Connection>` so `on_message`/`on_close` callbacks (and
/// cloned handles held by other threads for [`Connection::send`]) can
/// outlive a single dispatch. `on_close` is the well-defined release point.
pub struct Connection {
    id: u64,
    name: String,
    fd: RawSocket,
    local: Address,
    peer: Address,
    // Packed `EventId`; set once, right after registration, by `new`, and
    // read thereafter. An atomic rather than a plain field only because
    // `Connection` is `Arc`-shared before that one write happens.
    event_id: AtomicU64,
    read_buffer: Mutex<RingBuf>,
    write_buffer: Mutex<RingBuf>,
    state: AtomicU8,
    max_sendbuf_len: AtomicUsize,
    debug_sink: Arc<dyn DebugSink>,
    on_message: Option<ConnectionHook>,
    on_close: Option<ConnectionHook>,
    // Lets `send` arm Write from off the owner thread by posting a task
    // rather than touching the loop's interest bits directly.
    sender: Sender,
}

impl Connection {
    /// Registers `fd` with `event_loop` and wires up read/write dispatch.
    /// Write interest is armed only while `write_buffer` is non-empty: `send`
    /// arms it when a write queues data, and the write handler disarms it
    /// once the buffer drains. `Connecting` is the one exception — Write is
    /// armed from the start there, to observe connect completion.
    pub fn new(
        event_loop: &mut EventLoop,
        id: u64,
        name: String,
        fd: RawSocket,
        initial_state: ConnectionState,
        on_message: Option<ConnectionHook>,
        on_close: Option<ConnectionHook>,
    ) -> std::io::Result<Arc<Connection>> {
        let local = Address::local(fd).unwrap_or(Address::new(std::net::Ipv4Addr::UNSPECIFIED, 0));
        let peer = Address::peer(fd).unwrap_or(Address::new(std::net::Ipv4Addr::UNSPECIFIED, 0));

        let conn = Arc::new(Connection {
            id,
            name,
            fd,
            local,
            peer,
            event_id: AtomicU64::new(INVALID_EVENT_ID.to_u64()),
            read_buffer: Mutex::new(RingBuf::new()),
            write_buffer: Mutex::new(RingBuf::new()),
            state: AtomicU8::new(initial_state.to_u8()),
            max_sendbuf_len: AtomicUsize::new(0),
            debug_sink: Arc::new(NoopDebugSink),
            on_message,
            on_close,
            sender: event_loop.channel(),
        });

        let read_conn = conn.clone();
        let write_conn = conn.clone();
        let interest = match initial_state {
            ConnectionState::Connecting => Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        let event_id = event_loop.register_io(
            fd,
            interest,
            Some(Box::new(move |loop_: &mut EventLoop| read_conn.on_readable(loop_))),
            Some(Box::new(move |loop_: &mut EventLoop| write_conn.on_writable(loop_))),
        )?;
        conn.event_id.store(event_id.to_u64(), Ordering::Release);

        Ok(conn)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Address {
        self.local
    }

    pub fn peer_addr(&self) -> Address {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    fn event_id(&self) -> EventId {
        EventId::from_u64(self.event_id.load(Ordering::Acquire))
    }

    pub fn max_sendbuf_len(&self) -> usize {
        self.max_sendbuf_len.load(Ordering::Relaxed)
    }

    /// Thread-safe. Appends `buf` to the write buffer; on the loop thread,
    /// attempts a direct `write()` first when nothing was already queued.
    /// Whenever the buffer goes from empty to non-empty, arms Write: directly
    /// via `event_loop` when called on the owner thread, otherwise by posting
    /// a task through `self.sender` (see `EventLoop::channel`).
    pub fn send(&self, event_loop: Option<&mut EventLoop>, buf: &[u8]) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        let mut wbuf = self.write_buffer.lock().unwrap();
        let was_empty = wbuf.empty();
        if was_empty {
            if let Some(loop_) = event_loop {
                match socket::write(self.fd, buf) {
                    Ok(n) if n == buf.len() => {
                        self.track_high_water(wbuf.size());
                        return;
                    }
                    Ok(n) => {
                        wbuf.write_bytes(&buf[n..]);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        wbuf.write_bytes(buf);
                    }
                    Err(e) => {
                        if socket::is_fatal_write_error(&e) {
                            drop(wbuf);
                            self.close(loop_);
                            return;
                        }
                        wbuf.write_bytes(buf);
                    }
                }
                self.track_high_water(wbuf.size());
                drop(wbuf);
                loop_.enable_write(self.event_id());
                return;
            }
        }
        wbuf.write_bytes(buf);
        self.track_high_water(wbuf.size());
        let now_nonempty = !wbuf.empty();
        drop(wbuf);
        if was_empty && now_nonempty {
            self.arm_write();
        }
    }

    fn arm_write(&self) {
        let id = self.event_id();
        self.sender.send(move |loop_| loop_.enable_write(id));
    }

    fn track_high_water(&self, size: usize) {
        self.max_sendbuf_len.fetch_max(size, Ordering::Relaxed);
    }

    /// Owner thread only. Transitions `Connected -> Disconnecting`; closes
    /// immediately if there is nothing left to drain.
    pub fn shutdown(self: &Arc<Connection>, event_loop: &mut EventLoop) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.set_state(ConnectionState::Disconnecting);
        let empty = self.write_buffer.lock().unwrap().empty();
        if empty {
            self.close(event_loop);
        }
    }

    fn on_readable(self: &Arc<Connection>, event_loop: &mut EventLoop) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        let mut rbuf = self.read_buffer.lock().unwrap();
        match rbuf.read_from_socket(self.fd, true) {
            Ok(0) => {
                drop(rbuf);
                self.close(event_loop);
            }
            Ok(_) => {
                drop(rbuf);
                if let Some(cb) = &self.on_message {
                    cb(self);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {
                drop(rbuf);
                self.close(event_loop);
            }
        }
    }

    fn on_writable(self: &Arc<Connection>, event_loop: &mut EventLoop) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        let mut wbuf = self.write_buffer.lock().unwrap();
        if wbuf.empty() {
            drop(wbuf);
            if self.state() == ConnectionState::Connecting {
                self.set_state(ConnectionState::Connected);
                event_loop.enable_read(self.event_id());
            }
            // Nothing queued: this was either the connect-completion
            // notification above or a stale wakeup racing an on-thread
            // drain. Either way Write has no reason to stay armed.
            event_loop.disable_write(self.event_id());
            return;
        }
        match wbuf.write_to_socket(self.fd) {
            Ok(_) => {
                let empty = wbuf.empty();
                drop(wbuf);
                if empty {
                    event_loop.disable_write(self.event_id());
                    if self.state() == ConnectionState::Disconnecting {
                        self.close(event_loop);
                    }
                }
            }
            Err(e) => {
                drop(wbuf);
                if socket::is_fatal_write_error(&e) {
                    self.close(event_loop);
                }
            }
        }
    }

    /// Disables all interest, removes the channel, calls `on_close`, resets
    /// buffers, closes the fd, and transitions to `Disconnected`. Idempotent:
    /// a connection already `Disconnected` ignores further calls.
    fn close(self: &Arc<Connection>, event_loop: &mut EventLoop) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        event_loop.delete_event(self.event_id());
        socket::close(self.fd);
        self.read_buffer.lock().unwrap().reset();
        self.write_buffer.lock().unwrap().reset();
        self.set_state(ConnectionState::Disconnected);
        if self.debug_sink.is_enabled() {
            self.del_debug_value();
        }
        if let Some(cb) = &self.on_close {
            cb(self);
        }
    }

    /// Reads up to `dst.len()` bytes of already-arrived data out of this
    /// connection's read buffer. Typically called from inside `on_message`.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        self.read_buffer.lock().unwrap().read_bytes(dst)
    }

    /// Bytes currently sitting in the read buffer, not yet drained by `read`.
    pub fn read_buffer_len(&self) -> usize {
        self.read_buffer.lock().unwrap().size()
    }

    /// Publishes `readbuf_capacity`, `writebuf_capacity` and
    /// `max_sendbuf_len` to `sink`, namespaced by this connection's name.
    pub fn debug(&self, sink: &dyn DebugSink) {
        if !sink.is_enabled() {
            return;
        }
        let rcap = self.read_buffer.lock().unwrap().capacity() as i64;
        let wcap = self.write_buffer.lock().unwrap().capacity() as i64;
        sink.update_debug_value(&format!("{}.readbuf_capacity", self.name), rcap);
        sink.update_debug_value(&format!("{}.writebuf_capacity", self.name), wcap);
        sink.update_debug_value(&format!("{}.max_sendbuf_len", self.name), self.max_sendbuf_len() as i64);
    }

    fn del_debug_value(&self) {
        self.debug_sink.del_debug_value(&format!("{}.readbuf_capacity", self.name));
        self.debug_sink.del_debug_value(&format!("{}.writebuf_capacity", self.name));
        self.debug_sink.del_debug_value(&format!("{}.max_sendbuf_len", self.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn pair() -> (RawSocket, RawSocket) {
        let listener = socket::listen(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 1).unwrap();
        let addr = socket::getsockname(listener).unwrap();
        let client = socket::new_tcp_socket().unwrap();
        let _ = socket::connect(client, SocketAddrV4::new(Ipv4Addr::LOCALHOST, addr.port()));
        let server = loop {
            match socket::accept(listener) {
                Ok(fd) => break fd,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("accept failed: {}", e),
            }
        };
        socket::close(listener);
        (server, client)
    }

    #[test]
    fn drain_on_shutdown_delivers_everything_then_closes_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (server_fd, client_fd) = pair();

        let mut ev = EventLoop::new(Config::new()).unwrap();

        let closed = Arc::new(AtomicUsize::new(0));
        let closed_cb = closed.clone();
        let server = Connection::new(
            &mut ev,
            1,
            "server".into(),
            server_fd,
            ConnectionState::Connected,
            None,
            Some(Arc::new(move |_: &Arc<Connection>| {
                closed_cb.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received_cb = received.clone();
        let client = Connection::new(
            &mut ev,
            2,
            "client".into(),
            client_fd,
            ConnectionState::Connected,
            Some(Arc::new(move |c: &Arc<Connection>| {
                let mut scratch = [0u8; 65536];
                let n = c.read(&mut scratch);
                received_cb.fetch_add(n, Ordering::SeqCst);
            })),
            None,
        )
        .unwrap();

        let payload = vec![7u8; 64 * 1024];
        server.send(None, &payload);
        server.shutdown(&mut ev);
        assert_eq!(server.state(), ConnectionState::Disconnecting);

        for _ in 0..50 {
            ev.run_once().unwrap();
            if server.state() == ConnectionState::Disconnected
                && received.load(Ordering::SeqCst) == payload.len()
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(server.state(), ConnectionState::Disconnected);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(received.load(Ordering::SeqCst), payload.len());
        assert_eq!(client.read_buffer_len(), 0);
    }
}
