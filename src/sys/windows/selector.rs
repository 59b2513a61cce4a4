//! The only Windows backend: `select()` over winsock `fd_set`s. No
//! IOCP/AFD backend is implemented — out of scope for this crate.

use std::io;
use std::time::Duration;

use windows_sys::Win32::Networking::WinSock;

use crate::channel_table::{EventId, Interest};

use super::socket::RawSocket;

#[derive(Clone, Copy, Debug)]
pub struct ReadyEvent {
    pub id: EventId,
    pub readable: bool,
    pub writable: bool,
}

pub type Events = Vec<ReadyEvent>;

pub trait Selector: Sized {
    fn new() -> io::Result<Self>;
    fn select(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()>;
    fn register(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()>;
    fn reregister(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()>;
    fn deregister(&mut self, fd: RawSocket) -> io::Result<()>;
}

struct Entry {
    fd: RawSocket,
    id: EventId,
    interest: Interest,
}

pub struct PlatformSelector {
    active: Vec<Entry>,
}

fn empty_fd_set() -> WinSock::FD_SET {
    WinSock::FD_SET {
        fd_count: 0,
        fd_array: [0; 64],
    }
}

fn fd_set_add(set: &mut WinSock::FD_SET, fd: RawSocket) {
    let i = set.fd_count as usize;
    if i < set.fd_array.len() {
        set.fd_array[i] = fd as WinSock::SOCKET;
        set.fd_count += 1;
    }
}

fn fd_set_contains(set: &WinSock::FD_SET, fd: RawSocket) -> bool {
    set.fd_array[..set.fd_count as usize].contains(&(fd as WinSock::SOCKET))
}

impl Selector for PlatformSelector {
    fn new() -> io::Result<PlatformSelector> {
        super::socket::ensure_wsa_started();
        Ok(PlatformSelector { active: Vec::new() })
    }

    fn select(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let mut read_set = empty_fd_set();
        let mut write_set = empty_fd_set();
        for entry in &self.active {
            if entry.interest.is_readable() {
                fd_set_add(&mut read_set, entry.fd);
            }
            if entry.interest.is_writable() {
                fd_set_add(&mut write_set, entry.fd);
            }
        }

        let mut tv = timeout.map(|d| WinSock::TIMEVAL {
            tv_sec: d.as_secs() as i32,
            tv_usec: d.subsec_micros() as i32,
        });
        let tv_ptr = tv.as_mut().map_or(std::ptr::null(), |t| t as *const _);

        let rc = unsafe {
            WinSock::select(
                0, // ignored on Windows
                &mut read_set,
                &mut write_set,
                std::ptr::null_mut(),
                tv_ptr,
            )
        };
        if rc == WinSock::SOCKET_ERROR {
            return Err(io::Error::from_raw_os_error(unsafe { WinSock::WSAGetLastError() }));
        }

        events.clear();
        if rc == 0 {
            return Ok(());
        }
        for entry in &self.active {
            let readable = entry.interest.is_readable() && fd_set_contains(&read_set, entry.fd);
            let writable = entry.interest.is_writable() && fd_set_contains(&write_set, entry.fd);
            if readable || writable {
                events.push(ReadyEvent { id: entry.id, readable, writable });
            }
        }
        Ok(())
    }

    fn register(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        self.active.push(Entry { fd, id, interest });
        Ok(())
    }

    fn reregister(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        if let Some(entry) = self.active.iter_mut().find(|e| e.fd == fd) {
            entry.id = id;
            entry.interest = interest;
        }
        Ok(())
    }

    fn deregister(&mut self, fd: RawSocket) -> io::Result<()> {
        self.active.retain(|e| e.fd != fd);
        Ok(())
    }
}
