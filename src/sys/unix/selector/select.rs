//! `select(2)`-based backend, used on Unix targets without a native
//! epoll or kqueue (everything except Linux/BSD/macOS). Maintains its own
//! list of registered channels since, unlike epoll/kqueue, `select` carries
//! no per-fd user data the kernel hands back.

use std::io;
use std::time::Duration;

use crate::channel_table::{EventId, Interest};
use crate::sys::socket::RawSocket;

use super::{Events, ReadyEvent, Selector};

struct Entry {
    fd: RawSocket,
    id: EventId,
    interest: Interest,
}

pub struct Select {
    active: Vec<Entry>,
}

fn fdset_zero(set: &mut libc::fd_set) {
    let bytes = unsafe {
        std::slice::from_raw_parts_mut(set as *mut _ as *mut u8, std::mem::size_of::<libc::fd_set>())
    };
    bytes.fill(0);
}

fn fdset_set(set: &mut libc::fd_set, fd: RawSocket) {
    let bytes = unsafe {
        std::slice::from_raw_parts_mut(set as *mut _ as *mut u8, std::mem::size_of::<libc::fd_set>())
    };
    let fd = fd as usize;
    bytes[fd / 8] |= 1 << (fd % 8);
}

fn fdset_is_set(set: &libc::fd_set, fd: RawSocket) -> bool {
    let bytes = unsafe {
        std::slice::from_raw_parts(set as *const _ as *const u8, std::mem::size_of::<libc::fd_set>())
    };
    let fd = fd as usize;
    bytes[fd / 8] & (1 << (fd % 8)) != 0
}

impl Selector for Select {
    fn new() -> io::Result<Select> {
        Ok(Select { active: Vec::new() })
    }

    fn select(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };
        fdset_zero(&mut read_set);
        fdset_zero(&mut write_set);

        let mut max_fd = 0;
        for entry in &self.active {
            if entry.interest.is_readable() {
                fdset_set(&mut read_set, entry.fd);
            }
            if entry.interest.is_writable() {
                fdset_set(&mut write_set, entry.fd);
            }
            max_fd = max_fd.max(entry.fd);
        }

        let mut tv = timeout.map(|d| libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        });
        let tv_ptr = tv.as_mut().map_or(std::ptr::null_mut(), |t| t as *mut _);

        let rc = syscall!(select(
            max_fd + 1,
            &mut read_set,
            &mut write_set,
            std::ptr::null_mut(),
            tv_ptr,
        ))?;

        events.clear();
        if rc == 0 {
            return Ok(());
        }
        for entry in &self.active {
            let readable = entry.interest.is_readable() && fdset_is_set(&read_set, entry.fd);
            let writable = entry.interest.is_writable() && fdset_is_set(&write_set, entry.fd);
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
