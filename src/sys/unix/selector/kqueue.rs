use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::channel_table::{EventId, Interest};
use crate::sys::socket::RawSocket;

use super::{Events, ReadyEvent, Selector};

macro_rules! kevent {
    ($id: expr, $filter: expr, $flags: expr, $udata: expr) => {
        libc::kevent {
            ident: $id as libc::uintptr_t,
            filter: $filter,
            flags: $flags,
            fflags: 0,
            data: 0,
            udata: $udata as *mut libc::c_void,
        }
    };
}

pub struct Kqueue {
    kq: RawFd,
    raw_events: Vec<libc::kevent>,
}

impl Selector for Kqueue {
    fn new() -> io::Result<Kqueue> {
        let kq = syscall!(kqueue())?;
        syscall!(fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC))?;
        let raw_events = (0..1024).map(|_| unsafe { std::mem::zeroed() }).collect();
        Ok(Kqueue { kq, raw_events })
    }

    fn select(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map_or(std::ptr::null(), |t| t as *const _);

        let n = syscall!(kevent(
            self.kq,
            std::ptr::null(),
            0,
            self.raw_events.as_mut_ptr(),
            self.raw_events.len() as i32,
            ts_ptr,
        ))?;

        events.clear();
        for ev in &self.raw_events[..n as usize] {
            let id = EventId::from_u64(ev.udata as u64);
            let err = ev.flags & libc::EV_ERROR != 0;
            match ev.filter {
                libc::EVFILT_READ => events.push(ReadyEvent { id, readable: true, writable: err }),
                libc::EVFILT_WRITE => events.push(ReadyEvent { id, readable: err, writable: true }),
                _ => {}
            }
        }
        Ok(())
    }

    fn register(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        self.apply(fd, id, interest)
    }

    fn reregister(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        self.apply(fd, id, interest)
    }

    fn deregister(&mut self, fd: RawSocket) -> io::Result<()> {
        let udata = 0u64;
        let changes = [
            kevent!(fd, libc::EVFILT_READ, libc::EV_DELETE, udata),
            kevent!(fd, libc::EVFILT_WRITE, libc::EV_DELETE, udata),
        ];
        self.apply_changes(&changes, true)
    }
}

impl Kqueue {
    fn apply(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        let udata = id.to_u64();
        let read_flags = if interest.is_readable() {
            libc::EV_ADD | libc::EV_ENABLE
        } else {
            libc::EV_ADD | libc::EV_DISABLE
        };
        let write_flags = if interest.is_writable() {
            libc::EV_ADD | libc::EV_ENABLE
        } else {
            libc::EV_ADD | libc::EV_DISABLE
        };
        let changes = [
            kevent!(fd, libc::EVFILT_READ, read_flags, udata),
            kevent!(fd, libc::EVFILT_WRITE, write_flags, udata),
        ];
        self.apply_changes(&changes, false)
    }

    /// Applies a changelist with no output events requested. When
    /// `ignore_enoent` is set (used by `deregister`, which may race a
    /// socket that already closed), `ENOENT` on a change is swallowed.
    fn apply_changes(&self, changes: &[libc::kevent], ignore_enoent: bool) -> io::Result<()> {
        let res = syscall!(kevent(
            self.kq,
            changes.as_ptr(),
            changes.len() as i32,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        ));
        match res {
            Ok(_) => Ok(()),
            Err(e) if ignore_enoent && e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
