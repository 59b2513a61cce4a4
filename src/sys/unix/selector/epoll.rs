use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{EPOLLIN, EPOLLOUT, EPOLLRDHUP};

use crate::channel_table::{EventId, Interest};
use crate::sys::socket::RawSocket;

use super::{Events, ReadyEvent, Selector};

/// Level-triggered epoll backend.
///
/// Deliberately level-triggered rather than edge-triggered (`EPOLLET`):
/// the dispatch loop re-reads each channel's interest from the table every
/// iteration, and level-triggering keeps that re-read symmetric with the
/// select backend instead of requiring edge-triggered bookkeeping.
pub struct Epoll {
    epfd: RawFd,
    raw_events: Vec<libc::epoll_event>,
}

impl Epoll {
    fn interest_to_epoll(interest: Interest) -> u32 {
        let mut bits = 0i32;
        if interest.is_readable() {
            bits |= EPOLLIN | EPOLLRDHUP;
        }
        if interest.is_writable() {
            bits |= EPOLLOUT;
        }
        bits as u32
    }
}

impl Selector for Epoll {
    fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let raw_events = (0..1024).map(|_| unsafe { std::mem::zeroed() }).collect();
        Ok(Epoll { epfd, raw_events })
    }

    fn select(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = syscall!(epoll_wait(
            self.epfd,
            self.raw_events.as_mut_ptr(),
            self.raw_events.len() as i32,
            timeout_ms,
        ))?;

        events.clear();
        for raw in &self.raw_events[..n as usize] {
            let id = EventId::from_u64(raw.u64);
            let flags = raw.events as i32;
            events.push(ReadyEvent {
                id,
                readable: flags & (EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) != 0,
                writable: flags & (EPOLLOUT | libc::EPOLLHUP | libc::EPOLLERR) != 0,
            });
        }
        Ok(())
    }

    fn register(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: Self::interest_to_epoll(interest),
            u64: id.to_u64(),
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev)).map(|_| ())
    }

    fn reregister(&mut self, fd: RawSocket, id: EventId, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: Self::interest_to_epoll(interest),
            u64: id.to_u64(),
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut ev)).map(|_| ())
    }

    fn deregister(&mut self, fd: RawSocket) -> io::Result<()> {
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())).map(|_| ())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
