//! The narrow backend interface shared by epoll, kqueue and select: `select`,
//! `register`, `reregister`, `deregister`. Exactly one concrete `Selector`
//! type is compiled in per target, chosen below by `cfg`.

use std::io;
use std::time::Duration;

use crate::channel_table::{EventId, Interest};
use crate::sys::socket::RawSocket;

/// One readiness notification produced by a backend's `select` call.
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

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub use epoll::Epoll as PlatformSelector;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
pub use kqueue::Kqueue as PlatformSelector;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
mod select;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
pub use select::Select as PlatformSelector;
