//! Platform-specific plumbing: non-blocking socket setup, the self-wakeup
//! pipe, and the three polling backends (epoll, kqueue, select).

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;
