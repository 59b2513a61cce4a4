//! Non-blocking socket setup and vectored I/O against raw fds.

use std::io::{self, IoSlice, IoSliceMut};
use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;

use crate::address::Address;

pub type RawSocket = RawFd;

/// Creates a non-blocking, close-on-exec TCP socket.
pub fn new_tcp_socket() -> io::Result<RawSocket> {
    let fd = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM, 0))?;
    set_nonblocking(fd, true)?;
    set_close_on_exec(fd, true)?;
    Ok(fd)
}

pub fn set_nonblocking(fd: RawSocket, on: bool) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    let flags = if on { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
    syscall!(fcntl(fd, libc::F_SETFL, flags)).map(|_| ())
}

pub fn set_close_on_exec(fd: RawSocket, on: bool) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFD))?;
    let flags = if on { flags | libc::FD_CLOEXEC } else { flags & !libc::FD_CLOEXEC };
    syscall!(fcntl(fd, libc::F_SETFD, flags)).map(|_| ())
}

pub fn set_keepalive(fd: RawSocket, on: bool) -> io::Result<()> {
    let val: libc::c_int = on.into();
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_KEEPALIVE,
        &val as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub fn set_linger(fd: RawSocket, on: bool, timeout_secs: i32) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: on as libc::c_int,
        l_linger: timeout_secs,
    };
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_LINGER,
        &linger as *const _ as *const libc::c_void,
        mem::size_of::<libc::linger>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub fn set_reuseaddr(fd: RawSocket, on: bool) -> io::Result<()> {
    let val: libc::c_int = on.into();
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &val as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

fn sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn from_sockaddr_in(raw: &libc::sockaddr_in) -> Address {
    let octets = raw.sin_addr.s_addr.to_ne_bytes();
    Address::new(octets.into(), u16::from_be(raw.sin_port))
}

/// Starts a non-blocking `connect()`. `WouldBlock`/`EINPROGRESS` is the
/// expected outcome and is surfaced as `Ok(())`, matching `Connecting`
/// semantics: the caller watches `Write` for completion.
pub fn connect(fd: RawSocket, addr: SocketAddrV4) -> io::Result<()> {
    let sa = sockaddr_in(addr);
    let res = syscall!(connect(
        fd,
        &sa as *const _ as *const libc::sockaddr,
        mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
    ));
    match res {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn listen(addr: SocketAddrV4, backlog: i32) -> io::Result<RawSocket> {
    let fd = new_tcp_socket()?;
    set_reuseaddr(fd, true)?;
    let sa = sockaddr_in(addr);
    syscall!(bind(
        fd,
        &sa as *const _ as *const libc::sockaddr,
        mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
    ))?;
    syscall!(listen(fd, backlog))?;
    Ok(fd)
}

pub fn accept(fd: RawSocket) -> io::Result<RawSocket> {
    let accepted = syscall!(accept(fd, std::ptr::null_mut(), std::ptr::null_mut()))?;
    set_nonblocking(accepted, true)?;
    set_close_on_exec(accepted, true)?;
    Ok(accepted)
}

pub fn getsockname(fd: RawSocket) -> io::Result<Address> {
    let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    syscall!(getsockname(fd, &mut raw as *mut _ as *mut libc::sockaddr, &mut len))?;
    Ok(from_sockaddr_in(&raw))
}

pub fn getpeername(fd: RawSocket) -> io::Result<Address> {
    let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    syscall!(getpeername(fd, &mut raw as *mut _ as *mut libc::sockaddr, &mut len))?;
    Ok(from_sockaddr_in(&raw))
}

pub fn shutdown(fd: RawSocket) {
    let _ = syscall!(shutdown(fd, libc::SHUT_RDWR));
}

pub fn close(fd: RawSocket) {
    let _ = syscall!(close(fd));
}

pub fn write(fd: RawSocket, buf: &[u8]) -> io::Result<usize> {
    syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len())).map(|n| n as usize)
}

/// Reports whether a fatal write error (peer reset, broken pipe) occurred,
/// the trigger for `Connection`'s direct-write fault path.
pub fn is_fatal_write_error(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET))
}

/// Vectored read against the two free segments of a ring buffer.
///
/// `std::io::IoSliceMut` has the same layout as `libc::iovec` on Unix, so
/// the slice can be passed straight to `readv` without copying.
pub fn readv(fd: RawSocket, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
    let n = syscall!(readv(fd, bufs.as_ptr() as *const libc::iovec, bufs.len() as libc::c_int))?;
    Ok(n as usize)
}

pub fn writev(fd: RawSocket, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
    let n = syscall!(writev(fd, bufs.as_ptr() as *const libc::iovec, bufs.len() as libc::c_int))?;
    Ok(n as usize)
}
