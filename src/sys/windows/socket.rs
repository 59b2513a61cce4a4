//! Non-blocking socket setup on Windows via raw winsock2 calls.

use std::io;
use std::net::SocketAddrV4;
use std::sync::Once;

use windows_sys::Win32::Networking::WinSock;

use crate::address::Address;

pub type RawSocket = usize;

const INVALID_SOCKET: RawSocket = WinSock::INVALID_SOCKET as RawSocket;

static WSA_INIT: Once = Once::new();

/// Ensures `WSAStartup` has been called exactly once for this process.
pub fn ensure_wsa_started() {
    WSA_INIT.call_once(|| unsafe {
        let mut data: WinSock::WSADATA = std::mem::zeroed();
        let _ = WinSock::WSAStartup(0x0202, &mut data);
    });
}

fn last_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WinSock::WSAGetLastError() })
}

pub fn new_tcp_socket() -> io::Result<RawSocket> {
    ensure_wsa_started();
    let sock = unsafe { WinSock::socket(WinSock::AF_INET as i32, WinSock::SOCK_STREAM as i32, 0) };
    if sock as RawSocket == INVALID_SOCKET {
        return Err(last_error());
    }
    let sock = sock as RawSocket;
    set_nonblocking(sock, true)?;
    Ok(sock)
}

pub fn set_nonblocking(fd: RawSocket, on: bool) -> io::Result<()> {
    let mut mode: u32 = on as u32;
    let rc = unsafe { WinSock::ioctlsocket(fd as WinSock::SOCKET, WinSock::FIONBIO as i32, &mut mode) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn set_keepalive(fd: RawSocket, on: bool) -> io::Result<()> {
    setsockopt_bool(fd, WinSock::SOL_SOCKET as i32, WinSock::SO_KEEPALIVE as i32, on)
}

pub fn set_linger(fd: RawSocket, on: bool, timeout_secs: u16) -> io::Result<()> {
    let linger = WinSock::LINGER {
        l_onoff: on as u16,
        l_linger: timeout_secs,
    };
    let rc = unsafe {
        WinSock::setsockopt(
            fd as WinSock::SOCKET,
            WinSock::SOL_SOCKET as i32,
            WinSock::SO_LINGER as i32,
            &linger as *const _ as *const u8,
            std::mem::size_of::<WinSock::LINGER>() as i32,
        )
    };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

fn setsockopt_bool(fd: RawSocket, level: i32, name: i32, on: bool) -> io::Result<()> {
    let val: i32 = on as i32;
    let rc = unsafe {
        WinSock::setsockopt(
            fd as WinSock::SOCKET,
            level,
            name,
            &val as *const _ as *const u8,
            std::mem::size_of::<i32>() as i32,
        )
    };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

fn sockaddr_in(addr: SocketAddrV4) -> WinSock::SOCKADDR_IN {
    WinSock::SOCKADDR_IN {
        sin_family: WinSock::AF_INET as u16,
        sin_port: addr.port().to_be(),
        sin_addr: WinSock::IN_ADDR {
            S_un: WinSock::IN_ADDR_0 {
                S_addr: u32::from_ne_bytes(addr.ip().octets()),
            },
        },
        sin_zero: [0; 8],
    }
}

fn from_sockaddr_in(raw: &WinSock::SOCKADDR_IN) -> Address {
    let octets = unsafe { raw.sin_addr.S_un.S_addr.to_ne_bytes() };
    Address::new(octets.into(), u16::from_be(raw.sin_port))
}

pub fn connect(fd: RawSocket, addr: SocketAddrV4) -> io::Result<()> {
    let sa = sockaddr_in(addr);
    let rc = unsafe {
        WinSock::connect(
            fd as WinSock::SOCKET,
            &sa as *const _ as *const WinSock::SOCKADDR,
            std::mem::size_of::<WinSock::SOCKADDR_IN>() as i32,
        )
    };
    if rc != 0 {
        let err = last_error();
        if err.raw_os_error() == Some(WinSock::WSAEWOULDBLOCK) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

pub fn listen(addr: SocketAddrV4, backlog: i32) -> io::Result<RawSocket> {
    let fd = new_tcp_socket()?;
    let sa = sockaddr_in(addr);
    let rc = unsafe {
        WinSock::bind(
            fd as WinSock::SOCKET,
            &sa as *const _ as *const WinSock::SOCKADDR,
            std::mem::size_of::<WinSock::SOCKADDR_IN>() as i32,
        )
    };
    if rc != 0 {
        return Err(last_error());
    }
    if unsafe { WinSock::listen(fd as WinSock::SOCKET, backlog) } != 0 {
        return Err(last_error());
    }
    Ok(fd)
}

pub fn accept(fd: RawSocket) -> io::Result<RawSocket> {
    let accepted = unsafe { WinSock::accept(fd as WinSock::SOCKET, std::ptr::null_mut(), std::ptr::null_mut()) };
    if accepted as RawSocket == INVALID_SOCKET {
        return Err(last_error());
    }
    let accepted = accepted as RawSocket;
    set_nonblocking(accepted, true)?;
    Ok(accepted)
}

pub fn getsockname(fd: RawSocket) -> io::Result<Address> {
    let mut raw: WinSock::SOCKADDR_IN = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<WinSock::SOCKADDR_IN>() as i32;
    let rc = unsafe { WinSock::getsockname(fd as WinSock::SOCKET, &mut raw as *mut _ as *mut WinSock::SOCKADDR, &mut len) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(from_sockaddr_in(&raw))
}

pub fn getpeername(fd: RawSocket) -> io::Result<Address> {
    let mut raw: WinSock::SOCKADDR_IN = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<WinSock::SOCKADDR_IN>() as i32;
    let rc = unsafe { WinSock::getpeername(fd as WinSock::SOCKET, &mut raw as *mut _ as *mut WinSock::SOCKADDR, &mut len) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(from_sockaddr_in(&raw))
}

pub fn shutdown(fd: RawSocket) {
    unsafe {
        WinSock::shutdown(fd as WinSock::SOCKET, WinSock::SD_BOTH as i32);
    }
}

pub fn close(fd: RawSocket) {
    unsafe {
        WinSock::closesocket(fd as WinSock::SOCKET);
    }
}

pub fn write(fd: RawSocket, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { WinSock::send(fd as WinSock::SOCKET, buf.as_ptr(), buf.len() as i32, 0) };
    if n < 0 {
        return Err(last_error());
    }
    Ok(n as usize)
}

pub fn is_fatal_write_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(WinSock::WSAESHUTDOWN) | Some(WinSock::WSAENETRESET) | Some(WinSock::WSAECONNRESET)
    )
}

/// `WSASend`/`WSARecv`-based vectored I/O would require overlapped
/// bookkeeping; the select backend drives readiness only, so plain scalar
/// `recv`/`send` loops over the ring buffer's two segments are sufficient
/// and match the non-blocking, readiness-driven contract used elsewhere.
pub fn readv(fd: RawSocket, bufs: &mut [std::io::IoSliceMut<'_>]) -> io::Result<usize> {
    let mut total = 0usize;
    for buf in bufs.iter_mut() {
        if buf.is_empty() {
            continue;
        }
        let n = unsafe { WinSock::recv(fd as WinSock::SOCKET, buf.as_mut_ptr(), buf.len() as i32, 0) };
        if n < 0 {
            let err = last_error();
            if total > 0 {
                break;
            }
            return Err(err);
        }
        total += n as usize;
        if (n as usize) < buf.len() {
            break;
        }
    }
    Ok(total)
}

pub fn writev(fd: RawSocket, bufs: &[std::io::IoSlice<'_>]) -> io::Result<usize> {
    let mut total = 0usize;
    for buf in bufs.iter() {
        if buf.is_empty() {
            continue;
        }
        let n = unsafe { WinSock::send(fd as WinSock::SOCKET, buf.as_ptr(), buf.len() as i32, 0) };
        if n < 0 {
            let err = last_error();
            if total > 0 {
                break;
            }
            return Err(err);
        }
        total += n as usize;
        if (n as usize) < buf.len() {
            break;
        }
    }
    Ok(total)
}
