//! Self-wakeup / work-submission pipe. Grounded in a plain Unix `pipe2`.

use std::io::{self, Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};

use super::socket::{set_close_on_exec, set_nonblocking};

/// Two non-blocking, close-on-exec endpoints of an OS pipe.
pub struct Pipe {
    reader: std::fs::File,
    writer: std::fs::File,
}

impl Pipe {
    pub fn new() -> io::Result<Pipe> {
        let mut fds: [RawFd; 2] = [0; 2];
        let made_with_flags = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if made_with_flags == -1 {
            // `pipe2` is unavailable on a handful of older Unixes; fall back
            // to `pipe()` and set the flags by hand.
            let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                log::error!("failed to construct inner pipe: {}", err);
                return Err(err);
            }
            set_nonblocking(fds[0], true)?;
            set_nonblocking(fds[1], true)?;
            set_close_on_exec(fds[0], true)?;
            set_close_on_exec(fds[1], true)?;
        }

        let reader = unsafe { std::fs::File::from_raw_fd(fds[0]) };
        let writer = unsafe { std::fs::File::from_raw_fd(fds[1]) };
        Ok(Pipe { reader, writer })
    }

    pub fn read_fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.reader.as_raw_fd()
    }

    pub fn write_fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.writer.as_raw_fd()
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    /// Drains everything currently buffered on the read end.
    pub fn drain(&mut self) {
        let mut scratch = [0u8; 4096];
        loop {
            match self.reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip_matches_scenario() {
        let mut pipe = Pipe::new().unwrap();

        let mut scratch = [0u8; 1024];
        let err = pipe.read(&mut scratch).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let n = pipe.write(b"Hello,World!").unwrap();
        assert_eq!(n, 12);

        let got = pipe.read(&mut scratch).unwrap();
        assert_eq!(got, 12);
        assert_eq!(&scratch[..12], b"Hello,World!");

        let err = pipe.read(&mut scratch).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
