//! A dedicated OS thread owning its own [`EventLoop`], [`Pipe`] and
//! [`MpscQueue`] of [`Packet`]s — the classic producer/consumer shape for
//! getting work onto a loop thread from anywhere else in the process.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Config;
use crate::event_loop::{EventLoop, Interest};
use crate::queue::{MpscQueue, Packet};
use crate::sys::Pipe;

/// Invoked once per popped packet, on the work thread.
pub type PacketHook = Box<dyn Fn(Packet) + Send>;

struct Shared {
    queue: MpscQueue<Packet>,
    write_fd: crate::sys::socket::RawSocket,
}

/// Pushes packets onto a running [`WorkThread`]'s queue from any thread.
#[derive(Clone)]
pub struct WorkSender {
    shared: Arc<Shared>,
}

impl WorkSender {
    /// Pushes one packet, then signals its arrival by writing the packet
    /// count as a little-endian `i32` to the work thread's pipe. This
    /// ordering — enqueue, then signal — is load-bearing: the work thread's
    /// drain loop trusts that once it observes the count, the packets are
    /// already visible in the queue.
    pub fn send_message(&self, packet: Packet) {
        self.send_messages(std::iter::once(packet));
    }

    /// Pushes a batch, then signals the batch size once.
    pub fn send_messages(&self, packets: impl IntoIterator<Item = Packet>) {
        let mut count: i32 = 0;
        for p in packets {
            self.shared.queue.push(p);
            count += 1;
        }
        if count == 0 {
            return;
        }
        let _ = crate::sys::socket::write(self.shared.write_fd, &count.to_le_bytes());
    }
}

/// Owns an `EventLoop` + `Pipe` + MPSC packet queue, run on a dedicated OS
/// thread started by [`WorkThread::start`].
pub struct WorkThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WorkThread {
    /// Spawns the OS thread: builds the loop, registers the pipe's read end,
    /// runs `on_start` (if any), then calls `EventLoop::run`.
    pub fn start(
        name: impl Into<String>,
        config: Config,
        on_message: PacketHook,
        on_start: Option<Box<dyn FnOnce(&mut EventLoop) + Send>>,
    ) -> io::Result<WorkThread> {
        let pipe = Pipe::new()?;
        let write_fd = pipe.write_fd();
        let shared = Arc::new(Shared { queue: MpscQueue::new(), write_fd });
        let thread_shared = shared.clone();

        let handle = std::thread::Builder::new().name(name.into()).spawn(move || {
            let mut event_loop = match EventLoop::new(config) {
                Ok(l) => l,
                Err(e) => {
                    log::error!("work thread failed to construct its event loop: {}", e);
                    return;
                }
            };

            let mut pipe = pipe;
            let read_fd = pipe.read_fd();
            let reader = move |_: &mut EventLoop| {
                let mut count_buf = [0u8; 4];
                loop {
                    match pipe.read(&mut count_buf) {
                        Ok(4) => {
                            let count = i32::from_le_bytes(count_buf).max(0) as usize;
                            for _ in 0..count {
                                if let Some(packet) = thread_shared.queue.pop() {
                                    on_message(packet);
                                }
                            }
                        }
                        Ok(_) => break,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            };

            if let Err(e) = event_loop.register_io(read_fd, Interest::READABLE, Some(Box::new(reader)), None) {
                log::error!("work thread failed to register its pipe: {}", e);
                return;
            }

            if let Some(hook) = on_start {
                hook(&mut event_loop);
            }

            if let Err(e) = event_loop.run() {
                log::error!("work thread event loop exited with error: {}", e);
            }
        })?;

        Ok(WorkThread { shared, handle: Some(handle) })
    }

    /// A cloneable handle other threads use to enqueue packets.
    pub fn sender(&self) -> WorkSender {
        WorkSender { shared: self.shared.clone() }
    }

    /// Waits for the OS thread to exit.
    pub fn join(&mut self) -> std::thread::Result<()> {
        match self.handle.take() {
            Some(h) => h.join(),
            None => Ok(()),
        }
    }
}

impl Drop for WorkThread {
    fn drop(&mut self) {
        let _ = self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn send_message_is_delivered_in_order() {
        let _ = env_logger::builder().is_test(true).try_init();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_cb = received.clone();
        let stop_flag = Arc::new(AtomicUsize::new(0));
        let stop_cb = stop_flag.clone();

        let mut wt = WorkThread::start(
            "test-work",
            Config::new(),
            Box::new(move |packet: Packet| {
                received_cb.lock().unwrap().push(packet.id);
            }),
            Some(Box::new(move |event_loop| {
                let loop_sender = event_loop.channel();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(50));
                    loop_sender.send(move |l| l.push_stop_request());
                });
                stop_cb.store(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        let sender = wt.sender();
        for i in 0..5 {
            sender.send_message(Packet::new(i, Vec::new()));
        }

        wt.join().unwrap();
        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
