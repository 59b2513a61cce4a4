//! A reactor-based, non-blocking TCP networking library.
//!
//! Three subsystems make up the hard core:
//!
//! - [`event_loop`] — a per-thread readiness-based reactor with pluggable
//!   epoll / kqueue / select backends.
//! - [`ringbuf`] — a power-of-two circular byte buffer with vectored socket
//!   I/O, peek/discard/normalize and an Adler-32 checksum.
//! - [`connection`] — a full-duplex TCP connection state machine built on
//!   the two pieces above.
//!
//! A thin ambient layer sits around that core: [`address`] for socket
//! addresses, [`pipe`] for the self-wakeup channel shared by the loop and
//! work threads, [`queue`] + [`work_thread`] for cross-thread message
//! passing, and [`tcp_client`] for driving a listener/connector pair.

#[macro_use]
mod macros;

pub mod adler32;
pub mod address;
pub mod channel_table;
pub mod config;
pub mod connection;
pub mod debug;
pub mod event_loop;
pub mod queue;
pub mod ringbuf;
pub mod sys;
pub mod tcp_client;
pub mod work_thread;

pub use address::Address;
pub use channel_table::EventId;
pub use config::Config;
pub use connection::{Connection, ConnectionHook, ConnectionState};
pub use debug::{DebugSink, NoopDebugSink};
pub use event_loop::{EventLoop, Interest, Sender};
pub use queue::Packet;
pub use ringbuf::RingBuf;
pub use tcp_client::{connect, AcceptHook, TcpListener};
pub use work_thread::{PacketHook, WorkSender, WorkThread};
