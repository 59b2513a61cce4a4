//! A TCP echo server built on `TcpListener` + `Connection`: everything a
//! client sends is written straight back to it.
//!
//! Run with `cargo run --example echo_server -- 127.0.0.1:7070`.

use std::env;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use reactor::{Config, Connection, EventLoop, TcpListener};

fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7070".into());
    let addr: SocketAddrV4 = addr.parse().unwrap_or(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7070));

    let mut event_loop = EventLoop::new(Config::new())?;

    let on_message: reactor::ConnectionHook = Arc::new(|conn: &Arc<Connection>| {
        let mut buf = [0u8; 4096];
        loop {
            let n = conn.read(&mut buf);
            if n == 0 {
                break;
            }
            log::info!("{}: echoing {} bytes", conn.name(), n);
            conn.send(None, &buf[..n]);
        }
    });

    let on_close: reactor::ConnectionHook = Arc::new(|conn: &Arc<Connection>| {
        log::info!("{}: closed", conn.name());
    });

    let listener = TcpListener::bind(
        &mut event_loop,
        addr,
        128,
        Arc::new(AtomicU64::new(1)),
        Box::new(|_loop_, conn| {
            log::info!("{}: accepted from {}", conn.name(), conn.peer_addr());
        }),
        Some(on_message),
        Some(on_close),
    )?;

    log::info!("echoing on {}", listener.local_addr()?);
    event_loop.run()
}
