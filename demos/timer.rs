//! Registers a periodic timer and a stop timer on the same loop, showing
//! the timer heap firing independently of any socket readiness.
//!
//! Run with `cargo run --example timer`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use reactor::{Config, EventLoop};

fn main() -> std::io::Result<()> {
    env_logger::init();

    let mut event_loop = EventLoop::new(Config::new())?;

    let ticks = Arc::new(AtomicU32::new(0));
    let ticks_cb = ticks.clone();
    event_loop.register_timer(
        200,
        Box::new(move |_loop_| {
            let n = ticks_cb.fetch_add(1, Ordering::SeqCst) + 1;
            log::info!("tick {}", n);
        }),
    );

    event_loop.register_timer(
        1100,
        Box::new(|loop_| {
            log::info!("stopping");
            loop_.push_stop_request();
        }),
    );

    event_loop.run()
}
