//! Programmatic configuration for [`crate::EventLoop::new`].

/// Tunables for an [`EventLoop`](crate::EventLoop).
///
/// Mirrors the shape of a classic reactor `Config` builder: everything has
/// a sane default, and callers override only what they need.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Initial number of slots in the channel table. Rounded up to a power
    /// of two no smaller than 16.
    pub channel_table_capacity: usize,
    /// Timer-heap tick granularity, in milliseconds. The Unix backends clamp
    /// their poll timeout to at most this value whenever a timer is pending,
    /// so a fired timer is never observed later than one tick after its
    /// deadline.
    pub timer_tick_ms: u64,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn channel_table_capacity(mut self, capacity: usize) -> Config {
        self.channel_table_capacity = capacity;
        self
    }

    pub fn timer_tick_ms(mut self, tick_ms: u64) -> Config {
        self.timer_tick_ms = tick_ms;
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            channel_table_capacity: 16,
            timer_tick_ms: 10,
        }
    }
}
