pub mod socket;
pub mod pipe;
pub mod selector;

pub use pipe::Pipe;
pub use selector::{Events, PlatformSelector, ReadyEvent, Selector};
