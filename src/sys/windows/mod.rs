pub mod pipe;
pub mod selector;
pub mod socket;

pub use pipe::Pipe;
pub use selector::{Events, PlatformSelector, ReadyEvent, Selector};
