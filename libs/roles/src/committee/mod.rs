//! The weighted committee and the messages its members exchange while voting.

mod members;
mod message;
mod ratio;
mod stage;
pub mod testonly;

pub use members::*;
pub use message::*;
pub use ratio::*;
pub use stage::*;
