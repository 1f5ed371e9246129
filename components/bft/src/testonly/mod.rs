//! This module contains utilities that are only meant for testing purposes.
mod chain;
mod network;
mod payload;
#[cfg(test)]
pub(crate) mod ut_harness;

pub use chain::*;
pub use network::*;
pub use payload::*;
