//! Concurrency primitives used by the fast finality node.
//!
//! Every blocking call in the consensus code is made through a [`ctx::Ctx`], so that
//! phase deadlines and node shutdown are handled uniformly.

pub mod ctx;
pub mod error;
pub mod signal;
pub mod sync;
pub mod testonly;
pub mod time;
