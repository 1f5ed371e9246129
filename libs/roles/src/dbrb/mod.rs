//! Views and view sequences of the DBRB (Distributed Byzantine Reliable Broadcast)
//! reconfiguration protocol.
//!
//! A [`View`] is a set of membership changes. Views are partially ordered by strict
//! inclusion: a more recent view contains every change of a less recent one. A [`Sequence`]
//! is a chain of views in strictly ascending order, and an install message carries the
//! sequence the processes converged on to replace a view.

mod install;
mod sequence;
pub mod testonly;
mod view;

pub use install::*;
pub use sequence::*;
pub use view::*;
