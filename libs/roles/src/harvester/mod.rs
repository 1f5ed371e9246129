//! Harvester role: a process which produces blocks and votes on them as a committee member.
//! Every harvester is identified by its ed25519 public key, which also serves as its
//! process id in the reconfiguration protocol.

mod keys;
mod testonly;

pub use keys::*;
