//! Types shared by the fast finality node.
//!
//! - `harvester`: keys of the processes taking part in block production and voting.
//! - `chain`: blocks, transactions and the chain position types (`Height`, `Timestamp`).
//! - `committee`: the weighted committee, its voting stages and vote messages.
//! - `packet`: framing of the packets exchanged between committee members.
//! - `dbrb`: views and view sequences of the reconfiguration protocol.
//! - `modification`: validation of batched membership changes.

pub mod chain;
pub mod codec;
pub mod committee;
pub mod dbrb;
pub mod harvester;
pub mod modification;
pub mod packet;
