//! Handler of the blocks pushed by the block proposer.
use super::{Rejection, Severity};
use crate::CommitteeData;
use fastfinality_concurrency::{ctx, error::Wrap};
use fastfinality_roles::{
    chain::{Block, Height, TransactionRegistry},
    committee::CommitteePhase,
    packet::Packet,
};
use std::sync::Arc;

/// Errors that can occur when processing a proposed block.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Proposals are accepted in the propose phase only.
    #[error("unexpected phase {phase}")]
    WrongPhase {
        /// Current phase.
        phase: CommitteePhase,
    },
    /// The declared packet size does not match the block.
    #[error("inconsistent packet size (declared {declared}, actual payload {payload})")]
    InvalidPacketSize {
        /// Declared packet size.
        declared: u32,
        /// Size of the payload.
        payload: usize,
    },
    /// The payload is not a valid block.
    #[error("malformed block: {0:#}")]
    Malformed(anyhow::Error),
    /// The block is not for the height being decided.
    #[error("unexpected block height {got:?}, want {want:?}")]
    UnexpectedHeight {
        /// Height of the block.
        got: Height,
        /// Height being decided.
        want: Height,
    },
    /// A proposal was already accepted in this round.
    #[error("block already proposed (conflicting: {conflicting})")]
    AlreadyProposed {
        /// Whether the new block differs from the accepted one.
        conflicting: bool,
    },
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for Error {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self {
        match self {
            Error::Internal(err) => Error::Internal(err.with_wrap(f)),
            err => err,
        }
    }
}

impl Rejection for Error {
    fn severity(&self) -> Severity {
        match self {
            Self::WrongPhase { .. } => Severity::Trace,
            Self::AlreadyProposed { conflicting: false } | Self::UnexpectedHeight { .. } => Severity::Debug,
            _ => Severity::Warn,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::WrongPhase { .. } => "wrong_phase",
            Self::InvalidPacketSize { .. } => "invalid_packet_size",
            Self::Malformed(_) => "malformed",
            Self::UnexpectedHeight { .. } => "unexpected_height",
            Self::AlreadyProposed { .. } => "already_proposed",
            Self::Internal(_) => "internal",
        }
    }

    fn into_internal(self) -> Result<ctx::Error, Self> {
        match self {
            Self::Internal(err) => Ok(err),
            err => Err(err),
        }
    }
}

/// Admits a block proposed for the current round. The first proposal wins: later ones
/// are rejected, and a different one raises the multiple proposal flag.
pub fn handle(data: &CommitteeData, registry: &TransactionRegistry, packet: &Packet) -> Result<(), Error> {
    let stage = data.stage();
    if stage.phase != CommitteePhase::Propose {
        return Err(Error::WrongPhase { phase: stage.phase });
    }
    if !packet.is_size_consistent() {
        return Err(Error::InvalidPacketSize {
            declared: packet.header.size,
            payload: packet.payload.len(),
        });
    }
    let block = Block::decode(&packet.payload, registry).map_err(Error::Malformed)?;
    if block.height() != stage.height {
        data.set_unexpected_proposed_block_height();
        return Err(Error::UnexpectedHeight {
            got: block.height(),
            want: stage.height,
        });
    }
    let block = Arc::new(block);
    if let Err(proposed) = data.try_set_proposed_block(block.clone()) {
        let conflicting = proposed.hash() != block.hash();
        if conflicting {
            data.set_proposal_multiple();
        }
        return Err(Error::AlreadyProposed { conflicting });
    }
    Ok(())
}
