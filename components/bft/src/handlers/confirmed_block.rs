//! Handler of the blocks cosigned by the committee and broadcast by the committing node.
use super::{Rejection, Severity};
use crate::CommitteeData;
use fastfinality_concurrency::{ctx, error::Wrap};
use fastfinality_roles::{
    chain::{Block, Height, TransactionRegistry},
    committee::CommitteePhase,
    harvester::InvalidSignatureError,
    packet::Packet,
};
use std::sync::Arc;

/// Errors that can occur when processing a confirmed block.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The round has not reached the commit phase yet.
    #[error("confirmed block before the commit phase, in phase {phase}")]
    Early {
        /// Current phase.
        phase: CommitteePhase,
    },
    /// Confirmed blocks are accepted in the commit phase only.
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
    /// The proposer's signature is invalid.
    #[error("invalid block signature: {0:#}")]
    InvalidSignature(InvalidSignatureError),
    /// A confirmed block was already accepted in this round.
    #[error("block already confirmed")]
    AlreadyConfirmed,
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
            Self::Early { .. } | Self::WrongPhase { .. } => Severity::Trace,
            Self::AlreadyConfirmed | Self::UnexpectedHeight { .. } => Severity::Debug,
            _ => Severity::Warn,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Early { .. } => "early",
            Self::WrongPhase { .. } => "wrong_phase",
            Self::InvalidPacketSize { .. } => "invalid_packet_size",
            Self::Malformed(_) => "malformed",
            Self::UnexpectedHeight { .. } => "unexpected_height",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::AlreadyConfirmed => "already_confirmed",
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

/// Admits a confirmed block while waiting for the end of the round. The first block with
/// a valid proposer signature wins. Its cosignatures are checked by the state machine.
pub fn handle(data: &CommitteeData, registry: &TransactionRegistry, packet: &Packet) -> Result<(), Error> {
    let stage = data.stage();
    match stage.phase {
        CommitteePhase::Commit => {}
        CommitteePhase::None => return Err(Error::WrongPhase { phase: stage.phase }),
        phase => return Err(Error::Early { phase }),
    }
    if !packet.is_size_consistent() {
        return Err(Error::InvalidPacketSize {
            declared: packet.header.size,
            payload: packet.payload.len(),
        });
    }
    let block = Block::decode(&packet.payload, registry).map_err(Error::Malformed)?;
    if block.height() != stage.height {
        data.set_unexpected_confirmed_block_height();
        return Err(Error::UnexpectedHeight {
            got: block.height(),
            want: stage.height,
        });
    }
    if data.confirmed_block().is_some() {
        return Err(Error::AlreadyConfirmed);
    }
    block.verify_signature().map_err(Error::InvalidSignature)?;
    data.try_set_confirmed_block(Arc::new(block))
        .map_err(|_| Error::AlreadyConfirmed)
}
