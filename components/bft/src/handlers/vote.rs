//! Handler of prevotes and precommits.
use super::{Rejection, Severity};
use crate::CommitteeData;
use fastfinality_concurrency::{ctx, error::Wrap};
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{
    committee::{CommitteeMessage, CommitteeMessageType, CommitteePhase},
    harvester::{InvalidSignatureError, PublicKey},
    packet::Packet,
};

/// Errors that can occur when processing a vote.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The packet does not hold exactly one vote.
    #[error("invalid packet (declared size {declared}, payload {payload})")]
    InvalidPacket {
        /// Declared packet size.
        declared: u32,
        /// Size of the payload.
        payload: usize,
    },
    /// The phase accepting votes of this type has not started yet.
    #[error("{message_type:?} before its phase, in phase {phase}")]
    Early {
        /// Type of the vote.
        message_type: CommitteeMessageType,
        /// Current phase.
        phase: CommitteePhase,
    },
    /// Votes of this type are not accepted in the current phase.
    #[error("{message_type:?} in phase {phase}")]
    WrongPhase {
        /// Type of the vote.
        message_type: CommitteeMessageType,
        /// Current phase.
        phase: CommitteePhase,
    },
    /// The payload is not a valid vote.
    #[error("malformed vote: {0:#}")]
    Malformed(anyhow::Error),
    /// The packet type doesn't match the type of the vote.
    #[error("{got:?} vote in a {want:?} packet")]
    MismatchedType {
        /// Type of the vote.
        got: CommitteeMessageType,
        /// Type expected from the packet.
        want: CommitteeMessageType,
    },
    /// The signer is not a member of the round's committee.
    #[error("{signer:?} is not a committee member")]
    NotCommitteeMember {
        /// Signer of the vote.
        signer: PublicKey,
    },
    /// The signer has already voted. The stored vote is kept.
    #[error("duplicate vote of {signer:?} (conflicting: {conflicting})")]
    DuplicateVote {
        /// Signer of the vote.
        signer: PublicKey,
        /// Whether the new vote is for another block than the stored one.
        conflicting: bool,
    },
    /// The vote is not for the proposed block.
    #[error("vote for {got}, proposed block is {want}")]
    UnexpectedBlockHash {
        /// Hash of the voted block.
        got: Hash256,
        /// Hash of the proposed block, zero if there is none.
        want: Hash256,
    },
    /// The signature over the vote body is invalid.
    #[error("invalid message signature: {0:#}")]
    InvalidMessageSignature(InvalidSignatureError),
    /// The embedded block cosignature is invalid.
    #[error("invalid block cosignature: {0:#}")]
    InvalidCosignature(InvalidSignatureError),
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
            Self::DuplicateVote {
                conflicting: false, ..
            }
            | Self::UnexpectedBlockHash { .. } => Severity::Debug,
            _ => Severity::Warn,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::InvalidPacket { .. } => "invalid_packet",
            Self::Early { .. } => "early",
            Self::WrongPhase { .. } => "wrong_phase",
            Self::Malformed(_) => "malformed",
            Self::MismatchedType { .. } => "mismatched_type",
            Self::NotCommitteeMember { .. } => "not_committee_member",
            Self::DuplicateVote { .. } => "duplicate_vote",
            Self::UnexpectedBlockHash { .. } => "unexpected_block_hash",
            Self::InvalidMessageSignature(_) => "invalid_message_signature",
            Self::InvalidCosignature(_) => "invalid_cosignature",
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

/// Phase in which votes of the given type are accepted.
pub fn accepting_phase(message_type: CommitteeMessageType) -> CommitteePhase {
    match message_type {
        CommitteeMessageType::Prevote => CommitteePhase::Prevote,
        CommitteeMessageType::Precommit => CommitteePhase::Precommit,
    }
}

/// Admits a vote for the proposed block. Only the first vote of a signer is stored;
/// a later conflicting one is reported as equivocation.
pub fn handle(data: &CommitteeData, packet: &Packet, message_type: CommitteeMessageType) -> Result<(), Error> {
    if !packet.is_size_consistent() || packet.payload.len() != CommitteeMessage::SIZE {
        return Err(Error::InvalidPacket {
            declared: packet.header.size,
            payload: packet.payload.len(),
        });
    }
    let phase = data.stage().phase;
    let accepting = accepting_phase(message_type);
    if phase != accepting {
        if phase != CommitteePhase::None && phase < accepting {
            return Err(Error::Early { message_type, phase });
        }
        return Err(Error::WrongPhase { message_type, phase });
    }
    let message = CommitteeMessage::decode(&packet.payload).map_err(Error::Malformed)?;
    if message.message_type != message_type {
        return Err(Error::MismatchedType {
            got: message.message_type,
            want: message_type,
        });
    }
    let signer = message.block_cosignature.signer;
    if let Some(committee) = data.committee() {
        if !committee.is_member(&signer) {
            return Err(Error::NotCommitteeMember { signer });
        }
    }
    if let Some(stored) = data.vote(&signer, message_type) {
        return Err(Error::DuplicateVote {
            signer,
            conflicting: stored.block_hash != message.block_hash,
        });
    }
    let Some(proposed) = data.proposed_block() else {
        return Err(Error::UnexpectedBlockHash {
            got: message.block_hash,
            want: Hash256::ZERO,
        });
    };
    let want = proposed.hash();
    if message.block_hash != want {
        return Err(Error::UnexpectedBlockHash {
            got: message.block_hash,
            want,
        });
    }
    message
        .verify_message_signature()
        .map_err(Error::InvalidMessageSignature)?;
    proposed
        .verify_cosignature(&message.block_cosignature)
        .map_err(Error::InvalidCosignature)?;
    if !data.add_vote(message) {
        return Err(Error::DuplicateVote {
            signer,
            conflicting: false,
        });
    }
    Ok(())
}
