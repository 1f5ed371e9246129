use crate::chain::{Height, Timestamp};
use std::fmt;

/// Phase of a voting round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CommitteePhase {
    /// No round in progress. No proposal is accepted.
    #[default]
    None = 0,
    /// The block proposer broadcasts its block.
    Propose = 1,
    /// Members broadcast prevotes for the proposal.
    Prevote = 2,
    /// Members broadcast precommits for the proposal.
    Precommit = 3,
    /// The block is committed, or a confirmed block is awaited.
    Commit = 4,
}

impl CommitteePhase {
    /// Name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Propose => "propose",
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for CommitteePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the committee in the protocol: height, round and phase, together with
/// the timing of the round. Assigned as a whole; handlers gate admission on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitteeStage {
    /// Height being decided.
    pub height: Height,
    /// Round within the height, starting at zero.
    pub round: u32,
    /// Current phase.
    pub phase: CommitteePhase,
    /// Start of the round.
    pub round_start: Timestamp,
    /// Duration of a single phase, in milliseconds.
    pub phase_time_millis: u64,
}

impl CommitteeStage {
    /// Number of phase times in a round.
    pub const PHASES_PER_ROUND: u64 = 3;

    /// Time at which the current phase ends.
    pub fn phase_deadline(&self) -> Timestamp {
        let phases = match self.phase {
            CommitteePhase::None => 0,
            CommitteePhase::Propose => 1,
            CommitteePhase::Prevote => 2,
            CommitteePhase::Precommit | CommitteePhase::Commit => Self::PHASES_PER_ROUND,
        };
        self.round_start
            .add_millis(phases.saturating_mul(self.phase_time_millis))
    }

    /// Time at which the round ends.
    pub fn round_end(&self) -> Timestamp {
        self.round_start
            .add_millis(Self::PHASES_PER_ROUND.saturating_mul(self.phase_time_millis))
    }

    /// The same stage in another phase.
    pub fn with_phase(self, phase: CommitteePhase) -> Self {
        Self { phase, ..self }
    }
}

impl fmt::Display for CommitteeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "height {} round {} phase {} (started {}, phase time {}ms)",
            self.height, self.round, self.phase, self.round_start, self.phase_time_millis
        )
    }
}
