//! The weighted voting state machine.
//!
//! Every round runs through the phases Propose, Prevote, Precommit and Commit, anchored to
//! the round start: the proposal is awaited until `round_start + pt`, prevotes until
//! `+2pt` and precommits until `+3pt` (`pt` being the phase time of the round). Reaching
//! the approval share of the committee weight ends a voting phase early. A round either
//! commits a block (and the next height starts) or ends without one (and the next round
//! at the same height starts).
//!
//! The machine is driven by an explicit transition table over [`State`] and [`Event`]:
//! every state runs one action, which yields the event selecting the next state.
use crate::{
    handlers::Dispatcher, metrics, ChainStore, CommitteeData, CommitteeManager, Config, NetworkConfig,
    PayloadManager, Peers,
};
use anyhow::Context as _;
use fastfinality_concurrency::ctx;
use fastfinality_roles::{
    chain::TransactionRegistry,
    committee::{CommitteePhase, CommitteeStage},
    harvester::{PublicKey, SecretKey},
    packet::Packet,
};
use fastfinality_storage::ViewSequenceCache;
use std::{fmt, sync::Arc};

mod actions;
mod detect;
mod round;
mod validation;

pub use detect::{find_most_frequent_value, peer_number_sufficient};
pub use round::{AdjustingRoundChangePolicy, RoundChangePolicy};

/// State of the state machine: the action it runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Determine the stage from the peers, or start after genesis.
    DetectStage,
    /// Select the committee of the round.
    SelectCommittee,
    /// Build, sign and broadcast a block.
    ProposeBlock,
    /// Wait for the proposal until the end of the propose phase.
    WaitForProposal,
    /// Check the proposal.
    ValidateProposal,
    /// Enter the prevote phase and broadcast the own prevote.
    BroadcastPrevote,
    /// Wait for sufficient prevotes until the end of the prevote phase.
    WaitForPrevotes,
    /// Enter the precommit phase and broadcast the own precommit.
    BroadcastPrecommit,
    /// Wait for sufficient precommits until the end of the precommit phase.
    WaitForPrecommits,
    /// Append the confirmed block to the chain.
    CommitConfirmedBlock,
    /// Enter the commit phase and wait for a confirmed block until the round ends.
    WaitForRoundEnd,
    /// Start the next round at the same height.
    IncrementRound,
    /// Start the first round of the next height.
    ResetRound,
}

/// Outcome of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A stage was detected.
    StageDetectionSucceeded,
    /// No stage could be detected.
    StageDetectionFailed,
    /// The committee of the round was selected.
    CommitteeSelected {
        /// Whether this node proposes the block.
        is_block_proposer: bool,
        /// Phase the round is in.
        phase: CommitteePhase,
    },
    /// The own block was proposed.
    BlockProposingSucceeded,
    /// The own block could not be proposed.
    BlockProposingFailed,
    /// A proposal was received.
    ProposalReceived,
    /// No proposal was received in time.
    ProposalNotReceived,
    /// Different proposals were received in the round.
    MultipleProposal,
    /// The proposal passed validation.
    ProposalValid,
    /// The proposal failed validation.
    ProposalInvalid,
    /// The own vote was broadcast.
    VotesBroadcast,
    /// Prevotes reached the approval share.
    SumOfPrevotesSufficient,
    /// Prevotes did not reach the approval share in time.
    SumOfPrevotesInsufficient,
    /// Precommits reached the approval share.
    SumOfPrecommitsSufficient,
    /// Precommits did not reach the approval share in time.
    SumOfPrecommitsInsufficient,
    /// The block was committed.
    CommitBlockSucceeded,
    /// The block could not be committed.
    CommitBlockFailed,
    /// A valid confirmed block was received.
    ConfirmedBlockReceived,
    /// The round ended without a confirmed block.
    RoundEnded,
    /// The next round was set up.
    RoundChanged,
}

/// Transition table. Returns `None` for events which cannot occur in `state`.
pub fn transition(state: State, event: Event) -> Option<State> {
    use Event as E;
    use State as S;
    Some(match (state, event) {
        (S::DetectStage, E::StageDetectionSucceeded) => S::SelectCommittee,
        (S::DetectStage, E::StageDetectionFailed) => S::DetectStage,

        (
            S::SelectCommittee,
            E::CommitteeSelected {
                is_block_proposer,
                phase: CommitteePhase::Propose,
            },
        ) => {
            if is_block_proposer {
                S::ProposeBlock
            } else {
                S::WaitForProposal
            }
        }
        (S::SelectCommittee, E::CommitteeSelected { .. }) => S::WaitForRoundEnd,

        (S::ProposeBlock, E::BlockProposingSucceeded) => S::WaitForProposal,
        (S::ProposeBlock, E::BlockProposingFailed) => S::WaitForRoundEnd,

        (S::WaitForProposal, E::ProposalReceived) => S::ValidateProposal,
        (S::WaitForProposal, E::ProposalNotReceived | E::MultipleProposal) => S::WaitForRoundEnd,

        (S::ValidateProposal, E::ProposalValid) => S::BroadcastPrevote,
        (S::ValidateProposal, E::ProposalInvalid) => S::WaitForRoundEnd,

        (S::BroadcastPrevote, E::VotesBroadcast) => S::WaitForPrevotes,
        (S::WaitForPrevotes, E::SumOfPrevotesSufficient) => S::BroadcastPrecommit,
        (S::WaitForPrevotes, E::SumOfPrevotesInsufficient) => S::WaitForRoundEnd,

        (S::BroadcastPrecommit, E::VotesBroadcast) => S::WaitForPrecommits,
        (S::WaitForPrecommits, E::SumOfPrecommitsSufficient) => S::CommitConfirmedBlock,
        (S::WaitForPrecommits, E::SumOfPrecommitsInsufficient) => S::WaitForRoundEnd,

        (S::CommitConfirmedBlock, E::CommitBlockSucceeded) => S::ResetRound,
        (S::CommitConfirmedBlock, E::CommitBlockFailed) => S::DetectStage,

        (S::WaitForRoundEnd, E::ConfirmedBlockReceived) => S::CommitConfirmedBlock,
        (S::WaitForRoundEnd, E::RoundEnded) => S::IncrementRound,

        (S::IncrementRound | S::ResetRound, E::RoundChanged) => S::SelectCommittee,
        _ => return None,
    })
}

/// The weighted voting state machine of a single committee member.
pub struct WeightedVotingFsm {
    key: SecretKey,
    beneficiary: PublicKey,
    network: NetworkConfig,
    registry: Arc<TransactionRegistry>,
    payload_manager: Box<dyn PayloadManager>,
    chain: Arc<dyn ChainStore>,
    committee_manager: Box<dyn CommitteeManager>,
    round_change_policy: Box<dyn RoundChangePolicy>,
    view_sequences: Option<Arc<ViewSequenceCache>>,
    peers: Arc<dyn Peers>,
    data: Arc<CommitteeData>,
    proposal_checks: Vec<validation::ProposalCheck>,
}

impl fmt::Debug for WeightedVotingFsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedVotingFsm")
            .field("key", &self.key.public())
            .field("network", &self.network)
            .field("stage", &self.data.stage())
            .finish_non_exhaustive()
    }
}

impl WeightedVotingFsm {
    /// Builds the state machine. Packets are exchanged with `peers`.
    pub fn new(config: Config, peers: Arc<dyn Peers>) -> anyhow::Result<Self> {
        config.network.validate().context("network")?;
        Ok(Self {
            key: config.secret_key,
            beneficiary: config.beneficiary,
            network: config.network,
            registry: config.registry,
            payload_manager: config.payload_manager,
            chain: config.chain,
            committee_manager: config.committee_manager,
            round_change_policy: config.round_change_policy,
            view_sequences: config.view_sequences,
            peers,
            data: Arc::new(CommitteeData::new()),
            proposal_checks: validation::proposal_checks(),
        })
    }

    /// Key of this member.
    pub fn public_key(&self) -> PublicKey {
        self.key.public()
    }

    /// The voting state shared with the handlers.
    pub fn data(&self) -> &Arc<CommitteeData> {
        &self.data
    }

    /// Dispatcher feeding inbound packets into the voting state.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.data.clone(),
            self.registry.clone(),
            self.chain.clone(),
            self.view_sequences.clone(),
        )
    }

    /// Runs the state machine and feeds the packets received from `inbound` to the
    /// handlers, until `ctx` is canceled.
    pub async fn run(
        &self,
        ctx: &ctx::Ctx,
        inbound: &mut ctx::channel::UnboundedReceiver<Packet>,
    ) -> anyhow::Result<()> {
        let dispatcher = self.dispatcher();
        let res = tokio::select! {
            res = self.run_state_machine(ctx) => res,
            res = dispatcher.run(ctx, inbound) => res,
        };
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }

    /// Runs the state machine alone, until the context is canceled.
    pub async fn run_state_machine(&self, ctx: &ctx::Ctx) -> ctx::Result<()> {
        let mut state = State::DetectStage;
        loop {
            let event = self.step(ctx, state).await?;
            let next = transition(state, event)
                .with_context(|| format!("no transition from {state:?} on {event:?}"))?;
            tracing::trace!("{state:?} --{event:?}--> {next:?}");
            state = next;
        }
    }

    async fn step(&self, ctx: &ctx::Ctx, state: State) -> ctx::Result<Event> {
        match state {
            State::DetectStage => self.detect_stage(ctx).await,
            State::SelectCommittee => self.select_committee(),
            State::ProposeBlock => self.propose_block(ctx).await,
            State::WaitForProposal => self.wait_for_proposal(ctx).await,
            State::ValidateProposal => self.validate_proposal(ctx).await,
            State::BroadcastPrevote => Ok(self.broadcast_prevote()),
            State::WaitForPrevotes => self.wait_for_prevotes(ctx).await,
            State::BroadcastPrecommit => Ok(self.broadcast_precommit()),
            State::WaitForPrecommits => self.wait_for_precommits(ctx).await,
            State::CommitConfirmedBlock => self.commit_confirmed_block(ctx).await,
            State::WaitForRoundEnd => self.wait_for_round_end(ctx).await,
            State::IncrementRound => Ok(self.increment_round()),
            State::ResetRound => Ok(self.reset_round()),
        }
    }

    /// Sets the stage and publishes it.
    fn set_stage(&self, stage: CommitteeStage) {
        self.data.set_committee_stage(stage);
        observe_stage(&stage);
    }

    /// Clears the round state and starts `stage`.
    fn reset(&self, stage: CommitteeStage) {
        self.data.reset(stage);
        observe_stage(&stage);
    }
}

fn observe_stage(stage: &CommitteeStage) {
    metrics::METRICS.height.set(stage.height.0);
    metrics::METRICS.round.set(u64::from(stage.round));
    metrics::METRICS.set_phase(stage.phase);
    metrics::METRICS
        .phase_time
        .set(std::time::Duration::from_millis(stage.phase_time_millis));
}
