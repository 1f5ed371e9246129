//! Actions run in the states of the [`WeightedVotingFsm`].
use super::{detect, validation, Event, WeightedVotingFsm};
use crate::{handlers::vote::accepting_phase, metrics, CommitteeData};
use fastfinality_concurrency::{ctx, error::Wrap as _, time};
use fastfinality_roles::{
    chain::{Block, BlockHeader, Height, Timestamp, BLOCK_VERSION},
    committee::{CommitteeMessage, CommitteeMessageType, CommitteePhase, CommitteeStage},
    packet::{Packet, PacketType},
};
use std::sync::Arc;

impl WeightedVotingFsm {
    /// Current network time.
    fn now(&self, ctx: &ctx::Ctx) -> Timestamp {
        Timestamp::from_utc(ctx.now_utc())
    }

    /// Context canceled at the network time `t`, or together with `ctx`.
    fn until(ctx: &ctx::Ctx, t: Timestamp) -> ctx::Ctx {
        ctx.with_deadline(ctx.instant_at(t.to_utc()).into())
    }

    /// Waits until `pred` holds or the network time `t` passes.
    /// Returns whether `pred` holds.
    async fn wait_until(
        &self,
        ctx: &ctx::Ctx,
        t: Timestamp,
        pred: impl Fn(&CommitteeData) -> bool,
    ) -> ctx::Result<bool> {
        match self.data.wait_until(&Self::until(ctx, t), &pred).await {
            Ok(()) => Ok(true),
            Err(ctx::Canceled) if ctx.is_active() => Ok(pred(&self.data)),
            Err(err) => Err(err.into()),
        }
    }

    fn broadcast(&self, packet_type: PacketType, deadline: Timestamp, payload: anyhow::Result<Vec<u8>>) {
        match payload.and_then(|payload| Packet::new(packet_type, deadline, payload)) {
            Ok(packet) => self.peers.broadcast(packet),
            Err(err) => tracing::warn!("failed to broadcast {packet_type}: {err:#}"),
        }
    }

    pub(super) async fn detect_stage(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        let stage = self.data.stage();
        self.set_stage(stage.with_phase(CommitteePhase::None));
        let head = self.chain.head().height();
        let stages = self.peers.remote_stages(ctx).await.wrap("remote_stages()")?;
        let now = self.now(ctx);
        let stage = match detect::detect_stage(&stages, head, now, &self.network) {
            Some(stage) => stage,
            None if head <= Height::GENESIS => {
                detect::genesis_stage(head, now, &self.network)
            }
            None => {
                tracing::debug!("failed to detect the committee stage from {} peers", stages.len());
                ctx.sleep(time::Duration::milliseconds(
                    i64::try_from(self.network.committee_phase_time_millis).unwrap_or(i64::MAX),
                ))
                .await?;
                return Ok(Event::StageDetectionFailed);
            }
        };
        tracing::info!("detected stage: {stage}");
        self.reset(stage);
        Ok(Event::StageDetectionSucceeded)
    }

    pub(super) fn select_committee(&self) -> ctx::Result<Event> {
        let stage = self.data.stage();
        let committee = self
            .committee_manager
            .select_committee(stage.height, stage.round)
            .wrap("select_committee()")?;
        let is_block_proposer = committee.proposer == self.key.public();
        tracing::debug!(
            "{:?} round {}: proposer {:?}, {} cosigners",
            stage.height,
            stage.round,
            committee.proposer,
            committee.cosigners.len()
        );
        self.data.set_committee(committee);
        Ok(Event::CommitteeSelected {
            is_block_proposer,
            phase: stage.phase,
        })
    }

    pub(super) async fn propose_block(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        let stage = self.data.stage();
        ctx.sleep_until(ctx.instant_at(stage.round_start.to_utc())).await?;
        let head = self.chain.head();
        let transactions = match self
            .payload_manager
            .propose(
                &Self::until(ctx, stage.phase_deadline()),
                stage.height,
                self.network.max_transactions_per_block,
            )
            .await
        {
            Ok(transactions) => transactions,
            Err(ctx::Error::Canceled(_)) if ctx.is_active() => {
                tracing::warn!("no payload proposed in the propose phase");
                return Ok(Event::BlockProposingFailed);
            }
            Err(ctx::Error::Canceled(err)) => return Err(err.into()),
            Err(ctx::Error::Internal(err)) => {
                tracing::warn!("PayloadManager::propose(): {err:#}");
                return Ok(Event::BlockProposingFailed);
            }
        };
        let header = BlockHeader {
            signer: self.key.public(),
            version: BLOCK_VERSION,
            height: stage.height,
            timestamp: stage.round_start,
            previous_block_hash: head.hash(),
            transactions_hash: Default::default(),
            beneficiary: self.beneficiary,
            committee_phase_time: stage.phase_time_millis,
        };
        let block = Arc::new(Block::sign(&self.key, header, transactions));
        // Only this node may propose in this round, so an earlier block is forged.
        if let Some(replaced) = self.data.replace_proposed_block(block.clone()) {
            tracing::warn!(
                "dropped block {} received for {:?} round {} before the own proposal",
                replaced.hash(),
                stage.height,
                stage.round
            );
        }
        self.data.mark_proposal_validated(block.signature);
        tracing::info!("proposed block {:?} with {} transactions", block.height(), block.transactions.len());
        self.broadcast(PacketType::PushProposedBlock, stage.phase_deadline(), block.encode());
        Ok(Event::BlockProposingSucceeded)
    }

    /// Adopts the proposal held by a sufficient number of peers, and forwards it.
    async fn pull_proposed_block(&self, ctx: &ctx::Ctx, stage: &CommitteeStage) -> ctx::Result<()> {
        let res = self
            .peers
            .remote_proposed_blocks(&Self::until(ctx, stage.phase_deadline()))
            .await;
        let blocks = match res {
            Ok(blocks) => blocks,
            Err(ctx::Error::Canceled(_)) if ctx.is_active() => return Ok(()),
            Err(err) => return Err(err).wrap("remote_proposed_blocks()"),
        };
        let blocks: Vec<_> = blocks
            .into_iter()
            .filter(|b| b.height() == stage.height && b.header.timestamp == stage.round_start)
            .map(|b| (b.hash(), b))
            .collect();
        let Some((hash, n)) = detect::find_most_frequent_value(blocks.iter().map(|(hash, _)| *hash)) else {
            tracing::debug!("no peer has a proposal for {:?} round {}", stage.height, stage.round);
            return Ok(());
        };
        if !detect::peer_number_sufficient(n, &self.network) {
            tracing::debug!("proposal {hash} is held by {n} peers only");
            return Ok(());
        }
        let Some((_, block)) = blocks.into_iter().find(|(h, _)| *h == hash) else {
            return Ok(());
        };
        let block = Arc::new(block);
        if self.data.try_set_proposed_block(block.clone()).is_ok() {
            tracing::info!("pulled proposal {hash} for {:?} from {n} peers", stage.height);
            self.broadcast(PacketType::PushProposedBlock, stage.phase_deadline(), block.encode());
        }
        Ok(())
    }

    pub(super) async fn wait_for_proposal(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        let stage = self.data.stage().with_phase(CommitteePhase::Propose);
        let deadline = stage.phase_deadline();
        let has_proposal = |d: &CommitteeData| d.proposed_block().is_some() || d.proposal_multiple();
        // A proposal missed by this node is pulled from the peers halfway through the phase.
        let pull_at = stage.round_start.add_millis(stage.phase_time_millis / 2);
        if !self.wait_until(ctx, pull_at, has_proposal).await? {
            self.pull_proposed_block(ctx, &stage).await?;
        }
        let received = self.wait_until(ctx, deadline, has_proposal).await?;
        Ok(if self.data.proposal_multiple() {
            tracing::warn!("multiple proposals received");
            Event::MultipleProposal
        } else if received {
            Event::ProposalReceived
        } else {
            tracing::debug!("no proposal received");
            Event::ProposalNotReceived
        })
    }

    pub(super) async fn validate_proposal(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        let Some(block) = self.data.proposed_block() else {
            return Ok(Event::ProposalInvalid);
        };
        if self.data.is_proposal_validated(&block.signature) {
            return Ok(Event::ProposalValid);
        }
        let stage = self.data.stage();
        let Some(committee) = self.data.committee() else {
            return Ok(Event::ProposalInvalid);
        };
        let head = self.chain.head();
        let cx = validation::ProposalContext {
            stage: &stage,
            head: &head,
            committee: &committee,
            network: &self.network,
        };
        for check in &self.proposal_checks {
            if let Err(err) = check(&cx, &block) {
                tracing::warn!("invalid proposal: {err:#}");
                return Ok(Event::ProposalInvalid);
            }
        }
        let verify_ctx = &Self::until(ctx, stage.with_phase(CommitteePhase::Prevote).phase_deadline());
        match self.payload_manager.verify(verify_ctx, &block).await {
            Ok(()) => {}
            Err(ctx::Error::Canceled(err)) if !ctx.is_active() => return Err(err.into()),
            Err(err) => {
                tracing::warn!("PayloadManager::verify(): {err:#}");
                return Ok(Event::ProposalInvalid);
            }
        }
        self.data.mark_proposal_validated(block.signature);
        Ok(Event::ProposalValid)
    }

    /// Enters the phase of `message_type` and broadcasts the own vote for the proposal.
    fn broadcast_vote(&self, message_type: CommitteeMessageType) -> Event {
        let stage = self.data.stage().with_phase(accepting_phase(message_type));
        self.set_stage(stage);
        let is_member = self
            .data
            .committee()
            .is_some_and(|c| c.is_member(&self.key.public()));
        let Some(block) = self.data.proposed_block() else {
            return Event::VotesBroadcast;
        };
        if is_member {
            let message = CommitteeMessage::new(message_type, &block, &self.key);
            let payload = message.encode();
            self.data.add_vote(message);
            let packet_type = match message_type {
                CommitteeMessageType::Prevote => PacketType::PushPrevoteMessages,
                CommitteeMessageType::Precommit => PacketType::PushPrecommitMessages,
            };
            self.broadcast(packet_type, stage.phase_deadline(), Ok(payload));
        }
        Event::VotesBroadcast
    }

    pub(super) fn broadcast_prevote(&self) -> Event {
        self.broadcast_vote(CommitteeMessageType::Prevote)
    }

    pub(super) fn broadcast_precommit(&self) -> Event {
        self.broadcast_vote(CommitteeMessageType::Precommit)
    }

    /// Waits until the votes of `message_type` reach the approval share, or the phase ends.
    async fn wait_for_votes(&self, ctx: &ctx::Ctx, message_type: CommitteeMessageType) -> ctx::Result<bool> {
        let approval = self.network.committee_approval;
        let deadline = self.data.stage().phase_deadline();
        self.wait_until(ctx, deadline, |d| d.is_sum_of_votes_sufficient(message_type, approval))
            .await
    }

    pub(super) async fn wait_for_prevotes(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        Ok(if self.wait_for_votes(ctx, CommitteeMessageType::Prevote).await? {
            Event::SumOfPrevotesSufficient
        } else {
            tracing::debug!("insufficient prevotes: {}", self.data.prevotes().len());
            Event::SumOfPrevotesInsufficient
        })
    }

    pub(super) async fn wait_for_precommits(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        Ok(if self.wait_for_votes(ctx, CommitteeMessageType::Precommit).await? {
            self.set_stage(self.data.stage().with_phase(CommitteePhase::Commit));
            Event::SumOfPrecommitsSufficient
        } else {
            tracing::debug!("insufficient precommits: {}", self.data.precommits().len());
            Event::SumOfPrecommitsInsufficient
        })
    }

    /// The block to commit: the received confirmed block, or the proposal with the
    /// cosignatures of the precommits for it. The flag tells whether the block was built here.
    fn block_to_commit(&self) -> Option<(Block, bool)> {
        if let Some(block) = self.data.confirmed_block() {
            if self.data.is_confirmed_block_validated(&block.signature) {
                return Some((block.as_ref().clone(), false));
            }
        }
        let mut block = self.data.proposed_block()?.as_ref().clone();
        let hash = block.hash();
        let committee = self.data.committee()?;
        block.cosignatures = self
            .data
            .precommits()
            .into_values()
            .filter(|m| m.block_hash == hash && committee.is_member(&m.block_cosignature.signer))
            .map(|m| m.block_cosignature)
            .collect();
        Some((block, true))
    }

    pub(super) async fn commit_confirmed_block(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        let stage = self.data.stage();
        let Some((block, built)) = self.block_to_commit() else {
            tracing::error!("no block to commit at {:?}", stage.height);
            return Ok(Event::CommitBlockFailed);
        };
        let encoded = built.then(|| block.encode());
        match self.chain.commit(ctx, block).await {
            Ok(()) => {}
            Err(ctx::Error::Canceled(err)) => return Err(err.into()),
            Err(ctx::Error::Internal(err)) => {
                tracing::error!("ChainStore::commit(): {err:#}");
                return Ok(Event::CommitBlockFailed);
            }
        }
        tracing::info!("committed block {:?} in round {}", stage.height, stage.round);
        metrics::METRICS.committed_blocks.inc();
        metrics::METRICS
            .commit_latency
            .observe(time::to_std(ctx.now_utc() - stage.round_start.to_utc()));
        if let Some(encoded) = encoded {
            if self.network.block_broadcast_enabled {
                self.broadcast(PacketType::PullConfirmedBlock, stage.round_end(), encoded);
            }
        }
        Ok(Event::CommitBlockSucceeded)
    }

    pub(super) async fn wait_for_round_end(&self, ctx: &ctx::Ctx) -> ctx::Result<Event> {
        let stage = self.data.stage().with_phase(CommitteePhase::Commit);
        self.set_stage(stage);
        let round_end = stage.round_end();
        if !self
            .wait_until(ctx, round_end, |d| d.confirmed_block().is_some())
            .await?
        {
            return Ok(Event::RoundEnded);
        }
        let Some(block) = self.data.confirmed_block() else {
            return Ok(Event::RoundEnded);
        };
        if self.data.is_confirmed_block_validated(&block.signature) {
            return Ok(Event::ConfirmedBlockReceived);
        }
        let head = self.chain.head();
        let res = match self.data.committee() {
            Some(committee) => {
                validation::check_confirmed_block(&block, &stage, &head, &committee, &self.network)
            }
            None => Err(anyhow::anyhow!("no committee selected")),
        };
        if let Err(err) = res {
            tracing::warn!("invalid confirmed block: {err:#}");
            ctx.sleep_until(ctx.instant_at(round_end.to_utc())).await?;
            return Ok(Event::RoundEnded);
        }
        self.data.mark_confirmed_block_validated(block.signature);
        Ok(Event::ConfirmedBlockReceived)
    }

    pub(super) fn increment_round(&self) -> Event {
        let stage = self.data.stage();
        let next = self.round_change_policy.increment_round(&stage, &self.network);
        tracing::info!("round {} at {:?} ended without a commit", stage.round, stage.height);
        metrics::METRICS.round_changes.inc();
        self.reset(next);
        Event::RoundChanged
    }

    pub(super) fn reset_round(&self) -> Event {
        let stage = self.data.stage();
        let next = self.round_change_policy.reset_round(&stage, &self.network);
        if let Some(view_sequences) = &self.view_sequences {
            let mut delta = view_sequences.create_delta();
            delta.bill(stage.height, |entry| {
                tracing::debug!("view sequence {} billed at {:?}", entry.hash(), stage.height);
            });
            delta.prune(stage.height);
            delta.commit();
        }
        self.reset(next);
        Event::RoundChanged
    }
}
