//! Voting state of the current round, shared by the state machine and the packet handlers.
use crate::SelectedCommittee;
use fastfinality_concurrency::{ctx, sync};
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{
    chain::Block,
    committee::{CommitteeMessage, CommitteeMessageType, CommitteeStage, Ratio},
    harvester::{PublicKey, Signature},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch;

/// Votes of a single type, keyed by the signer.
pub type Votes = BTreeMap<PublicKey, CommitteeMessage>;

#[derive(Debug, Default)]
struct Inner {
    stage: CommitteeStage,
    committee: Option<SelectedCommittee>,
    proposed_block: Option<Arc<Block>>,
    confirmed_block: Option<Arc<Block>>,
    prevotes: Votes,
    precommits: Votes,
    proposal_multiple: bool,
    unexpected_proposed_block_height: bool,
    unexpected_confirmed_block_height: bool,
    validated_proposals: BTreeSet<Signature>,
    validated_confirmed_blocks: BTreeSet<Signature>,
}

impl Inner {
    fn votes(&self, message_type: CommitteeMessageType) -> &Votes {
        match message_type {
            CommitteeMessageType::Prevote => &self.prevotes,
            CommitteeMessageType::Precommit => &self.precommits,
        }
    }

    fn votes_mut(&mut self, message_type: CommitteeMessageType) -> &mut Votes {
        match message_type {
            CommitteeMessageType::Prevote => &mut self.prevotes,
            CommitteeMessageType::Precommit => &mut self.precommits,
        }
    }
}

/// Container of the voting state: the committee stage, the proposed and confirmed blocks
/// and the votes received in the current round.
///
/// Every accessor takes the internal lock for the duration of the call only, so handlers
/// running on different connections are serialized per operation. Mutations notify the
/// waiters of [`CommitteeData::wait_until`].
#[derive(Debug)]
pub struct CommitteeData {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
}

impl Default for CommitteeData {
    fn default() -> Self {
        Self {
            inner: Mutex::default(),
            changes: watch::channel(0).0,
        }
    }
}

impl CommitteeData {
    /// Empty state: phase `None`, no blocks, no votes.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let res = f(&mut self.lock());
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
        res
    }

    /// Waits until `pred` holds for the state. The predicate is re-evaluated after
    /// every mutation.
    pub async fn wait_until(&self, ctx: &ctx::Ctx, pred: impl Fn(&Self) -> bool) -> ctx::OrCanceled<()> {
        let mut changes = self.changes.subscribe();
        loop {
            if pred(self) {
                return Ok(());
            }
            sync::changed(ctx, &mut changes).await?;
        }
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current stage.
    pub fn stage(&self) -> CommitteeStage {
        self.lock().stage
    }

    /// Overwrites the stage. Admission gates observe the new phase immediately.
    pub fn set_committee_stage(&self, stage: CommitteeStage) {
        self.update(|inner| inner.stage = stage);
    }

    /// Committee selected for the current round.
    pub fn committee(&self) -> Option<SelectedCommittee> {
        self.lock().committee.clone()
    }

    /// Sets the committee of the current round.
    pub fn set_committee(&self, committee: SelectedCommittee) {
        self.update(|inner| inner.committee = Some(committee));
    }

    /// The proposed block, if any.
    pub fn proposed_block(&self) -> Option<Arc<Block>> {
        self.lock().proposed_block.clone()
    }

    /// Hash of the proposed block. Zero if there is no proposal.
    pub fn proposed_block_hash(&self) -> Hash256 {
        self.lock()
            .proposed_block
            .as_ref()
            .map(|b| b.hash())
            .unwrap_or_default()
    }

    /// Stores the proposed block, unless there is one already. Returns the existing one then.
    pub fn try_set_proposed_block(&self, block: Arc<Block>) -> Result<(), Arc<Block>> {
        self.update(|inner| match &inner.proposed_block {
            Some(existing) => Err(existing.clone()),
            None => {
                inner.proposed_block = Some(block);
                Ok(())
            }
        })
    }

    /// Stores the own proposal, replacing whatever block was received before it.
    /// Returns the replaced block.
    pub fn replace_proposed_block(&self, block: Arc<Block>) -> Option<Arc<Block>> {
        self.update(|inner| inner.proposed_block.replace(block))
    }

    /// The confirmed block, if any.
    pub fn confirmed_block(&self) -> Option<Arc<Block>> {
        self.lock().confirmed_block.clone()
    }

    /// Stores the confirmed block, unless there is one already. Returns the existing one then.
    pub fn try_set_confirmed_block(&self, block: Arc<Block>) -> Result<(), Arc<Block>> {
        self.update(|inner| match &inner.confirmed_block {
            Some(existing) => Err(existing.clone()),
            None => {
                inner.confirmed_block = Some(block);
                Ok(())
            }
        })
    }

    /// Whether `signer` has cast a vote of the given type.
    pub fn has_vote(&self, signer: &PublicKey, message_type: CommitteeMessageType) -> bool {
        self.lock().votes(message_type).contains_key(signer)
    }

    /// The vote of `signer` of the given type.
    pub fn vote(&self, signer: &PublicKey, message_type: CommitteeMessageType) -> Option<CommitteeMessage> {
        self.lock().votes(message_type).get(signer).cloned()
    }

    /// Stores a vote, unless its signer has already voted with this type.
    /// Returns whether the vote was stored.
    pub fn add_vote(&self, message: CommitteeMessage) -> bool {
        self.update(|inner| {
            let signer = message.block_cosignature.signer;
            let votes = inner.votes_mut(message.message_type);
            if votes.contains_key(&signer) {
                return false;
            }
            votes.insert(signer, message);
            true
        })
    }

    /// Prevotes by signer.
    pub fn prevotes(&self) -> Votes {
        self.lock().prevotes.clone()
    }

    /// Precommits by signer.
    pub fn precommits(&self) -> Votes {
        self.lock().precommits.clone()
    }

    /// Whether the committee weight of the voters reaches `approval` of the total
    /// weight of the round's committee. False if no committee is selected.
    pub fn is_sum_of_votes_sufficient(&self, message_type: CommitteeMessageType, approval: Ratio) -> bool {
        let inner = self.lock();
        let Some(committee) = &inner.committee else {
            return false;
        };
        let sum = committee.weight_of(inner.votes(message_type).keys());
        approval.is_reached(sum, committee.total_weight())
    }

    /// Whether a second, different proposal was received in this round.
    pub fn proposal_multiple(&self) -> bool {
        self.lock().proposal_multiple
    }

    /// Flags a second, different proposal.
    pub fn set_proposal_multiple(&self) {
        self.update(|inner| inner.proposal_multiple = true);
    }

    /// Whether a proposal for another height was received in this round.
    pub fn unexpected_proposed_block_height(&self) -> bool {
        self.lock().unexpected_proposed_block_height
    }

    /// Flags a proposal for another height.
    pub fn set_unexpected_proposed_block_height(&self) {
        self.update(|inner| inner.unexpected_proposed_block_height = true);
    }

    /// Whether a confirmed block for another height was received in this round.
    pub fn unexpected_confirmed_block_height(&self) -> bool {
        self.lock().unexpected_confirmed_block_height
    }

    /// Flags a confirmed block for another height.
    pub fn set_unexpected_confirmed_block_height(&self) {
        self.update(|inner| inner.unexpected_confirmed_block_height = true);
    }

    /// Whether a proposal with this signature passed validation in this round.
    pub fn is_proposal_validated(&self, signature: &Signature) -> bool {
        self.lock().validated_proposals.contains(signature)
    }

    /// Remembers a validated proposal.
    pub fn mark_proposal_validated(&self, signature: Signature) {
        self.lock().validated_proposals.insert(signature);
    }

    /// Whether a confirmed block with this signature passed validation in this round.
    pub fn is_confirmed_block_validated(&self, signature: &Signature) -> bool {
        self.lock().validated_confirmed_blocks.contains(signature)
    }

    /// Remembers a validated confirmed block.
    pub fn mark_confirmed_block_validated(&self, signature: Signature) {
        self.lock().validated_confirmed_blocks.insert(signature);
    }

    /// Clears blocks, votes, flags and memos, and moves to `stage`.
    pub fn reset(&self, stage: CommitteeStage) {
        self.update(|inner| {
            *inner = Inner {
                stage,
                ..Inner::default()
            }
        });
    }
}
