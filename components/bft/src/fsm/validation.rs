//! Stateless checks of proposed and confirmed blocks.
use crate::{NetworkConfig, SelectedCommittee};
use fastfinality_roles::{
    chain::{transactions_hash, verify_header_cosignature, Block, BLOCK_VERSION},
    committee::CommitteeStage,
};
use std::collections::BTreeSet;

/// State a proposal is checked against.
#[derive(Debug)]
pub(crate) struct ProposalContext<'a> {
    pub(crate) stage: &'a CommitteeStage,
    pub(crate) head: &'a Block,
    pub(crate) committee: &'a SelectedCommittee,
    pub(crate) network: &'a NetworkConfig,
}

/// A single check of a proposal.
pub(crate) type ProposalCheck =
    Box<dyn Fn(&ProposalContext<'_>, &Block) -> anyhow::Result<()> + Send + Sync>;

/// The checks applied to every proposal, in order.
pub(crate) fn proposal_checks() -> Vec<ProposalCheck> {
    vec![
        Box::new(check_version),
        Box::new(check_height),
        Box::new(check_proposer),
        Box::new(check_signature),
        Box::new(check_parent),
        Box::new(check_timing),
        Box::new(check_transactions),
        Box::new(check_no_cosignatures),
    ]
}

fn check_version(_: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.header.version == BLOCK_VERSION,
        "unsupported block version {}",
        block.header.version
    );
    Ok(())
}

fn check_height(cx: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.height() == cx.stage.height,
        "block height {:?}, want {:?}",
        block.height(),
        cx.stage.height
    );
    Ok(())
}

fn check_proposer(cx: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.header.signer == cx.committee.proposer,
        "block signed by {:?}, want the proposer {:?}",
        block.header.signer,
        cx.committee.proposer
    );
    Ok(())
}

fn check_signature(_: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    Ok(block.verify_signature()?)
}

fn check_parent(cx: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.header.previous_block_hash == cx.head.hash(),
        "block does not extend the head {:?}",
        cx.head.height()
    );
    Ok(())
}

fn check_timing(cx: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.header.timestamp == cx.stage.round_start,
        "block timestamp {}, want round start {}",
        block.header.timestamp,
        cx.stage.round_start
    );
    anyhow::ensure!(
        block.header.committee_phase_time == cx.stage.phase_time_millis,
        "block phase time {}, want {}",
        block.header.committee_phase_time,
        cx.stage.phase_time_millis
    );
    Ok(())
}

fn check_transactions(cx: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.transactions.len() <= cx.network.max_transactions_per_block,
        "{} transactions, at most {} allowed",
        block.transactions.len(),
        cx.network.max_transactions_per_block
    );
    anyhow::ensure!(
        block.header.transactions_hash == transactions_hash(&block.transactions),
        "transactions hash mismatch"
    );
    Ok(())
}

fn check_no_cosignatures(_: &ProposalContext<'_>, block: &Block) -> anyhow::Result<()> {
    anyhow::ensure!(block.cosignatures.is_empty(), "proposal carries cosignatures");
    Ok(())
}

/// Checks a block cosigned by the committee: it has to extend `head` at the stage height,
/// and the valid cosignatures of committee members have to reach the approval share of
/// the committee weight.
pub(crate) fn check_confirmed_block(
    block: &Block,
    stage: &CommitteeStage,
    head: &Block,
    committee: &SelectedCommittee,
    network: &NetworkConfig,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        block.height() == stage.height,
        "block height {:?}, want {:?}",
        block.height(),
        stage.height
    );
    anyhow::ensure!(
        block.header.previous_block_hash == head.hash(),
        "block does not extend the head"
    );
    block.verify_signature()?;
    let header_data = block.header_data();
    let mut signers = BTreeSet::new();
    for cosignature in &block.cosignatures {
        if committee.is_member(&cosignature.signer)
            && verify_header_cosignature(&header_data, cosignature).is_ok()
        {
            signers.insert(cosignature.signer);
        }
    }
    let weight = committee.weight_of(&signers);
    anyhow::ensure!(
        network.committee_approval.is_reached(weight, committee.total_weight()),
        "cosignature weight {weight} of {} is insufficient",
        committee.total_weight()
    );
    Ok(())
}
