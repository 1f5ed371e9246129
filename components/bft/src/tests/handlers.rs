use crate::{
    handlers::{confirmed_block, install, proposed_block, vote, DeferredPackets, Disposition},
    metrics::{PacketLabel, RejectionLabels, METRICS},
    testonly::ut_harness::UnitTestHarness,
};
use assert_matches::assert_matches;
use fastfinality_concurrency::{ctx, testonly::abort_on_panic};
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{
    chain::{Block, Height},
    committee::{CommitteeMessage, CommitteeMessageType, CommitteePhase, CommitteeStage},
    dbrb::{
        testonly::{certified_install, views_with_departures},
        Sequence, View,
    },
    harvester::SecretKey,
    packet::{Packet, PacketType},
};
use pretty_assertions::assert_eq;
use rand::Rng as _;
use test_casing::test_casing;

const NOT_PROPOSE: [CommitteePhase; 4] = [
    CommitteePhase::None,
    CommitteePhase::Prevote,
    CommitteePhase::Precommit,
    CommitteePhase::Commit,
];

#[tokio::test]
async fn proposal_then_prevote() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    assert_eq!(Disposition::Done, util.handle(&util.proposal_packet(&block)));
    assert_eq!(Some(&block), util.data.proposed_block().as_deref());

    util.set_phase(CommitteePhase::Prevote);
    let prevote = util.vote(1, CommitteeMessageType::Prevote, &block);
    let signer = prevote.block_cosignature.signer;
    util.handle(&util.vote_packet(&prevote));
    assert!(util.data.has_vote(&signer, CommitteeMessageType::Prevote));
    assert_eq!(Some(prevote), util.data.vote(&signer, CommitteeMessageType::Prevote));
}

#[tokio::test]
async fn first_proposal_wins() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let b1 = util.make_proposal();
    let b2 = util.make_proposal();
    assert_ne!(b1.hash(), b2.hash());
    util.handle(&util.proposal_packet(&b1));
    assert_matches!(
        proposed_block::handle(&util.data, &util.registry, &util.proposal_packet(&b2)),
        Err(proposed_block::Error::AlreadyProposed { conflicting: true })
    );
    assert_eq!(Some(&b1), util.data.proposed_block().as_deref());
    assert!(util.data.proposal_multiple());
}

#[tokio::test]
async fn repeated_proposal_is_not_multiple() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    util.handle(&util.proposal_packet(&block));
    assert_matches!(
        proposed_block::handle(&util.data, &util.registry, &util.proposal_packet(&block)),
        Err(proposed_block::Error::AlreadyProposed { conflicting: false })
    );
    assert!(!util.data.proposal_multiple());
}

#[test_casing(4, NOT_PROPOSE)]
#[tokio::test]
async fn proposal_out_of_phase(phase: CommitteePhase) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    util.set_phase(phase);
    let block = util.make_proposal();
    assert_matches!(
        proposed_block::handle(&util.data, &util.registry, &util.proposal_packet(&block)),
        Err(proposed_block::Error::WrongPhase { .. })
    );
    assert_eq!(None, util.data.proposed_block());
}

#[test_casing(3, [-1, 1, 1000])]
#[tokio::test]
async fn proposal_with_inconsistent_size(delta: i64) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    let mut packet = util.proposal_packet(&block);
    packet.header.size = u32::try_from(i64::from(packet.header.size) + delta).unwrap();
    assert_matches!(
        proposed_block::handle(&util.data, &util.registry, &packet),
        Err(proposed_block::Error::InvalidPacketSize { .. })
    );
    assert_eq!(None, util.data.proposed_block());
}

#[tokio::test]
async fn proposal_with_truncated_payload() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    let mut payload = block.encode().unwrap();
    payload.truncate(payload.len() / 2);
    let packet = Packet::new(PacketType::PushProposedBlock, util.stage().round_end(), payload).unwrap();
    assert_matches!(
        proposed_block::handle(&util.data, &util.registry, &packet),
        Err(proposed_block::Error::Malformed(_))
    );
    assert_eq!(None, util.data.proposed_block());
}

#[tokio::test]
async fn proposal_for_another_height() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let mut block = util.make_proposal();
    block.header.height = block.height().next();
    let packet = util.proposal_packet(&block);
    assert_matches!(
        proposed_block::handle(&util.data, &util.registry, &packet),
        Err(proposed_block::Error::UnexpectedHeight { .. })
    );
    assert!(util.data.unexpected_proposed_block_height());
    assert!(!util.data.unexpected_confirmed_block_height());
    assert_eq!(None, util.data.proposed_block());
}

/// Sets up a proposal and moves to the phase accepting votes of `message_type`.
fn proposed(util: &mut UnitTestHarness, message_type: CommitteeMessageType) -> Block {
    let block = util.make_proposal();
    util.handle(&util.proposal_packet(&block));
    util.set_phase(vote::accepting_phase(message_type));
    block
}

const VOTE_TYPES: [CommitteeMessageType; 2] = [CommitteeMessageType::Prevote, CommitteeMessageType::Precommit];

#[test_casing(2, VOTE_TYPES)]
#[tokio::test]
async fn vote_for_unknown_block(message_type: CommitteeMessageType) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, message_type);
    let mut message = util.vote(2, message_type, &block);
    message.block_hash = util.rng.gen();
    let signer = message.block_cosignature.signer;
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&message), message_type),
        Err(vote::Error::UnexpectedBlockHash { .. })
    );
    assert!(!util.data.has_vote(&signer, message_type));
}

#[tokio::test]
async fn vote_without_proposal() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    util.set_phase(CommitteePhase::Prevote);
    let message = util.vote(1, CommitteeMessageType::Prevote, &block);
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&message), CommitteeMessageType::Prevote),
        Err(vote::Error::UnexpectedBlockHash { want, .. }) => assert_eq!(Hash256::ZERO, want)
    );
    assert!(util.data.prevotes().is_empty());
}

#[test_casing(2, VOTE_TYPES)]
#[tokio::test]
async fn vote_with_corrupted_message_signature(message_type: CommitteeMessageType) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, message_type);
    let mut message = util.vote(1, message_type, &block);
    message.message_signature = util.rng.gen();
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&message), message_type),
        Err(vote::Error::InvalidMessageSignature(_))
    );
    assert!(!util.data.has_vote(&message.block_cosignature.signer, message_type));
}

#[test_casing(2, VOTE_TYPES)]
#[tokio::test]
async fn vote_with_corrupted_cosignature(message_type: CommitteeMessageType) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, message_type);
    let key = util.setup.keys[1].clone();
    let mut message = util.vote(1, message_type, &block);
    // Sign the body again so that only the cosignature is invalid.
    message.block_cosignature.signature = util.rng.gen();
    message.message_signature = key.sign(&message.data_buffer());
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&message), message_type),
        Err(vote::Error::InvalidCosignature(_))
    );
    assert!(!util.data.has_vote(&key.public(), message_type));
}

#[tokio::test]
async fn vote_from_outside_the_committee() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, CommitteeMessageType::Prevote);
    let outsider: SecretKey = util.rng.gen();
    let message = CommitteeMessage::new(CommitteeMessageType::Prevote, &block, &outsider);
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&message), CommitteeMessageType::Prevote),
        Err(vote::Error::NotCommitteeMember { .. })
    );
    assert!(util.data.prevotes().is_empty());
}

#[tokio::test]
async fn vote_in_a_packet_of_the_other_type() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, CommitteeMessageType::Prevote);
    let message = util.vote(1, CommitteeMessageType::Precommit, &block);
    let packet = Packet::new(PacketType::PushPrevoteMessages, util.stage().round_end(), message.encode()).unwrap();
    assert_matches!(
        vote::handle(&util.data, &packet, CommitteeMessageType::Prevote),
        Err(vote::Error::MismatchedType { .. })
    );
}

#[test_casing(3, [0, 1, 2])]
#[tokio::test]
async fn vote_packet_of_wrong_size(case: usize) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, CommitteeMessageType::Prevote);
    let message = util.vote(1, CommitteeMessageType::Prevote, &block);
    let mut packet = util.vote_packet(&message);
    match case {
        0 => packet.header.size = 0,
        1 => packet.payload.push(0),
        _ => {
            packet.payload.clear();
            packet.header.size = 16;
        }
    }
    assert_matches!(
        vote::handle(&util.data, &packet, CommitteeMessageType::Prevote),
        Err(vote::Error::InvalidPacket { .. })
    );
    assert!(util.data.prevotes().is_empty());
}

#[test_casing(2, VOTE_TYPES)]
#[tokio::test]
async fn first_vote_wins(message_type: CommitteeMessageType) {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, message_type);
    let v1 = util.vote(3, message_type, &block);
    let signer = v1.block_cosignature.signer;
    vote::handle(&util.data, &util.vote_packet(&v1), message_type).unwrap();

    // The same vote again.
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&v1), message_type),
        Err(vote::Error::DuplicateVote { conflicting: false, .. })
    );
    // A vote of the same signer for another block.
    let mut other = util.make_proposal();
    other.header.beneficiary = util.rng.gen();
    let v2 = util.vote(3, message_type, &other);
    assert_matches!(
        vote::handle(&util.data, &util.vote_packet(&v2), message_type),
        Err(vote::Error::DuplicateVote { conflicting: true, .. })
    );
    assert!(util.data.has_vote(&signer, message_type));
    assert_eq!(Some(v1.block_hash), util.data.vote(&signer, message_type).map(|v| v.block_hash));
}

#[tokio::test]
async fn prevote_in_precommit_phase_is_dropped() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, CommitteeMessageType::Precommit);
    let message = util.vote(1, CommitteeMessageType::Prevote, &block);
    assert_eq!(Disposition::Done, util.handle(&util.vote_packet(&message)));
    assert!(util.data.prevotes().is_empty());
}

#[tokio::test]
async fn early_prevote_is_deferred() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    util.handle(&util.proposal_packet(&block));
    let message = util.vote(1, CommitteeMessageType::Prevote, &block);
    assert_eq!(Disposition::Deferred, util.handle(&util.vote_packet(&message)));
    assert!(util.data.prevotes().is_empty());
}

#[tokio::test]
async fn dispatcher_retries_deferred_votes() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    let message = util.vote(1, CommitteeMessageType::Prevote, &block);
    let signer = message.block_cosignature.signer;
    let ctx = &util.ctx;
    let (send, mut recv) = ctx::channel::unbounded();
    send.send(util.vote_packet(&message));
    send.send(util.proposal_packet(&block));
    tokio::select! {
        res = util.dispatcher.run(ctx, &mut recv) => panic!("dispatcher terminated: {res:?}"),
        res = async {
            util.data.wait_until(ctx, |d| d.proposed_block().is_some()).await?;
            assert!(!util.data.has_vote(&signer, CommitteeMessageType::Prevote));
            util.set_phase(CommitteePhase::Prevote);
            util.data.wait_until(ctx, |d| d.has_vote(&signer, CommitteeMessageType::Prevote)).await
        } => res.unwrap(),
    }
}

#[tokio::test]
async fn deferred_packets_wait_for_another_phase() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    util.handle(&util.proposal_packet(&block));
    let packet = util.vote_packet(&util.vote(1, CommitteeMessageType::Precommit, &block));
    let mut deferred = DeferredPackets::default();
    assert_eq!(Disposition::Deferred, util.handle(&packet));
    assert_eq!(None, deferred.push(&util.stage(), packet.clone()));

    // Other mutations within the phase don't release the packet.
    for _ in 0..5 {
        util.data.set_proposal_multiple();
        let (ready, expired) = deferred.take(&util.stage());
        assert!(ready.is_empty());
        assert!(expired.is_empty());
    }

    util.set_phase(CommitteePhase::Prevote);
    let (ready, expired) = deferred.take(&util.stage());
    assert_eq!(vec![packet.clone()], ready);
    assert!(expired.is_empty());
    assert_eq!(Disposition::Deferred, util.handle(&packet));
    deferred.push(&util.stage(), packet.clone());
    assert!(deferred.take(&util.stage()).0.is_empty());

    util.set_phase(CommitteePhase::Precommit);
    let (ready, _) = deferred.take(&util.stage());
    assert_eq!(vec![packet.clone()], ready);
    assert_eq!(Disposition::Done, util.handle(&packet));
    assert!(util
        .data
        .has_vote(&util.setup.keys[1].public(), CommitteeMessageType::Precommit));
}

#[tokio::test]
async fn deferred_packets_expire_with_the_round() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    let packet = util.vote_packet(&util.vote(1, CommitteeMessageType::Prevote, &block));
    let mut deferred = DeferredPackets::default();
    deferred.push(&util.stage(), packet.clone());

    let mut next = util.stage();
    next.round += 1;
    util.data.reset(next);
    let (ready, expired) = deferred.take(&util.stage());
    assert!(ready.is_empty());
    assert_eq!(vec![packet], expired);
    assert!(deferred.take(&util.stage().with_phase(CommitteePhase::Prevote)).1.is_empty());
}

#[tokio::test]
async fn early_votes_are_not_rejections() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = util.make_proposal();
    util.handle(&util.proposal_packet(&block));
    let packet = util.vote_packet(&util.vote(1, CommitteeMessageType::Prevote, &block));
    let labels = RejectionLabels {
        packet: PacketLabel::Prevote,
        reason: "early",
    };
    for _ in 0..5 {
        assert_eq!(Disposition::Deferred, util.handle(&packet));
        util.data.set_proposal_multiple();
    }
    assert_eq!(0, METRICS.rejected_messages[&labels].get());
}

#[tokio::test]
async fn confirmed_block_in_commit_phase() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let mut block = util.make_proposal();
    for key in &util.setup.keys {
        block.cosignatures.push(block.cosign(key));
    }
    let packet = util.block_packet(PacketType::PullConfirmedBlock, &block);
    assert_eq!(Disposition::Deferred, util.handle(&packet));
    assert_eq!(None, util.data.confirmed_block());

    util.set_phase(CommitteePhase::Commit);
    confirmed_block::handle(&util.data, &util.registry, &packet).unwrap();
    assert_eq!(Some(&block), util.data.confirmed_block().as_deref());
    assert_matches!(
        confirmed_block::handle(&util.data, &util.registry, &packet),
        Err(confirmed_block::Error::AlreadyConfirmed)
    );
}

#[tokio::test]
async fn confirmed_block_with_invalid_signature() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let mut block = util.make_proposal();
    block.signature = util.rng.gen();
    util.set_phase(CommitteePhase::Commit);
    let packet = util.block_packet(PacketType::PullConfirmedBlock, &block);
    assert_matches!(
        confirmed_block::handle(&util.data, &util.registry, &packet),
        Err(confirmed_block::Error::InvalidSignature(_))
    );
    assert_eq!(None, util.data.confirmed_block());
}

#[tokio::test]
async fn confirmed_block_for_another_height() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let mut block = util.make_proposal();
    block.header.height = Height(7);
    util.set_phase(CommitteePhase::Commit);
    let packet = util.block_packet(PacketType::PullConfirmedBlock, &block);
    assert_matches!(
        confirmed_block::handle(&util.data, &util.registry, &packet),
        Err(confirmed_block::Error::UnexpectedHeight { .. })
    );
    assert!(util.data.unexpected_confirmed_block_height());
}

#[tokio::test]
async fn reset_clears_the_round() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let block = proposed(&mut util, CommitteeMessageType::Prevote);
    util.handle(&util.vote_packet(&util.vote(1, CommitteeMessageType::Prevote, &block)));
    assert_eq!(1, util.data.prevotes().len());

    let next = util.stage().with_phase(CommitteePhase::Propose);
    util.data.reset(next);
    assert_eq!(next, util.stage());
    assert_eq!(None, util.data.proposed_block());
    assert_eq!(None, util.data.committee());
    assert!(util.data.prevotes().is_empty());
    assert!(!util.data.is_proposal_validated(&block.signature));
}

fn install_packet(util: &UnitTestHarness, replaced: View, converged: Sequence, signers: &[SecretKey]) -> Packet {
    let install = certified_install(replaced, converged, signers);
    Packet::new(PacketType::DbrbInstallMessage, util.stage().round_end(), install.encode().unwrap()).unwrap()
}

#[tokio::test]
async fn install_message_updates_the_latest_view() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let keys: Vec<SecretKey> = (0..4).map(|_| util.rng.gen()).collect();
    let views = views_with_departures(&keys);
    let packet = install_packet(
        &util,
        views[0].clone(),
        Sequence::from_views(views[1..3].to_vec()).unwrap(),
        &keys,
    );
    install::handle(util.stage().height, Some(&*util.view_sequences), &packet).unwrap();
    let state = util.view_sequences.view();
    assert_eq!(1, state.len());
    assert_eq!(views[2], state.get_latest_view());
    let height = util.stage().height;
    let mut billed = vec![];
    state.for_each_billing(height, |e| billed.push(*e.hash()));
    assert_eq!(1, billed.len());

    // The same message again.
    assert_matches!(
        install::handle(util.stage().height, Some(&*util.view_sequences), &packet),
        Err(install::Error::AlreadyInstalled { .. })
    );
    assert_eq!(1, util.view_sequences.view().len());
}

#[tokio::test]
async fn install_message_with_forged_certificate() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let keys: Vec<SecretKey> = (0..4).map(|_| util.rng.gen()).collect();
    let views = views_with_departures(&keys);
    let outsiders: Vec<SecretKey> = (0..4).map(|_| util.rng.gen()).collect();
    let packet = install_packet(
        &util,
        views[0].clone(),
        Sequence::from_views(views[1..2].to_vec()).unwrap(),
        &outsiders,
    );
    assert_matches!(
        install::handle(util.stage().height, Some(&*util.view_sequences), &packet),
        Err(install::Error::InvalidCertificate(_))
    );
    assert!(util.view_sequences.view().is_empty());
    assert!(util.view_sequences.view().get_latest_view().is_empty());
}

#[tokio::test]
async fn install_message_without_view_sequences() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    let keys: Vec<SecretKey> = (0..4).map(|_| util.rng.gen()).collect();
    let views = views_with_departures(&keys);
    let packet = install_packet(
        &util,
        views[0].clone(),
        Sequence::from_views(views[1..2].to_vec()).unwrap(),
        &keys,
    );
    assert_matches!(
        install::handle(util.stage().height, None, &packet),
        Err(install::Error::Disabled)
    );
}

#[tokio::test]
async fn install_message_before_stage_detection() {
    abort_on_panic();
    let mut util = UnitTestHarness::new(4);
    // Nothing is known about the round before the first stage detection.
    util.data.reset(CommitteeStage::default());
    let keys: Vec<SecretKey> = (0..4).map(|_| util.rng.gen()).collect();
    let views = views_with_departures(&keys);
    let packet = install_packet(
        &util,
        views[0].clone(),
        Sequence::from_views(views[1..2].to_vec()).unwrap(),
        &keys,
    );
    assert_eq!(Disposition::Done, util.handle(&packet));

    let state = util.view_sequences.view();
    assert_eq!(1, state.len());
    let height = util.chain.head_height().next();
    assert_eq!(Height::GENESIS.next(), height);
    let entry = state.iter().next().unwrap();
    assert_eq!(height, entry.end());
    let mut billed = vec![];
    state.for_each_billing(height, |e| billed.push(*e.hash()));
    assert_eq!(vec![*entry.hash()], billed);
    let mut billed = vec![];
    state.for_each_billing(Height(0), |e| billed.push(*e.hash()));
    assert!(billed.is_empty());
}
