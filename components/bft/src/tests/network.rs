use crate::{
    testonly::{make_config, make_genesis, spawn_node, InMemoryChain, InProcessNetwork, RandomPayload, RejectingPayload},
    NetworkConfig, PayloadManager, Peers as _,
};
use fastfinality_concurrency::{ctx, testonly::abort_on_panic, time};
use fastfinality_roles::{
    chain::{verify_header_cosignature, Height, Timestamp},
    committee::testonly::Setup,
    packet::PacketType,
};
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, sync::Arc};

const LATENCY: time::Duration = time::Duration::milliseconds(50);

/// Committee of in-process nodes. The network has an extra endpoint which doesn't run a node,
/// used to observe the stages of the others.
struct TestNet {
    setup: Setup,
    net: Arc<InProcessNetwork>,
    chains: Vec<Arc<InMemoryChain>>,
    network: NetworkConfig,
}

impl TestNet {
    fn new(ctx: &ctx::Ctx, nodes: usize, silent: &[usize]) -> Self {
        Self::with_network(ctx, nodes, silent, NetworkConfig::default())
    }

    fn with_network(ctx: &ctx::Ctx, nodes: usize, silent: &[usize], network: NetworkConfig) -> Self {
        let setup = Setup::new(&mut ctx.rng(), nodes);
        let genesis = make_genesis(
            &setup.keys[0],
            Timestamp::from_utc(ctx.now_utc()),
            network.committee_phase_time_millis,
        );
        let net = InProcessNetwork::new(nodes + 1, LATENCY);
        for i in silent {
            net.silence(*i);
        }
        let chains = (0..nodes)
            .map(|_| Arc::new(InMemoryChain::new(genesis.clone())))
            .collect();
        Self {
            setup,
            net,
            chains,
            network,
        }
    }

    fn spawn(&self, ctx: &ctx::Ctx, payload: impl Fn() -> Box<dyn PayloadManager>) {
        for (i, key) in self.setup.keys.iter().enumerate() {
            let config = make_config(
                &self.setup,
                key,
                self.network.clone(),
                self.chains[i].clone(),
                payload(),
            );
            spawn_node(ctx, config, self.net.peers(i));
        }
    }
}

async fn commit_blocks(silent: &[usize], want: Height) {
    abort_on_panic();
    let ctx = &ctx::test_root();
    let nodes = 4;
    let test = TestNet::new(ctx, nodes, silent);
    test.spawn(ctx, || Box::new(RandomPayload(5)));

    for chain in &test.chains {
        chain.wait_for_height(ctx, want).await.unwrap();
    }
    // Members commit with the precommits they have seen, so only the cosignatures may differ.
    let len = usize::try_from(want.0).unwrap();
    let blocks = test.chains[0].blocks()[..len].to_vec();
    for chain in &test.chains[1..] {
        let hashes: Vec<_> = chain.blocks()[..len].iter().map(|b| b.hash()).collect();
        assert_eq!(blocks.iter().map(|b| b.hash()).collect::<Vec<_>>(), hashes);
    }
    for block in &blocks[1..] {
        let header_data = block.header_data();
        let signers: BTreeSet<_> = block
            .cosignatures
            .iter()
            .filter(|c| verify_header_cosignature(&header_data, c).is_ok())
            .map(|c| c.signer)
            .collect();
        assert!(signers.len() * 3 >= nodes * 2, "{:?} has {} cosigners", block.height(), signers.len());
        for i in silent {
            assert!(!signers.contains(&test.setup.keys[*i].public()));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn honest_network() {
    commit_blocks(&[], Height(6)).await;
}

#[tokio::test(start_paused = true)]
async fn network_with_a_silent_node() {
    commit_blocks(&[1], Height(6)).await;
}

#[tokio::test(start_paused = true)]
async fn rejected_proposals_change_rounds() {
    abort_on_panic();
    let ctx = &ctx::test_root();
    let nodes = 4;
    let test = TestNet::new(ctx, nodes, &[]);
    test.spawn(ctx, || Box::new(RejectingPayload));

    ctx.sleep(time::Duration::seconds(30)).await.unwrap();
    let stages = test.net.peers(nodes).remote_stages(ctx).await.unwrap();
    assert_eq!(nodes, stages.len());
    let initial = NetworkConfig::default().committee_phase_time_millis;
    for stage in stages {
        assert_eq!(Height::GENESIS.next(), stage.height);
        assert!(stage.round >= 2, "round {}", stage.round);
        assert!(stage.phase_time_millis > initial);
    }
    for chain in &test.chains {
        assert_eq!(Height::GENESIS, chain.head_height());
    }
}

#[tokio::test(start_paused = true)]
async fn silent_majority_stalls_the_network() {
    abort_on_panic();
    let ctx = &ctx::test_root();
    let test = TestNet::new(ctx, 4, &[1, 2]);
    test.spawn(ctx, || Box::new(RandomPayload(5)));

    ctx.sleep(time::Duration::seconds(30)).await.unwrap();
    // The silent members still hear the others, so only the honest ones are stuck.
    for i in [0, 3] {
        assert_eq!(Height::GENESIS, test.chains[i].head_height());
    }
}

#[tokio::test(start_paused = true)]
async fn missed_proposals_are_pulled_from_peers() {
    abort_on_panic();
    let ctx = &ctx::test_root();
    let network = NetworkConfig {
        committee_size: 4,
        block_broadcast_enabled: false,
        ..NetworkConfig::default()
    };
    let test = TestNet::with_network(ctx, 4, &[], network);
    // Node 2 never hears a proposal, and without block broadcasts it can only commit
    // blocks it has voted for.
    test.net.drop_packets(2, PacketType::PushProposedBlock);
    test.spawn(ctx, || Box::new(RandomPayload(5)));

    let want = Height(4);
    test.chains[2].wait_for_height(ctx, want).await.unwrap();
    test.chains[0].wait_for_height(ctx, want).await.unwrap();
    let len = usize::try_from(want.0).unwrap();
    let hashes = |i: usize| -> Vec<_> { test.chains[i].blocks()[..len].iter().map(|b| b.hash()).collect() };
    assert_eq!(hashes(0), hashes(2));
    let key = test.setup.keys[2].public();
    for block in &test.chains[2].blocks()[1..len] {
        assert!(
            block.cosignatures.iter().any(|c| c.signer == key),
            "{:?} lacks the precommit of node 2",
            block.height()
        );
    }
}
