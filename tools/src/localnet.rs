//! Committee of in-process nodes exchanging packets over a simulated broadcast network.
use crate::AppConfig;
use anyhow::Context as _;
use fastfinality_bft::{
    testonly::{make_genesis, spawn_node, InMemoryChain, InProcessNetwork, RandomPayload},
    AdjustingRoundChangePolicy, Config, Peers as _, WeightedCommitteeManager,
};
use fastfinality_concurrency::{ctx, time};
use fastfinality_roles::{
    chain::{testonly::test_registry, Height, Timestamp},
    committee::Committee,
    dbrb::{testonly::certified_install, MembershipChange, Sequence, View},
    harvester::SecretKey,
    packet::{Packet, PacketType},
};
use fastfinality_storage::{RocksDbStore, ViewSequenceCache};
use std::sync::Arc;

/// State of the nodes after a run.
#[derive(Debug)]
pub struct Outcome {
    /// Chain of every node.
    pub chains: Vec<Arc<InMemoryChain>>,
    /// View sequences of every node.
    pub view_sequences: Vec<Arc<ViewSequenceCache>>,
}

/// Opens the view sequence store of every node, if the config names a database.
async fn open_stores(cfg: &AppConfig) -> anyhow::Result<Vec<Option<RocksDbStore>>> {
    let mut stores = vec![];
    for i in 0..cfg.members.len() {
        stores.push(match &cfg.database {
            Some(dir) => {
                let path = dir.join(format!("node-{i}"));
                Some(
                    RocksDbStore::open(&path)
                        .await
                        .with_context(|| format!("RocksDbStore::open({path:?})"))?,
                )
            }
            None => None,
        });
    }
    Ok(stores)
}

/// Install message in which the last `departing` members leave the committee.
fn departure_install(keys: &[SecretKey], departing: usize, deadline: Timestamp) -> anyhow::Result<Packet> {
    let replaced = View::joined(keys.iter().map(SecretKey::public));
    let mut next = replaced.clone();
    for key in &keys[keys.len() - departing..] {
        next.insert(key.public(), MembershipChange::Leave);
    }
    let converged = Sequence::from_views(vec![next]).context("converged sequence")?;
    let install = certified_install(replaced, converged, keys);
    Packet::new(PacketType::DbrbInstallMessage, deadline, install.encode()?)
}

/// Runs the committee of `cfg` until every node commits `cfg.target_height`.
pub async fn run(ctx: &ctx::Ctx, cfg: &AppConfig) -> anyhow::Result<Outcome> {
    let committee: Committee = cfg.committee()?;
    let keys: Vec<SecretKey> = cfg.members.iter().map(|m| m.secret_key.clone()).collect();
    let n = keys.len();
    let genesis = make_genesis(
        &keys[0],
        Timestamp::from_utc(ctx.now_utc()),
        cfg.network.committee_phase_time_millis,
    );
    let latency = time::Duration::milliseconds(i64::try_from(cfg.latency_millis).context("latency_millis")?);
    // The extra endpoint injects the view change.
    let net = InProcessNetwork::new(n + 1, latency);

    let stores = open_stores(cfg).await?;
    let mut view_sequences = vec![];
    for (i, store) in stores.iter().enumerate() {
        let cache = match store {
            Some(store) => {
                let state = store.load().await.with_context(|| format!("node {i}: load()"))?;
                tracing::info!("node {i}: loaded {} view sequences", state.len());
                ViewSequenceCache::from_state(state)
            }
            None => ViewSequenceCache::new(),
        };
        view_sequences.push(Arc::new(cache));
    }

    let chains: Vec<_> = (0..n)
        .map(|_| Arc::new(InMemoryChain::new(genesis.clone())))
        .collect();
    let (nodes_ctx, nodes) = ctx.fork();
    let mut handles = vec![];
    for (i, key) in keys.iter().enumerate() {
        let committee_manager = WeightedCommitteeManager::new(
            committee.clone(),
            cfg.leader_selection.into(),
            cfg.network.committee_size,
        )
        .with_view_sequences(view_sequences[i].clone());
        let config = Config {
            secret_key: key.clone(),
            beneficiary: key.public(),
            network: cfg.network.clone(),
            registry: Arc::new(test_registry()),
            payload_manager: Box::new(RandomPayload(cfg.network.max_transactions_per_block)),
            chain: chains[i].clone(),
            committee_manager: Box::new(committee_manager),
            round_change_policy: Box::new(AdjustingRoundChangePolicy),
            view_sequences: Some(view_sequences[i].clone()),
        };
        handles.push(spawn_node(&nodes_ctx, config, net.peers(i)));
    }
    tracing::info!("started {n} nodes");

    let res = async {
        if let Some(departures) = cfg.departures {
            chains[0].wait_for_height(ctx, Height(departures.at_height)).await?;
            let deadline = Timestamp::from_utc(ctx.now_utc()).add_millis(cfg.latency_millis.saturating_mul(2));
            net.peers(n)
                .broadcast(departure_install(&keys, departures.members, deadline)?);
            tracing::info!("{} members leave at {:?}", departures.members, chains[0].head_height());
        }
        let target = Height(cfg.target_height);
        for (i, chain) in chains.iter().enumerate() {
            chain.wait_for_height(ctx, target).await?;
            tracing::info!("node {i} reached {target:?}");
        }
        anyhow::Ok(())
    }
    .await;
    nodes.cancel();
    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .context("join")?
            .with_context(|| format!("node {i}"))?;
    }
    res?;

    for (i, store) in stores.iter().enumerate() {
        if let Some(store) = store {
            store
                .save(view_sequences[i].view())
                .await
                .with_context(|| format!("node {i}: save()"))?;
        }
    }
    Ok(Outcome {
        chains,
        view_sequences,
    })
}
