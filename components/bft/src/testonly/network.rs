use super::InMemoryChain;
use crate::{
    AdjustingRoundChangePolicy, CommitteeData, Config, NetworkConfig, PayloadManager, Peers,
    WeightedCommitteeManager, WeightedVotingFsm,
};
use anyhow::Context as _;
use fastfinality_concurrency::{ctx, time};
use fastfinality_roles::{
    chain::testonly::test_registry,
    chain::Block,
    committee::{testonly::Setup, CommitteeStage},
    harvester::SecretKey,
    packet::{Packet, PacketType},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, OnceLock, PoisonError,
};

#[derive(Debug)]
struct Endpoint {
    send: ctx::channel::UnboundedSender<Packet>,
    recv: Mutex<Option<ctx::channel::UnboundedReceiver<Packet>>>,
    data: OnceLock<Arc<CommitteeData>>,
    silenced: AtomicBool,
    dropped: Mutex<Vec<PacketType>>,
}

impl Endpoint {
    fn drops(&self, packet: &Packet) -> bool {
        let Ok(packet_type) = packet.packet_type() else {
            return false;
        };
        self.dropped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&packet_type)
    }

    /// Voting state of the node, unless it is silenced or not running.
    fn data(&self) -> Option<&Arc<CommitteeData>> {
        if self.silenced.load(Ordering::SeqCst) {
            return None;
        }
        self.data.get()
    }
}

/// Broadcast network between the nodes of a single process. Every packet is delivered
/// to every other node after a fixed latency.
#[derive(Debug)]
pub struct InProcessNetwork {
    latency: time::Duration,
    endpoints: Vec<Endpoint>,
}

impl InProcessNetwork {
    /// Network of `nodes` nodes.
    pub fn new(nodes: usize, latency: time::Duration) -> Arc<Self> {
        let endpoints = (0..nodes)
            .map(|_| {
                let (send, recv) = ctx::channel::unbounded();
                Endpoint {
                    send,
                    recv: Mutex::new(Some(recv)),
                    data: OnceLock::new(),
                    silenced: AtomicBool::new(false),
                    dropped: Mutex::default(),
                }
            })
            .collect();
        Arc::new(Self { latency, endpoints })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the network has no nodes.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Connection of the node `index`.
    pub fn peers(self: &Arc<Self>, index: usize) -> Arc<NodePeers> {
        Arc::new(NodePeers {
            network: self.clone(),
            index,
        })
    }

    /// Drops every packet the node `index` sends from now on, and hides its stage.
    pub fn silence(&self, index: usize) {
        self.endpoints[index].silenced.store(true, Ordering::SeqCst);
    }

    /// Drops every packet of `packet_type` sent to the node `index` from now on.
    pub fn drop_packets(&self, index: usize, packet_type: PacketType) {
        self.endpoints[index]
            .dropped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet_type);
    }

    fn deliver(&self, from: usize, packet: Packet) {
        if self.endpoints[from].silenced.load(Ordering::SeqCst) {
            return;
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if i == from || endpoint.drops(&packet) {
                continue;
            }
            let send = endpoint.send.clone();
            let packet = packet.clone();
            if self.latency.is_zero() {
                send.send(packet);
                continue;
            }
            let latency = time::to_std(self.latency);
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                send.send(packet);
            });
        }
    }
}

/// [`Peers`] of a single node of an [`InProcessNetwork`].
#[derive(Debug)]
pub struct NodePeers {
    network: Arc<InProcessNetwork>,
    index: usize,
}

impl NodePeers {
    /// Exposes the stage of the node to the peers.
    pub fn attach(&self, data: Arc<CommitteeData>) {
        let _ = self.network.endpoints[self.index].data.set(data);
    }

    /// Answers of the other running nodes to a request, after a round trip.
    async fn query<T>(
        &self,
        ctx: &ctx::Ctx,
        answer: impl Fn(&CommitteeData) -> Option<T>,
    ) -> ctx::OrCanceled<Vec<T>> {
        ctx.sleep(self.network.latency * 2).await?;
        Ok(self
            .network
            .endpoints
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.index)
            .filter_map(|(_, e)| e.data())
            .filter_map(|data| answer(data))
            .collect())
    }

    /// Receiver of the packets sent to the node. Can be taken once.
    pub fn take_inbound(&self) -> Option<ctx::channel::UnboundedReceiver<Packet>> {
        self.network.endpoints[self.index]
            .recv
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait::async_trait]
impl Peers for NodePeers {
    fn broadcast(&self, packet: Packet) {
        self.network.deliver(self.index, packet);
    }

    async fn remote_stages(&self, ctx: &ctx::Ctx) -> ctx::Result<Vec<CommitteeStage>> {
        Ok(self.query(ctx, |data| Some(data.stage())).await?)
    }

    async fn remote_proposed_blocks(&self, ctx: &ctx::Ctx) -> ctx::Result<Vec<Block>> {
        Ok(self
            .query(ctx, |data| data.proposed_block().map(|b| b.as_ref().clone()))
            .await?)
    }
}

/// Runs the node connected through `peers` until `ctx` is canceled.
pub async fn run_node(ctx: &ctx::Ctx, config: Config, peers: Arc<NodePeers>) -> anyhow::Result<()> {
    let mut inbound = peers.take_inbound().context("node is already running")?;
    let fsm = WeightedVotingFsm::new(config, peers.clone())?;
    peers.attach(fsm.data().clone());
    fsm.run(ctx, &mut inbound).await
}

/// Spawns the node connected through `peers`. The node stops when `ctx` is canceled.
pub fn spawn_node(
    ctx: &ctx::Ctx,
    config: Config,
    peers: Arc<NodePeers>,
) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let (ctx, _) = ctx.fork();
    tokio::spawn(async move { run_node(&ctx, config, peers).await })
}

/// Configuration of the member `key` of `setup`, committing to `chain`.
pub fn make_config(
    setup: &Setup,
    key: &SecretKey,
    network: NetworkConfig,
    chain: Arc<InMemoryChain>,
    payload_manager: Box<dyn PayloadManager>,
) -> Config {
    let committee_manager = WeightedCommitteeManager::new(
        setup.committee.clone(),
        setup.leader_selection.clone(),
        network.committee_size,
    );
    Config {
        secret_key: key.clone(),
        beneficiary: key.public(),
        network,
        registry: Arc::new(test_registry()),
        payload_manager,
        chain,
        committee_manager: Box::new(committee_manager),
        round_change_policy: Box::new(AdjustingRoundChangePolicy),
        view_sequences: None,
    }
}
