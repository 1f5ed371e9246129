use super::{make_genesis, InMemoryChain};
use crate::{
    handlers::{Disposition, Dispatcher},
    CommitteeData, CommitteeManager as _, WeightedCommitteeManager,
};
use fastfinality_concurrency::ctx;
use fastfinality_roles::{
    chain::{testonly::test_registry, Block, BlockHeader, Height, Timestamp, TransactionRegistry, BLOCK_VERSION},
    committee::{testonly::Setup, CommitteeMessage, CommitteeMessageType, CommitteePhase, CommitteeStage},
    harvester::SecretKey,
    packet::{Packet, PacketType},
};
use fastfinality_storage::ViewSequenceCache;
use rand::{rngs::StdRng, Rng as _};
use std::sync::Arc;

/// `UnitTestHarness` feeds packets to the handlers of a single node, whose stage is
/// controlled by the test. Instantiate it once per test case.
pub(crate) struct UnitTestHarness {
    pub(crate) ctx: ctx::Ctx,
    pub(crate) rng: StdRng,
    pub(crate) setup: Setup,
    pub(crate) registry: Arc<TransactionRegistry>,
    pub(crate) data: Arc<CommitteeData>,
    pub(crate) chain: Arc<InMemoryChain>,
    pub(crate) view_sequences: Arc<ViewSequenceCache>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) genesis: Block,
}

impl UnitTestHarness {
    /// Harness with a committee of `members` members of weight 1, in the propose phase of
    /// the first round after genesis.
    pub(crate) fn new(members: usize) -> Self {
        let ctx = ctx::test_root();
        let mut rng = ctx.rng();
        let setup = Setup::new(&mut rng, members);
        let registry = Arc::new(test_registry());
        let data = Arc::new(CommitteeData::new());
        let view_sequences = Arc::new(ViewSequenceCache::new());
        let now = Timestamp::from_utc(ctx.now_utc());
        let genesis = make_genesis(&setup.keys[0], now, 1000);
        let chain = Arc::new(InMemoryChain::new(genesis.clone()));
        let dispatcher = Dispatcher::new(
            data.clone(),
            registry.clone(),
            chain.clone(),
            Some(view_sequences.clone()),
        );
        let stage = CommitteeStage {
            height: Height::GENESIS.next(),
            round: 0,
            phase: CommitteePhase::Propose,
            round_start: now,
            phase_time_millis: 1000,
        };
        data.reset(stage);
        let committee = WeightedCommitteeManager::new(setup.committee.clone(), setup.leader_selection.clone(), 21)
            .select_committee(stage.height, stage.round)
            .unwrap();
        data.set_committee(committee);
        Self {
            ctx,
            rng,
            setup,
            registry,
            data,
            chain,
            view_sequences,
            dispatcher,
            genesis,
        }
    }

    pub(crate) fn stage(&self) -> CommitteeStage {
        self.data.stage()
    }

    pub(crate) fn set_phase(&self, phase: CommitteePhase) {
        self.data.set_committee_stage(self.stage().with_phase(phase));
    }

    /// Secret key of the proposer of the current round.
    pub(crate) fn proposer_key(&self) -> SecretKey {
        let proposer = self.data.committee().unwrap().proposer;
        self.setup.key_of(&proposer).clone()
    }

    /// A valid proposal for the current round.
    pub(crate) fn make_proposal(&mut self) -> Block {
        let key = self.proposer_key();
        let stage = self.stage();
        let header = BlockHeader {
            signer: key.public(),
            version: BLOCK_VERSION,
            height: stage.height,
            timestamp: stage.round_start,
            previous_block_hash: self.genesis.hash(),
            transactions_hash: Default::default(),
            beneficiary: key.public(),
            committee_phase_time: stage.phase_time_millis,
        };
        let n = self.rng.gen_range(1..4);
        let transactions = (0..n).map(|_| self.rng.gen()).collect();
        Block::sign(&key, header, transactions)
    }

    pub(crate) fn block_packet(&self, packet_type: PacketType, block: &Block) -> Packet {
        Packet::new(packet_type, self.stage().round_end(), block.encode().unwrap()).unwrap()
    }

    pub(crate) fn proposal_packet(&self, block: &Block) -> Packet {
        self.block_packet(PacketType::PushProposedBlock, block)
    }

    pub(crate) fn vote_packet(&self, message: &CommitteeMessage) -> Packet {
        let packet_type = match message.message_type {
            CommitteeMessageType::Prevote => PacketType::PushPrevoteMessages,
            CommitteeMessageType::Precommit => PacketType::PushPrecommitMessages,
        };
        Packet::new(packet_type, self.stage().round_end(), message.encode()).unwrap()
    }

    /// Vote of the `i`-th member for `block`.
    pub(crate) fn vote(&self, i: usize, message_type: CommitteeMessageType, block: &Block) -> CommitteeMessage {
        CommitteeMessage::new(message_type, block, &self.setup.keys[i])
    }

    pub(crate) fn handle(&self, packet: &Packet) -> Disposition {
        self.dispatcher.handle(&self.ctx, packet).unwrap()
    }
}
