//! Handlers of the packets pushed by other committee members.
//!
//! Every handler validates a packet against the current [`CommitteeData`] and admits it
//! into the state, or rejects it. Handlers never reply: rejections are logged and
//! counted by the [`Dispatcher`], and the packet is dropped. Votes and confirmed blocks
//! arriving shortly before the local node enters their phase are held back by the
//! dispatcher and handled again once the phase changes.
use crate::{
    metrics::{self, PacketLabel, RejectionLabels},
    ChainStore, CommitteeData,
};
use fastfinality_concurrency::{ctx, error::Wrap as _, sync};
use fastfinality_roles::{
    chain::{Height, TransactionRegistry},
    committee::{CommitteeMessageType, CommitteePhase, CommitteeStage},
    packet::{Packet, PacketType},
};
use fastfinality_storage::ViewSequenceCache;
use std::{collections::VecDeque, fmt, sync::Arc};

pub mod confirmed_block;
pub mod install;
pub mod proposed_block;
pub mod vote;

/// Log level of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected noise: messages arriving out of phase.
    Trace,
    /// Stale or duplicate input.
    Debug,
    /// Malformed input, or input failing cryptographic checks.
    Warn,
}

/// Classification of a handler error.
pub trait Rejection: fmt::Display + Sized {
    /// Log level of the rejection.
    fn severity(&self) -> Severity;
    /// Short name of the rejection, used as a metric label.
    fn reason(&self) -> &'static str;
    /// Splits off internal errors, which are not rejections.
    fn into_internal(self) -> Result<ctx::Error, Self>;
}

/// Maximal number of packets held back until their phase starts.
const MAX_DEFERRED: usize = 1024;

/// Whether a packet was consumed, or has to be handled again in a later phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The packet was admitted or rejected.
    Done,
    /// The packet arrived before its phase.
    Deferred,
}

#[derive(Debug)]
struct Held {
    height: Height,
    round: u32,
    phase: CommitteePhase,
    packet: Packet,
}

/// Packets held back until the stage moves on. A packet is handled again once the phase
/// differs from the one it was last handled in, and expires when the round changes.
#[derive(Debug, Default)]
pub(crate) struct DeferredPackets(VecDeque<Held>);

impl DeferredPackets {
    /// Holds back a packet last handled in `stage`. Returns the oldest packet when full.
    pub(crate) fn push(&mut self, stage: &CommitteeStage, packet: Packet) -> Option<Packet> {
        let evicted = if self.0.len() == MAX_DEFERRED {
            self.0.pop_front().map(|held| held.packet)
        } else {
            None
        };
        self.0.push_back(Held {
            height: stage.height,
            round: stage.round,
            phase: stage.phase,
            packet,
        });
        evicted
    }

    /// Splits off the packets to handle again in `stage`, and the expired ones.
    /// Packets last handled in `stage` stay held back.
    pub(crate) fn take(&mut self, stage: &CommitteeStage) -> (Vec<Packet>, Vec<Packet>) {
        let mut ready = vec![];
        let mut expired = vec![];
        for held in std::mem::take(&mut self.0) {
            if (held.height, held.round) != (stage.height, stage.round) {
                expired.push(held.packet);
            } else if held.phase != stage.phase {
                ready.push(held.packet);
            } else {
                self.0.push_back(held);
            }
        }
        (ready, expired)
    }
}

/// Feeds inbound packets to the handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    data: Arc<CommitteeData>,
    registry: Arc<TransactionRegistry>,
    chain: Arc<dyn ChainStore>,
    view_sequences: Option<Arc<ViewSequenceCache>>,
}

impl Dispatcher {
    /// Dispatcher admitting packets into `data`. Install messages are recorded at the
    /// height following the head of `chain`.
    pub fn new(
        data: Arc<CommitteeData>,
        registry: Arc<TransactionRegistry>,
        chain: Arc<dyn ChainStore>,
        view_sequences: Option<Arc<ViewSequenceCache>>,
    ) -> Self {
        Self {
            data,
            registry,
            chain,
            view_sequences,
        }
    }

    /// Handles `packet`, holding it back if it arrived before its phase.
    fn handle_or_defer(
        &self,
        ctx: &ctx::Ctx,
        deferred: &mut DeferredPackets,
        packet: Packet,
    ) -> ctx::Result<Disposition> {
        let stage = self.data.stage();
        let disposition = self.handle(ctx, &packet)?;
        if disposition == Disposition::Deferred {
            if let Some(evicted) = deferred.push(&stage, packet) {
                expire(&evicted);
            }
        }
        Ok(disposition)
    }

    /// Handles packets from `inbound` until the context is canceled.
    pub async fn run(
        &self,
        ctx: &ctx::Ctx,
        inbound: &mut ctx::channel::UnboundedReceiver<Packet>,
    ) -> ctx::Result<()> {
        let mut changes = self.data.subscribe();
        let mut deferred = DeferredPackets::default();
        loop {
            tokio::select! {
                packet = inbound.recv(ctx) => {
                    let packet = packet?;
                    let packet_type = packet.packet_type();
                    if self.handle_or_defer(ctx, &mut deferred, packet)? == Disposition::Deferred {
                        if let Ok(packet_type) = packet_type {
                            metrics::METRICS.deferred_messages[&PacketLabel::from(packet_type)].inc();
                        }
                    }
                }
                res = sync::changed(ctx, &mut changes) => {
                    res?;
                    let (ready, expired) = deferred.take(&self.data.stage());
                    for packet in &expired {
                        expire(packet);
                    }
                    for packet in ready {
                        self.handle_or_defer(ctx, &mut deferred, packet)?;
                    }
                }
            }
        }
    }

    /// Handles a single packet. Only internal errors are returned.
    pub fn handle(&self, ctx: &ctx::Ctx, packet: &Packet) -> ctx::Result<Disposition> {
        let packet_type = match packet.packet_type() {
            Ok(packet_type) => packet_type,
            Err(err) => {
                tracing::warn!("dropping packet: {err:#}");
                return Ok(Disposition::Done);
            }
        };
        let now = ctx.now();
        let data = &self.data;
        let res = match packet_type {
            PacketType::PushProposedBlock => report(
                packet_type,
                proposed_block::handle(data, &self.registry, packet).wrap("proposed_block::handle()"),
            ),
            PacketType::PullConfirmedBlock => match confirmed_block::handle(data, &self.registry, packet) {
                Err(err @ confirmed_block::Error::Early { .. }) => return Ok(defer(packet_type, &err)),
                res => report(packet_type, res.wrap("confirmed_block::handle()")),
            },
            PacketType::PushPrevoteMessages | PacketType::PushPrecommitMessages => {
                let message_type = if packet_type == PacketType::PushPrevoteMessages {
                    CommitteeMessageType::Prevote
                } else {
                    CommitteeMessageType::Precommit
                };
                match vote::handle(data, packet, message_type) {
                    Err(err @ vote::Error::Early { .. }) => return Ok(defer(packet_type, &err)),
                    res => report(packet_type, res.wrap("vote::handle()")),
                }
            }
            PacketType::DbrbInstallMessage => {
                let height = self.chain.head().height().next();
                report(
                    packet_type,
                    install::handle(height, self.view_sequences.as_deref(), packet).wrap("install::handle()"),
                )
            }
        }?;
        let label = PacketLabel::from(packet_type).with_result(&res);
        metrics::METRICS.message_processing_latency[&label].observe(ctx.now() - now);
        Ok(Disposition::Done)
    }
}

fn defer(packet_type: PacketType, err: &dyn fmt::Display) -> Disposition {
    tracing::trace!("{packet_type}: {err}, deferred");
    Disposition::Deferred
}

/// Counts a held back packet which never got handled in its phase.
fn expire(packet: &Packet) {
    let Ok(packet_type) = packet.packet_type() else {
        return;
    };
    tracing::trace!("{packet_type}: expired before its phase");
    let labels = RejectionLabels {
        packet: packet_type.into(),
        reason: "expired",
    };
    metrics::METRICS.rejected_messages[&labels].inc();
}

/// Logs and counts a rejection. Internal errors are passed through.
fn report<E: Rejection>(packet_type: PacketType, res: Result<(), E>) -> ctx::Result<Result<(), ()>> {
    let Err(err) = res else {
        return Ok(Ok(()));
    };
    let err = match err.into_internal() {
        Ok(internal) => {
            tracing::error!("{packet_type}: {internal:#}");
            return Err(internal);
        }
        Err(err) => err,
    };
    match err.severity() {
        Severity::Trace => tracing::trace!("{packet_type}: {err:#}"),
        Severity::Debug => tracing::debug!("{packet_type}: {err:#}"),
        Severity::Warn => tracing::warn!("{packet_type}: {err:#}"),
    }
    let labels = RejectionLabels {
        packet: packet_type.into(),
        reason: err.reason(),
    };
    metrics::METRICS.rejected_messages[&labels].inc();
    Ok(Err(()))
}
