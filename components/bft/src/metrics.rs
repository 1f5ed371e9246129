//! Metrics of the weighted voting component.
use fastfinality_roles::{committee::CommitteePhase, packet::PacketType};
use std::time::Duration;
use vise::{
    Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Gauge, Histogram, LabeledFamily, Metrics, Unit,
};

/// Label of an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum PacketLabel {
    /// `PushProposedBlock`.
    ProposedBlock,
    /// `PushPrevoteMessages`.
    Prevote,
    /// `PushPrecommitMessages`.
    Precommit,
    /// `PullConfirmedBlock`.
    ConfirmedBlock,
    /// `DbrbInstallMessage`.
    InstallMessage,
}

impl From<PacketType> for PacketLabel {
    fn from(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::PushProposedBlock => Self::ProposedBlock,
            PacketType::PushPrevoteMessages => Self::Prevote,
            PacketType::PushPrecommitMessages => Self::Precommit,
            PacketType::PullConfirmedBlock => Self::ConfirmedBlock,
            PacketType::DbrbInstallMessage => Self::InstallMessage,
        }
    }
}

impl PacketLabel {
    /// Attaches a result to this label.
    pub(crate) fn with_result<E>(self, result: &Result<(), E>) -> ProcessingLatencyLabels {
        ProcessingLatencyLabels {
            packet: self,
            result: match result {
                Ok(()) => ResultLabel::Ok,
                Err(_) => ResultLabel::Err,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
enum ResultLabel {
    Ok,
    Err,
}

/// Labels for processing latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct ProcessingLatencyLabels {
    packet: PacketLabel,
    result: ResultLabel,
}

/// Labels of a rejected packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct RejectionLabels {
    pub(crate) packet: PacketLabel,
    pub(crate) reason: &'static str,
}

/// Metrics defined by the weighted voting component.
#[derive(Debug, Metrics)]
#[metrics(prefix = "weighted_voting")]
pub(crate) struct WeightedVotingMetrics {
    /// Height being decided.
    pub(crate) height: Gauge<u64>,
    /// Round within the height.
    pub(crate) round: Gauge<u64>,
    /// Current phase, as its numeric value.
    pub(crate) phase: Gauge<u64>,
    /// Current phase time.
    #[metrics(unit = Unit::Seconds)]
    pub(crate) phase_time: Gauge<Duration>,
    /// Latency of processing inbound packets.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) message_processing_latency: Family<ProcessingLatencyLabels, Histogram<Duration>>,
    /// Inbound packets which were dropped, by reason.
    pub(crate) rejected_messages: Family<RejectionLabels, Counter>,
    /// Inbound packets held back until their phase. Each packet is counted once.
    #[metrics(labels = ["packet"])]
    pub(crate) deferred_messages: LabeledFamily<PacketLabel, Counter>,
    /// Blocks committed by this node.
    pub(crate) committed_blocks: Counter,
    /// Rounds which ended without a commit.
    pub(crate) round_changes: Counter,
    /// Latency from the round start to the commit.
    #[metrics(buckets = Buckets::exponential(0.01..=60.0, 1.5), unit = Unit::Seconds)]
    pub(crate) commit_latency: Histogram<Duration>,
}

impl WeightedVotingMetrics {
    pub(crate) fn set_phase(&self, phase: CommitteePhase) {
        self.phase.set(phase as u64);
    }
}

/// Global instance of [`WeightedVotingMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<WeightedVotingMetrics> = vise::Global::new();
