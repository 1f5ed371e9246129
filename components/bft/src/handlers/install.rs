//! Handler of DBRB install messages: records the installed view sequence.
use super::{Rejection, Severity};
use anyhow::Context as _;
use fastfinality_concurrency::{ctx, error::Wrap};
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{chain::Height, dbrb::InstallMessageData, packet::Packet};
use fastfinality_storage::{ViewSequenceCache, ViewSequenceEntry};

/// Errors that can occur when processing an install message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// This node doesn't track view sequences.
    #[error("view sequences are not tracked")]
    Disabled,
    /// The declared packet size does not match the payload.
    #[error("inconsistent packet size (declared {declared}, actual payload {payload})")]
    InvalidPacketSize {
        /// Declared packet size.
        declared: u32,
        /// Size of the payload.
        payload: usize,
    },
    /// The payload is not a valid install message.
    #[error("malformed install message: {0:#}")]
    Malformed(anyhow::Error),
    /// The certificate of the converged sequence is invalid.
    #[error("invalid certificate: {0:#}")]
    InvalidCertificate(anyhow::Error),
    /// The message was already installed.
    #[error("install message {hash} already installed")]
    AlreadyInstalled {
        /// Hash of the message.
        hash: Hash256,
    },
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for Error {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self {
        match self {
            Error::Internal(err) => Error::Internal(err.with_wrap(f)),
            err => err,
        }
    }
}

impl Rejection for Error {
    fn severity(&self) -> Severity {
        match self {
            Self::Disabled => Severity::Trace,
            Self::AlreadyInstalled { .. } => Severity::Debug,
            _ => Severity::Warn,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::InvalidPacketSize { .. } => "invalid_packet_size",
            Self::Malformed(_) => "malformed",
            Self::InvalidCertificate(_) => "invalid_certificate",
            Self::AlreadyInstalled { .. } => "already_installed",
            Self::Internal(_) => "internal",
        }
    }

    fn into_internal(self) -> Result<ctx::Error, Self> {
        match self {
            Self::Internal(err) => Ok(err),
            err => Err(err),
        }
    }
}

/// Records the sequence of a certified install message, keyed by the message hash.
///
/// `height` is the height being decided, the one following the local chain head. If the
/// sequence extends past the latest installed view, the latest pointer moves to the new
/// entry, and the entry it pointed to ends at `height` and is scheduled for removal there.
/// Every new entry is due for billing at `height`.
pub fn handle(
    height: Height,
    view_sequences: Option<&ViewSequenceCache>,
    packet: &Packet,
) -> Result<(), Error> {
    let view_sequences = view_sequences.ok_or(Error::Disabled)?;
    if !packet.is_size_consistent() {
        return Err(Error::InvalidPacketSize {
            declared: packet.header.size,
            payload: packet.payload.len(),
        });
    }
    let message = InstallMessageData::decode(&packet.payload).map_err(Error::Malformed)?;
    message
        .verify_certificate()
        .map_err(Error::InvalidCertificate)?;
    let hash = message.hash().map_err(Error::Malformed)?;

    let mut delta = view_sequences.create_delta();
    if delta.contains(&hash) {
        return Err(Error::AlreadyInstalled { hash });
    }
    let latest_view = delta.get_latest_view();
    let previous = delta.latest().map(|latest| latest.hash);
    delta
        .insert(ViewSequenceEntry::new(hash, message.converged_sequence, height))
        .context("insert()")
        .map_err(ctx::Error::from)?;
    delta.add_billing(height, hash);
    if latest_view.is_empty() || latest_view < message.most_recent_view {
        if let Some(previous) = previous {
            delta.modify(&previous, |entry| entry.set_end(height));
            delta.add_removal(height, previous);
        }
        delta
            .set_latest(hash)
            .context("set_latest()")
            .map_err(ctx::Error::from)?;
    }
    delta.commit();
    tracing::info!("installed view sequence {hash} at {height:?}");
    Ok(())
}
