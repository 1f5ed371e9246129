use super::{Sequence, View};
use crate::{
    codec::Reader,
    harvester::{ProcessId, Signature},
};
use anyhow::Context as _;
use fastfinality_crypto::sha3_256::Hash256;
use std::collections::BTreeMap;

/// Certificate: signatures of processes, keyed by process.
pub type Certificate = BTreeMap<ProcessId, Signature>;

/// Contents of an install message: the sequence the processes converged on, to replace
/// a view, together with the certificate of the converged messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallMessageData {
    /// Most recent view of the converged sequence.
    pub most_recent_view: View,
    /// Sequence converged on to replace `replaced_view`.
    pub converged_sequence: Sequence,
    /// View being replaced.
    pub replaced_view: View,
    /// Signatures of the converged messages over the hash of the converged sequence.
    pub converged_signatures: Certificate,
}

impl InstallMessageData {
    /// Splits an install sequence `replaced view, converged views...`.
    /// Returns `None` unless it has the replaced view and at least one converged view.
    pub fn from_install_sequence(sequence: &Sequence) -> Option<Self> {
        let (replaced_view, converged) = sequence.views().split_first()?;
        let converged_sequence = Sequence::from_views(converged.to_vec())?;
        Some(Self {
            most_recent_view: converged_sequence.maybe_most_recent()?.clone(),
            converged_sequence,
            replaced_view: replaced_view.clone(),
            converged_signatures: Certificate::new(),
        })
    }

    /// Encodes the message data. The certificate goes last, so that [`Self::hash`]
    /// can cover everything before it.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = self.encode_unsigned()?;
        let count = u16::try_from(self.converged_signatures.len()).context("certificate too large")?;
        buf.extend_from_slice(&count.to_le_bytes());
        for (id, sig) in &self.converged_signatures {
            buf.extend_from_slice(id.as_bytes());
            buf.extend_from_slice(&sig.to_bytes());
        }
        Ok(buf)
    }

    fn encode_unsigned(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![];
        self.most_recent_view.encode(&mut buf)?;
        self.replaced_view.encode(&mut buf)?;
        self.converged_sequence.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decodes message data. The converged views have to form a sequence whose most
    /// recent view is `most_recent_view`.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut r = Reader::new(bytes);
        let most_recent_view = View::decode(&mut r).context("most recent view")?;
        let replaced_view = View::decode(&mut r).context("replaced view")?;
        let converged_sequence = Sequence::decode(&mut r).context("converged sequence")?;
        anyhow::ensure!(
            converged_sequence.maybe_most_recent() == Some(&most_recent_view),
            "most recent view does not end the converged sequence"
        );
        let count = r.read_u16()?;
        let mut converged_signatures = Certificate::new();
        for _ in 0..count {
            let id = r.read_public_key()?;
            let sig = r.read_signature()?;
            anyhow::ensure!(
                converged_signatures.insert(id, sig).is_none(),
                "duplicate signer in certificate"
            );
        }
        r.finish()?;
        Ok(Self {
            most_recent_view,
            converged_sequence,
            replaced_view,
            converged_signatures,
        })
    }

    /// Hash identifying the install message. The certificate is not covered.
    pub fn hash(&self) -> anyhow::Result<Hash256> {
        Ok(Hash256::new(&self.encode_unsigned()?))
    }

    /// Checks the certificate: signatures of at least a quorum of the replaced view's
    /// members over the hash of the converged sequence.
    pub fn verify_certificate(&self) -> anyhow::Result<()> {
        let hash = self.converged_sequence.hash()?;
        let mut valid = 0;
        for (id, sig) in &self.converged_signatures {
            anyhow::ensure!(
                self.replaced_view.is_member(id),
                "{id} is not a member of the replaced view"
            );
            id.verify(&hash.0, sig)
                .with_context(|| format!("converged signature of {id}"))?;
            valid += 1;
        }
        let quorum = self.replaced_view.quorum_size();
        anyhow::ensure!(valid >= quorum, "{valid} converged signatures, want {quorum}");
        Ok(())
    }
}
