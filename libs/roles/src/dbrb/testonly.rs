//! Test-only utilities.
use super::{InstallMessageData, Sequence, View};
use crate::harvester::SecretKey;

/// A chain of views: the first with all of `keys` joined, and every next one with
/// the next key leaving, keeping at least one member.
pub fn views_with_departures(keys: &[SecretKey]) -> Vec<View> {
    let mut view = View::joined(keys.iter().map(SecretKey::public));
    let mut views = vec![view.clone()];
    for key in keys.iter().skip(1) {
        view.insert(key.public(), super::MembershipChange::Leave);
        views.push(view.clone());
    }
    views
}

/// Install message replacing `replaced` with `converged`, certified by every key of `signers`.
pub fn certified_install(
    replaced: View,
    converged: Sequence,
    signers: &[SecretKey],
) -> InstallMessageData {
    let mut data = InstallMessageData {
        most_recent_view: converged.maybe_most_recent().cloned().unwrap_or_default(),
        converged_sequence: converged,
        replaced_view: replaced,
        converged_signatures: Default::default(),
    };
    let hash = data.converged_sequence.hash().unwrap();
    for key in signers {
        data.converged_signatures.insert(key.public(), key.sign(&hash.0));
    }
    data
}
