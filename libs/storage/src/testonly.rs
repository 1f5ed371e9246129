//! Test-only utilities.
use crate::ViewSequenceEntry;
use fastfinality_roles::{
    chain::Height,
    dbrb::{testonly::views_with_departures, Sequence},
    harvester::SecretKey,
};
use rand::Rng;

/// Sequence of `len` views, each with one more departure than the previous.
pub fn random_sequence(rng: &mut impl Rng, len: usize) -> Sequence {
    let keys: Vec<SecretKey> = (0..len.max(1)).map(|_| rng.gen()).collect();
    let mut views = views_with_departures(&keys);
    views.truncate(len);
    Sequence::from_views(views).unwrap()
}

/// Entry with a random hash and a sequence of `len` views.
pub fn random_entry(rng: &mut impl Rng, len: usize, end: Height) -> ViewSequenceEntry {
    ViewSequenceEntry::new(rng.gen(), random_sequence(rng, len), end)
}
