use super::*;
use assert_matches::assert_matches;
use std::collections::BTreeSet;

/// Membership of plain numbers.
struct Numbers(BTreeSet<u32>);

impl ModificationKind for Numbers {
    type Item = u32;
    type Id = u32;
    const NAME: &'static str = "number";

    fn id(item: &u32) -> u32 {
        *item
    }

    fn is_member(&self, id: &u32) -> bool {
        self.0.contains(id)
    }
}

fn raw(modification_type: ModificationType, item: u32) -> RawModification<u32> {
    RawModification {
        modification_type: modification_type as u8,
        item,
    }
}

#[test]
fn valid_batch() {
    let target = Numbers([1, 2].into());
    let got = validate(&target, [raw(ModificationType::Add, 3), raw(ModificationType::Del, 1)]).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].modification_type, ModificationType::Add);
    assert_eq!(got[1].item, 1);
    assert_eq!(validate(&target, []).unwrap(), vec![]);
}

#[test]
fn invalid_type() {
    let target = Numbers([1].into());
    let batch = [RawModification {
        modification_type: 2,
        item: 5,
    }];
    assert_eq!(validate(&target, batch), Err(Error::InvalidType(2)));
}

#[test]
fn duplicate_in_batch() {
    let target = Numbers([1].into());
    assert_matches!(
        validate(&target, [raw(ModificationType::Add, 4), raw(ModificationType::Add, 4)]),
        Err(Error::DuplicateInBatch { .. })
    );
    assert_matches!(
        validate(&target, [raw(ModificationType::Del, 1), raw(ModificationType::Add, 1)]),
        Err(Error::RedundantAdd { .. })
    );
}

#[test]
fn redundant_modifications() {
    let target = Numbers([1].into());
    assert_matches!(
        validate(&target, [raw(ModificationType::Add, 1)]),
        Err(Error::RedundantAdd { kind: "number", .. })
    );
    assert_matches!(
        validate(&target, [raw(ModificationType::Del, 2)]),
        Err(Error::RedundantRemove { kind: "number", .. })
    );
}
