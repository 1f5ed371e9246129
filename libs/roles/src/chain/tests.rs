use super::{testonly::*, *};
use crate::{codec::Reader, harvester::SecretKey};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rand::Rng as _;

fn setup() -> (rand::rngs::ThreadRng, SecretKey, Block) {
    let mut rng = rand::thread_rng();
    let key: SecretKey = rng.gen();
    let block = make_block(&mut rng, &key, Height(5), Timestamp(1_000));
    (rng, key, block)
}

#[test]
fn block_header_layout() {
    let (_, _, block) = setup();
    assert_eq!(block.header_data().len(), BLOCK_HEADER_SIZE - 68);
    let encoded = block.encode().unwrap();
    assert_eq!(encoded.len(), block.size());
    let mut r = Reader::new(&encoded);
    assert_eq!(r.read_u32().unwrap() as usize, block.size());
    assert_eq!(r.read_signature().unwrap(), block.signature);
    assert_eq!(&encoded[68..BLOCK_HEADER_SIZE], &block.header_data()[..]);
}

#[test]
fn block_decoding_checks_sizes() {
    let (mut rng, key, mut block) = setup();
    let registry = test_registry();
    block.cosignatures.push(block.cosign(&rng.gen()));
    block.cosignatures.push(block.cosign(&key));
    let encoded = block.encode().unwrap();
    assert_eq!(block, Block::decode(&encoded, &registry).unwrap());

    // Truncated cosignature.
    let mut bad = encoded.clone();
    bad.truncate(bad.len() - 10);
    assert!(Block::decode(&bad, &registry).is_err());

    // Declared size doesn't match.
    let mut bad = encoded.clone();
    bad.push(0);
    assert!(Block::decode(&bad, &registry).is_err());

    // Transactions of unregistered types.
    let with_tx = Block::sign(&key, block.header.clone(), vec![rng.gen()]);
    let encoded = with_tx.encode().unwrap();
    assert!(Block::decode(&encoded, &registry).is_ok());
    assert!(Block::decode(&encoded, &TransactionRegistry::default()).is_err());
}

#[test]
fn block_signatures() {
    let (mut rng, key, block) = setup();
    block.verify_signature().unwrap();
    assert_eq!(block.header.signer, key.public());
    assert_eq!(block.header.transactions_hash, transactions_hash(&block.transactions));

    let cosigner: SecretKey = rng.gen();
    let cosignature = block.cosign(&cosigner);
    block.verify_cosignature(&cosignature).unwrap();

    let mut other = block.clone();
    other.header.height = other.header.height.next();
    assert!(other.verify_signature().is_err());
    assert!(other.verify_cosignature(&cosignature).is_err());
    assert_ne!(block.hash(), other.hash());
}

#[test]
fn cosignatures_do_not_change_block_hash() {
    let (mut rng, _, block) = setup();
    let mut cosigned = block.clone();
    cosigned.cosignatures.push(block.cosign(&rng.gen()));
    assert_eq!(block.hash(), cosigned.hash());
}

#[test]
fn registry_rejects_duplicates_and_unknown_types() {
    let mut registry = test_registry();
    assert_matches!(
        registry.register(BodySizePlugin {
            entity_type: TEST_ENTITY_TYPE,
            body_size: 0..=1,
        }),
        Err(_)
    );
    let tx = Transaction {
        entity_type: TEST_ENTITY_TYPE,
        body: vec![],
    };
    assert!(!registry.is_size_valid(&tx));
    let tx = Transaction {
        entity_type: TEST_ENTITY_TYPE + 1,
        body: vec![1],
    };
    assert!(!registry.is_size_valid(&tx));
}

#[test]
fn timestamp_conversion() {
    let ts = Timestamp(1_704_067_200_123);
    assert_eq!(ts, Timestamp::from_utc(ts.to_utc()));
    assert_eq!(ts.add_millis(7).millis_since(ts), 7);
    assert_eq!(ts.millis_since(ts.add_millis(7)), 0);
}
