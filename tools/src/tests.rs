use crate::{decode_json, encode_json, localnet, AppConfig, DeparturesConfig, LeaderSelection};
use assert_matches::assert_matches;
use fastfinality_concurrency::{ctx, testonly::abort_on_panic};
use fastfinality_crypto::TextFmt as _;
use fastfinality_roles::{chain::Height, harvester::SecretKey};
use pretty_assertions::assert_eq;
use rand::Rng as _;
use tempfile::TempDir;

#[test]
fn config_with_defaults() {
    let rng = &mut ctx::test_root().rng();
    let keys: Vec<SecretKey> = (0..2).map(|_| rng.gen()).collect();
    let json = format!(
        r#"{{
            "members": [
                {{ "secret_key": "{}", "weight": 3 }},
                {{ "secret_key": "{}", "weight": 1 }}
            ],
            "latency_millis": 20,
            "target_height": 5
        }}"#,
        keys[0].encode(),
        keys[1].encode()
    );
    let cfg: AppConfig = decode_json(&json).unwrap();
    cfg.validate().unwrap();
    assert_eq!(fastfinality_bft::NetworkConfig::default(), cfg.network);
    assert_eq!(LeaderSelection::RoundRobin, cfg.leader_selection);
    assert_eq!(None, cfg.departures);
    assert_eq!(keys[0].public(), cfg.members[0].secret_key.public());
    assert_eq!(4, cfg.committee().unwrap().total_weight());

    let encoded = encode_json(&cfg).unwrap();
    assert!(encoded.contains(&keys[1].encode()));
}

#[test]
fn config_rejects_unknown_fields_and_bad_keys() {
    let rng = &mut ctx::test_root().rng();
    let cfg = AppConfig::generate(rng, 1);
    let mut json: serde_json::Value = serde_json::from_str(&encode_json(&cfg).unwrap()).unwrap();
    json["gossip_peers"] = 3.into();
    assert_matches!(decode_json::<AppConfig>(&json.to_string()), Err(_));

    let mut json: serde_json::Value = serde_json::from_str(&encode_json(&cfg).unwrap()).unwrap();
    json["members"][0]["secret_key"] = "harvester:public:ed25519:00".into();
    assert_matches!(decode_json::<AppConfig>(&json.to_string()), Err(_));
}

#[test]
fn config_validation() {
    let rng = &mut ctx::test_root().rng();
    let mut cfg = AppConfig::generate(rng, 3);
    cfg.validate().unwrap();

    cfg.departures = Some(DeparturesConfig {
        at_height: 3,
        members: 3,
    });
    assert_matches!(cfg.validate(), Err(_));

    cfg.departures = None;
    cfg.target_height = Height::GENESIS.0;
    assert_matches!(cfg.validate(), Err(_));

    let mut cfg = AppConfig::generate(rng, 3);
    cfg.members[1].weight = 0;
    assert_matches!(cfg.validate(), Err(_));

    let mut cfg = AppConfig::generate(rng, 3);
    let duplicate = cfg.members[0].clone();
    cfg.members.push(duplicate);
    assert_matches!(cfg.validate(), Err(_));
}

#[test]
fn config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("localnet.json");
    let cfg = AppConfig::generate(&mut ctx::test_root().rng(), 4);
    cfg.write(&path).unwrap();
    let got = AppConfig::read(&path).unwrap();
    assert_eq!(encode_json(&cfg).unwrap(), encode_json(&got).unwrap());
    assert_matches!(AppConfig::read(&dir.path().join("missing.json")), Err(_));
}

#[tokio::test(start_paused = true)]
async fn localnet_reaches_target_height() {
    abort_on_panic();
    let ctx = &ctx::test_root();
    let mut cfg = AppConfig::generate(&mut ctx.rng(), 4);
    cfg.target_height = 5;
    let outcome = localnet::run(ctx, &cfg).await.unwrap();
    let want: Vec<_> = outcome.chains[0].blocks()[..5].iter().map(|b| b.hash()).collect();
    for chain in &outcome.chains {
        assert!(chain.head_height() >= Height(5));
        let got: Vec<_> = chain.blocks()[..5].iter().map(|b| b.hash()).collect();
        assert_eq!(want, got);
    }
    for view_sequences in &outcome.view_sequences {
        assert!(view_sequences.view().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn departed_member_leaves_the_committee() {
    abort_on_panic();
    let ctx = &ctx::test_root();
    let dir = TempDir::new().unwrap();
    let mut cfg = AppConfig::generate(&mut ctx.rng(), 4);
    cfg.target_height = 8;
    cfg.departures = Some(DeparturesConfig {
        at_height: 3,
        members: 1,
    });
    cfg.database = Some(dir.path().to_path_buf());
    let departed = cfg.members[3].secret_key.public();

    let outcome = localnet::run(ctx, &cfg).await.unwrap();
    for view_sequences in &outcome.view_sequences {
        let view = view_sequences.view().get_latest_view();
        assert!(!view.is_member(&departed));
        assert!(view.is_member(&cfg.members[0].secret_key.public()));
    }
    // The install message arrives during the round after `at_height`.
    for block in &outcome.chains[0].blocks()[5..8] {
        assert_ne!(departed, block.header.signer);
        assert!(block.cosignatures.iter().all(|c| c.signer != departed));
    }

    // The installed views survive a restart.
    cfg.departures = None;
    let outcome = localnet::run(ctx, &cfg).await.unwrap();
    for view_sequences in &outcome.view_sequences {
        assert_eq!(1, view_sequences.view().len());
        assert!(!view_sequences.view().get_latest_view().is_member(&departed));
    }
    for block in &outcome.chains[0].blocks()[1..8] {
        assert!(block.cosignatures.iter().all(|c| c.signer != departed));
    }
}
