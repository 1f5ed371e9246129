//! Localnet configuration.
use anyhow::Context as _;
use fastfinality_bft::NetworkConfig;
use fastfinality_roles::{
    chain::Height,
    committee::{Committee, LeaderSelectionMode, WeightedMember},
    harvester::SecretKey,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fs, net::SocketAddr, path::Path, path::PathBuf};

/// Decodes a value from JSON, rejecting trailing input.
pub fn decode_json<T: serde::de::DeserializeOwned>(json: &str) -> anyhow::Result<T> {
    let mut d = serde_json::Deserializer::from_str(json);
    let p = T::deserialize(&mut d)?;
    d.end()?;
    Ok(p)
}

/// Encodes a value as pretty-printed JSON.
pub fn encode_json<T: Serialize>(x: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(x)?)
}

/// (De)serializes keys in their text format.
mod text {
    use fastfinality_crypto::{Text, TextFmt};
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub(super) fn serialize<T: TextFmt, S: Serializer>(x: &T, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&x.encode())
    }

    pub(super) fn deserialize<'de, T: TextFmt, D: Deserializer<'de>>(d: D) -> Result<T, D::Error> {
        let s = String::deserialize(d)?;
        Text::new(&s)
            .decode()
            .map_err(|err| D::Error::custom(format!("{err:#}")))
    }
}

/// Committee member run by the localnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Key signing blocks and votes.
    #[serde(with = "text")]
    pub secret_key: SecretKey,
    /// Voting weight.
    pub weight: u64,
}

/// Proposer selection. Sticky selection needs a key and is not offered here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderSelection {
    /// Round-robin over `height + round`.
    #[default]
    RoundRobin,
    /// Weighted pseudo-random.
    Weighted,
}

impl From<LeaderSelection> for LeaderSelectionMode {
    fn from(x: LeaderSelection) -> Self {
        match x {
            LeaderSelection::RoundRobin => Self::RoundRobin,
            LeaderSelection::Weighted => Self::Weighted,
        }
    }
}

/// Members leaving the committee through a DBRB view change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeparturesConfig {
    /// The install message is broadcast once the first node reaches this height.
    pub at_height: u64,
    /// Number of members leaving, counted from the end of `members`.
    pub members: usize,
}

/// Configuration of a local committee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Address serving the metrics for scraping.
    #[serde(default)]
    pub metrics_server_addr: Option<SocketAddr>,
    /// Protocol parameters shared by all the members.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Proposer selection.
    #[serde(default)]
    pub leader_selection: LeaderSelection,
    /// Committee members; each runs a node.
    pub members: Vec<MemberConfig>,
    /// Delay of every packet between two nodes, in milliseconds.
    pub latency_millis: u64,
    /// The localnet stops once every node has committed this height.
    pub target_height: u64,
    /// Optional view change during the run.
    #[serde(default)]
    pub departures: Option<DeparturesConfig>,
    /// Directory persisting the view sequences of the nodes between runs.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

impl AppConfig {
    /// Config of `members` fresh members of weight 1.
    pub fn generate(rng: &mut impl Rng, members: usize) -> Self {
        Self {
            metrics_server_addr: None,
            network: NetworkConfig::default(),
            leader_selection: LeaderSelection::default(),
            members: (0..members)
                .map(|_| MemberConfig {
                    secret_key: rng.gen(),
                    weight: 1,
                })
                .collect(),
            latency_millis: 50,
            target_height: 10,
            departures: None,
            database: None,
        }
    }

    /// Reads and validates the config at `path`.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let cfg = (|| {
            let json = fs::read_to_string(path).context("failed reading file")?;
            decode_json::<Self>(&json).context("failed decoding JSON")
        })()
        .with_context(|| path.display().to_string())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Writes the config to `path`.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, encode_json(self)?).with_context(|| format!("fs::write({path:?})"))
    }

    /// Checks the parameters for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.network.validate().context("network")?;
        anyhow::ensure!(!self.members.is_empty(), "at least one member is required");
        anyhow::ensure!(
            self.target_height > Height::GENESIS.0,
            "target_height has to be above genesis"
        );
        self.committee().context("members")?;
        if let Some(departures) = &self.departures {
            anyhow::ensure!(
                departures.members < self.members.len(),
                "at least one member has to stay"
            );
            anyhow::ensure!(
                departures.at_height > Height::GENESIS.0,
                "departures.at_height has to be above genesis"
            );
        }
        Ok(())
    }

    /// The weighted committee of all the members.
    pub fn committee(&self) -> anyhow::Result<Committee> {
        Committee::new(self.members.iter().map(|m| WeightedMember {
            key: m.secret_key.public(),
            weight: m.weight,
        }))
    }
}
