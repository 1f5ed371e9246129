//! RocksDB persistence of the view sequence cache.
//!
//! Every committed [`CacheState`] is saved as a whole in a single write batch, so the database
//! always holds a state that was visible to the readers of the cache.
use crate::{
    cache::CacheState,
    entry::{LoadError, MessageHashEntry, ViewSequenceEntry},
    metrics,
};
use anyhow::Context as _;
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{chain::Height, codec::Reader};
use std::{
    fmt,
    path::Path,
    sync::{Arc, PoisonError, RwLock},
};

/// Enum used to represent a key in the database. The first byte separates the key spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DatabaseKey {
    /// Latest -> MessageHashEntry
    Latest,
    /// Entry(hash) -> ViewSequenceEntry
    Entry(Hash256),
    /// Billing(height, hash) -> ()
    Billing(Height, Hash256),
    /// Removal(height, hash) -> ()
    Removal(Height, Hash256),
}

impl DatabaseKey {
    const LATEST: u8 = MessageHashEntry::KEY;
    const ENTRY: u8 = 1;
    const BILLING: u8 = 2;
    const REMOVAL: u8 = 3;
    /// Upper bound (exclusive) of all the keys.
    const END: u8 = 4;

    /// Encodes this key for usage as a RocksDB key.
    /// Heights are big endian, so that markers are ordered by height.
    fn encode_key(&self) -> Vec<u8> {
        let mut key = vec![];
        match self {
            Self::Latest => key.push(Self::LATEST),
            Self::Entry(hash) => {
                key.push(Self::ENTRY);
                key.extend_from_slice(&hash.0);
            }
            Self::Billing(height, hash) | Self::Removal(height, hash) => {
                key.push(if matches!(self, Self::Billing(..)) {
                    Self::BILLING
                } else {
                    Self::REMOVAL
                });
                key.extend_from_slice(&height.0.to_be_bytes());
                key.extend_from_slice(&hash.0);
            }
        }
        key
    }

    fn decode_key(raw: &[u8]) -> anyhow::Result<Self> {
        let (&tag, rest) = raw.split_first().context("empty key")?;
        let mut r = Reader::new(rest);
        let key = match tag {
            Self::LATEST => Self::Latest,
            Self::ENTRY => Self::Entry(r.read_hash()?),
            Self::BILLING | Self::REMOVAL => {
                let height = Height(u64::from_be_bytes(r.read_array()?));
                let hash = r.read_hash()?;
                if tag == Self::BILLING {
                    Self::Billing(height, hash)
                } else {
                    Self::Removal(height, hash)
                }
            }
            _ => anyhow::bail!("unknown key tag {tag}"),
        };
        r.finish()?;
        Ok(key)
    }
}

/// RocksDB store of the view sequence cache.
#[derive(Clone)]
pub struct RocksDbStore(Arc<RwLock<rocksdb::DB>>);

impl fmt::Debug for RocksDbStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("RocksDbStore")
    }
}

impl RocksDbStore {
    /// Opens the database at `path`, creating it if missing.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let mut options = rocksdb::Options::default();
        options.create_missing_column_families(true);
        options.create_if_missing(true);
        let path = path.to_owned();
        let db = tokio::task::spawn_blocking(move || {
            rocksdb::DB::open(&options, path).context("Failed opening RocksDB")
        })
        .await
        .context("join")??;
        Ok(Self(Arc::new(RwLock::new(db))))
    }

    /// Replaces the stored state with `state`.
    #[tracing::instrument(level = "debug", skip_all, fields(entries = state.len()))]
    pub async fn save(&self, state: Arc<CacheState>) -> anyhow::Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.save_blocking(&state))
            .await
            .context("join")?
    }

    /// Loads the stored state. Every entry is revalidated, and a broken view sequence
    /// fails the load with [`LoadError::CorruptedSequence`].
    pub async fn load(&self) -> Result<CacheState, LoadError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.load_blocking())
            .await
            .context("join")?
    }

    fn save_blocking(&self, state: &CacheState) -> anyhow::Result<()> {
        let latency = metrics::ROCKSDB.save_latency.start();
        let mut batch = rocksdb::WriteBatch::default();
        batch.delete_range([DatabaseKey::LATEST], [DatabaseKey::END]);
        if let Some(latest) = state.latest() {
            batch.put(DatabaseKey::Latest.encode_key(), latest.encode());
        }
        for entry in state.iter() {
            let value = entry
                .encode()
                .with_context(|| format!("entry {}", entry.hash()))?;
            batch.put(DatabaseKey::Entry(*entry.hash()).encode_key(), value);
        }
        for (height, hashes) in &state.billing {
            for hash in hashes {
                batch.put(DatabaseKey::Billing(*height, *hash).encode_key(), b"");
            }
        }
        for (height, hashes) in &state.removal {
            for hash in hashes {
                batch.put(DatabaseKey::Removal(*height, *hash).encode_key(), b"");
            }
        }
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .write(batch)
            .context("Failed writing view sequences to database")?;
        latency.observe();
        Ok(())
    }

    fn load_blocking(&self) -> Result<CacheState, LoadError> {
        let latency = metrics::ROCKSDB.load_latency.start();
        let db = self.0.read().unwrap_or_else(PoisonError::into_inner);
        let mut state = CacheState::default();
        for item in db.iterator(rocksdb::IteratorMode::Start) {
            let (key, value) = item.context("RocksDB error iterating over view sequences")?;
            match DatabaseKey::decode_key(&key)? {
                DatabaseKey::Latest => {
                    state.latest = Some(MessageHashEntry::decode(&value).context("latest")?);
                }
                DatabaseKey::Entry(hash) => {
                    let entry = ViewSequenceEntry::decode(&value)?;
                    if *entry.hash() != hash {
                        return Err(anyhow::format_err!(
                            "entry stored under {hash} has hash {}",
                            entry.hash()
                        )
                        .into());
                    }
                    state.entries.insert(hash, entry);
                }
                DatabaseKey::Billing(height, hash) => {
                    state.billing.entry(height).or_default().insert(hash);
                }
                DatabaseKey::Removal(height, hash) => {
                    state.removal.entry(height).or_default().insert(hash);
                }
            }
        }
        latency.observe();
        tracing::debug!("loaded {} view sequences", state.len());
        Ok(state)
    }
}
