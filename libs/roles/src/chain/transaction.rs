use crate::codec::Reader;
use fastfinality_crypto::sha3_256::Hash256;
use std::collections::BTreeMap;

/// Size of the transaction header: `u32 size | u16 entity type`.
pub const TRANSACTION_HEADER_SIZE: usize = 6;

/// A transaction embedded in a block. Its body is opaque to consensus;
/// only the per-type size rules of the [`TransactionRegistry`] apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Entity type, selecting the plugin which understands the body.
    pub entity_type: u16,
    /// Type-specific body.
    pub body: Vec<u8>,
}

impl Transaction {
    /// Size of the encoded transaction.
    pub fn size(&self) -> usize {
        TRANSACTION_HEADER_SIZE + self.body.len()
    }

    /// Encodes the transaction.
    pub fn encode(&self, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        let size = u32::try_from(self.size())?;
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.entity_type.to_le_bytes());
        buf.extend_from_slice(&self.body);
        Ok(())
    }

    /// Decodes the next transaction of `r`.
    pub(super) fn decode(r: &mut Reader) -> anyhow::Result<Self> {
        let size = usize::try_from(r.read_u32()?)?;
        anyhow::ensure!(
            size >= TRANSACTION_HEADER_SIZE,
            "transaction size {size} is smaller than its header"
        );
        let entity_type = r.read_u16()?;
        let body = r.read_bytes(size - TRANSACTION_HEADER_SIZE)?.to_vec();
        Ok(Self { entity_type, body })
    }

    /// Hash of the encoded transaction.
    pub fn hash(&self) -> Hash256 {
        let size = u32::try_from(self.size()).unwrap_or(u32::MAX);
        Hash256::from_parts(&[
            &size.to_le_bytes(),
            &self.entity_type.to_le_bytes(),
            &self.body,
        ])
    }
}

/// Handler of a single transaction entity type.
pub trait TransactionPlugin: Send + Sync {
    /// Entity type handled by this plugin.
    fn entity_type(&self) -> u16;
    /// Checks whether the transaction size is valid for its type.
    fn is_size_valid(&self, tx: &Transaction) -> bool;
}

/// Plugin accepting bodies with a size in a fixed range.
#[derive(Debug, Clone)]
pub struct BodySizePlugin {
    /// Entity type handled by this plugin.
    pub entity_type: u16,
    /// Allowed body sizes.
    pub body_size: std::ops::RangeInclusive<usize>,
}

impl TransactionPlugin for BodySizePlugin {
    fn entity_type(&self) -> u16 {
        self.entity_type
    }

    fn is_size_valid(&self, tx: &Transaction) -> bool {
        self.body_size.contains(&tx.body.len())
    }
}

/// Registry of transaction plugins, keyed by entity type.
#[derive(Default)]
pub struct TransactionRegistry {
    plugins: BTreeMap<u16, Box<dyn TransactionPlugin>>,
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.plugins.keys()).finish()
    }
}

impl TransactionRegistry {
    /// Registers a plugin. Fails if its entity type is already taken.
    pub fn register(&mut self, plugin: impl TransactionPlugin + 'static) -> anyhow::Result<()> {
        let entity_type = plugin.entity_type();
        anyhow::ensure!(
            !self.plugins.contains_key(&entity_type),
            "plugin for entity type {entity_type:#06x} already registered"
        );
        self.plugins.insert(entity_type, Box::new(plugin));
        Ok(())
    }

    /// Checks the transaction size with the plugin of its type.
    /// Transactions of unknown types are invalid.
    pub fn is_size_valid(&self, tx: &Transaction) -> bool {
        self.plugins
            .get(&tx.entity_type)
            .is_some_and(|plugin| plugin.is_size_valid(tx))
    }
}
