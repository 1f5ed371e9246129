use fastfinality_crypto::{ed25519, ByteFmt, Text, TextFmt};
use std::{fmt, sync::Arc};

pub use ed25519::InvalidSignatureError;

/// A harvester's secret key.
#[derive(Clone)]
pub struct SecretKey(pub(super) Arc<ed25519::SecretKey>);

impl SecretKey {
    /// Generates a secret key from a cryptographically-secure entropy source.
    pub fn generate() -> Self {
        Self(Arc::new(ed25519::SecretKey::generate()))
    }

    /// Signs a buffer.
    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature(self.0.sign(data))
    }

    /// Get the public key corresponding to this secret key.
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public())
    }
}

impl ByteFmt for SecretKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&*self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(|k| Self(Arc::new(k)))
    }
}

impl TextFmt for SecretKey {
    fn encode(&self) -> String {
        format!(
            "harvester:secret:ed25519:{}",
            hex::encode(ByteFmt::encode(self))
        )
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("harvester:secret:ed25519:")?.decode_hex()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "<secret for {}>", TextFmt::encode(&self.public()))
    }
}

/// A harvester's public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub(super) ed25519::PublicKey);

/// Identity of a process in the reconfiguration protocol.
pub type ProcessId = PublicKey;

impl PublicKey {
    /// Verifies a signature over `data`.
    pub fn verify(&self, data: &[u8], sig: &Signature) -> Result<(), InvalidSignatureError> {
        self.0.verify(data, &sig.0)
    }

    /// Decodes the fixed-size wire encoding.
    pub fn from_bytes(bytes: &[u8; ed25519::PUBLIC_KEY_LENGTH]) -> anyhow::Result<Self> {
        ed25519::PublicKey::from_bytes(bytes).map(Self)
    }

    /// Fixed-size wire encoding.
    pub fn as_bytes(&self) -> &[u8; ed25519::PUBLIC_KEY_LENGTH] {
        self.0.as_bytes()
    }
}

impl ByteFmt for PublicKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl TextFmt for PublicKey {
    fn encode(&self) -> String {
        format!(
            "harvester:public:ed25519:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("harvester:public:ed25519:")?
            .decode_hex()
            .map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        // Short form for logs.
        fmt.write_str(&hex::encode_upper(&self.as_bytes()[..4]))
    }
}

/// A signature of a harvester.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature(pub(super) ed25519::Signature);

impl Signature {
    /// Decodes the fixed-size wire encoding.
    pub fn from_bytes(bytes: &[u8; ed25519::SIGNATURE_LENGTH]) -> Self {
        Self(ed25519::Signature::from_bytes(bytes))
    }

    /// Fixed-size wire encoding.
    pub fn to_bytes(&self) -> [u8; ed25519::SIGNATURE_LENGTH] {
        self.0.to_bytes()
    }
}

impl ByteFmt for Signature {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, fmt)
    }
}
