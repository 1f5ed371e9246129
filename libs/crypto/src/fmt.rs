//! Traits for text (human readable) and byte encodings of crypto primitives.
use anyhow::Context as _;

/// Text being parsed by `TextFmt::decode`.
/// Keeps the original text next to the unparsed remainder, so that errors can point
/// at the place where parsing failed.
pub struct Text<'a> {
    context: &'a str,
    inner: &'a str,
}

impl<'a> Text<'a> {
    /// Wraps a string for parsing.
    pub fn new(s: &'a str) -> Self {
        Self {
            context: s,
            inner: s,
        }
    }

    /// Part of the text parsed so far.
    fn parsed(&self) -> &'a str {
        // `inner` is always a suffix of `context`, so this cannot split a UTF-8 character.
        &self.context[..self.context.len() - self.inner.len()]
    }

    /// Strips a fixed prefix.
    pub fn strip(mut self, prefix: &str) -> anyhow::Result<Self> {
        let Some(inner) = self.inner.strip_prefix(prefix) else {
            anyhow::bail!("{}: expected {prefix} got {}", self.parsed(), self.inner);
        };
        self.inner = inner;
        Ok(self)
    }

    /// Parses the remainder as hex and decodes the bytes with `ByteFmt`.
    pub fn decode_hex<T: ByteFmt>(self) -> anyhow::Result<T> {
        let raw = hex::decode(self.inner).with_context(|| self.parsed().to_owned())?;
        ByteFmt::decode(&raw).with_context(|| self.parsed().to_owned())
    }

    /// `t.decode::<T>()` is sugar for `<T as TextFmt>::decode(t)`.
    pub fn decode<T: TextFmt>(self) -> anyhow::Result<T> {
        TextFmt::decode(self)
    }
}

/// Human-readable encoding, used for keys in config files and in logs.
///
/// `decode(encode(x)) == x` has to hold, and encodings of different kinds of objects
/// should not collide: a secret key must not parse as a public key.
pub trait TextFmt: Sized {
    /// Decodes the object from text.
    fn decode(text: Text) -> anyhow::Result<Self>;
    /// Encodes the object as text.
    fn encode(&self) -> String;
}

/// Fixed binary encoding. Unlike serde, the layout is defined by the type itself,
/// which matters for anything that gets signed or hashed.
pub trait ByteFmt: Sized {
    /// Decodes the object from bytes.
    fn decode(bytes: &[u8]) -> anyhow::Result<Self>;
    /// Encodes the object to bytes.
    fn encode(&self) -> Vec<u8>;
}
