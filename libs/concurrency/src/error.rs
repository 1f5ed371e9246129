//! Structured counterpart of `anyhow::Context`.
use std::fmt::Display;

/// Adds context to errors which carry an `anyhow::Error` internally,
/// leaving their other variants untouched.
///
/// Prefer `wrap()` over `anyhow::Context::context()` for such types:
/// the latter erases the variant and turns everything into an internal error.
pub trait Wrap: Sized {
    /// Appends context `c` to the error.
    fn wrap<C: Display + Send + Sync + 'static>(self, c: C) -> Self {
        self.with_wrap(|| c)
    }

    /// Appends context computed lazily by `f`.
    fn with_wrap<C: Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self;
}

impl Wrap for anyhow::Error {
    fn with_wrap<C: Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self {
        self.context(f())
    }
}

impl<T, E: Wrap> Wrap for Result<T, E> {
    fn with_wrap<C: Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self {
        self.map_err(|err| err.with_wrap(f))
    }
}
