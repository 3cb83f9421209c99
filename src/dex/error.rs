use std::fmt;
use thiserror::Error;

macro_rules! err {
    ($kind:ident, $msg:literal) => {
        $crate::dex::error::DexError::new($crate::dex::error::DexErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::dex::error::DexError::new($crate::dex::error::DexErrorKind::$kind, format!($fmtstr, $($args)*))
    };
}

macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err(err!($kind, $msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err(err!($kind, $fmtstr, $($args)*))
    };
}

/// Broad classification of a [`DexError`], so callers can match on the failure
/// without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DexErrorKind {
    #[error("truncated input")]
    TruncatedInput,
    #[error("malformed varint")]
    MalformedVarint,
    #[error("unresolved reference")]
    UnresolvedReference,
    #[error("index out of range")]
    IndexOutOfRange,
    #[error("format mismatch")]
    FormatMismatch,
    #[error("i/o error")]
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexError
{
    kind: DexErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub fn new(kind: DexErrorKind, msg: impl Into<String>) -> Self
    {
        DexError {
            kind,
            msg: msg.into(),
            contexts: Vec::new(),
        }
    }

    pub fn with_context(base: DexError, context: impl Into<String>) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context.into());
        DexError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> DexErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }

    /// Structural path outward from the failure point, innermost first.
    pub fn contexts(&self) -> &[String]
    {
        &self.contexts
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}: {}", self.kind, self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}

impl From<std::io::Error> for DexError
{
    fn from(e: std::io::Error) -> Self
    {
        DexError::new(DexErrorKind::Io, e.to_string())
    }
}

/// Attach a context string to the error of a `Result` as it propagates outward.
pub trait ResultExt<T>
{
    fn context<F, S>(self, f: F) -> Result<T, DexError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T, DexError>
{
    fn context<F, S>(self, f: F) -> Result<T, DexError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| DexError::with_context(e, f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_contexts_outward() {
        let e = DexError::new(DexErrorKind::TruncatedInput, "need 4 bytes at 0x70");
        let e = DexError::with_context(e, "try item #0");
        let e = DexError::with_context(e, "code item #2");
        assert_eq!(
            e.to_string(),
            "truncated input: need 4 bytes at 0x70 for try item #0 of code item #2"
        );
        assert_eq!(e.kind(), DexErrorKind::TruncatedInput);
        assert_eq!(e.contexts().len(), 2);
    }

    #[test]
    fn result_context_preserves_kind() {
        let r: Result<(), DexError> = Err(err!(FormatMismatch, "bad magic {:02x}", 0x7f));
        let e = r.context(|| "header").unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::FormatMismatch);
        assert_eq!(e.message(), "bad magic 7f");
    }
}
