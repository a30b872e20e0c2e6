use std::fmt;

pub type Result<T, E = RegattaError> = std::result::Result<T, E>;

/// Broad classification for an error.
///
/// Most call sites only care that an error happened, but the engine needs to
/// distinguish a few classes: type errors and schema errors must be raised
/// before any communication happens, overflow is data-dependent and goes
/// through the collective failure path, and peer failures mark errors that
/// originated on some other rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Function not defined for the given data type.
    InvalidType,
    /// Arithmetic overflow, e.g. a decimal sum exceeding its declared
    /// precision.
    Overflow,
    /// Bad column reference, duplicate output name, arity mismatch.
    InvalidSchema,
    /// Another rank failed; this rank is raising to avoid deadlocking on a
    /// collective the failed rank will never reach.
    PeerFailure,
    /// Feature not yet implemented.
    NotImplemented,
    /// Catch-all.
    Internal,
}

#[derive(Debug)]
pub struct RegattaError {
    inner: Box<ErrorInner>,
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    msg: String,
    /// Key/value pairs appended to the message on display.
    fields: Vec<(&'static str, String)>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RegattaError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        RegattaError {
            inner: Box::new(ErrorInner {
                kind,
                msg: msg.into(),
                fields: Vec::new(),
                source: None,
            }),
        }
    }

    pub fn with_source(
        msg: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RegattaError {
            inner: Box::new(ErrorInner {
                kind: ErrorKind::Internal,
                msg: msg.into(),
                fields: Vec::new(),
                source: Some(source),
            }),
        }
    }

    pub fn with_field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key, value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }
}

impl fmt::Display for RegattaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        if !self.inner.fields.is_empty() {
            write!(f, " (")?;
            for (idx, (key, value)) in self.inner.fields.iter().enumerate() {
                if idx != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}: {value}")?;
            }
            write!(f, ")")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RegattaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source.as_ref().map(|s| s.as_ref() as _)
    }
}

impl From<std::str::Utf8Error> for RegattaError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::with_source("Invalid utf8", Box::new(value))
    }
}

impl From<std::num::TryFromIntError> for RegattaError {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self::with_source("Integer conversion out of range", Box::new(value))
    }
}

/// Add context to errors as they bubble up.
pub trait ResultExt<T, E> {
    fn context(self, msg: &'static str) -> Result<T>;
    fn context_fn<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| RegattaError::with_source(msg, Box::new(e)))
    }

    fn context_fn<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| RegattaError::with_source(f(), Box::new(e)))
    }
}

impl<T> ResultExt<T, ()> for Option<T> {
    fn context(self, msg: &'static str) -> Result<T> {
        self.ok_or_else(|| RegattaError::new(msg))
    }

    fn context_fn<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| RegattaError::new(f()))
    }
}

#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        return Err($crate::RegattaError::with_kind(
            $crate::ErrorKind::NotImplemented,
            format!("Not yet implemented: {msg}"),
        ));
    }};
}
