#![deny(missing_docs)]

//! This crate defines error & result types for drepl.
//!
//! Errors follow the lifetime of a replication graph: structural and configuration errors are
//! raised once while the graph is built, addressing and correspondence errors are raised while
//! serving reads and writes.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{env, fmt, io};

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    #[allow(clippy::panic)]
    fn from(msg: T) -> Self {
        if env::var("DREPL_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The top-level error type for drepl.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum DreplError {
    /// An index is out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Box<Backtrace>),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Box<Backtrace>),
    /// A type, dimension or field correspondence cannot be turned into a block graph.
    #[error("structural error: {0}\nBacktrace:\n{1}")]
    Structural(ErrString, Box<Backtrace>),
    /// A graph was configured with values that can never be served, such as a zero-sized element.
    #[error("configuration error: {0}\nBacktrace:\n{1}")]
    Configuration(ErrString, Box<Backtrace>),
    /// A read or write against a replica's backing bytes came up short.
    #[error("addressing error: {0}\nBacktrace:\n{1}")]
    Addressing(ErrString, Box<Backtrace>),
    /// An array element has no exact counterpart in the view it is read from.
    #[error("no corresponding element: {0}\nBacktrace:\n{1}")]
    NoCorrespondence(ErrString, Box<Backtrace>),
    /// An error annotated with a description of where it happened.
    #[error("{0}: {1}")]
    Context(ErrString, Box<DreplError>),
    /// A wrapper for IO errors.
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// A wrapper for serde_json errors.
    #[cfg(feature = "serde")]
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl DreplError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        DreplError::Context(msg.into(), Box::new(self))
    }

    /// Returns the innermost error, looking through any context wrappers.
    pub fn root(&self) -> &DreplError {
        match self {
            DreplError::Context(_, inner) => inner.root(),
            other => other,
        }
    }
}

impl Debug for DreplError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return drepl errors as their error type.
pub type DreplResult<T> = Result<T, DreplError>;

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[cold]
    #[must_use]
    pub const fn must_use(error: crate::DreplError) -> crate::DreplError {
        error
    }
}

/// Macro to construct an error.
///
/// `drepl_err!(Structural: "...")` picks the variant explicitly, a bare format string
/// produces an [`DreplError::InvalidArgument`].
#[macro_export]
macro_rules! drepl_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::DreplError::OutOfBounds($idx, $start, $stop, Box::new(Backtrace::capture()))
        )
    }};
    (IOError: $err:expr) => {{
        $crate::__private::must_use(
            $crate::DreplError::IOError($err)
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::DreplError::$variant(
                format!($fmt, $($arg),*).into(),
                Box::new(Backtrace::capture()),
            )
        )
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::drepl_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// Macro to return early with an error.
#[macro_export]
macro_rules! drepl_bail {
    ($($tt:tt)+) => {
        return Err($crate::drepl_err!($($tt)+))
    };
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn fails(kind: u8) -> DreplResult<()> {
        match kind {
            0 => drepl_bail!(Structural: "rank {} does not match {}", 1, 2),
            1 => drepl_bail!(Addressing: "short write"),
            2 => drepl_bail!("bad offset {}", 7),
            _ => drepl_bail!(OutOfBounds: 9, 0, 4),
        }
    }

    #[rstest]
    #[case(0, "structural error: rank 1 does not match 2")]
    #[case(1, "addressing error: short write")]
    #[case(2, "bad offset 7")]
    #[case(3, "index 9 out of bounds from 0 to 4")]
    fn bail_formats_message(#[case] kind: u8, #[case] prefix: &str) {
        let err = fails(kind).unwrap_err();
        assert!(err.to_string().starts_with(prefix), "{err}");
    }

    #[test]
    fn context_keeps_root() {
        let err = drepl_err!(NoCorrespondence: "element 3").with_context("view 'soa'");
        assert!(err.to_string().starts_with("view 'soa': no corresponding element"));
        assert!(matches!(err.root(), DreplError::NoCorrespondence(..)));
    }

    #[test]
    fn io_errors_convert() {
        let err: DreplError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, DreplError::IOError(_)));
    }
}
