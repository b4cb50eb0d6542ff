/*
 * This file is part of meshreg.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The crate-wide error kind and the result alias built from it.
//!
//! [`ErrorKind`] is the fixed vocabulary a caller can match on; [`Error`]
//! wraps it together with free-form context for logging. Most of the
//! public surface (handles, registry resolution) never returns an
//! `Error` at all: those operations report through the error log hook
//! (`crate::util::errorhook`) instead and hand back a zero value.

use std::{fmt, io::Error as IoError};

/// A classification of everything that can go wrong, independent of how
/// the caller finds out about it (returned `Result`, or routed through
/// the error log hook).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    Ok,
    Info,
    Warning,
    Undef,
    CreateError,
    NotFound,
    NotOpen,
    AlreadyExist,
    AlreadyOpen,
    Retired,
    FolderNotOpen,
    ItemNotOpen,
    ItemNotSet,
    ConnectionError,
    RecUnknown,
    RpcInvokeError,
    RpcReceiveError,
    LoginBad,
    RecNotExpected,
    OpNotAllowed,
    NotMainThread,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Undef => "undefined",
            Self::CreateError => "create error",
            Self::NotFound => "not found",
            Self::NotOpen => "not open",
            Self::AlreadyExist => "already exists",
            Self::AlreadyOpen => "already open",
            Self::Retired => "retired",
            Self::FolderNotOpen => "folder not open",
            Self::ItemNotOpen => "item not open",
            Self::ItemNotSet => "item not set",
            Self::ConnectionError => "connection error",
            Self::RecUnknown => "unrecognised record",
            Self::RpcInvokeError => "rpc invoke error",
            Self::RpcReceiveError => "rpc receive error",
            Self::LoginBad => "bad login",
            Self::RecNotExpected => "record not expected",
            Self::OpNotAllowed => "operation not allowed",
            Self::NotMainThread => "not main thread",
        };
        write!(f, "{s}")
    }
}

/// An error with enough context to be useful in a log line or a `?`
/// chain. Carries an [`ErrorKind`] plus optional free-form context and an
/// optional wrapped I/O error.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    io: Option<IoError>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            io: None,
        }
    }
    pub fn with_context(kind: ErrorKind, context: impl ToString) -> Self {
        Self {
            kind,
            context: Some(context.to_string()),
            io: None,
        }
    }
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        if let Some(io) = &self.io {
            write!(f, " ({io})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(io: IoError) -> Self {
        Self {
            kind: ErrorKind::ConnectionError,
            context: None,
            io: Some(io),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Standard result alias for operations that are allowed to fail hard
/// (bind a socket, parse a config file, decode a wire frame).
pub type LinkResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = Error::with_context(ErrorKind::NotFound, "//a/b");
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert_eq!(e.to_string(), "not found: //a/b");
    }
}
