// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error type.
//!
//! Mirrors this codebase's usual shape for error enums: a flat `enum`, a
//! hand-written `Display` impl, a blanket `std::error::Error` impl, and
//! `From` conversions for the I/O errors that bubble up from sockets.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by o2lite operations.
#[derive(Debug)]
pub enum Error {
    /// Failed to create or bind a required socket during initialization.
    BindFailed(String),
    /// A socket-level I/O error (connect, send, recv).
    Io(io::Error),
    /// The wire decoder could not parse an inbound message.
    Parse(String),
    /// The wire encoder was asked to build a message it cannot represent.
    Encode(String),
    /// A service name or other configuration value violates a hard limit.
    Config(String),
    /// A discovered candidate's TXT record did not match the O2 process-name format.
    InvalidProcName(String),
    /// Endpoint has no active bridge (TCP connection) for an operation that requires one.
    NotConnected,
    /// The discovery backend failed to start or restart.
    Discovery(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BindFailed(reason) => write!(f, "bind failed: {reason}"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Parse(reason) => write!(f, "parse error: {reason}"),
            Error::Encode(reason) => write!(f, "encode error: {reason}"),
            Error::Config(reason) => write!(f, "configuration error: {reason}"),
            Error::InvalidProcName(name) => write!(f, "invalid o2 process name: {name}"),
            Error::NotConnected => write!(f, "endpoint has no bridge connection"),
            Error::Discovery(reason) => write!(f, "discovery error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
