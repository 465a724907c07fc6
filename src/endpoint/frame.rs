// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Length-prefix TCP framing.
//!
//! Adapted from this codebase's usual incremental frame codec shape (an
//! explicit read-state enum driven by repeated non-blocking reads), but with
//! a drain-and-discard policy for oversized frames instead of treating them
//! as a connection-fatal error: the declared length is read, that many bytes
//! are consumed and thrown away, and the connection stays open for the next
//! frame.

use crate::error::{Error, Result};
use std::io::{self, Read};

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
enum ReadState {
    Length { bytes_read: usize },
    Body { expected_len: usize, bytes_read: usize },
    Draining { remaining: usize },
}

/// Incremental TCP frame reader bound to one connection's lifetime.
pub struct FrameReader {
    state: ReadState,
    header_buf: [u8; LENGTH_PREFIX_SIZE],
    body_buf: Vec<u8>,
    scratch: [u8; 4096],
    max_len: usize,
}

impl FrameReader {
    pub fn new(max_len: usize) -> Self {
        Self {
            state: ReadState::Length { bytes_read: 0 },
            header_buf: [0u8; LENGTH_PREFIX_SIZE],
            body_buf: Vec::new(),
            scratch: [0u8; 4096],
            max_len,
        }
    }

    pub fn reset(&mut self) {
        self.state = ReadState::Length { bytes_read: 0 };
    }

    /// Pull as many complete frames as are currently available without
    /// blocking. Returns one frame per call; call again (while the socket is
    /// still readable) to drain further frames already buffered by the OS.
    ///
    /// `Ok(None)` means "no complete frame right now". Finishing a drain of
    /// an oversized frame does not return `Ok(None)` by itself: the loop
    /// moves straight on to the next frame's length header, so a
    /// well-formed message already buffered behind an oversized one in the
    /// same read is not left stranded until the next readiness event.
    pub fn try_read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                ReadState::Length { bytes_read } => {
                    match reader.read(&mut self.header_buf[bytes_read..LENGTH_PREFIX_SIZE]) {
                        Ok(0) => return Err(Error::Io(eof("connection closed"))),
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < LENGTH_PREFIX_SIZE {
                                self.state = ReadState::Length { bytes_read: total };
                                continue;
                            }
                            let len = u32::from_be_bytes(self.header_buf) as usize;
                            self.state = if len > self.max_len {
                                ReadState::Draining { remaining: len }
                            } else {
                                self.body_buf.resize(len, 0);
                                ReadState::Body {
                                    expected_len: len,
                                    bytes_read: 0,
                                }
                            };
                        }
                        Err(e) if would_block_or_retry(&e) => {
                            self.state = ReadState::Length { bytes_read };
                            return Ok(None);
                        }
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
                ReadState::Body {
                    expected_len,
                    bytes_read,
                } => {
                    match reader.read(&mut self.body_buf[bytes_read..expected_len]) {
                        Ok(0) => return Err(Error::Io(eof("connection closed mid-frame"))),
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < expected_len {
                                self.state = ReadState::Body {
                                    expected_len,
                                    bytes_read: total,
                                };
                                continue;
                            }
                            self.state = ReadState::Length { bytes_read: 0 };
                            return Ok(Some(std::mem::take(&mut self.body_buf)));
                        }
                        Err(e) if would_block_or_retry(&e) => {
                            self.state = ReadState::Body {
                                expected_len,
                                bytes_read,
                            };
                            return Ok(None);
                        }
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
                ReadState::Draining { remaining } => {
                    let take = remaining.min(self.scratch.len());
                    match reader.read(&mut self.scratch[..take]) {
                        Ok(0) => return Err(Error::Io(eof("connection closed while draining"))),
                        Ok(n) => {
                            let left = remaining - n;
                            if left == 0 {
                                self.state = ReadState::Length { bytes_read: 0 };
                                continue;
                            }
                            self.state = ReadState::Draining { remaining: left };
                        }
                        Err(e) if would_block_or_retry(&e) => {
                            self.state = ReadState::Draining { remaining };
                            return Ok(None);
                        }
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
            }
        }
    }
}

fn would_block_or_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn eof(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}
