// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! O2 binary message encoder/decoder.
//!
//! Wire layout (big-endian throughout):
//!
//! ```text
//! offset  field            size   notes
//! 0       length           4      excludes this field (TCP framing only)
//! 4       flags            4      low bit = TCP(1)/UDP(0)
//! 8       timestamp        8      IEEE 754 double
//! 16      address          var    NUL-terminated, NUL-padded to 4
//! ..      ',' + typespec   var    NUL-terminated, NUL-padded to 4
//! ..      payload          var    one field per type code
//! ```
//!
//! The encoder always builds the length-prefixed form above; [`Encoder::udp_payload`]
//! strips the 4-byte length field for UDP sends, and the decoder always operates on
//! that length-stripped form (which is also what a UDP socket naturally delivers, and
//! what TCP framing delivers once the length prefix has been consumed to know how much
//! to read). So, from the decoder's point of view, flags start at offset 0.

use crate::error::{Error, Result};
use crate::wire::cursor::{Cursor, CursorMut};

/// Which transport a message is destined for / arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    fn flag(self) -> u32 {
        match self {
            Transport::Udp => 0,
            Transport::Tcp => 1,
        }
    }
}

const HEADER_BEFORE_ADDRESS: usize = 16; // length(4) + flags(4) + timestamp(8)

/// Builds one outbound message into a reusable buffer.
///
/// A single `Encoder` is meant to be reused across sends: `start()` resets it.
/// An overflow on any `add_*` call sets a sticky error flag (mirroring the O2
/// wire encoder's "silently drop on overflow" contract) rather than unwinding;
/// callers that want the normal `?`-propagating behavior can still do so, since
/// every `add_*` also returns an `Err`.
pub struct Encoder {
    buf: Vec<u8>,
    offset: usize,
    typespec: String,
    type_idx: usize,
    error: bool,
    transport: Transport,
}

impl Encoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            offset: 0,
            typespec: String::new(),
            type_idx: 0,
            error: false,
            transport: Transport::Udp,
        }
    }

    /// Reset the buffer and write the message header (flags, timestamp,
    /// address, typespec). Must be called before any `add_*`.
    pub fn start(
        &mut self,
        address: &str,
        timestamp: f64,
        typespec: &str,
        transport: Transport,
    ) -> Result<()> {
        self.offset = 0;
        self.error = false;
        self.typespec = typespec.to_string();
        self.type_idx = 0;
        self.transport = transport;

        let mut w = CursorMut::new(&mut self.buf);
        w.set_offset(4); // leave room for the length field, patched in `frame()`
        w.write_u32(transport.flag())?;
        w.write_f64(timestamp)?;
        w.write_cstring(address)?;
        w.write_bytes(b",")?;
        w.write_cstring(typespec)?;
        self.offset = w.offset();
        Ok(())
    }

    fn expect_code(&mut self, want: char) -> Result<()> {
        let actual = self.typespec.as_bytes().get(self.type_idx).copied();
        if actual == Some(want as u8) {
            self.type_idx += 1;
            Ok(())
        } else {
            self.error = true;
            Err(Error::Encode(format!(
                "typespec '{}' expected '{}' at position {}",
                self.typespec, want, self.type_idx
            )))
        }
    }

    fn write(&mut self, f: impl FnOnce(&mut CursorMut) -> Result<()>) -> Result<()> {
        let mut w = CursorMut::new(&mut self.buf);
        w.set_offset(self.offset);
        let res = f(&mut w);
        self.offset = w.offset();
        if res.is_err() {
            self.error = true;
        }
        res
    }

    pub fn add_i32(&mut self, v: i32) -> Result<()> {
        self.expect_code('i')?;
        self.write(|w| w.write_i32(v))
    }

    pub fn add_i64(&mut self, v: i64) -> Result<()> {
        self.expect_code('h')?;
        self.write(|w| w.write_i64(v))
    }

    pub fn add_f32(&mut self, v: f32) -> Result<()> {
        self.expect_code('f')?;
        self.write(|w| w.write_f32(v))
    }

    pub fn add_f64(&mut self, v: f64) -> Result<()> {
        self.expect_code('d')?;
        self.write(|w| w.write_f64(v))
    }

    pub fn add_time(&mut self, v: f64) -> Result<()> {
        self.expect_code('t')?;
        self.write(|w| w.write_f64(v))
    }

    pub fn add_bool(&mut self, v: bool) -> Result<()> {
        self.expect_code('B')?;
        self.write(|w| w.write_i32(i32::from(v)))
    }

    pub fn add_string(&mut self, v: &str) -> Result<()> {
        self.expect_code('s')?;
        self.write(|w| w.write_cstring(v))
    }

    pub fn add_blob(&mut self, v: &[u8]) -> Result<()> {
        self.expect_code('b')?;
        self.write(|w| {
            w.write_u32(v.len() as u32)?;
            w.write_bytes(v)?;
            w.pad_to_4()
        })
    }

    /// True once any `add_*` call has overflowed the buffer or mismatched the
    /// declared typespec.
    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Full TCP frame: 4-byte big-endian length prefix followed by the body.
    pub fn tcp_frame(&mut self) -> Result<&[u8]> {
        let body_len = self
            .offset
            .checked_sub(4)
            .ok_or_else(|| Error::Encode("message shorter than header".into()))?;
        let mut w = CursorMut::new(&mut self.buf);
        w.patch_u32_at(0, body_len as u32)?;
        Ok(&self.buf[..self.offset])
    }

    /// Body only, with the 4-byte length prefix stripped, for a UDP send.
    pub fn udp_payload(&self) -> &[u8] {
        &self.buf[4..self.offset]
    }
}

/// Parses one inbound message (length prefix already stripped).
pub struct Decoder<'a> {
    msg: &'a [u8],
    address: &'a str,
    typespec: &'a str,
    cursor: Cursor<'a>,
    type_idx: usize,
    error: bool,
}

impl<'a> Decoder<'a> {
    /// Parse the header (flags, timestamp, address, typespec) of `msg` and
    /// position the payload cursor. `msg` must NOT include the 4-byte TCP
    /// length prefix.
    pub fn start_parse(msg: &'a [u8]) -> Result<Self> {
        if msg.len() < HEADER_BEFORE_ADDRESS - 4 {
            return Err(Error::Parse("message shorter than fixed header".into()));
        }
        let mut header = Cursor::new(msg);
        let _flags = header.read_u32()?;
        let _timestamp = header.read_f64()?;

        let mut addr_cursor = Cursor::at(msg, header.offset());
        let address = addr_cursor.read_cstring()?;

        // The typespec field starts with a literal ',' byte, not a field.
        let comma_offset = addr_cursor.offset();
        if msg.get(comma_offset).copied() != Some(b',') {
            return Err(Error::Parse("typespec missing leading comma".into()));
        }
        let mut ts_cursor = Cursor::at(msg, comma_offset + 1);
        let typespec = ts_cursor.read_cstring()?;

        Ok(Self {
            msg,
            address,
            typespec,
            cursor: Cursor::at(msg, ts_cursor.offset()),
            type_idx: 0,
            error: false,
        })
    }

    pub fn address(&self) -> &'a str {
        self.address
    }

    pub fn typespec(&self) -> &'a str {
        self.typespec
    }

    /// Sticky per-message error flag: set as soon as any `get_*` call fails.
    pub fn has_error(&self) -> bool {
        self.error
    }

    fn expect_code(&mut self, want: char) -> Result<()> {
        let actual = self.typespec.as_bytes().get(self.type_idx).copied();
        if actual == Some(want as u8) {
            self.type_idx += 1;
            Ok(())
        } else {
            self.error = true;
            Err(Error::Parse(format!(
                "typespec '{}' expected '{}' at position {}",
                self.typespec, want, self.type_idx
            )))
        }
    }

    fn read<T>(&mut self, f: impl FnOnce(&mut Cursor<'a>) -> Result<T>) -> Result<T> {
        let res = f(&mut self.cursor);
        if res.is_err() {
            self.error = true;
        }
        res
    }

    pub fn get_int32(&mut self) -> Result<i32> {
        self.expect_code('i')?;
        self.read(Cursor::read_i32)
    }

    pub fn get_int64(&mut self) -> Result<i64> {
        self.expect_code('h')?;
        self.read(Cursor::read_i64)
    }

    pub fn get_float(&mut self) -> Result<f32> {
        self.expect_code('f')?;
        self.read(Cursor::read_f32)
    }

    pub fn get_double(&mut self) -> Result<f64> {
        self.expect_code('d')?;
        self.read(Cursor::read_f64)
    }

    pub fn get_time(&mut self) -> Result<f64> {
        self.expect_code('t')?;
        self.read(Cursor::read_f64)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.expect_code('B')?;
        self.read(Cursor::read_i32).map(|v| v != 0)
    }

    pub fn get_string(&mut self) -> Result<&'a str> {
        self.expect_code('s')?;
        self.read(Cursor::read_cstring)
    }

    pub fn get_blob(&mut self) -> Result<&'a [u8]> {
        self.expect_code('b')?;
        self.read(Cursor::read_blob)
    }

    /// Raw message bytes, for logging/diagnostics only.
    pub fn raw(&self) -> &'a [u8] {
        self.msg
    }
}
