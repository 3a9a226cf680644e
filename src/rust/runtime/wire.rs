// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Bounds-checked little-endian cursors for the serialized descriptors exchanged with the task scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::{
    ErrorCode,
    Fail,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Read cursor over a serialized buffer. Every read is checked against the end of the buffer.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Append-only writer producing the format consumed by [WireReader].
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Creates a reader positioned at `offset`.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, Fail> {
        if offset > buf.len() {
            let cause: String = format!("offset out of bounds (offset={}, len={})", offset, buf.len());
            error!("at(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(Self { buf, pos: offset })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, Fail> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, Fail> {
        let bytes: &[u8] = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, Fail> {
        let mut raw: [u8; 8] = [0; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_i64(&mut self) -> Result<i64, Fail> {
        let mut raw: [u8; 8] = [0; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Reads a `u32` length prefix followed by that many bytes.
    pub fn read_blob(&mut self) -> Result<&'a [u8], Fail> {
        let len: usize = self.read_u32()? as usize;
        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, Fail> {
        let bytes: &[u8] = self.read_blob()?;
        match ::std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => {
                let cause: String = format!("string is not valid utf-8 (pos={})", self.pos);
                error!("read_string(): {}", cause);
                Err(Fail::new(ErrorCode::ParameterInvalid, &cause))
            },
        }
    }

    /// Reads a `u32` element count and checks it against `max`.
    pub fn read_count(&mut self, max: usize) -> Result<usize, Fail> {
        let count: usize = self.read_u32()? as usize;
        if count > max {
            let cause: String = format!("element count exceeds limit (count={}, max={})", count, max);
            error!("read_count(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(count)
    }

    /// Returns the `len` bytes that start at absolute `offset`, without moving the cursor.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], Fail> {
        match offset.checked_add(len) {
            Some(end) if end <= self.buf.len() => Ok(&self.buf[offset..end]),
            _ => {
                let cause: String =
                    format!("range out of bounds (offset={}, len={}, size={})", offset, len, self.buf.len());
                error!("slice(): {}", cause);
                Err(Fail::new(ErrorCode::ParameterInvalid, &cause))
            },
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Fail> {
        let bytes: &'a [u8] = self.slice(self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, val: u8) -> &mut Self {
        self.buf.push(val);
        self
    }

    pub fn put_u32(&mut self, val: u32) -> &mut Self {
        self.buf.extend_from_slice(&val.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, val: u64) -> &mut Self {
        self.buf.extend_from_slice(&val.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, val: i64) -> &mut Self {
        self.buf.extend_from_slice(&val.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_blob(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes)
    }

    pub fn put_string(&mut self, s: &str) -> &mut Self {
        self.put_blob(s.as_bytes())
    }

    /// Overwrites a previously written `u32` at absolute position `pos`.
    pub fn patch_u32(&mut self, pos: usize, val: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&val.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
