// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Append-only pool of attribute payloads.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Byte offset into a [`ValuePool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolOffset(u32);

impl PoolOffset {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PoolOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool+{:#x}", self.0)
    }
}

/// Shared constant storage: ints, floats, strings, default values and
/// compiled expression programs, all referenced by [`PoolOffset`].
///
/// Scalars are 8-byte aligned. Strings are NUL-terminated. Indirect payloads
/// (strings, string lists) are a `u32` pool offset pointing at the real data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct ValuePool {
    bytes: Vec<u8>,
}

impl ValuePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn reserve(&mut self, size: usize, align: usize) -> usize {
        let at = self.bytes.len().next_multiple_of(align);
        self.bytes.resize(at + size, 0);
        at
    }

    fn offset(at: usize) -> PoolOffset {
        // Pools are built from declarations; 4 GiB of constants is not a real input.
        PoolOffset(u32::try_from(at).unwrap_or(u32::MAX))
    }

    pub fn push_i64(&mut self, value: i64) -> PoolOffset {
        let at = self.reserve(8, 8);
        LittleEndian::write_i64(&mut self.bytes[at..at + 8], value);
        Self::offset(at)
    }

    pub fn push_f64(&mut self, value: f64) -> PoolOffset {
        let at = self.reserve(8, 8);
        LittleEndian::write_f64(&mut self.bytes[at..at + 8], value);
        Self::offset(at)
    }

    pub fn push_u32(&mut self, value: u32) -> PoolOffset {
        let at = self.reserve(4, 4);
        LittleEndian::write_u32(&mut self.bytes[at..at + 4], value);
        Self::offset(at)
    }

    /// Raw bytes, 8-byte aligned (default values, programs).
    pub fn push_bytes(&mut self, data: &[u8]) -> PoolOffset {
        let at = self.reserve(data.len(), 8);
        self.bytes[at..at + data.len()].copy_from_slice(data);
        Self::offset(at)
    }

    /// NUL-terminated string; returns the offset of its first byte.
    pub fn push_str(&mut self, value: &str) -> PoolOffset {
        let at = self.reserve(value.len() + 1, 1);
        self.bytes[at..at + value.len()].copy_from_slice(value.as_bytes());
        Self::offset(at)
    }

    /// String payload reached through one level of indirection.
    pub fn push_indirect_str(&mut self, value: &str) -> PoolOffset {
        let target = self.push_str(value);
        self.push_u32(target.0)
    }

    /// `u32` count followed by that many string offsets.
    pub fn push_strings<S: AsRef<str>>(&mut self, values: &[S]) -> PoolOffset {
        let targets: Vec<PoolOffset> = values.iter().map(|s| self.push_str(s.as_ref())).collect();
        let at = self.reserve(4 * (targets.len() + 1), 4);
        LittleEndian::write_u32(&mut self.bytes[at..at + 4], targets.len() as u32);
        for (i, target) in targets.iter().enumerate() {
            let slot = at + 4 * (i + 1);
            LittleEndian::write_u32(&mut self.bytes[slot..slot + 4], target.0);
        }
        Self::offset(at)
    }

    /// Everything from `offset` to the end of the pool.
    pub fn tail(&self, offset: PoolOffset) -> Option<&[u8]> {
        self.bytes.get(offset.get()..)
    }

    pub fn read_i64(&self, offset: PoolOffset) -> Option<i64> {
        self.bytes
            .get(offset.get()..offset.get() + 8)
            .map(LittleEndian::read_i64)
    }

    pub fn read_f64(&self, offset: PoolOffset) -> Option<f64> {
        self.bytes
            .get(offset.get()..offset.get() + 8)
            .map(LittleEndian::read_f64)
    }

    pub fn read_u32(&self, offset: PoolOffset) -> Option<u32> {
        self.bytes
            .get(offset.get()..offset.get() + 4)
            .map(LittleEndian::read_u32)
    }

    /// Follow an indirect payload one level.
    pub fn follow(&self, offset: PoolOffset) -> Option<PoolOffset> {
        self.read_u32(offset).map(PoolOffset)
    }

    /// NUL-terminated string starting at `offset`.
    pub fn cstr(&self, offset: PoolOffset) -> Option<&str> {
        let tail = self.tail(offset)?;
        let end = tail.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    /// Strings of a list written by [`push_strings`](Self::push_strings).
    pub fn strings(&self, offset: PoolOffset) -> impl Iterator<Item = &str> + '_ {
        let count = self.read_u32(offset).unwrap_or(0) as usize;
        (0..count).filter_map(move |i| {
            let slot = PoolOffset(offset.0 + 4 * (i as u32 + 1));
            self.follow(slot).and_then(|target| self.cstr(target))
        })
    }
}
