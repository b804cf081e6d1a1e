// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live object memory walked by the codec.
//!
//! Objects live in a [`Heap`]: an arena of zero-initialised byte blocks.
//! Pointer members hold a raw 8-byte little-endian address (see
//! [`Address::to_raw`]); raw `0` is the null pointer. Decoded pointer
//! buffers are allocated in the destination heap, which owns them.

use crate::schema::{Schema, TypeId, TypeKind};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Native width of a pointer slot in live data.
pub const POINTER_SIZE: usize = 8;

/// Location of a byte inside a [`Heap`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    block: u32,
    offset: u32,
}

impl Address {
    pub const fn new(block: u32, offset: u32) -> Self {
        Self { block, offset }
    }

    pub const fn block(self) -> u32 {
        self.block
    }

    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Address `bytes` further into the same block.
    #[must_use]
    pub fn add(self, bytes: usize) -> Self {
        let offset = u32::try_from(self.offset as usize + bytes).unwrap_or(u32::MAX);
        Self {
            block: self.block,
            offset,
        }
    }

    /// Raw pointer value stored in live data. Never 0.
    pub const fn to_raw(self) -> u64 {
        ((self.block as u64 + 1) << 32) | self.offset as u64
    }

    /// `None` for the null pointer.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        let block = raw >> 32;
        if block == 0 {
            return None;
        }
        Some(Self {
            block: (block - 1) as u32,
            offset: raw as u32,
        })
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}+{:#x}", self.block, self.offset)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("invalid address {addr:?} for {len} bytes")]
    InvalidAddress { addr: Address, len: usize },
}

/// Arena of byte blocks.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    blocks: Vec<Option<Vec<u8>>>,
    live: usize,
}

macro_rules! scalar_access {
    ($(($read:ident, $write:ident, $ty:ty, $len:expr, $get:path, $put:path)),* $(,)?) => {
        $(
            pub fn $read(&self, addr: Address) -> Result<$ty, MemoryError> {
                self.bytes(addr, $len).map($get)
            }

            pub fn $write(&mut self, addr: Address, value: $ty) -> Result<(), MemoryError> {
                $put(self.bytes_mut(addr, $len)?, value);
                Ok(())
            }
        )*
    };
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` zeroed bytes.
    pub fn alloc(&mut self, size: usize) -> Address {
        let block = self.blocks.len() as u32;
        self.blocks.push(Some(vec![0; size]));
        self.live += 1;
        Address::new(block, 0)
    }

    pub fn alloc_bytes(&mut self, data: &[u8]) -> Address {
        let block = self.blocks.len() as u32;
        self.blocks.push(Some(data.to_vec()));
        self.live += 1;
        Address::new(block, 0)
    }

    /// NUL-terminated copy of `value`.
    pub fn alloc_str(&mut self, value: &str) -> Address {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        self.alloc_bytes(&data)
    }

    /// Number of blocks not yet released.
    pub fn live_blocks(&self) -> usize {
        self.live
    }

    fn block(&self, addr: Address) -> Option<&Vec<u8>> {
        self.blocks.get(addr.block as usize)?.as_ref()
    }

    pub fn get(&self, addr: Address, len: usize) -> Option<&[u8]> {
        let start = addr.offset as usize;
        self.block(addr)?.get(start..start.checked_add(len)?)
    }

    pub fn get_mut(&mut self, addr: Address, len: usize) -> Option<&mut [u8]> {
        let start = addr.offset as usize;
        let end = start.checked_add(len)?;
        self.blocks
            .get_mut(addr.block as usize)?
            .as_mut()?
            .get_mut(start..end)
    }

    /// Bytes from `addr` to the end of its block.
    pub fn tail(&self, addr: Address) -> Option<&[u8]> {
        self.block(addr)?.get(addr.offset as usize..)
    }

    pub fn bytes(&self, addr: Address, len: usize) -> Result<&[u8], MemoryError> {
        self.get(addr, len)
            .ok_or(MemoryError::InvalidAddress { addr, len })
    }

    pub fn bytes_mut(&mut self, addr: Address, len: usize) -> Result<&mut [u8], MemoryError> {
        self.get_mut(addr, len)
            .ok_or(MemoryError::InvalidAddress { addr, len })
    }

    pub fn write_bytes(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryError> {
        self.bytes_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Length of the NUL-terminated string at `addr`, excluding the terminator.
    pub fn strlen(&self, addr: Address) -> Option<usize> {
        self.tail(addr)?.iter().position(|b| *b == 0)
    }

    pub fn read_u8(&self, addr: Address) -> Result<u8, MemoryError> {
        self.bytes(addr, 1).map(|b| b[0])
    }

    pub fn write_u8(&mut self, addr: Address, value: u8) -> Result<(), MemoryError> {
        self.bytes_mut(addr, 1)?[0] = value;
        Ok(())
    }

    scalar_access!(
        (read_u16, write_u16, u16, 2, LittleEndian::read_u16, LittleEndian::write_u16),
        (read_u32, write_u32, u32, 4, LittleEndian::read_u32, LittleEndian::write_u32),
        (read_u64, write_u64, u64, 8, LittleEndian::read_u64, LittleEndian::write_u64),
        (read_i16, write_i16, i16, 2, LittleEndian::read_i16, LittleEndian::write_i16),
        (read_i32, write_i32, i32, 4, LittleEndian::read_i32, LittleEndian::write_i32),
        (read_i64, write_i64, i64, 8, LittleEndian::read_i64, LittleEndian::write_i64),
        (read_f32, write_f32, f32, 4, LittleEndian::read_f32, LittleEndian::write_f32),
        (read_f64, write_f64, f64, 8, LittleEndian::read_f64, LittleEndian::write_f64),
    );

    /// Pointer slot at `addr`; `Ok(None)` is the null pointer.
    pub fn read_pointer(&self, addr: Address) -> Result<Option<Address>, MemoryError> {
        self.read_u64(addr).map(Address::from_raw)
    }

    pub fn write_pointer(
        &mut self,
        addr: Address,
        target: Option<Address>,
    ) -> Result<(), MemoryError> {
        self.write_u64(addr, target.map_or(0, Address::to_raw))
    }

    /// Free the block containing `addr`. Releasing twice is a no-op.
    pub fn release(&mut self, addr: Address) {
        if let Some(slot) = self.blocks.get_mut(addr.block as usize) {
            if slot.take().is_some() {
                self.live -= 1;
            }
        }
    }

    /// Free every pointer buffer reachable from the value of type `ty` at
    /// `addr`. The storage at `addr` itself stays with the caller.
    ///
    /// Pointer element counts are taken from the extent of the target block,
    /// which is exact for buffers allocated by the decoder.
    pub fn release_tree(&mut self, schema: &Schema, ty: TypeId, addr: Address) {
        let mut targets = HashSet::from([addr.block]);
        self.collect_buffers(schema, ty, addr, &mut targets);
        targets.remove(&addr.block);
        for block in &targets {
            self.release(Address::new(*block, 0));
        }
        log::trace!("[city::memory] released {} buffers", targets.len());
    }

    fn collect_buffers(
        &self,
        schema: &Schema,
        ty: TypeId,
        addr: Address,
        seen: &mut HashSet<u32>,
    ) {
        let t = schema.ty(ty);
        match &t.kind {
            TypeKind::Pointer { element } => {
                let Ok(Some(target)) = self.read_pointer(addr) else {
                    return;
                };
                if !seen.insert(target.block) {
                    return;
                }
                let elem_size = schema.ty(*element).size;
                let extent = self.tail(target).map_or(0, <[u8]>::len);
                let count = if elem_size == 0 { 0 } else { extent / elem_size };
                for i in 0..count {
                    self.collect_buffers(schema, *element, target.add(i * elem_size), seen);
                }
            }
            TypeKind::Array { element, count } => {
                let elem_size = schema.ty(*element).size;
                for i in 0..*count {
                    self.collect_buffers(schema, *element, addr.add(i * elem_size), seen);
                }
            }
            TypeKind::Record { members } => {
                for m in members {
                    self.collect_buffers(schema, m.ty, addr.add(m.offset), seen);
                }
            }
            // Union members overlap; without a selector none of them is followed.
            _ => {}
        }
    }
}

/// A value being visited: its type, where it lives, the attributes of the
/// member that holds it and the enclosing container.
#[derive(Debug, Clone, Copy)]
pub struct Container<'a> {
    pub ty: TypeId,
    pub addr: Address,
    pub attrs: &'a crate::attr::AttributeSet,
    pub parent: Option<&'a Container<'a>>,
}

impl<'a> Container<'a> {
    pub fn root(ty: TypeId, addr: Address, attrs: &'a crate::attr::AttributeSet) -> Self {
        Self {
            ty,
            addr,
            attrs,
            parent: None,
        }
    }

    pub fn child<'b>(
        &'b self,
        ty: TypeId,
        addr: Address,
        attrs: &'b crate::attr::AttributeSet,
    ) -> Container<'b> {
        Container {
            ty,
            addr,
            attrs,
            parent: Some(self),
        }
    }
}
