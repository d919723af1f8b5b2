// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Packet engine memory
//!
//! The packet engine never touches a general purpose heap.  Its allocations
//! come from one of two tiers, chosen by size:
//!
//! * A pool of [`FIXED_BUFFER_COUNT`] slots of exactly [`FIXED_BUFFER_SIZE`]
//!   bytes.  Command queue nodes are this size, so they are allocated and
//!   freed constantly.
//! * An arena of [`VARIABLE_POOL_SIZE`] bytes for everything else.  Arena
//!   allocations are never freed individually.  The arena is only reclaimed
//!   by [`SwdMemory::reset()`], when the packet engine is deinitialized.
//!
//! Callers get back an [`Allocation`] handle rather than a pointer, and
//! access the bytes through [`SwdMemory::bytes()`] and
//! [`SwdMemory::bytes_mut()`].
//!
//! Running out of either tier is logged along with the usage statistics,
//! and reported as [`SwdError::OutOfMemory`], which is always fatal.

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use static_assertions::const_assert;

use crate::SwdError;

/// Size of each fixed pool slot, in bytes
pub const FIXED_BUFFER_SIZE: usize = 16;

/// Number of fixed pool slots
pub const FIXED_BUFFER_COUNT: usize = 128;

/// Size of the arena, in bytes
pub const VARIABLE_POOL_SIZE: usize = 512;

const_assert!(FIXED_BUFFER_COUNT <= u8::MAX as usize);
const_assert!(VARIABLE_POOL_SIZE <= u16::MAX as usize);

/// Index of a fixed pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(u8);

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Option<Self> {
        if index < FIXED_BUFFER_COUNT {
            Some(SlotHandle(index as u8))
        } else {
            None
        }
    }
}

/// A live allocation from [`SwdMemory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allocation {
    /// A fixed pool slot, always [`FIXED_BUFFER_SIZE`] bytes
    Fixed(SlotHandle),
    /// A slice of the arena
    Arena { offset: u16, len: u16 },
}

impl Allocation {
    pub fn len(&self) -> usize {
        match self {
            Allocation::Fixed(_) => FIXED_BUFFER_SIZE,
            Allocation::Arena { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allocator usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllocStats {
    /// Successful allocations
    pub malloc_count: u32,
    /// Calls to free, including arena no-ops
    pub free_count: u32,
    /// Largest size ever requested, successful or not
    pub largest_request: usize,
    /// Bytes of the arena in use
    pub arena_offset: usize,
    /// Fixed slots currently in use
    pub fixed_in_use: usize,
    /// Highest number of fixed slots in use at once
    pub max_fixed_in_use: usize,
    /// (size, count) for every size successfully allocated
    pub histogram: Vec<(usize, u32)>,
}

#[derive(Debug, Clone, Copy)]
struct FixedSlot {
    buffer: [u8; FIXED_BUFFER_SIZE],
    used: bool,
}

impl FixedSlot {
    const EMPTY: FixedSlot = FixedSlot {
        buffer: [0; FIXED_BUFFER_SIZE],
        used: false,
    };
}

/// Two-tier allocator for the packet engine
#[derive(Debug)]
pub struct SwdMemory {
    slots: [FixedSlot; FIXED_BUFFER_COUNT],
    pool: [u8; VARIABLE_POOL_SIZE],
    pool_offset: usize,

    malloc_count: u32,
    free_count: u32,
    largest_request: usize,
    fixed_in_use: usize,
    max_fixed_in_use: usize,
    histogram: [u32; VARIABLE_POOL_SIZE],
}

impl Default for SwdMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SwdMemory {
    pub const fn new() -> Self {
        Self {
            slots: [FixedSlot::EMPTY; FIXED_BUFFER_COUNT],
            pool: [0; VARIABLE_POOL_SIZE],
            pool_offset: 0,
            malloc_count: 0,
            free_count: 0,
            largest_request: 0,
            fixed_in_use: 0,
            max_fixed_in_use: 0,
            histogram: [0; VARIABLE_POOL_SIZE],
        }
    }

    /// Allocates `size` bytes.
    ///
    /// Requests of exactly [`FIXED_BUFFER_SIZE`] take the first free fixed
    /// slot.  Anything else is carved from the arena, provided it leaves at
    /// least one byte spare.
    ///
    /// Returns:
    /// - `Ok(Allocation)`: The allocation.  Its contents are unspecified.
    /// - `Err(SwdError::OutOfMemory)`: If the tier is exhausted.
    pub fn malloc(&mut self, size: usize) -> Result<Allocation, SwdError> {
        if size > self.largest_request {
            self.largest_request = size;
        }

        let allocation = if size == FIXED_BUFFER_SIZE {
            self.alloc_fixed()
        } else {
            self.alloc_arena(size)
        };

        match allocation {
            Some(allocation) => {
                self.malloc_count += 1;
                if let Some(count) = self.histogram.get_mut(size) {
                    *count += 1;
                }
                Ok(allocation)
            }
            None => {
                error!("Error: SWD out of memory allocating {size} bytes");
                self.print_stats();
                Err(SwdError::OutOfMemory)
            }
        }
    }

    /// Allocates `num * size` bytes and zeroes them.
    pub fn calloc(&mut self, num: usize, size: usize) -> Result<Allocation, SwdError> {
        let total = num.checked_mul(size).ok_or(SwdError::OutOfMemory)?;
        let allocation = self.malloc(total)?;
        self.bytes_mut(&allocation).fill(0);
        Ok(allocation)
    }

    /// Frees an allocation.
    ///
    /// Only fixed slots are returned for reuse.  Freeing an arena
    /// allocation is counted but otherwise does nothing.
    pub fn free(&mut self, allocation: Allocation) {
        self.free_count += 1;

        if let Allocation::Fixed(handle) = allocation {
            let slot = &mut self.slots[handle.index()];
            if slot.used {
                slot.used = false;
                self.fixed_in_use -= 1;
            } else {
                warn!("Free of unused SWD buffer {}", handle.index());
            }
        }
    }

    /// Releases everything.  Statistics are kept.
    pub fn reset(&mut self) {
        self.pool_offset = 0;
        for slot in self.slots.iter_mut() {
            slot.used = false;
        }
        self.fixed_in_use = 0;
    }

    pub fn bytes(&self, allocation: &Allocation) -> &[u8] {
        match allocation {
            Allocation::Fixed(handle) => &self.slots[handle.index()].buffer,
            Allocation::Arena { offset, len } => {
                let start = *offset as usize;
                &self.pool[start..start + *len as usize]
            }
        }
    }

    pub fn bytes_mut(&mut self, allocation: &Allocation) -> &mut [u8] {
        match allocation {
            Allocation::Fixed(handle) => &mut self.slots[handle.index()].buffer,
            Allocation::Arena { offset, len } => {
                let start = *offset as usize;
                &mut self.pool[start..start + *len as usize]
            }
        }
    }

    pub fn stats(&self) -> AllocStats {
        let histogram = self
            .histogram
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .map(|(size, count)| (size, *count))
            .collect();

        AllocStats {
            malloc_count: self.malloc_count,
            free_count: self.free_count,
            largest_request: self.largest_request,
            arena_offset: self.pool_offset,
            fixed_in_use: self.fixed_in_use,
            max_fixed_in_use: self.max_fixed_in_use,
            histogram,
        }
    }

    /// Logs the allocator statistics
    pub fn print_stats(&self) {
        let stats = self.stats();
        info!("Malloc ptr:   {}", stats.arena_offset);
        info!("Malloc count: {}", stats.malloc_count);
        info!("Free count:   {}", stats.free_count);
        info!("Malloc max:   {}", stats.largest_request);
        info!("Malloc stats:");
        for (size, count) in stats.histogram.iter() {
            info!("[{size:3}] - {count:4}");
        }
        info!("Total fixed buffers used: {}", stats.fixed_in_use);
        info!("Max buffers used: {}", stats.max_fixed_in_use);
    }

    fn alloc_fixed(&mut self) -> Option<Allocation> {
        let index = self.slots.iter().position(|slot| !slot.used)?;
        self.slots[index].used = true;

        self.fixed_in_use += 1;
        if self.fixed_in_use > self.max_fixed_in_use {
            self.max_fixed_in_use = self.fixed_in_use;
        }

        SlotHandle::from_index(index).map(Allocation::Fixed)
    }

    fn alloc_arena(&mut self, size: usize) -> Option<Allocation> {
        if self.pool_offset + size >= VARIABLE_POOL_SIZE {
            return None;
        }

        let allocation = Allocation::Arena {
            offset: self.pool_offset as u16,
            len: size as u16,
        };
        self.pool_offset += size;

        Some(allocation)
    }
}
