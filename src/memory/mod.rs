//! The virtual-address side of the sandbox.
//!
//! A [`MemoryBacking`] turns a guest virtual address into a cell of host
//! storage, refusing anything unmapped. The set of backings is closed:
//!
//! - [`PagedBuffers`] maps several disjoint buffers into a sparse address
//!   space, one page run per buffer;
//! - [`Contiguous`] holds exactly one buffer at address zero;
//! - [`PartialSpace`] identity-maps the low bits of every address into one
//!   buffer, trading per-access checks for masking.
//!
//! A [`MemoryManager`] composes backings into the code/data pair the
//! interpreter sees, either sharing one backing ([`Neumann`]) or keeping
//! the segments apart ([`Harvard`]).
//!
//! Buffers are owned: `map` takes the buffer, `unmap` gives it back.

mod contiguous;
mod manager;
mod paged;
mod partial;

pub use contiguous::Contiguous;
pub use manager::{Harvard, MemoryManager, Neumann};
pub use paged::PagedBuffers;
pub use partial::PartialSpace;

use thiserror::Error;

use crate::cell::Cell;

/// A fault raised while mapping or unmapping a buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    #[error("no free virtual-address range is large enough")]
    NoSpace,
    #[error("backing already holds a mapping")]
    AlreadyMapped,
    #[error("buffer does not cover the backing's address range")]
    BufferTooSmall,
}

/// The virtual address handed out for zero-length mappings: the highest
/// cell-aligned address, which no real mapping can start at.
pub(crate) fn empty_va<C: Cell>() -> C {
    C::from_u64(C::MAX.to_u64() & !(C::BYTES as u64 - 1))
}

/// Translates guest virtual addresses into borrowed cells.
pub trait MemoryBacking<C: Cell> {
    /// Map `buf` at a backing-chosen virtual address and return that
    /// address. A zero-length buffer maps to the sentinel address
    /// returned by no other mapping, without occupying space.
    fn map(&mut self, buf: Box<[C]>) -> Result<C, MemError>;

    /// Tear down the mapping based at `va`, returning its buffer.
    ///
    /// `va` must be the exact address `map` returned; anything else
    /// (including addresses inside a mapping) returns `None` and leaves
    /// the backing untouched.
    fn unmap(&mut self, va: C) -> Option<Box<[C]>>;

    /// Resolve `va` to its cell, or `None` if the address is not backed.
    fn translate(&self, va: C) -> Option<&C>;

    /// Mutable counterpart of [`translate`](Self::translate).
    fn translate_mut(&mut self, va: C) -> Option<&mut C>;

    /// Load the cell at `va`.
    fn read(&self, va: C) -> Option<C> {
        self.translate(va).copied()
    }

    /// Store `v` at `va`.
    fn write(&mut self, va: C, v: C) -> Option<()> {
        self.translate_mut(va).map(|cell| *cell = v)
    }
}
