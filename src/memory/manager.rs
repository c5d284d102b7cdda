//! Composition of backings into the code/data pair the interpreter uses.

use crate::cell::Cell;

use super::MemoryBacking;

/// The interpreter's two windows into guest memory.
///
/// The manager adds nothing of its own beyond holding the backings; it
/// exists so the machine can be generic over the von Neumann / Harvard
/// choice without caring which one it got.
pub trait MemoryManager<C: Cell> {
    type Code: MemoryBacking<C>;
    type Data: MemoryBacking<C>;

    fn code(&self) -> &Self::Code;
    fn code_mut(&mut self) -> &mut Self::Code;
    fn data(&self) -> &Self::Data;
    fn data_mut(&mut self) -> &mut Self::Data;
}

/// One backing serving both segments.
pub struct Neumann<B> {
    backing: B,
}

impl<B> Neumann<B> {
    pub fn new(backing: B) -> Self {
        Self { backing }
    }
}

impl<B: Default> Default for Neumann<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<C: Cell, B: MemoryBacking<C>> MemoryManager<C> for Neumann<B> {
    type Code = B;
    type Data = B;

    fn code(&self) -> &B {
        &self.backing
    }

    fn code_mut(&mut self) -> &mut B {
        &mut self.backing
    }

    fn data(&self) -> &B {
        &self.backing
    }

    fn data_mut(&mut self) -> &mut B {
        &mut self.backing
    }
}

/// Independent code and data backings.
pub struct Harvard<I, D> {
    code: I,
    data: D,
}

impl<I, D> Harvard<I, D> {
    pub fn new(code: I, data: D) -> Self {
        Self { code, data }
    }
}

impl<I: Default, D: Default> Default for Harvard<I, D> {
    fn default() -> Self {
        Self::new(I::default(), D::default())
    }
}

impl<C: Cell, I: MemoryBacking<C>, D: MemoryBacking<C>> MemoryManager<C> for Harvard<I, D> {
    type Code = I;
    type Data = D;

    fn code(&self) -> &I {
        &self.code
    }

    fn code_mut(&mut self) -> &mut I {
        &mut self.code
    }

    fn data(&self) -> &D {
        &self.data
    }

    fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }
}
