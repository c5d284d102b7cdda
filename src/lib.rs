//! amx-vm
//!
//! An embeddable virtual machine for programs compiled to pawn "AMX"
//! bytecode, file version 11. The host process loads an image, gets back
//! name tables for the program's entry points, and drives execution one
//! call at a time; the program calls back into the host through named
//! native functions. Guest programs are untrusted: every memory access is
//! translated and checked, so a stray address faults the current call
//! instead of touching host memory.
//!
//! The machine is generic over two compile-time choices:
//!
//! - the cell width ([`Cell`]: `u16`, `u32` or `u64`), which must match
//!   the loaded file's magic;
//! - the memory layout ([`MemoryManager`]), composed from the closed set
//!   of backings in [`memory`].
//!
//! A typical embedding:
//!
//! ```no_run
//! use amx_vm::{Host, Loader, Neumann, PagedBuffers, RunError, VmContext};
//!
//! type Mem = Neumann<PagedBuffers<u32, 5>>;
//!
//! struct MyHost;
//!
//! impl Host<u32, Mem> for MyHost {
//!     type Native = usize;
//!
//!     fn resolve_native(&mut self, name: &str) -> Option<usize> {
//!         (name == "print_cell").then_some(0)
//!     }
//!
//!     fn native(
//!         &mut self,
//!         ctx: &mut VmContext<'_, u32, Mem, Self>,
//!         _native: usize,
//!         _argc: u32,
//!         args: u32,
//!     ) -> Result<u32, RunError> {
//!         let value = ctx.amx.data_read(args)?;
//!         println!("guest says {value}");
//!         Ok(0)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let image = std::fs::read("program.amx")?;
//! let mut host = MyHost;
//! let mut program = Loader::load(&image, &mut host, Mem::default())?;
//! let main = program.get_main().ok_or("no main")?;
//! let result = program.call(&mut host, main, &[])?;
//! println!("main() returned {result}");
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod error;
pub mod loader;
pub mod memory;
pub mod vm;

pub use cell::Cell;
pub use error::{LoadError, RunError};
pub use loader::{Host, Loader, VmContext};
pub use memory::{
    Contiguous, Harvard, MemError, MemoryBacking, MemoryManager, Neumann, PagedBuffers,
    PartialSpace,
};
pub use vm::{Amx, AmxCallback, Opcode};
