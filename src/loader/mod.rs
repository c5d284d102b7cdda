//! The AMX file loader: header validation, segment extraction, symbol
//! tables, native resolution and installation into a fresh machine.

mod header;

pub use header::HeaderFlags;

use std::collections::HashMap;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::cell::Cell;
use crate::error::{LoadError, RunError};
use crate::memory::MemoryManager;
use crate::vm::{cbid_break, cbid_single_step, Amx, AmxCallback};

use header::FileHeader;

/// File format revision this loader reads.
pub const FILE_VERSION: u8 = 11;
/// Newest abstract-machine revision the interpreter implements.
pub const AMX_VERSION: u8 = 11;

/// The host side of a loaded program: native functions plus the optional
/// execution hooks.
///
/// Natives are resolved by name once, at load time, into whatever token
/// the host finds convenient; at `sysreq` time the token comes back
/// through [`native`](Host::native) together with a [`VmContext`] that
/// allows guest memory access and re-entrant calls.
pub trait Host<C: Cell, M: MemoryManager<C>>: Sized {
    /// Token for a resolved native function.
    type Native: Copy;

    /// Resolve a native by name. `None` fails the load with
    /// [`LoadError::NativeNotResolved`].
    fn resolve_native(&mut self, name: &str) -> Option<Self::Native>;

    /// Execute a native. `argc` is the number of argument cells; `args`
    /// is the absolute data address of the first one. The returned cell
    /// becomes the caller's `PRI`.
    fn native(
        &mut self,
        ctx: &mut VmContext<'_, C, M, Self>,
        native: Self::Native,
        argc: C,
        args: C,
    ) -> Result<C, RunError>;

    /// Invoked before every instruction. The default does nothing.
    fn single_step(&mut self, _ctx: &mut VmContext<'_, C, M, Self>) -> Result<(), RunError> {
        Ok(())
    }

    /// Invoked when the program executes `break`. The default does nothing.
    fn on_break(&mut self, _ctx: &mut VmContext<'_, C, M, Self>) -> Result<(), RunError> {
        Ok(())
    }
}

/// Name tables published by a loaded program.
struct Symbols<C> {
    publics: HashMap<String, C>,
    pubvars: HashMap<String, C>,
    main: C,
}

/// What a host callback gets to work with: the machine itself plus the
/// loaded program's tables, so a native can look up a public and call
/// back into the guest while the outer instruction is still executing.
pub struct VmContext<'a, C: Cell, M: MemoryManager<C>, H: Host<C, M>> {
    pub amx: &'a mut Amx<C, M>,
    natives: &'a [H::Native],
    symbols: &'a Symbols<C>,
}

impl<'a, C: Cell, M: MemoryManager<C>, H: Host<C, M>> VmContext<'a, C, M, H> {
    /// Code address of a public function, if the program declares it.
    pub fn get_public(&self, name: &str) -> Option<C> {
        self.symbols.publics.get(name).copied()
    }

    /// Data address of a public variable, if the program declares it.
    pub fn get_pubvar(&self, name: &str) -> Option<C> {
        self.symbols.pubvars.get(name).copied()
    }

    /// Entry point of `main`, if the program has one.
    pub fn get_main(&self) -> Option<C> {
        (self.symbols.main != C::ZERO).then_some(self.symbols.main)
    }

    /// Re-enter the machine: call another guest function from inside a
    /// native or hook. The surrounding instruction's register snapshot
    /// keeps the outer call intact.
    pub fn call(&mut self, host: &mut H, cip: C, args: &[C]) -> Result<C, RunError> {
        let mut bridge = Bridge {
            natives: self.natives,
            symbols: self.symbols,
            host,
            marker: PhantomData,
        };
        self.amx.call(&mut bridge, cip, args)
    }
}

/// Adapts the machine's single-callback protocol onto the [`Host`] trait:
/// reserved indices go to the hooks, everything else picks a native slot.
struct Bridge<'a, C: Cell, M: MemoryManager<C>, H: Host<C, M>> {
    natives: &'a [H::Native],
    symbols: &'a Symbols<C>,
    host: &'a mut H,
    marker: PhantomData<M>,
}

impl<'a, C: Cell, M: MemoryManager<C>, H: Host<C, M>> AmxCallback<C, M> for Bridge<'a, C, M, H> {
    fn callback(&mut self, amx: &mut Amx<C, M>, index: C, stk: C) -> Result<(), RunError> {
        let mut ctx = VmContext {
            amx,
            natives: self.natives,
            symbols: self.symbols,
        };
        if index == cbid_single_step::<C>() {
            return self.host.single_step(&mut ctx);
        }
        if index == cbid_break::<C>() {
            return self.host.on_break(&mut ctx);
        }
        let Some(&native) = self.natives.get(index.to_u64() as usize) else {
            return Err(RunError::InvalidOperand);
        };
        let stack_top = ctx.amx.dat().wrapping_add(stk);
        let arg_bytes = ctx.amx.data_read(stack_top)?;
        let argc = C::from_u64(arg_bytes.to_u64() / C::BYTES as u64);
        let args = stack_top.wrapping_add(C::SIZE);
        let ret = self.host.native(&mut ctx, native, argc, args)?;
        ctx.amx.set_pri(ret);
        Ok(())
    }
}

/// A loaded program: the machine with its segments installed, the
/// resolved native table, and the published symbol tables.
pub struct Loader<C: Cell, M: MemoryManager<C>, H: Host<C, M>> {
    pub amx: Amx<C, M>,
    natives: Vec<H::Native>,
    symbols: Symbols<C>,
}

impl<C: Cell, M: MemoryManager<C>, H: Host<C, M>> Loader<C, M, H> {
    /// Parse `buf` as an AMX v11 image, resolve its natives against
    /// `host`, and install code and data into `mem`.
    pub fn load(buf: &[u8], host: &mut H, mem: M) -> Result<Self, LoadError> {
        let header = FileHeader::parse(buf)?;
        header.validate::<C>(buf.len())?;

        let code = segment_cells::<C>(buf, header.cod, header.dat)?;
        let mut data = segment_cells::<C>(buf, header.dat, header.hea)?;

        // Grow the data image so it reaches the declared stack top; the
        // heap starts where the static image ends.
        if header.stp < header.hea {
            return Err(LoadError::InvalidFile);
        }
        let static_cells = data.len();
        let extra = (header.stp - header.hea) as usize + C::BYTES - 1;
        data.resize(static_cells + extra / C::BYTES, C::ZERO);

        let main = if header.cip == u32::MAX {
            C::ZERO
        } else {
            C::from_u64(u64::from(header.cip))
        };

        let mut publics = HashMap::new();
        for record in records(buf, header.publics, header.natives, header.defsize)? {
            let address = LittleEndian::read_u32(&record[0..4]);
            let name = name_at(buf, LittleEndian::read_u32(&record[4..8]))?;
            publics.insert(name.to_owned(), C::from_u64(u64::from(address)));
        }

        let mut natives = Vec::new();
        for record in records(buf, header.natives, header.libraries, header.defsize)? {
            let name = name_at(buf, LittleEndian::read_u32(&record[4..8]))?;
            let resolved = host
                .resolve_native(name)
                .ok_or(LoadError::NativeNotResolved)?;
            natives.push(resolved);
        }

        if header.libraries != header.pubvars {
            return Err(LoadError::FeatureNotSupported);
        }

        let mut pubvars = HashMap::new();
        for record in records(buf, header.pubvars, header.tags, header.defsize)? {
            let address = LittleEndian::read_u32(&record[0..4]);
            let name = name_at(buf, LittleEndian::read_u32(&record[4..8]))?;
            pubvars.insert(name.to_owned(), C::from_u64(u64::from(address)));
        }

        log::debug!(
            "AMX image: {} code cells, {} data cells ({} static), {} publics, {} natives, {} pubvars",
            code.len(),
            data.len(),
            static_cells,
            publics.len(),
            natives.len(),
            pubvars.len()
        );

        let mut amx = Amx::new(mem);
        amx.install(
            code.into_boxed_slice(),
            data.into_boxed_slice(),
            static_cells,
        )
        .map_err(|err| {
            log::warn!("installing segments failed: {err}");
            LoadError::Unknown
        })?;

        Ok(Self {
            amx,
            natives,
            symbols: Symbols {
                publics,
                pubvars,
                main,
            },
        })
    }

    /// Code address of a public function, if the program declares it.
    pub fn get_public(&self, name: &str) -> Option<C> {
        self.symbols.publics.get(name).copied()
    }

    /// Data address of a public variable, if the program declares it.
    pub fn get_pubvar(&self, name: &str) -> Option<C> {
        self.symbols.pubvars.get(name).copied()
    }

    /// Entry point of `main`, if the program has one.
    pub fn get_main(&self) -> Option<C> {
        (self.symbols.main != C::ZERO).then_some(self.symbols.main)
    }

    /// Call the guest function at `cip`, dispatching upcalls to `host`.
    pub fn call(&mut self, host: &mut H, cip: C, args: &[C]) -> Result<C, RunError> {
        let mut bridge = Bridge {
            natives: &self.natives,
            symbols: &self.symbols,
            host,
            marker: PhantomData,
        };
        self.amx.call(&mut bridge, cip, args)
    }
}

/// Decode the little-endian byte range `[begin, end)` as cells.
fn segment_cells<C: Cell>(buf: &[u8], begin: u32, end: u32) -> Result<Vec<C>, LoadError> {
    let (begin, end) = (begin as usize, end as usize);
    if begin > end || end > buf.len() {
        return Err(LoadError::InvalidFile);
    }
    let bytes = &buf[begin..end];
    if bytes.len() % C::BYTES != 0 {
        return Err(LoadError::InvalidFile);
    }
    Ok(bytes.chunks_exact(C::BYTES).map(C::read_le).collect())
}

/// Iterate the fixed-size records of one symbol table.
fn records(
    buf: &[u8],
    begin: u32,
    end: u32,
    defsize: u16,
) -> Result<std::slice::ChunksExact<'_, u8>, LoadError> {
    let (begin, end) = (begin as usize, end as usize);
    if begin > end || end > buf.len() {
        return Err(LoadError::InvalidFile);
    }
    let span = &buf[begin..end];
    if span.len() % defsize as usize != 0 {
        return Err(LoadError::InvalidFile);
    }
    Ok(span.chunks_exact(defsize as usize))
}

/// Read the NUL-terminated name at `offset`; it must end inside the file.
fn name_at(buf: &[u8], offset: u32) -> Result<&str, LoadError> {
    let tail = buf.get(offset as usize..).ok_or(LoadError::InvalidFile)?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(LoadError::InvalidFile)?;
    std::str::from_utf8(&tail[..len]).map_err(|_| LoadError::InvalidFile)
}
