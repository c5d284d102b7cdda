//! The abstract machine: register file, stack discipline, opcode dispatch
//! and the host-callback protocol.

mod opcode;

pub use opcode::Opcode;

use crate::cell::Cell;
use crate::error::RunError;
use crate::memory::{MemError, MemoryBacking, MemoryManager};

/// Callback index for the before-every-instruction hook.
pub fn cbid_single_step<C: Cell>() -> C {
    C::from_i64(-1)
}

/// Callback index for the `break` instruction hook.
pub fn cbid_break<C: Cell>() -> C {
    C::from_i64(-2)
}

/// The single entry point for all host upcalls.
///
/// `index` selects the upcall: [`cbid_single_step`], [`cbid_break`], or a
/// native slot as encoded in the `sysreq` operand. `stk` is the machine's
/// stack pointer at the time of the call; for a native, the cell there
/// holds the argument byte count and the argument cells follow.
///
/// The machine snapshots `ALT`/`FRM`/`CIP`/`STP`/`STK` around every upcall
/// and restores them on return. A handler influences execution only
/// through its error code and through [`Amx::set_pri`]; returning any
/// error unwinds the current call, with [`RunError::CallbackAbort`] as the
/// conventional host-initiated stop.
pub trait AmxCallback<C: Cell, M: MemoryManager<C>> {
    fn callback(&mut self, amx: &mut Amx<C, M>, index: C, stk: C) -> Result<(), RunError>;
}

/// One AMX machine instance.
///
/// All guest-visible addresses (instruction operands, `STK`, `FRM`, `HEA`,
/// `CIP`, symbol addresses) are relative to their segment; the machine
/// adds the `COD`/`DAT` base on every access. Host-facing accessors such
/// as [`data_read`](Amx::data_read) take absolute addresses, which is also
/// what [`map`](crate::memory::MemoryBacking::map) returns and what a
/// native receives as its argument pointer.
pub struct Amx<C: Cell, M: MemoryManager<C>> {
    mem: M,
    pri: C,
    alt: C,
    frm: C,
    cip: C,
    stk: C,
    stp: C,
    hea: C,
    cod: C,
    dat: C,
}

impl<C: Cell, M: MemoryManager<C>> Amx<C, M> {
    pub fn new(mem: M) -> Self {
        Self {
            mem,
            pri: C::ZERO,
            alt: C::ZERO,
            frm: C::ZERO,
            cip: C::ZERO,
            stk: C::ZERO,
            stp: C::ZERO,
            hea: C::ZERO,
            cod: C::ZERO,
            dat: C::ZERO,
        }
    }

    /// Map freshly prepared code and data images and point the register
    /// file at them: the stack starts at the last data cell, the heap
    /// right after the first `heap_cells` cells of static data.
    pub fn install(
        &mut self,
        code: Box<[C]>,
        data: Box<[C]>,
        heap_cells: usize,
    ) -> Result<(), MemError> {
        let data_cells = data.len();
        self.cod = self.mem.code_mut().map(code)?;
        self.dat = self.mem.data_mut().map(data)?;
        let top = data_cells.saturating_sub(1) as u64 * C::BYTES as u64;
        self.stk = C::from_u64(top);
        self.stp = self.stk;
        self.hea = C::from_u64(heap_cells as u64 * C::BYTES as u64);
        Ok(())
    }

    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn pri(&self) -> C {
        self.pri
    }

    pub fn alt(&self) -> C {
        self.alt
    }

    pub fn frm(&self) -> C {
        self.frm
    }

    pub fn cip(&self) -> C {
        self.cip
    }

    pub fn stk(&self) -> C {
        self.stk
    }

    pub fn stp(&self) -> C {
        self.stp
    }

    pub fn hea(&self) -> C {
        self.hea
    }

    pub fn cod(&self) -> C {
        self.cod
    }

    pub fn dat(&self) -> C {
        self.dat
    }

    /// The one register a host callback may leave modified; a native's
    /// return value travels through here.
    pub fn set_pri(&mut self, v: C) {
        self.pri = v;
    }

    /// Discard whatever a failed call left on the stack. `FRM` and the
    /// other registers keep their values; the next `call` does not care.
    pub fn reset_stack(&mut self) {
        self.stk = self.stp;
    }

    /// Load the cell at an absolute data address.
    pub fn data_read(&self, va: C) -> Result<C, RunError> {
        if va.to_u64() % C::BYTES as u64 != 0 {
            return Err(RunError::AccessViolation);
        }
        self.mem.data().read(va).ok_or(RunError::AccessViolation)
    }

    /// Store a cell at an absolute data address.
    pub fn data_write(&mut self, va: C, v: C) -> Result<(), RunError> {
        if va.to_u64() % C::BYTES as u64 != 0 {
            return Err(RunError::AccessViolation);
        }
        self.mem
            .data_mut()
            .write(va, v)
            .ok_or(RunError::AccessViolation)
    }

    /// Load the cell at an absolute code address.
    pub fn code_read(&self, va: C) -> Result<C, RunError> {
        if va.to_u64() % C::BYTES as u64 != 0 {
            return Err(RunError::AccessViolationCode);
        }
        self.mem
            .code()
            .read(va)
            .ok_or(RunError::AccessViolationCode)
    }

    fn data_cell(&self, addr: C) -> Result<C, RunError> {
        self.data_read(self.dat.wrapping_add(addr))
    }

    fn data_cell_set(&mut self, addr: C, v: C) -> Result<(), RunError> {
        self.data_write(self.dat.wrapping_add(addr), v)
    }

    fn code_cell(&self, addr: C) -> Result<C, RunError> {
        self.code_read(self.cod.wrapping_add(addr))
    }

    /// Push one cell; the stack grows downward.
    pub fn push(&mut self, v: C) -> Result<(), RunError> {
        self.stk = self.stk.wrapping_sub(C::SIZE);
        self.data_cell_set(self.stk, v)
    }

    /// Pop the most recently pushed cell.
    pub fn pop(&mut self) -> Result<C, RunError> {
        let v = self.data_cell(self.stk)?;
        self.stk = self.stk.wrapping_add(C::SIZE);
        Ok(v)
    }

    fn fire<CB>(&mut self, cb: &mut CB, index: C) -> Result<(), RunError>
    where
        CB: AmxCallback<C, M> + ?Sized,
    {
        let (alt, frm, cip, stp, stk) = (self.alt, self.frm, self.cip, self.stp, self.stk);
        let result = cb.callback(self, index, stk);
        self.alt = alt;
        self.frm = frm;
        self.cip = cip;
        self.stp = stp;
        self.stk = stk;
        result
    }

    /// Call the function at code address `cip`, passing `args` in order.
    ///
    /// Returns `PRI` once the callee returns through the pushed sentinel
    /// address. An explicit `halt` surfaces as [`RunError::Halt`] with the
    /// halt code readable via [`pri`](Amx::pri); any machine fault or
    /// callback error unwinds immediately.
    pub fn call<CB>(&mut self, cb: &mut CB, cip: C, args: &[C]) -> Result<C, RunError>
    where
        CB: AmxCallback<C, M> + ?Sized,
    {
        log::trace!(
            "call cip={:#x} argc={}",
            cip.to_u64(),
            args.len()
        );
        let mut size = C::ZERO;
        for &arg in args {
            self.push(arg)?;
            size = size.wrapping_add(C::SIZE);
        }
        self.push(size)?;
        self.call_raw(cb, cip)
    }

    fn call_raw<CB>(&mut self, cb: &mut CB, cip: C) -> Result<C, RunError>
    where
        CB: AmxCallback<C, M> + ?Sized,
    {
        // The pawn compiler keeps a halt instruction at code address 0;
        // pushing a zero return address makes a plain return from the
        // entry point land on it, so reaching CIP 0 means "done".
        self.push(C::ZERO)?;
        self.cip = cip;
        while self.cip != C::ZERO {
            self.fire(cb, cbid_single_step())?;
            self.step(cb)?;
        }
        Ok(self.pri)
    }

    fn fetch(&mut self) -> Result<C, RunError> {
        let v = self.code_cell(self.cip)?;
        self.cip = self.cip.wrapping_add(C::SIZE);
        Ok(v)
    }

    /// Relative branch operands resolve against the operand cell's own
    /// address, i.e. `CIP` after the operand fetch minus two cells.
    fn branch_target(&self, rel: C) -> C {
        self.cip
            .wrapping_sub(C::SIZE)
            .wrapping_sub(C::SIZE)
            .wrapping_add(rel)
    }

    fn load_bytes(&self, addr: C, width: C) -> Result<C, RunError> {
        let (width, sub) = sub_cell::<C>(addr, width)?;
        let base = addr.wrapping_sub(C::from_u64(sub as u64));
        let cell = self.data_cell(base)?;
        Ok(C::from_u64((cell.to_u64() >> (sub * 8)) & byte_mask(width)))
    }

    fn store_bytes(&mut self, addr: C, width: C) -> Result<(), RunError> {
        let (width, sub) = sub_cell::<C>(addr, width)?;
        let base = addr.wrapping_sub(C::from_u64(sub as u64));
        let old = self.data_cell(base)?.to_u64();
        let mask = byte_mask(width) << (sub * 8);
        let new = (old & !mask) | ((self.pri.to_u64() << (sub * 8)) & mask);
        self.data_cell_set(base, C::from_u64(new))
    }

    fn do_switch(&mut self, rel: C) -> Result<(), RunError> {
        let mut p = self.branch_target(rel);
        let tag = self.code_cell(p)?;
        p = p.wrapping_add(C::SIZE);
        if Opcode::decode(tag.to_u64()) != Some(Opcode::Casetbl) {
            return Err(RunError::InvalidOperand);
        }
        let mut remaining = self.code_cell(p)?.to_u64();
        p = p.wrapping_add(C::SIZE);
        // Every code address in the table is relative to its own cell.
        let no_match = self.code_cell(p)?;
        p = p.wrapping_add(C::SIZE);
        self.cip = p.wrapping_sub(C::SIZE).wrapping_add(no_match);
        while remaining > 0 {
            let test = self.code_cell(p)?;
            p = p.wrapping_add(C::SIZE);
            let target = self.code_cell(p)?;
            p = p.wrapping_add(C::SIZE);
            if self.pri == test {
                self.cip = p.wrapping_sub(C::SIZE).wrapping_add(target);
                break;
            }
            remaining -= 1;
        }
        Ok(())
    }

    /// Execute exactly one instruction.
    pub fn step<CB>(&mut self, cb: &mut CB) -> Result<(), RunError>
    where
        CB: AmxCallback<C, M> + ?Sized,
    {
        let raw = self.fetch()?;
        let op = Opcode::decode(raw.to_u64()).ok_or(RunError::InvalidInstruction)?;
        let operand = if op.has_operand() {
            self.fetch()?
        } else {
            C::ZERO
        };

        match op {
            Opcode::Nop => {}

            Opcode::LoadPri => self.pri = self.data_cell(operand)?,
            Opcode::LoadAlt => self.alt = self.data_cell(operand)?,
            Opcode::LoadSPri => self.pri = self.data_cell(self.frm.wrapping_add(operand))?,
            Opcode::LoadSAlt => self.alt = self.data_cell(self.frm.wrapping_add(operand))?,
            Opcode::LrefSPri => {
                let indirect = self.data_cell(self.frm.wrapping_add(operand))?;
                self.pri = self.data_cell(indirect)?;
            }
            Opcode::LrefSAlt => {
                let indirect = self.data_cell(self.frm.wrapping_add(operand))?;
                self.alt = self.data_cell(indirect)?;
            }
            Opcode::LoadI => self.pri = self.data_cell(self.pri)?,
            Opcode::LodbI => self.pri = self.load_bytes(self.pri, operand)?,

            Opcode::ConstPri => self.pri = operand,
            Opcode::ConstAlt => self.alt = operand,
            Opcode::AddrPri => self.pri = self.frm.wrapping_add(operand),
            Opcode::AddrAlt => self.alt = self.frm.wrapping_add(operand),

            Opcode::Stor => self.data_cell_set(operand, self.pri)?,
            Opcode::StorS => self.data_cell_set(self.frm.wrapping_add(operand), self.pri)?,
            Opcode::SrefS => {
                let indirect = self.data_cell(self.frm.wrapping_add(operand))?;
                self.data_cell_set(indirect, self.pri)?;
            }
            Opcode::StorI => self.data_cell_set(self.alt, self.pri)?,
            Opcode::StrbI => self.store_bytes(self.alt, operand)?,

            // Little-endian bytecode on a little-endian view of memory:
            // the in-cell byte offset already matches.
            Opcode::AlignPri => {}

            Opcode::Lctrl => {
                self.pri = match operand.to_u64() {
                    0 => self.cod,
                    1 => self.dat,
                    2 => self.hea,
                    3 => self.stp,
                    4 => self.stk,
                    5 => self.frm,
                    6 => self.cip,
                    _ => return Err(RunError::InvalidOperand),
                }
            }
            Opcode::Sctrl => match operand.to_u64() {
                // COD, DAT and STP are fixed once segments are installed.
                2 => self.hea = self.pri,
                4 => self.stk = self.pri,
                5 => self.frm = self.pri,
                6 => self.cip = self.pri,
                _ => return Err(RunError::InvalidOperand),
            },

            Opcode::Xchg => std::mem::swap(&mut self.pri, &mut self.alt),

            Opcode::PushPri => self.push(self.pri)?,
            Opcode::PushAlt => self.push(self.alt)?,
            Opcode::PushrPri => self.push(self.pri.wrapping_add(self.dat))?,
            Opcode::PopPri => self.pri = self.pop()?,
            Opcode::PopAlt => self.alt = self.pop()?,
            Opcode::Pick => self.pri = self.data_cell(self.stk.wrapping_add(operand))?,
            Opcode::Stack => {
                self.alt = self.stk;
                self.stk = self.stk.wrapping_add(operand);
            }
            Opcode::Heap => {
                self.alt = self.hea;
                self.hea = self.hea.wrapping_add(operand);
            }

            Opcode::Proc => {
                self.push(self.frm)?;
                self.frm = self.stk;
            }
            Opcode::Ret => {
                self.frm = self.pop()?;
                self.cip = self.pop()?;
            }
            Opcode::Retn => {
                self.frm = self.pop()?;
                self.cip = self.pop()?;
                let arg_bytes = self.data_cell(self.stk)?;
                self.stk = self.stk.wrapping_add(arg_bytes).wrapping_add(C::SIZE);
            }

            Opcode::Call => {
                self.push(self.cip)?;
                self.cip = self.branch_target(operand);
            }
            Opcode::Jump => self.cip = self.branch_target(operand),
            Opcode::Jzer => {
                if self.pri == C::ZERO {
                    self.cip = self.branch_target(operand);
                }
            }
            Opcode::Jnz => {
                if self.pri != C::ZERO {
                    self.cip = self.branch_target(operand);
                }
            }

            Opcode::Shl => self.pri = self.pri.wrapping_shl(shift_count::<C>(self.alt)),
            Opcode::Shr => self.pri = self.pri.wrapping_shr(shift_count::<C>(self.alt)),
            Opcode::Sshr => self.pri = self.pri.arithmetic_shr(shift_count::<C>(self.alt)),
            Opcode::ShlCPri => self.pri = self.pri.wrapping_shl(shift_count::<C>(operand)),
            Opcode::ShlCAlt => self.alt = self.alt.wrapping_shl(shift_count::<C>(operand)),

            Opcode::Smul => self.pri = self.pri.wrapping_mul(self.alt),
            Opcode::Sdiv => {
                if self.pri == C::ZERO {
                    return Err(RunError::DivisionWithZero);
                }
                let divisor = self.pri;
                let (mut q, mut r) = self.alt.div_rem_signed(divisor);
                // Floor the truncated quotient: the remainder must carry
                // the divisor's sign.
                if r != C::ZERO && (r ^ divisor).is_negative() {
                    q = q.wrapping_sub(C::ONE);
                    r = r.wrapping_add(divisor);
                }
                self.pri = q;
                self.alt = r;
            }
            Opcode::Add => self.pri = self.pri.wrapping_add(self.alt),
            Opcode::Sub => self.pri = self.alt.wrapping_sub(self.pri),
            Opcode::And => self.pri = self.pri & self.alt,
            Opcode::Or => self.pri = self.pri | self.alt,
            Opcode::Xor => self.pri = self.pri ^ self.alt,
            Opcode::Not => {
                self.pri = if self.pri == C::ZERO { C::ONE } else { C::ZERO };
            }
            Opcode::Neg => self.pri = self.pri.wrapping_neg(),
            Opcode::Invert => self.pri = !self.pri,

            Opcode::Eq => self.pri = bool_cell(self.pri == self.alt),
            Opcode::Neq => self.pri = bool_cell(self.pri != self.alt),
            Opcode::Sless => self.pri = bool_cell(self.pri.lt_signed(self.alt)),
            Opcode::Sleq => self.pri = bool_cell(self.pri.le_signed(self.alt)),
            Opcode::Sgrtr => self.pri = bool_cell(self.alt.lt_signed(self.pri)),
            Opcode::Sgeq => self.pri = bool_cell(self.alt.le_signed(self.pri)),

            Opcode::IncPri => self.pri = self.pri.wrapping_add(C::ONE),
            Opcode::IncAlt => self.alt = self.alt.wrapping_add(C::ONE),
            Opcode::IncI => {
                let v = self.data_cell(self.pri)?;
                self.data_cell_set(self.pri, v.wrapping_add(C::ONE))?;
            }
            Opcode::DecPri => self.pri = self.pri.wrapping_sub(C::ONE),
            Opcode::DecAlt => self.alt = self.alt.wrapping_sub(C::ONE),
            Opcode::DecI => {
                let v = self.data_cell(self.pri)?;
                self.data_cell_set(self.pri, v.wrapping_sub(C::ONE))?;
            }

            Opcode::Movs => {
                let (src, dst) = (self.pri, self.alt);
                let mut at = C::ZERO;
                while at.to_u64() < operand.to_u64() {
                    let v = self.data_cell(src.wrapping_add(at))?;
                    self.data_cell_set(dst.wrapping_add(at), v)?;
                    at = at.wrapping_add(C::SIZE);
                }
            }
            Opcode::Cmps => {
                let (lhs, rhs) = (self.pri, self.alt);
                self.pri = C::ZERO;
                let mut at = C::ZERO;
                while at.to_u64() < operand.to_u64() {
                    let a = self.data_cell(lhs.wrapping_add(at))?;
                    let b = self.data_cell(rhs.wrapping_add(at))?;
                    if a != b {
                        self.pri = b.wrapping_sub(a);
                        break;
                    }
                    at = at.wrapping_add(C::SIZE);
                }
            }
            Opcode::Fill => {
                let v = self.pri;
                let mut at = C::ZERO;
                while at.to_u64() < operand.to_u64() {
                    self.data_cell_set(self.alt.wrapping_add(at), v)?;
                    at = at.wrapping_add(C::SIZE);
                }
            }

            Opcode::Halt => {
                self.pri = operand;
                return Err(RunError::Halt);
            }
            Opcode::Bounds => {
                if self.pri.to_u64() > operand.to_u64() {
                    return Err(RunError::Bounds);
                }
            }

            Opcode::Sysreq => self.fire(cb, operand)?,
            Opcode::Switch => self.do_switch(operand)?,

            Opcode::SwapPri => {
                let top = self.data_cell(self.stk)?;
                self.data_cell_set(self.stk, self.pri)?;
                self.pri = top;
            }
            Opcode::SwapAlt => {
                let top = self.data_cell(self.stk)?;
                self.data_cell_set(self.stk, self.alt)?;
                self.alt = top;
            }

            Opcode::Break => self.fire(cb, cbid_break())?,

            // A case table is data for `switch`, never an instruction.
            Opcode::Casetbl => return Err(RunError::InvalidInstruction),
        }

        Ok(())
    }
}

fn bool_cell<C: Cell>(b: bool) -> C {
    if b {
        C::ONE
    } else {
        C::ZERO
    }
}

fn shift_count<C: Cell>(v: C) -> u32 {
    (v.to_u64() % C::BITS as u64) as u32
}

fn byte_mask(width: usize) -> u64 {
    u64::MAX >> (64 - 8 * width as u32)
}

/// Validate a sub-cell access: `width` must be 1, 2 or 4 bytes and the
/// bytes must not straddle a cell boundary. Returns the width and the
/// byte offset of `addr` within its cell.
fn sub_cell<C: Cell>(addr: C, width: C) -> Result<(usize, usize), RunError> {
    let width = match width.to_u64() {
        1 => 1usize,
        2 => 2,
        4 => 4,
        _ => return Err(RunError::InvalidOperand),
    };
    let sub = (addr.to_u64() % C::BYTES as u64) as usize;
    if sub + width > C::BYTES {
        return Err(RunError::InvalidOperand);
    }
    Ok((width, sub))
}
