//! Shared fixture for the integration suites: assembles AMX v11 file
//! images in memory, laid out the way the pawn toolchain emits them
//! (header, symbol tables, name strings, code, static data).
#![allow(dead_code)]

use amx_vm::Opcode;

pub struct ImageBuilder {
    cell_bytes: usize,
    code: Vec<u64>,
    data: Vec<u64>,
    publics: Vec<(String, u32)>,
    pubvars: Vec<(String, u32)>,
    natives: Vec<String>,
    main: Option<u32>,
    reserve_bytes: u32,
}

impl ImageBuilder {
    pub fn new(cell_bytes: usize) -> Self {
        let mut image = Self {
            cell_bytes,
            code: Vec::new(),
            data: Vec::new(),
            publics: Vec::new(),
            pubvars: Vec::new(),
            natives: Vec::new(),
            main: None,
            reserve_bytes: 64 * cell_bytes as u32,
        };
        // The compiler convention: a halt at code address 0 catches the
        // sentinel return address pushed for every host-driven call.
        image.op1(Opcode::Halt, 0);
        image
    }

    /// Byte offset of the next code cell.
    pub fn here(&self) -> u32 {
        (self.code.len() * self.cell_bytes) as u32
    }

    fn truncate(&self, v: i64) -> u64 {
        (v as u64) & (u64::MAX >> (64 - 8 * self.cell_bytes as u32))
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op as u64);
        self
    }

    pub fn op1(&mut self, op: Opcode, operand: i64) -> &mut Self {
        self.op(op);
        self.cell(operand);
        self
    }

    /// Emit a raw cell (case-table counts, placeholder slots, ...).
    pub fn cell(&mut self, v: i64) -> &mut Self {
        let cell = self.truncate(v);
        self.code.push(cell);
        self
    }

    /// Emit a branching instruction to a known code offset. Relative
    /// operands resolve against the operand cell's address, so the stored
    /// value is `target - op_offset`.
    pub fn branch(&mut self, op: Opcode, target: u32) -> &mut Self {
        let rel = i64::from(target) - i64::from(self.here());
        self.op1(op, rel)
    }

    /// Emit a branching instruction whose target is not yet known;
    /// returns a token for [`patch_branch`](Self::patch_branch).
    pub fn branch_placeholder(&mut self, op: Opcode) -> usize {
        self.op(op);
        self.code.push(0);
        self.code.len() - 1
    }

    pub fn patch_branch(&mut self, at: usize, target: u32) {
        let op_offset = ((at - 1) * self.cell_bytes) as i64;
        self.code[at] = self.truncate(i64::from(target) - op_offset);
    }

    /// Emit one case-table cell pointing at `target`; the stored value is
    /// relative to the cell's own offset.
    pub fn case_cell(&mut self, target: u32) -> &mut Self {
        let rel = i64::from(target) - i64::from(self.here());
        self.cell(rel)
    }

    /// Declare a public function starting at the current code offset.
    pub fn public(&mut self, name: &str) -> u32 {
        let at = self.here();
        self.publics.push((name.to_owned(), at));
        at
    }

    /// `main` starts at the current code offset.
    pub fn main_here(&mut self) -> u32 {
        let at = self.here();
        self.main = Some(at);
        at
    }

    /// Append one cell of static data; returns its data byte offset.
    pub fn data_cell(&mut self, v: i64) -> u32 {
        let at = (self.data.len() * self.cell_bytes) as u32;
        self.data.push(self.truncate(v));
        at
    }

    /// Expose a data offset as a named public variable.
    pub fn pubvar(&mut self, name: &str, offset: u32) {
        self.pubvars.push((name.to_owned(), offset));
    }

    /// Declare a native import; the returned index is its `sysreq` slot.
    pub fn native(&mut self, name: &str) -> usize {
        self.natives.push(name.to_owned());
        self.natives.len() - 1
    }

    /// Bytes reserved past the static data for heap and stack.
    pub fn reserve(&mut self, bytes: u32) {
        self.reserve_bytes = bytes;
    }

    pub fn build(&self) -> Vec<u8> {
        let cb = self.cell_bytes;
        let magic: u16 = match cb {
            2 => 0xF1E2,
            4 => 0xF1E0,
            8 => 0xF1E1,
            other => panic!("no AMX magic for {other}-byte cells"),
        };

        let publics_off = 60u32;
        let natives_off = publics_off + 8 * self.publics.len() as u32;
        let libraries_off = natives_off + 8 * self.natives.len() as u32;
        let pubvars_off = libraries_off;
        let tags_off = pubvars_off + 8 * self.pubvars.len() as u32;

        // Name strings live between the tables and the code section.
        let mut names: Vec<u8> = Vec::new();
        let name_offset = |names: &mut Vec<u8>, name: &str| {
            let at = tags_off + names.len() as u32;
            names.extend_from_slice(name.as_bytes());
            names.push(0);
            at
        };
        let public_names: Vec<u32> = self
            .publics
            .iter()
            .map(|(name, _)| name_offset(&mut names, name))
            .collect();
        let native_names: Vec<u32> = self
            .natives
            .iter()
            .map(|name| name_offset(&mut names, name))
            .collect();
        let pubvar_names: Vec<u32> = self
            .pubvars
            .iter()
            .map(|(name, _)| name_offset(&mut names, name))
            .collect();

        let cod = tags_off + names.len() as u32;
        let dat = cod + (self.code.len() * cb) as u32;
        let hea = dat + (self.data.len() * cb) as u32;
        let stp = hea + self.reserve_bytes;
        let cip = self.main.unwrap_or(u32::MAX);

        let mut out = Vec::with_capacity(hea as usize);
        let le32 = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_le_bytes());
        let le16 = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_le_bytes());

        le32(&mut out, hea); // total size: the file ends with static data
        le16(&mut out, magic);
        out.push(11); // file version
        out.push(11); // amx version
        le16(&mut out, 0); // flags
        le16(&mut out, 8); // defsize
        le32(&mut out, cod);
        le32(&mut out, dat);
        le32(&mut out, hea);
        le32(&mut out, stp);
        le32(&mut out, cip);
        le32(&mut out, publics_off);
        le32(&mut out, natives_off);
        le32(&mut out, libraries_off);
        le32(&mut out, pubvars_off);
        le32(&mut out, tags_off);
        le32(&mut out, 0); // nametable, unused
        le32(&mut out, 0); // overlays, unused
        assert_eq!(out.len(), 60);

        for ((_, address), nameofs) in self.publics.iter().zip(&public_names) {
            le32(&mut out, *address);
            le32(&mut out, *nameofs);
        }
        for nameofs in &native_names {
            le32(&mut out, 0);
            le32(&mut out, *nameofs);
        }
        for ((_, address), nameofs) in self.pubvars.iter().zip(&pubvar_names) {
            le32(&mut out, *address);
            le32(&mut out, *nameofs);
        }
        out.extend_from_slice(&names);

        assert_eq!(out.len(), cod as usize);
        for &cell in &self.code {
            out.extend_from_slice(&cell.to_le_bytes()[..cb]);
        }
        assert_eq!(out.len(), dat as usize);
        for &cell in &self.data {
            out.extend_from_slice(&cell.to_le_bytes()[..cb]);
        }
        assert_eq!(out.len(), hea as usize);

        out
    }
}
