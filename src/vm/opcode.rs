//! The AMX instruction set: a stream of one-cell opcodes, each optionally
//! followed by a single operand cell.

use std::fmt;

/// Every opcode of the file-version-11 instruction set, with its encoding
/// value as the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    LoadPri = 1,
    LoadAlt = 2,
    LoadSPri = 3,
    LoadSAlt = 4,
    LrefSPri = 5,
    LrefSAlt = 6,
    LoadI = 7,
    LodbI = 8,
    ConstPri = 9,
    ConstAlt = 10,
    AddrPri = 11,
    AddrAlt = 12,
    Stor = 13,
    StorS = 14,
    SrefS = 15,
    StorI = 16,
    StrbI = 17,
    AlignPri = 18,
    Lctrl = 19,
    Sctrl = 20,
    Xchg = 21,
    PushPri = 22,
    PushAlt = 23,
    PushrPri = 24,
    PopPri = 25,
    PopAlt = 26,
    Pick = 27,
    Stack = 28,
    Heap = 29,
    Proc = 30,
    Ret = 31,
    Retn = 32,
    Call = 33,
    Jump = 34,
    Jzer = 35,
    Jnz = 36,
    Shl = 37,
    Shr = 38,
    Sshr = 39,
    ShlCPri = 40,
    ShlCAlt = 41,
    Smul = 42,
    Sdiv = 43,
    Add = 44,
    Sub = 45,
    And = 46,
    Or = 47,
    Xor = 48,
    Not = 49,
    Neg = 50,
    Invert = 51,
    Eq = 52,
    Neq = 53,
    Sless = 54,
    Sleq = 55,
    Sgrtr = 56,
    Sgeq = 57,
    IncPri = 58,
    IncAlt = 59,
    IncI = 60,
    DecPri = 61,
    DecAlt = 62,
    DecI = 63,
    Movs = 64,
    Cmps = 65,
    Fill = 66,
    Halt = 67,
    Bounds = 68,
    Sysreq = 69,
    Switch = 70,
    SwapPri = 71,
    SwapAlt = 72,
    Break = 73,
    Casetbl = 74,
}

impl Opcode {
    /// Decode a fetched cell, or `None` for values outside the set.
    pub fn decode(raw: u64) -> Option<Self> {
        use Opcode::*;
        Some(match raw {
            0 => Nop,
            1 => LoadPri,
            2 => LoadAlt,
            3 => LoadSPri,
            4 => LoadSAlt,
            5 => LrefSPri,
            6 => LrefSAlt,
            7 => LoadI,
            8 => LodbI,
            9 => ConstPri,
            10 => ConstAlt,
            11 => AddrPri,
            12 => AddrAlt,
            13 => Stor,
            14 => StorS,
            15 => SrefS,
            16 => StorI,
            17 => StrbI,
            18 => AlignPri,
            19 => Lctrl,
            20 => Sctrl,
            21 => Xchg,
            22 => PushPri,
            23 => PushAlt,
            24 => PushrPri,
            25 => PopPri,
            26 => PopAlt,
            27 => Pick,
            28 => Stack,
            29 => Heap,
            30 => Proc,
            31 => Ret,
            32 => Retn,
            33 => Call,
            34 => Jump,
            35 => Jzer,
            36 => Jnz,
            37 => Shl,
            38 => Shr,
            39 => Sshr,
            40 => ShlCPri,
            41 => ShlCAlt,
            42 => Smul,
            43 => Sdiv,
            44 => Add,
            45 => Sub,
            46 => And,
            47 => Or,
            48 => Xor,
            49 => Not,
            50 => Neg,
            51 => Invert,
            52 => Eq,
            53 => Neq,
            54 => Sless,
            55 => Sleq,
            56 => Sgrtr,
            57 => Sgeq,
            58 => IncPri,
            59 => IncAlt,
            60 => IncI,
            61 => DecPri,
            62 => DecAlt,
            63 => DecI,
            64 => Movs,
            65 => Cmps,
            66 => Fill,
            67 => Halt,
            68 => Bounds,
            69 => Sysreq,
            70 => Switch,
            71 => SwapPri,
            72 => SwapAlt,
            73 => Break,
            74 => Casetbl,
            _ => return None,
        })
    }

    /// Whether the opcode cell is followed by an operand cell.
    pub fn has_operand(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            LoadPri
                | LoadAlt
                | LoadSPri
                | LoadSAlt
                | LrefSPri
                | LrefSAlt
                | LodbI
                | ConstPri
                | ConstAlt
                | AddrPri
                | AddrAlt
                | Stor
                | StorS
                | SrefS
                | StrbI
                | AlignPri
                | Lctrl
                | Sctrl
                | Pick
                | Stack
                | Heap
                | Call
                | Jump
                | Jzer
                | Jnz
                | ShlCPri
                | ShlCAlt
                | Movs
                | Cmps
                | Fill
                | Halt
                | Bounds
                | Sysreq
                | Switch
        )
    }

    /// Assembler-style mnemonic, for host tracers and diagnostics.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            LoadPri => "load.pri",
            LoadAlt => "load.alt",
            LoadSPri => "load.s.pri",
            LoadSAlt => "load.s.alt",
            LrefSPri => "lref.s.pri",
            LrefSAlt => "lref.s.alt",
            LoadI => "load.i",
            LodbI => "lodb.i",
            ConstPri => "const.pri",
            ConstAlt => "const.alt",
            AddrPri => "addr.pri",
            AddrAlt => "addr.alt",
            Stor => "stor",
            StorS => "stor.s",
            SrefS => "sref.s",
            StorI => "stor.i",
            StrbI => "strb.i",
            AlignPri => "align.pri",
            Lctrl => "lctrl",
            Sctrl => "sctrl",
            Xchg => "xchg",
            PushPri => "push.pri",
            PushAlt => "push.alt",
            PushrPri => "pushr.pri",
            PopPri => "pop.pri",
            PopAlt => "pop.alt",
            Pick => "pick",
            Stack => "stack",
            Heap => "heap",
            Proc => "proc",
            Ret => "ret",
            Retn => "retn",
            Call => "call",
            Jump => "jump",
            Jzer => "jzer",
            Jnz => "jnz",
            Shl => "shl",
            Shr => "shr",
            Sshr => "sshr",
            ShlCPri => "shl.c.pri",
            ShlCAlt => "shl.c.alt",
            Smul => "smul",
            Sdiv => "sdiv",
            Add => "add",
            Sub => "sub",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Neg => "neg",
            Invert => "invert",
            Eq => "eq",
            Neq => "neq",
            Sless => "sless",
            Sleq => "sleq",
            Sgrtr => "sgrtr",
            Sgeq => "sgeq",
            IncPri => "inc.pri",
            IncAlt => "inc.alt",
            IncI => "inc.i",
            DecPri => "dec.pri",
            DecAlt => "dec.alt",
            DecI => "dec.i",
            Movs => "movs",
            Cmps => "cmps",
            Fill => "fill",
            Halt => "halt",
            Bounds => "bounds",
            Sysreq => "sysreq",
            Switch => "switch",
            SwapPri => "swap.pri",
            SwapAlt => "swap.alt",
            Break => "break",
            Casetbl => "casetbl",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
