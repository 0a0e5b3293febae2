//! Opcode constants and the decoded instruction representation.
//!
//! An opcode's numeric range determines the width (if any) of its
//! single argument; this lets the loader and the machine share one
//! source of truth for "how many bytes does this instruction occupy".

use crate::error::LoaderError;
use crate::reader::Reader;

/// Opcode constants, named after the mnemonics in the bytecode ISA.
pub mod op {
    pub const NOP: u8 = 0;
    pub const HALT: u8 = 1;
    pub const RET: u8 = 2;
    pub const RAND: u8 = 3;
    pub const SKIPZ: u8 = 6;
    pub const SKIPNZ: u8 = 7;

    pub const POP: u8 = 8;
    pub const DUP: u8 = 9;
    pub const INT: u8 = 10;
    pub const FLOAT: u8 = 11;
    pub const STRING: u8 = 12;
    pub const ABS: u8 = 16;
    pub const NOT: u8 = 17;

    pub const SWAP: u8 = 24;
    pub const CMP: u8 = 25;

    pub const ADD: u8 = 30;
    pub const SUB: u8 = 31;
    pub const MUL: u8 = 32;
    pub const DIV: u8 = 33;
    pub const IDIV: u8 = 34;
    pub const POW: u8 = 35;

    pub const AND: u8 = 41;
    pub const OR: u8 = 42;
    pub const XOR: u8 = 43;
    pub const SHR: u8 = 44;
    pub const SHL: u8 = 45;
    pub const ROLR: u8 = 46;

    pub const CAT: u8 = 125;
    pub const SCHOP: u8 = 126;
    pub const SOFF: u8 = 127;

    pub const LOAD: u8 = 128;
    pub const JP: u8 = 129;
    pub const JLESS: u8 = 130;
    pub const JMORE: u8 = 131;
    pub const JZ: u8 = 132;
    pub const JNZ: u8 = 133;
    pub const CALL: u8 = 134;
    pub const STORE: u8 = 140;

    pub const SETF: u8 = 156;
    pub const UNSETF: u8 = 157;
    pub const ISSETF: u8 = 158;
    pub const INTR: u8 = 159;

    pub const PUSHI: u8 = 160;
    pub const JR: u8 = 161;

    pub const PUSHD: u8 = 192;

    pub const PUSHS: u8 = 224;
}

/// The shape of an opcode's argument, determined purely by its numeric
/// range (§4.4 of the spec).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    None,
    U64,
    I64,
    F64,
    Str,
}

/// Classify an opcode by the numeric-range rules: 0-127 no argument,
/// 128-159 one u64, 160-191 one i64, 192-223 one f64, 224-253 one
/// cstring. 254 is reserved and 255 is the (undefined) extension
/// escape; both decode as having no argument, since no implemented
/// opcode currently occupies them.
pub fn arg_kind(opcode: u8) -> ArgKind {
    match opcode {
        0..=127 => ArgKind::None,
        128..=159 => ArgKind::U64,
        160..=191 => ArgKind::I64,
        192..=223 => ArgKind::F64,
        224..=253 => ArgKind::Str,
        254..=255 => ArgKind::None,
    }
}

/// A decoded argument value, or its absence.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    None,
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Arg {
    pub fn as_u64(&self) -> u64 {
        match self {
            Arg::U64(v) => *v,
            other => unreachable!("expected a u64 argument, found {other:?}"),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Arg::I64(v) => *v,
            other => unreachable!("expected an i64 argument, found {other:?}"),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Arg::F64(v) => *v,
            other => unreachable!("expected an f64 argument, found {other:?}"),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Arg::Str(v) => v,
            other => unreachable!("expected a string argument, found {other:?}"),
        }
    }
}

/// A single decoded instruction: an opcode byte plus its (possibly
/// absent) typed argument.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: u8,
    pub arg: Arg,
}

impl Instruction {
    pub fn new(opcode: u8, arg: Arg) -> Self {
        Instruction { opcode, arg }
    }

    /// Decode one instruction from `reader`, returning the instruction
    /// and the number of bytes consumed (1 for the opcode plus the
    /// argument's width; strings additionally pay for their
    /// terminator).
    pub fn decode(reader: &mut Reader<'_>) -> Result<(Instruction, usize), LoaderError> {
        let opcode = reader.read_u8()?;
        let (arg, arg_len) = match arg_kind(opcode) {
            ArgKind::None => (Arg::None, 0),
            ArgKind::U64 => (Arg::U64(reader.read_u64_le()?), 8),
            ArgKind::I64 => (Arg::I64(reader.read_i64_le()?), 8),
            ArgKind::F64 => (Arg::F64(reader.read_f64_le()?), 8),
            ArgKind::Str => {
                let s = reader.read_cstring()?;
                let len = s.len() + 1;
                (Arg::Str(s), len)
            }
        };
        Ok((Instruction::new(opcode, arg), 1 + arg_len))
    }
}
