//! The stack machine core: registers, flags, call stack, operand stack
//! (via [`Memory`]), opcode dispatch, and the execution loop.

use std::cmp::Ordering;
use std::io::{BufRead, Write};

use crate::error::RuntimeError;
use crate::extension::Extension;
use crate::instr::{op, Instruction};
use crate::loader::ProgramImage;
use crate::memory::Memory;
use crate::value::{Numbers, Value};

/// Bit positions of the six defined flags. Bit 0 is unused, matching
/// the original numbering (`PEN=1`, `DRAW=2`).
pub mod flag {
    pub const PEN: u8 = 1;
    pub const DRAW: u8 = 2;
    pub const VERR: u8 = 3;
    pub const RESERVED: u8 = 4;
    pub const EXC: u8 = 5;
}

/// Number of general registers, `R0..R6`; the program counter is kept
/// separately rather than aliased into the register file, since Rust
/// has no use for the original's "last register doubles as PC" trick
/// once PC manipulation is expressed as an explicit jump target.
const NUM_REGS: usize = 7;

/// The stack machine. Owns every piece of mutable state the bytecode
/// program can observe or change; an [`Extension`] is handed a `&mut
/// Machine` when an interrupt fires and may freely read/write it.
pub struct Machine {
    regs: [i64; NUM_REGS],
    flags: u8,
    code: Vec<Instruction>,
    mem: Memory,
    maxstack: usize,
    callstack: Vec<i64>,
    running: bool,
    pc: i64,
    extension: Option<Box<dyn Extension>>,
    stdin: Box<dyn BufRead>,
    stdout: Box<dyn Write>,
    stderr: Box<dyn Write>,
}

impl Machine {
    pub fn new(
        maxstack: usize,
        stdin: Box<dyn BufRead>,
        stdout: Box<dyn Write>,
        stderr: Box<dyn Write>,
    ) -> Self {
        Machine {
            regs: [0; NUM_REGS],
            flags: 0,
            code: Vec::new(),
            mem: Memory::new(maxstack),
            maxstack,
            callstack: Vec::new(),
            running: false,
            pc: -1,
            extension: None,
            stdin,
            stdout,
            stderr,
        }
    }

    /// Install the loaded program's code, heap and debug symbols.
    pub fn setup(&mut self, image: &ProgramImage) {
        self.code = image.code.clone();
        self.mem = Memory::with_program(self.maxstack, image.data.clone(), image.debug.clone());
    }

    pub fn install_extension(&mut self, extension: Box<dyn Extension>) {
        self.extension = Some(extension);
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn pc(&self) -> i64 {
        self.pc
    }

    pub fn callstack(&self) -> &[i64] {
        &self.callstack
    }

    pub fn stdout(&mut self) -> &mut dyn Write {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut dyn Write {
        &mut self.stderr
    }

    pub fn stdin(&mut self) -> &mut dyn BufRead {
        &mut self.stdin
    }

    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.mem.push(value)
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.mem.pop()
    }

    pub fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        self.pop()?.as_int_strict()
    }

    pub fn pop_str(&mut self) -> Result<String, RuntimeError> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::TypeMismatch(format!(
                "expected a string, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn get_heap(&self, addr: u64) -> Result<&Value, RuntimeError> {
        self.mem.get_heap(addr)
    }

    pub fn set_flag(&mut self, bit: u8) {
        self.flags |= 1 << bit;
    }

    pub fn unset_flag(&mut self, bit: u8) {
        self.flags &= !(1 << bit);
    }

    /// Return whether `bit` is set, also mirroring the result into
    /// `R0` as the original `is_set` does.
    pub fn is_set(&mut self, bit: u8) -> bool {
        let set = self.flags & (1 << bit) != 0;
        self.regs[0] = set as i64;
        set
    }

    /// Invoke interrupt `slot`. With no extension installed, or for a
    /// slot the extension does not recognize, this is a no-op, per the
    /// "unfilled interrupt slots behave as no-ops" invariant.
    pub fn invoke_interrupt(&mut self, slot: u8) -> Result<(), RuntimeError> {
        if slot >= 16 {
            return Err(RuntimeError::InvalidInterrupt(slot));
        }
        let Some(mut extension) = self.extension.take() else {
            return Ok(());
        };
        let result = extension.handle_interrupt(self, slot);
        self.extension = Some(extension);
        result
    }

    /// Run the loaded program to completion. Errors are printed to the
    /// error console (with a call-stack dump if one is pending) rather
    /// than propagated, matching the original's top-level behavior:
    /// the process always "completes" its turn, successfully or not.
    pub fn execute(&mut self) {
        if let Err(err) = self.execute_inner() {
            let _ = writeln!(self.stderr, "{err} - PC={}", self.pc);
            if !self.callstack.is_empty() {
                let _ = writeln!(self.stderr, "Stack trace:");
                for addr in self.callstack.clone() {
                    let _ = writeln!(self.stderr, "    {addr}");
                }
            }
        }
    }

    fn execute_inner(&mut self) -> Result<(), RuntimeError> {
        self.running = true;
        self.pc = 0;
        while self.running {
            if self.pc < 0 || self.pc as usize >= self.code.len() {
                return Err(RuntimeError::InvalidAddress(self.pc));
            }
            let instr = self.code[self.pc as usize].clone();
            match self.execute_instruction(&instr)? {
                Some(target) => self.pc = target,
                None => self.pc += 1,
            }
        }
        self.invoke_interrupt(0)
    }

    /// Execute one instruction. Returns `Some(target)` when the
    /// instruction sets the next program counter explicitly (already
    /// the literal index of the next instruction to run); `None` means
    /// "advance normally", which the loop does by incrementing `pc`.
    fn execute_instruction(&mut self, instr: &Instruction) -> Result<Option<i64>, RuntimeError> {
        let pc = self.pc;
        match instr.opcode {
            op::NOP => Ok(None),
            op::HALT => {
                self.running = false;
                Ok(None)
            }
            op::RET => {
                let target = self.callstack.pop().ok_or(RuntimeError::EmptyStack)?;
                Ok(Some(target))
            }
            op::RAND => {
                self.push(Value::Float(rand::random::<f64>()))?;
                Ok(None)
            }
            op::SKIPZ => Ok(self.skip_if(pc, self.regs[0] == 0)),
            op::SKIPNZ => Ok(self.skip_if(pc, self.regs[0] != 0)),

            op::POP => {
                self.pop()?;
                Ok(None)
            }
            op::DUP => {
                let v = self.pop()?;
                self.push(v.clone())?;
                self.push(v)?;
                Ok(None)
            }
            op::INT => {
                let v = self.pop()?.to_int()?;
                self.push(v)?;
                Ok(None)
            }
            op::FLOAT => {
                let v = self.pop()?.to_float()?;
                self.push(v)?;
                Ok(None)
            }
            op::STRING => {
                let v = self.pop()?.to_str_value();
                self.push(v)?;
                Ok(None)
            }
            op::ABS => {
                let v = match self.pop()? {
                    Value::Int(i) => Value::Int(i.abs()),
                    Value::Float(f) => Value::Float(f.abs()),
                    other => {
                        return Err(RuntimeError::TypeMismatch(format!(
                            "ABS requires a number, found {}",
                            other.type_name()
                        )))
                    }
                };
                self.push(v)?;
                Ok(None)
            }
            op::NOT => {
                let i = self.pop_int()?;
                self.push(Value::Int(!i))?;
                Ok(None)
            }

            op::SWAP => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
                Ok(None)
            }
            op::CMP => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.regs[0] = match lhs.compare(&rhs)? {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                };
                Ok(None)
            }

            op::ADD => self.binop(|a, b| a + b, |a, b| a + b).map(|_| None),
            op::SUB => self.binop(|a, b| a - b, |a, b| a - b).map(|_| None),
            op::MUL => self.binop(|a, b| a * b, |a, b| a * b).map(|_| None),
            op::DIV => self.div().map(|_| None),
            op::IDIV => self.idiv().map(|_| None),
            op::POW => self.pow().map(|_| None),

            op::AND => self.bitop(|a, b| a & b).map(|_| None),
            op::OR => self.bitop(|a, b| a | b).map(|_| None),
            op::XOR => self.bitop(|a, b| a ^ b).map(|_| None),
            op::SHR => self.bitop(|a, b| ((a as u64) >> (b as u64 & 63)) as i64).map(|_| None),
            op::SHL => self.bitop(|a, b| ((a as u64) << (b as u64 & 63)) as i64).map(|_| None),
            op::ROLR => {
                let i = self.pop_int()? as u64;
                let rotated = (i >> 1) | ((i & 1) << 63);
                self.push(Value::Int(rotated as i64))?;
                Ok(None)
            }

            op::CAT => {
                let rhs = self.pop_str()?;
                let lhs = self.pop_str()?;
                self.push(Value::Str(format!("{lhs}{rhs}")))?;
                Ok(None)
            }
            op::SCHOP => {
                let n = self.pop_int()?;
                let s = self.pop_str()?;
                if !(0 <= n && (n as usize) < s.chars().count()) {
                    return Err(RuntimeError::Domain(format!(
                        "SCHOP offset {n} out of range for a {}-character string",
                        s.chars().count()
                    )));
                }
                let n = n as usize;
                let chars: Vec<char> = s.chars().collect();
                let tail: String = chars[n..].iter().collect();
                let head: String = chars[..n].iter().collect();
                self.push(Value::Str(tail))?;
                self.push(Value::Str(head))?;
                Ok(None)
            }
            op::SOFF => {
                let s = self.pop_str()?;
                let n = self.pop_int()?;
                let chars: Vec<char> = s.chars().collect();
                if !(0 <= n && (n as usize) < chars.len()) {
                    return Err(RuntimeError::Domain(format!(
                        "SOFF offset {n} out of range for a {}-character string",
                        chars.len()
                    )));
                }
                self.push(Value::Str(chars[n as usize].to_string()))?;
                Ok(None)
            }

            op::LOAD => {
                let v = self.get_heap(instr.arg.as_u64())?.clone();
                self.push(v)?;
                Ok(None)
            }
            op::JP => Ok(Some(instr.arg.as_u64() as i64)),
            op::JLESS => Ok(self.jump_if(instr.arg.as_u64() as i64, self.regs[0] < 0)),
            op::JMORE => Ok(self.jump_if(instr.arg.as_u64() as i64, self.regs[0] > 0)),
            op::JZ => Ok(self.jump_if(instr.arg.as_u64() as i64, self.regs[0] == 0)),
            op::JNZ => Ok(self.jump_if(instr.arg.as_u64() as i64, self.regs[0] != 0)),
            op::CALL => {
                self.callstack.push(pc + 1);
                Ok(Some(instr.arg.as_u64() as i64))
            }
            op::STORE => {
                let v = self.pop()?;
                self.mem.set_heap(instr.arg.as_u64(), v)?;
                Ok(None)
            }

            op::SETF => {
                self.set_flag(instr.arg.as_u64() as u8);
                Ok(None)
            }
            op::UNSETF => {
                self.unset_flag(instr.arg.as_u64() as u8);
                Ok(None)
            }
            op::ISSETF => {
                self.is_set(instr.arg.as_u64() as u8);
                Ok(None)
            }
            op::INTR => {
                self.invoke_interrupt(instr.arg.as_u64() as u8)?;
                Ok(None)
            }

            op::PUSHI => {
                self.push(Value::Int(instr.arg.as_i64()))?;
                Ok(None)
            }
            op::JR => Ok(Some(pc + instr.arg.as_i64())),

            op::PUSHD => {
                self.push(Value::Float(instr.arg.as_f64()))?;
                Ok(None)
            }

            op::PUSHS => {
                self.push(Value::Str(instr.arg.as_str().to_string()))?;
                Ok(None)
            }

            other => Err(RuntimeError::InvalidCommand(other)),
        }
    }

    fn skip_if(&self, pc: i64, cond: bool) -> Option<i64> {
        if cond {
            Some(pc + 2)
        } else {
            None
        }
    }

    fn jump_if(&self, target: i64, cond: bool) -> Option<i64> {
        if cond {
            Some(target)
        } else {
            None
        }
    }

    fn binop(
        &mut self,
        int_op: impl Fn(i64, i64) -> i64,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let (a, b) = Value::as_numbers(&lhs, &rhs)?;
        let result = match (a, b) {
            (Numbers::Int(a), Numbers::Int(b)) => Value::Int(int_op(a, b)),
            (a, b) => Value::Float(float_op(num_f64(a), num_f64(b))),
        };
        self.push(result)
    }

    fn div(&mut self) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let (a, b) = Value::as_numbers(&lhs, &rhs)?;
        self.push(Value::Float(num_f64(a) / num_f64(b)))
    }

    fn idiv(&mut self) -> Result<(), RuntimeError> {
        let rhs = self.pop_int()?;
        let lhs = self.pop_int()?;
        if rhs == 0 {
            return Err(RuntimeError::Domain("division by zero in IDIV".into()));
        }
        let quotient = lhs.div_euclid(rhs);
        let remainder = lhs.rem_euclid(rhs);
        self.push(Value::Int(remainder))?;
        self.push(Value::Int(quotient))
    }

    fn pow(&mut self) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let (a, b) = Value::as_numbers(&lhs, &rhs)?;
        match (a, b) {
            (Numbers::Int(base), Numbers::Int(exp)) if exp >= 0 => {
                self.push(Value::Int(base.pow(exp as u32)))
            }
            (a, b) => {
                let base = num_f64(a);
                let exp = num_f64(b);
                let result = base.powf(exp);
                if result.is_nan() && base < 0.0 {
                    return Err(RuntimeError::Domain(format!(
                        "POW: {base} raised to fractional exponent {exp} is not a real number"
                    )));
                }
                self.push(Value::Float(result))
            }
        }
    }

    fn bitop(&mut self, op: impl Fn(i64, i64) -> i64) -> Result<(), RuntimeError> {
        let rhs = self.pop_int()?;
        let lhs = self.pop_int()?;
        self.push(Value::Int(op(lhs, rhs)))
    }
}

fn num_f64(n: Numbers) -> f64 {
    match n {
        Numbers::Int(i) => i as f64,
        Numbers::Float(f) => f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Arg;
    use std::io::{BufReader, Cursor};

    fn machine() -> Machine {
        Machine::new(
            16,
            Box::new(BufReader::new(Cursor::new(Vec::new()))),
            Box::new(Vec::new()),
            Box::new(Vec::new()),
        )
    }

    fn run(code: Vec<Instruction>) -> Machine {
        let mut m = machine();
        m.code = code;
        m.execute();
        m
    }

    #[test]
    fn jp_lands_on_target_index() {
        let code = vec![
            Instruction::new(op::JP, Arg::U64(2)),
            Instruction::new(op::PUSHI, Arg::I64(999)), // skipped
            Instruction::new(op::HALT, Arg::None),
        ];
        let m = run(code);
        // The only way this stack is empty is if PC landed exactly on
        // HALT at index 2 and never fell into index 1 or overshot past
        // the end of the code vector into an InvalidAddress abort.
        assert_eq!(m.mem.depth(), 0);
    }

    #[test]
    fn call_then_ret_resumes_right_after_the_call() {
        let code = vec![
            Instruction::new(op::CALL, Arg::U64(3)), // 0
            Instruction::new(op::PUSHI, Arg::I64(1)), // 1: resumed here after RET
            Instruction::new(op::HALT, Arg::None),    // 2
            Instruction::new(op::RET, Arg::None),     // 3: the "subroutine"
        ];
        let m = run(code);
        assert_eq!(m.mem.depth(), 1);
    }

    #[test]
    fn jr_relative_jump_lands_pc_plus_offset_instructions_ahead() {
        let code = vec![
            Instruction::new(op::JR, Arg::I64(2)),     // 0: jump to index 2
            Instruction::new(op::PUSHI, Arg::I64(9)),  // 1: skipped
            Instruction::new(op::PUSHI, Arg::I64(42)), // 2: must run
            Instruction::new(op::HALT, Arg::None),     // 3
        ];
        let mut m = run(code);
        assert_eq!(m.pop().unwrap(), Value::Int(42));
    }

    #[test]
    fn idiv_identity_holds() {
        let mut m = machine();
        m.push(Value::Int(17)).unwrap();
        m.push(Value::Int(5)).unwrap();
        m.idiv().unwrap();
        let quotient = m.pop().unwrap();
        let remainder = m.pop().unwrap();
        assert_eq!(quotient, Value::Int(3));
        assert_eq!(remainder, Value::Int(2));
        assert_eq!(17, 3 * 5 + 2);
    }

    #[test]
    fn cmp_then_jz_composition() {
        let code = vec![
            Instruction::new(op::PUSHI, Arg::I64(4)),
            Instruction::new(op::PUSHI, Arg::I64(4)),
            Instruction::new(op::CMP, Arg::None),
            Instruction::new(op::JZ, Arg::U64(5)),
            Instruction::new(op::PUSHI, Arg::I64(1)), // skipped if equal
            Instruction::new(op::HALT, Arg::None),
        ];
        let m = run(code);
        assert_eq!(m.mem.depth(), 0);
    }

    #[test]
    fn stack_overflow_and_underflow_are_distinct() {
        let mut m = Machine::new(
            1,
            Box::new(BufReader::new(Cursor::new(Vec::new()))),
            Box::new(Vec::new()),
            Box::new(Vec::new()),
        );
        m.push(Value::Int(1)).unwrap();
        assert!(matches!(
            m.push(Value::Int(2)),
            Err(RuntimeError::StackOverflow(1))
        ));
        m.pop().unwrap();
        assert!(matches!(m.pop(), Err(RuntimeError::EmptyStack)));
    }

    #[test]
    fn div_is_true_division_not_the_original_add_typo() {
        let mut m = machine();
        m.push(Value::Int(7)).unwrap();
        m.push(Value::Int(2)).unwrap();
        m.div().unwrap();
        assert_eq!(m.pop().unwrap(), Value::Float(3.5));
    }
}
