//! The base console OS extension: shutdown, WRITE and READ interrupts.

use std::io::{BufRead, Write};

use crate::error::{OsError, RuntimeError};
use crate::machine::Machine;
use crate::reader::{parse_record, Reader};
use crate::value::Value;

use super::Extension;

pub const VERSION: (u8, u8) = (0, 2);

/// Base OS: console-only I/O, no graphics.
pub struct LogoOs;

impl LogoOs {
    fn new() -> Self {
        LogoOs
    }

    /// Shared with [`super::turtle_os::TurtleOs`], which inherits
    /// LogoOS's console interrupts unchanged.
    pub(crate) fn write_for_turtle(machine: &mut Machine) -> Result<(), RuntimeError> {
        LogoOs::write(machine)
    }

    pub(crate) fn read_for_turtle(machine: &mut Machine) -> Result<(), RuntimeError> {
        LogoOs::read(machine)
    }

    fn write(machine: &mut Machine) -> Result<(), RuntimeError> {
        let n = machine.pop_int()?;
        if n < 0 {
            return Err(RuntimeError::Domain(format!(
                "WRITE argument count must be non-negative, found {n}"
            )));
        }
        let mut popped = Vec::with_capacity(n as usize);
        for _ in 0..n {
            popped.push(machine.pop()?);
        }
        popped.reverse();
        let text: String = popped.iter().map(Value::to_string).collect();
        let text = interpret_escapes(&text);
        write!(machine.stdout(), "{text}").map_err(|e| RuntimeError::Domain(e.to_string()))
    }

    fn read(machine: &mut Machine) -> Result<(), RuntimeError> {
        let mut line = String::new();
        machine
            .stdin()
            .read_line(&mut line)
            .map_err(|e| RuntimeError::Domain(e.to_string()))?;
        let line = line.trim_end_matches(['\r', '\n']);
        machine.push(autoconvert(line))
    }
}

impl Extension for LogoOs {
    fn handle_interrupt(&mut self, machine: &mut Machine, slot: u8) -> Result<(), RuntimeError> {
        match slot {
            0 => Ok(()), // shutdown: nothing to do
            1 => LogoOs::write(machine),
            2 => LogoOs::read(machine),
            _ => Ok(()),
        }
    }
}

/// Replace the literal two-character escape sequences `\n` and `\t`
/// with their control-character equivalents.
fn interpret_escapes(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\t", "\t")
}

/// Parse a line of input: int if it parses as one, else float, else
/// leave it as a string.
pub fn autoconvert(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = s.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Str(s.to_string())
    }
}

/// Parsed `osname, version_major, version_minor` prefix shared by every
/// extension's init blob.
pub struct InitPrefix {
    pub osname: String,
    pub version: (u8, u8),
}

/// Parse the `osname:s, version_major:B, version_minor:B` prefix every
/// extension init blob starts with.
pub fn parse_init_prefix(init: &[u8]) -> Result<InitPrefix, OsError> {
    let mut reader = Reader::new(init);
    let fields = parse_record(
        &mut reader,
        &[("osname", 's'), ("version_major", 'B'), ("version_minor", 'B')],
    )
    .map_err(|e| OsError::InvalidOs(e.to_string()))?;
    Ok(InitPrefix {
        osname: fields[0].1.as_str().to_string(),
        version: (fields[1].1.as_u64() as u8, fields[2].1.as_u64() as u8),
    })
}

/// `(file_major, file_minor) <= (vm_major, vm_minor)` lexicographically.
pub fn check_version(file: (u8, u8), vm: (u8, u8)) -> bool {
    file.0 < vm.0 || (file.0 == vm.0 && file.1 <= vm.1)
}

pub fn construct(init: Option<&[u8]>) -> Result<Box<dyn Extension>, OsError> {
    if let Some(init) = init {
        let prefix = parse_init_prefix(init)?;
        if prefix.osname != "LogoOS" {
            return Err(OsError::InvalidOs(format!(
                "unsupported OS: {}",
                prefix.osname
            )));
        }
        if !check_version(prefix.version, VERSION) {
            return Err(OsError::InvalidOs(format!(
                "LogoOS: invalid OS version: {:?}",
                prefix.version
            )));
        }
    }
    Ok(Box::new(LogoOs::new()))
}
