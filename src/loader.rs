//! Parses a `.logo` executable image into an in-memory [`ProgramImage`].
//!
//! The file format (little-endian throughout):
//!
//! ```text
//! offset  contents
//! 0       "LOGO"                                  (4 bytes)
//! 4       major, minor                            (1 + 1)
//! 6       ext_hdr_size                            (u16)
//! 8       ext_hdr_bytes                           (ext_hdr_size bytes)
//! ...     ".CODE" + code_size:u64 + code_bytes
//! ...     optionally ".DATA" + data_size:u64 + data_bytes
//! ...     optionally ".DBUG" + dbg_size:u64  + dbg_bytes
//! ```
//!
//! Failures at any stage surface as [`LoaderError::InvalidLogoFile`] or
//! a more specific variant (truncation, bad UTF-8, version mismatch).

use crate::error::LoaderError;
use crate::instr::Instruction;
use crate::reader::Reader;
use crate::value::Value;

/// The decoded contents of a `.logo` executable: everything the
/// machine and the OS extension need to start running.
pub struct ProgramImage {
    /// Raw extension-init blob, forwarded unmodified to the OS extension.
    pub ext_init: Option<Vec<u8>>,
    pub code: Vec<Instruction>,
    pub data: Vec<Value>,
    pub debug: Vec<String>,
}

const MAGIC: &str = "LOGO";
const CODE_MARK: &str = ".CODE";
const DATA_MARK: &str = ".DATA";
const DBUG_MARK: &str = ".DBUG";

/// Load a program image from a complete in-memory executable.
pub fn load_program(bytes: &[u8], vm_version: (u8, u8)) -> Result<ProgramImage, LoaderError> {
    let mut reader = Reader::new(bytes);

    load_header(&mut reader, vm_version)?;
    let ext_init = load_extension(&mut reader)?;

    reader.expect_mark(CODE_MARK).map_err(|_| {
        LoaderError::InvalidLogoFile("missing .CODE section".to_string())
    })?;
    let code = load_code(&mut reader)?;

    let data = load_data(&mut reader)?;
    let debug = load_debug(&mut reader)?;

    if !reader.is_empty() {
        return Err(LoaderError::InvalidLogoFile(format!(
            "{} unexpected trailing byte(s) after all known sections",
            reader.remaining()
        )));
    }

    Ok(ProgramImage {
        ext_init,
        code,
        data,
        debug,
    })
}

fn load_header(reader: &mut Reader<'_>, vm_version: (u8, u8)) -> Result<(), LoaderError> {
    reader
        .expect_mark(MAGIC)
        .map_err(|_| LoaderError::InvalidLogoFile("bad magic, not a LogoVM executable".into()))?;
    let major = reader.read_u8()?;
    let minor = reader.read_u8()?;
    let (vm_major, vm_minor) = vm_version;
    let ok = major < vm_major || (major == vm_major && minor <= vm_minor);
    if !ok {
        return Err(LoaderError::VersionTooNew {
            major,
            minor,
            vm_major,
            vm_minor,
        });
    }
    Ok(())
}

fn load_extension(reader: &mut Reader<'_>) -> Result<Option<Vec<u8>>, LoaderError> {
    let ext_size = reader.read_u16_le()?;
    if ext_size == 0 {
        return Ok(None);
    }
    Ok(Some(reader.read_bytes(ext_size as usize)?.to_vec()))
}

fn load_code(reader: &mut Reader<'_>) -> Result<Vec<Instruction>, LoaderError> {
    let mut remaining = reader.read_u64_le()? as i64;
    let mut code = Vec::new();
    while remaining > 0 {
        let (instr, consumed) = Instruction::decode(reader)?;
        code.push(instr);
        remaining -= consumed as i64;
    }
    if remaining != 0 {
        return Err(LoaderError::InvalidLogoFile(
            "code section length did not align with a whole number of instructions".into(),
        ));
    }
    Ok(code)
}

fn load_data(reader: &mut Reader<'_>) -> Result<Vec<Value>, LoaderError> {
    if !reader.consume_optional_mark(DATA_MARK) {
        return Ok(Vec::new());
    }
    let mut remaining = reader.read_u64_le()? as i64;
    let mut data = Vec::new();
    while remaining > 0 {
        let tag = reader.read_u8()?;
        let consumed = match tag {
            b'i' => {
                data.push(Value::Int(reader.read_i64_le()?));
                8
            }
            b'd' => {
                data.push(Value::Float(reader.read_f64_le()?));
                8
            }
            b's' => {
                let s = reader.read_cstring()?;
                let len = s.len() + 1;
                data.push(Value::Str(s));
                len
            }
            other => {
                return Err(LoaderError::InvalidLogoFile(format!(
                    "invalid data tag: {other:#x}"
                )))
            }
        };
        remaining -= 1 + consumed as i64;
    }
    Ok(data)
}

fn load_debug(reader: &mut Reader<'_>) -> Result<Vec<String>, LoaderError> {
    if !reader.consume_optional_mark(DBUG_MARK) {
        return Ok(Vec::new());
    }
    let mut remaining = reader.read_u64_le()? as i64;
    let mut debug = Vec::new();
    while remaining > 0 {
        let _tag = reader.read_u8()?;
        let s = reader.read_cstring()?;
        remaining -= 1 + s.len() as i64 + 1;
        debug.push(s);
    }
    Ok(debug)
}

/// Encode a program image back into the on-disk format. Used by tests
/// to build synthetic executables and to check the framing round-trip
/// property.
pub mod encode {
    use super::*;

    pub fn encode_program(
        vm_version: (u8, u8),
        ext_init: Option<&[u8]>,
        code: &[Instruction],
        data: &[Value],
        debug: &[String],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC.as_bytes());
        out.push(vm_version.0);
        out.push(vm_version.1);

        let ext_bytes = ext_init.unwrap_or(&[]);
        out.extend_from_slice(&(ext_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(ext_bytes);

        out.extend_from_slice(CODE_MARK.as_bytes());
        let code_bytes = encode_code(code);
        out.extend_from_slice(&(code_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&code_bytes);

        if !data.is_empty() {
            out.extend_from_slice(DATA_MARK.as_bytes());
            let data_bytes = encode_data(data);
            out.extend_from_slice(&(data_bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(&data_bytes);
        }

        if !debug.is_empty() {
            out.extend_from_slice(DBUG_MARK.as_bytes());
            let dbg_bytes = encode_debug(debug);
            out.extend_from_slice(&(dbg_bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(&dbg_bytes);
        }

        out
    }

    fn encode_code(code: &[Instruction]) -> Vec<u8> {
        use crate::instr::Arg;
        let mut out = Vec::new();
        for instr in code {
            out.push(instr.opcode);
            match &instr.arg {
                Arg::None => {}
                Arg::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
                Arg::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
                Arg::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
                Arg::Str(s) => {
                    out.extend_from_slice(s.as_bytes());
                    out.push(0);
                }
            }
        }
        out
    }

    fn encode_data(data: &[Value]) -> Vec<u8> {
        let mut out = Vec::new();
        for value in data {
            match value {
                Value::Int(i) => {
                    out.push(b'i');
                    out.extend_from_slice(&i.to_le_bytes());
                }
                Value::Float(f) => {
                    out.push(b'd');
                    out.extend_from_slice(&f.to_le_bytes());
                }
                Value::Str(s) => {
                    out.push(b's');
                    out.extend_from_slice(s.as_bytes());
                    out.push(0);
                }
            }
        }
        out
    }

    fn encode_debug(debug: &[String]) -> Vec<u8> {
        let mut out = Vec::new();
        for name in debug {
            out.push(b's');
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        out
    }
}
