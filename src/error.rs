//! Error types for every layer of LogoVM: loading an executable image,
//! initializing an OS extension, and running the machine.

use thiserror::Error;

/// Errors raised while parsing a `.logo` executable image.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("not a LogoVM executable: {0}")]
    InvalidLogoFile(String),
    #[error("truncated executable image: expected {expected} more byte(s), found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("invalid UTF-8 in string data")]
    BadUtf8(#[from] std::str::Utf8Error),
    #[error("executable targets version {major}.{minor}, which is newer than this VM ({vm_major}.{vm_minor})")]
    VersionTooNew {
        major: u8,
        minor: u8,
        vm_major: u8,
        vm_minor: u8,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while resolving or constructing an OS extension.
#[derive(Error, Debug)]
pub enum OsError {
    #[error("unknown OS extension: {0}")]
    UnknownExtension(String),
    #[error("invalid OS: {0}")]
    InvalidOs(String),
    #[error("extension error: {0}")]
    Extension(String),
}

/// Errors raised by the machine while executing a program.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("empty stack")]
    EmptyStack,
    #[error("stack overflow (max {0})")]
    StackOverflow(usize),
    #[error("invalid address: {0}")]
    InvalidAddress(i64),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("invalid command: {0}")]
    InvalidCommand(u8),
    #[error("invalid interrupt: {0}")]
    InvalidInterrupt(u8),
    #[error("domain error: {0}")]
    Domain(String),
}

/// Top-level error type, used at the CLI boundary where any layer may fail.
#[derive(Error, Debug)]
pub enum LogoError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Os(#[from] OsError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
