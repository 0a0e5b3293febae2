//! `logovm`: load a `.logo` executable, resolve its OS extension, and
//! run it to completion.

use std::fs;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use logovm::error::LogoError;
use logovm::extension::Registry;
use logovm::loader::load_program;
use logovm::machine::Machine;
use logovm::memory::DEFAULT_MAXSTACK;
use logovm::reader::{parse_record, Reader};
use logovm::VM_VERSION;

#[derive(Parser)]
#[command(name = "logovm", version, about = "LogoVM: a Logo virtual machine.")]
struct Cli {
    /// Set debug mode. Repeat for increased detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Override the OS extension named in the executable's extension header.
    #[arg(short, long, value_name = "NAME")]
    osname: Option<String>,

    /// Program to execute.
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.debug {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, LogoError> {
    let bytes = fs::read(&cli.program)?;
    let image = load_program(&bytes, VM_VERSION)?;

    if image.code.is_empty() {
        eprintln!("logovm: no program loaded");
        return Ok(ExitCode::from(2));
    }

    let osname = match cli.osname {
        Some(name) => name,
        None => resolve_osname(image.ext_init.as_deref())?,
    };

    let registry = Registry::with_builtins();
    let extension = registry.construct(&osname, image.ext_init.as_deref())?;

    let mut machine = Machine::new(
        DEFAULT_MAXSTACK,
        Box::new(BufReader::new(io::stdin())),
        Box::new(io::stdout()),
        Box::new(io::stderr()),
    );
    machine.setup(&image);
    machine.install_extension(extension);
    machine.execute();

    Ok(ExitCode::SUCCESS)
}

/// Resolve the OS extension name from the first field of the
/// extension-init blob when `-o`/`--osname` wasn't given. With no
/// extension header at all, default to the base console OS.
fn resolve_osname(init: Option<&[u8]>) -> Result<String, LogoError> {
    let Some(init) = init else {
        return Ok("LogoOS".to_string());
    };
    let mut reader = Reader::new(init);
    let fields = parse_record(&mut reader, &[("osname", 's')])?;
    Ok(fields[0].1.as_str().to_string())
}
