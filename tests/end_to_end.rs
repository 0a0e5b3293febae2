//! End-to-end scenarios: build an in-memory executable with the
//! loader's encoder, run it through the machine, and assert on the
//! captured console / framebuffer output.

use std::io::{BufReader, Cursor, Write};
use std::sync::{Arc, Mutex, OnceLock};

use logovm::extension::Registry;
use logovm::instr::{op, Arg, Instruction};
use logovm::loader::{encode::encode_program, load_program};
use logovm::machine::Machine;
use logovm::value::Value;
use logovm::VM_VERSION;

/// A `Write` sink that can be inspected after the machine that owns it
/// (by `Box<dyn Write>`) has finished running.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn logo_os_init() -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(b"LogoOS\0");
    blob.push(0);
    blob.push(2);
    blob
}

fn turtle_os_init(width: u16, height: u16, x: u16, y: u16, angle_hundredths: u16, format: u8) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(b"TurtleOS\0");
    blob.push(0);
    blob.push(1);
    blob.extend_from_slice(&width.to_le_bytes());
    blob.extend_from_slice(&height.to_le_bytes());
    blob.extend_from_slice(&x.to_le_bytes());
    blob.extend_from_slice(&y.to_le_bytes());
    blob.extend_from_slice(&angle_hundredths.to_le_bytes());
    blob.push(format);
    blob
}

/// Assemble, load, and run `code`/`data` against `osname`, feeding
/// `input` to stdin. Returns `(stdout, extension)` so turtle scenarios
/// can additionally inspect the framebuffer after the run... but since
/// the extension is consumed by the machine, turtle tests instead
/// assert on the image file written to the process's working
/// directory, matching how the original tool behaves.
fn run_program(
    osname: &str,
    ext_init: Option<&[u8]>,
    code: Vec<Instruction>,
    data: Vec<Value>,
    input: &str,
) -> String {
    let bytes = encode_program((0, 2), ext_init, &code, &data, &[]);
    let image = load_program(&bytes, VM_VERSION).unwrap();

    let registry = Registry::with_builtins();
    let extension = registry.construct(osname, image.ext_init.as_deref()).unwrap();

    let stdout = SharedBuf::default();
    let mut machine = Machine::new(
        16_384,
        Box::new(BufReader::new(Cursor::new(input.as_bytes().to_vec()))),
        Box::new(stdout.clone()),
        Box::new(Vec::new()),
    );
    machine.setup(&image);
    machine.install_extension(extension);
    machine.execute();

    stdout.text()
}

#[test]
fn hello_prints_a_heap_literal() {
    let code = vec![
        Instruction::new(op::LOAD, Arg::U64(0)),
        Instruction::new(op::PUSHI, Arg::I64(1)),
        Instruction::new(op::INTR, Arg::U64(1)),
        Instruction::new(op::HALT, Arg::None),
    ];
    let data = vec![Value::Str("Hello World!\n".to_string())];
    let out = run_program("LogoOS", Some(&logo_os_init()), code, data, "");
    assert_eq!(out, "Hello World!\n");
}

#[test]
fn hello2_prints_a_pushed_string_literal() {
    let code = vec![
        Instruction::new(op::PUSHS, Arg::Str("Hello World!\n".to_string())),
        Instruction::new(op::PUSHI, Arg::I64(1)),
        Instruction::new(op::INTR, Arg::U64(1)),
        Instruction::new(op::HALT, Arg::None),
    ];
    let out = run_program("LogoOS", Some(&logo_os_init()), code, vec![], "");
    assert_eq!(out, "Hello World!\n");
}

#[test]
fn swap_then_sub_computes_three_minus_two() {
    let code = vec![
        Instruction::new(op::PUSHI, Arg::I64(2)),
        Instruction::new(op::PUSHI, Arg::I64(3)),
        Instruction::new(op::SWAP, Arg::None),
        Instruction::new(op::SUB, Arg::None),
        Instruction::new(op::PUSHI, Arg::I64(1)),
        Instruction::new(op::INTR, Arg::U64(1)),
        Instruction::new(op::HALT, Arg::None),
    ];
    let out = run_program("LogoOS", Some(&logo_os_init()), code, vec![], "");
    assert_eq!(out, "1");
}

#[test]
fn circle_area_reads_a_radius_and_computes_area() {
    let code = vec![
        Instruction::new(op::PUSHS, Arg::Str("Circle ray: ".to_string())),
        Instruction::new(op::PUSHI, Arg::I64(1)),
        Instruction::new(op::INTR, Arg::U64(1)),
        Instruction::new(op::INTR, Arg::U64(2)),
        Instruction::new(op::PUSHI, Arg::I64(2)),
        Instruction::new(op::POW, Arg::None),
        Instruction::new(op::LOAD, Arg::U64(0)),
        Instruction::new(op::MUL, Arg::None),
        Instruction::new(op::PUSHS, Arg::Str("Circle area: ".to_string())),
        Instruction::new(op::SWAP, Arg::None),
        Instruction::new(op::PUSHS, Arg::Str("\n".to_string())),
        Instruction::new(op::PUSHI, Arg::I64(3)),
        Instruction::new(op::INTR, Arg::U64(1)),
        Instruction::new(op::HALT, Arg::None),
    ];
    let data = vec![Value::Float(3.141592)];
    let out = run_program("LogoOS", Some(&logo_os_init()), code, data, "5\n");
    assert_eq!(out, "Circle ray: Circle area: 78.5398\n");
}

/// Draws a 10x10 border square via four absolute `MOVETO` calls
/// starting at the origin, then prints the final turtle position.
fn square_via_moveto() -> Vec<Instruction> {
    let corners = [(9, 0), (9, 9), (0, 9), (0, 0)];
    let mut code = Vec::new();
    for (x, y) in corners {
        code.push(Instruction::new(op::PUSHI, Arg::I64(x)));
        code.push(Instruction::new(op::PUSHI, Arg::I64(y)));
        code.push(Instruction::new(op::INTR, Arg::U64(5)));
    }
    code.push(Instruction::new(op::INTR, Arg::U64(6)));
    code.push(Instruction::new(op::PUSHI, Arg::I64(3)));
    code.push(Instruction::new(op::INTR, Arg::U64(1)));
    code.push(Instruction::new(op::HALT, Arg::None));
    code
}

/// Same square, but traced with relative `MOVE` calls (length 10 along
/// each side, at angles 0/270/180/90) instead of `MOVETO`.
fn square_via_move() -> Vec<Instruction> {
    let legs = [(10, 0), (10, 270), (10, 180), (10, 90)];
    let mut code = Vec::new();
    for (length, angle) in legs {
        code.push(Instruction::new(op::PUSHI, Arg::I64(length)));
        code.push(Instruction::new(op::PUSHI, Arg::I64(angle)));
        code.push(Instruction::new(op::INTR, Arg::U64(4)));
    }
    code.push(Instruction::new(op::INTR, Arg::U64(6)));
    code.push(Instruction::new(op::PUSHI, Arg::I64(3)));
    code.push(Instruction::new(op::INTR, Arg::U64(1)));
    code.push(Instruction::new(op::HALT, Arg::None));
    code
}

/// Turtle shutdown writes its image to the process's current
/// directory, so tests that trigger it must not run concurrently
/// against the same `cwd`. Locks a process-wide mutex and chdirs into
/// a scratch [`tempfile::TempDir`] for the guard's lifetime.
fn isolated_cwd() -> (std::sync::MutexGuard<'static, ()>, tempfile::TempDir) {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let guard = LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    (guard, dir)
}

fn assert_is_bordered_square(pgm_path: &std::path::Path) {
    let text = std::fs::read_to_string(pgm_path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), "P2");
    assert!(lines.next().unwrap().starts_with('#'));
    assert_eq!(lines.next().unwrap(), "10 10");
    assert_eq!(lines.next().unwrap(), "255");
    let rows: Vec<Vec<u8>> = lines
        .map(|line| line.split_whitespace().map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 10);
    for (y, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), 10);
        for (x, &pixel) in row.iter().enumerate() {
            let on_border = y == 0 || y == 9 || x == 0 || x == 9;
            assert_eq!(
                pixel,
                if on_border { 255 } else { 0 },
                "pixel ({x},{y}) of {pgm_path:?}"
            );
        }
    }
    std::fs::remove_file(pgm_path).unwrap();
}

#[test]
fn square_moveto_draws_a_bordered_10x10_square_and_reports_position() {
    let _cwd = isolated_cwd();
    let init = turtle_os_init(10, 10, 0, 0, 0, 1);
    let out = run_program("TurtleOS", Some(&init), square_via_moveto(), vec![], "");
    assert_eq!(out, "000.0");

    let path = std::fs::read_dir(".")
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().map(|e| e == "pgm").unwrap_or(false))
        .expect("shutdown should have written a .pgm file");
    assert_is_bordered_square(&path);
}

#[test]
fn square_move_draws_the_identical_bordered_square() {
    let _cwd = isolated_cwd();
    let init = turtle_os_init(10, 10, 0, 0, 0, 1);
    let out = run_program("TurtleOS", Some(&init), square_via_move(), vec![], "");
    assert_eq!(out, "0090.0");

    let path = std::fs::read_dir(".")
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().map(|e| e == "pgm").unwrap_or(false))
        .expect("shutdown should have written a .pgm file");
    assert_is_bordered_square(&path);
}
