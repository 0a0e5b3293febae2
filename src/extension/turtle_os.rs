//! Turtle graphics OS: a pixel framebuffer, a turtle cursor, Bresenham
//! line rasterization, and image export on shutdown.

use std::io::Write as _;

use log::{debug, info, warn};

use crate::error::{OsError, RuntimeError};
use crate::machine::{flag, Machine};
use crate::reader::{parse_record, Reader};

use super::logo_os::{check_version, parse_init_prefix};
use super::Extension;

pub const VERSION: (u8, u8) = (0, 1);

const DEFAULT_WIDTH: u16 = 256;
const DEFAULT_HEIGHT: u16 = 192;

/// Which file format the framebuffer is serialized as on shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Pgm,
    Ppm,
}

/// A zero-initialized raster: `channels` bytes per pixel (1 or 3),
/// row-major, top-left origin.
pub struct Framebuffer {
    pub channels: u8,
    pub width: u16,
    pub height: u16,
    pub stride: usize,
    pub mem: Vec<u8>,
}

impl Framebuffer {
    fn new(width: u16, height: u16, channels: u8) -> Self {
        let stride = width as usize * channels as usize;
        Framebuffer {
            channels,
            width,
            height,
            stride,
            mem: vec![0; stride * height as usize],
        }
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        (0..self.width as i64).contains(&x) && (0..self.height as i64).contains(&y)
    }

    /// Write a single scalar intensity to the pixel at `(x, y)`,
    /// coercing it across channels if the framebuffer isn't
    /// single-channel. Returns whether a channel-mismatch coercion
    /// happened (single-channel never mismatches; multi-channel
    /// broadcasting always does).
    fn set_pixel(&mut self, x: i64, y: i64, value: u8) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        let pos = y as usize * self.stride + x as usize * self.channels as usize;
        match self.channels {
            1 => {
                self.mem[pos] = value;
                false
            }
            _ => {
                for c in 0..self.channels as usize {
                    self.mem[pos + c] = value;
                }
                true
            }
        }
    }
}

/// State shared between LogoOS-inherited console handling and
/// Turtle-specific graphics handling.
pub struct TurtleOs {
    video: Framebuffer,
    turtle: (f64, f64, f64),
    imageformat: ImageFormat,
}

impl TurtleOs {
    fn new(width: u16, height: u16, x: u16, y: u16, angle_hundredths: u16, imageformat: ImageFormat) -> Self {
        TurtleOs {
            video: Framebuffer::new(width, height, 1),
            turtle: (x as f64, y as f64, angle_hundredths as f64 / 100.0),
            imageformat,
        }
    }

    fn set_pixel(&mut self, machine: &mut Machine) -> Result<(), RuntimeError> {
        let y = machine.pop_int()?;
        let x = machine.pop_int()?;
        if machine.is_set(flag::PEN) {
            let mismatched = self.video.set_pixel(x, y, 255);
            if mismatched {
                machine.set_flag(flag::VERR);
                warn!("TurtleOS: channel mismatch writing pixel ({x}, {y})");
            }
            machine.set_flag(flag::DRAW);
        }
        Ok(())
    }

    fn bresenham(&mut self, machine: &mut Machine, start: (f64, f64), end: (f64, f64)) -> Result<(), RuntimeError> {
        if !machine.is_set(flag::PEN) {
            return Ok(());
        }
        let (mut x0, mut y0) = start;
        let (x1, y1) = end;
        let dx = (x1 - x0).abs();
        let sx = if x1 < x0 { -1.0 } else { 1.0 };
        let dy = -(y1 - y0).abs();
        let sy = if y1 < y0 { -1.0 } else { 1.0 };
        let mut error = dx + dy;
        loop {
            machine.push(crate::value::Value::Int(x0 as i64))?;
            machine.push(crate::value::Value::Int(y0 as i64))?;
            self.set_pixel(machine)?;
            if x0 as i64 == x1 as i64 && y0 as i64 == y1 as i64 {
                break;
            }
            let error2 = 2.0 * error;
            if error2 >= dy {
                if x0 as i64 == x1 as i64 {
                    break;
                }
                error += dy;
                x0 += sx;
            }
            if error2 <= dx {
                if y0 as i64 == y1 as i64 {
                    break;
                }
                error += dx;
                y0 += sy;
            }
        }
        Ok(())
    }

    fn mov(&mut self, machine: &mut Machine) -> Result<(), RuntimeError> {
        let angle = machine.pop()?.to_float()?.as_f64_unchecked();
        let length = machine.pop()?.to_float()?.as_f64_unchecked();
        let angle = 360.0 - (angle % 360.0);
        let (x0, y0, _) = self.turtle;
        let radians = angle * std::f64::consts::PI / 180.0;
        let x1 = (x0 + (length - 1.0) * radians.cos()).trunc();
        let y1 = (y0 + (length - 1.0) * radians.sin()).trunc();
        self.turtle = (x1, y1, angle);
        debug!("TurtleOS: move {x0},{y0} -> {x1},{y1} @ {angle}");
        self.bresenham(machine, (x0, y0), (x1, y1))
    }

    fn move_to(&mut self, machine: &mut Machine) -> Result<(), RuntimeError> {
        let (x0, y0, angle) = self.turtle;
        let y1 = machine.pop()?.to_float()?.as_f64_unchecked();
        let x1 = machine.pop()?.to_float()?.as_f64_unchecked();
        self.turtle = (x1, y1, angle);
        self.bresenham(machine, (x0, y0), (x1, y1))
    }

    fn get_pos(&mut self, machine: &mut Machine) -> Result<(), RuntimeError> {
        let (x, y, angle) = self.turtle;
        machine.push(crate::value::Value::Int(x as i64))?;
        machine.push(crate::value::Value::Int(y as i64))?;
        machine.push(crate::value::Value::Float((360.0 - angle) % 360.0))
    }

    fn clear_screen(&mut self, machine: &mut Machine) -> Result<(), RuntimeError> {
        self.video = Framebuffer::new(self.video.width, self.video.height, self.video.channels);
        machine.unset_flag(flag::DRAW);
        Ok(())
    }

    fn shutdown(&mut self, machine: &mut Machine) -> Result<(), RuntimeError> {
        if !machine.is_set(flag::DRAW) {
            return Ok(());
        }
        info!("TurtleOS: saving framebuffer as {:?}", self.imageformat);
        let filename = timestamp_filename();
        save_image(&self.video, self.imageformat, &filename)
            .map_err(|e| RuntimeError::Domain(e.to_string()))
    }
}

impl Extension for TurtleOs {
    fn handle_interrupt(&mut self, machine: &mut Machine, slot: u8) -> Result<(), RuntimeError> {
        match slot {
            0 => self.shutdown(machine),
            1 => super::logo_os::LogoOs::write_for_turtle(machine),
            2 => super::logo_os::LogoOs::read_for_turtle(machine),
            3 => self.set_pixel(machine),
            4 => self.mov(machine),
            5 => self.move_to(machine),
            6 => self.get_pos(machine),
            7 => self.clear_screen(machine),
            _ => Ok(()),
        }
    }
}

/// `YYYYMMDD-HHMMSS` in local wall-clock time, used as the base name
/// for the image file emitted on shutdown. Implemented against
/// `SystemTime` directly (civil-from-days, Howard Hinnant's algorithm)
/// rather than pulling in a date/time crate for one timestamp.
fn timestamp_filename() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let time_of_day = secs % 86_400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!("{year:04}{month:02}{day:02}-{hour:02}{minute:02}{second:02}")
}

fn save_image(fb: &Framebuffer, format: ImageFormat, filename: &str) -> std::io::Result<()> {
    match format {
        ImageFormat::Pgm | ImageFormat::Ppm => save_as_netpbm(fb, format, filename),
        ImageFormat::Png | ImageFormat::Jpeg => {
            if save_with_image_crate(fb, format, filename).is_err() {
                let fallback = if fb.channels == 1 { ImageFormat::Pgm } else { ImageFormat::Ppm };
                save_as_netpbm(fb, fallback, filename)
            } else {
                Ok(())
            }
        }
    }
}

fn save_as_netpbm(fb: &Framebuffer, format: ImageFormat, filename: &str) -> std::io::Result<()> {
    let (mode, ext) = match format {
        ImageFormat::Pgm => ("P2", "pgm"),
        ImageFormat::Ppm => ("P3", "ppm"),
        _ => unreachable!("netpbm save only handles PGM/PPM"),
    };
    let path = format!("{filename}.{ext}");
    let mut out = std::fs::File::create(&path)?;
    writeln!(out, "{mode}")?;
    writeln!(out, "# {path}")?;
    writeln!(out, "{} {}", fb.width, fb.height)?;
    writeln!(out, "255")?;
    for row in fb.mem.chunks(fb.stride) {
        let line: Vec<String> = row.iter().map(u8::to_string).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    Ok(())
}

fn save_with_image_crate(fb: &Framebuffer, format: ImageFormat, filename: &str) -> image::ImageResult<()> {
    let ext = match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        _ => unreachable!("image-crate save only handles PNG/JPEG"),
    };
    let path = format!("{filename}.{ext}");
    if fb.channels == 1 {
        let img: image::GrayImage =
            image::ImageBuffer::from_raw(fb.width as u32, fb.height as u32, fb.mem.clone())
                .expect("framebuffer dimensions match its own buffer length");
        img.save(path)
    } else {
        let img: image::RgbImage =
            image::ImageBuffer::from_raw(fb.width as u32, fb.height as u32, fb.mem.clone())
                .expect("framebuffer dimensions match its own buffer length");
        img.save(path)
    }
}

struct InitRecord {
    width: u16,
    height: u16,
    x: u16,
    y: u16,
    angle: u16,
    imageformat: u8,
}

fn parse_turtle_init(init: &[u8]) -> Result<InitRecord, OsError> {
    let mut reader = Reader::new(init);
    let fields = parse_record(
        &mut reader,
        &[
            ("osname", 's'),
            ("version_major", 'B'),
            ("version_minor", 'B'),
            ("width", 'H'),
            ("height", 'H'),
            ("x", 'H'),
            ("y", 'H'),
            ("angle", 'H'),
            ("imageformat", 'B'),
        ],
    )
    .map_err(|e| OsError::InvalidOs(e.to_string()))?;
    Ok(InitRecord {
        width: fields[3].1.as_u64() as u16,
        height: fields[4].1.as_u64() as u16,
        x: fields[5].1.as_u64() as u16,
        y: fields[6].1.as_u64() as u16,
        angle: fields[7].1.as_u64() as u16,
        imageformat: fields[8].1.as_u64() as u8,
    })
}

fn resolve_format(code: u8) -> Result<ImageFormat, OsError> {
    match code {
        0 | 2 => Ok(ImageFormat::Png),
        1 => Ok(ImageFormat::Pgm),
        3 => Ok(ImageFormat::Jpeg),
        other => Err(OsError::InvalidOs(format!("unknown image format code: {other}"))),
    }
}

pub fn construct(init: Option<&[u8]>) -> Result<Box<dyn Extension>, OsError> {
    let Some(init) = init else {
        return Ok(Box::new(TurtleOs::new(
            DEFAULT_WIDTH,
            DEFAULT_HEIGHT,
            DEFAULT_WIDTH / 2,
            DEFAULT_HEIGHT / 2,
            9000,
            ImageFormat::Png,
        )));
    };
    let prefix = parse_init_prefix(init)?;
    match prefix.osname.as_str() {
        "LogoOS" => {
            if !check_version(prefix.version, super::logo_os::VERSION) {
                return Err(OsError::InvalidOs(format!(
                    "LogoOS: invalid OS version: {:?}",
                    prefix.version
                )));
            }
            Ok(Box::new(TurtleOs::new(
                DEFAULT_WIDTH,
                DEFAULT_HEIGHT,
                DEFAULT_WIDTH / 2,
                DEFAULT_HEIGHT / 2,
                9000,
                ImageFormat::Png,
            )))
        }
        "TurtleOS" => {
            if !check_version(prefix.version, VERSION) {
                return Err(OsError::InvalidOs(format!(
                    "TurtleOS: invalid OS version: {:?}",
                    prefix.version
                )));
            }
            let record = parse_turtle_init(init)?;
            let format = resolve_format(record.imageformat)?;
            Ok(Box::new(TurtleOs::new(
                record.width,
                record.height,
                record.x,
                record.y,
                record.angle,
                format,
            )))
        }
        other => Err(OsError::InvalidOs(format!("invalid OS request: {other}"))),
    }
}
