//! SANE backend driven through the `scanimage` command-line front-end.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::OnceLock;

use image::{DynamicImage, ImageFormat};
use regex::Regex;

use super::{DeviceHandle, ScanError, ScannerBackend, ScannerDevice};

/// Matches one line of `scanimage -L` output, e.g.
/// ``device `epson2:libusb:001:004' is a Epson PID 0x0130 flatbed scanner``.
fn device_line() -> &'static Regex {
    static DEVICE_LINE: OnceLock<Regex> = OnceLock::new();
    DEVICE_LINE.get_or_init(|| {
        Regex::new(r"^device `(?P<name>[^']+)' is an? (?P<desc>.*)$").expect("valid device regex")
    })
}

/// Parse the device list printed by `scanimage -L`.
///
/// Lines that do not describe a device (such as the "No scanners were
/// identified" banner) are ignored.
#[must_use]
pub fn parse_device_list(output: &str) -> Vec<DeviceHandle> {
    output
        .lines()
        .filter_map(|line| device_line().captures(line.trim()))
        .map(|caps| DeviceHandle::new(&caps["name"], caps["desc"].trim()))
        .collect()
}

/// [`ScannerBackend`] that shells out to `scanimage`.
#[derive(Debug, Clone)]
pub struct ScanimageBackend {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl Default for ScanimageBackend {
    fn default() -> Self {
        Self::new("scanimage")
    }
}

impl ScanimageBackend {
    /// Create a backend using the given `scanimage` executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments passed to every scan (e.g. `--resolution 300`).
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

impl ScannerBackend for ScanimageBackend {
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, ScanError> {
        let output = Command::new(&self.program)
            .arg("-L")
            .output()
            .map_err(|e| {
                ScanError::Enumeration(format!("cannot run {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            return Err(ScanError::Enumeration(stderr_message(&output)));
        }

        let devices = parse_device_list(&String::from_utf8_lossy(&output.stdout));
        log::debug!("scanimage reported {} device(s)", devices.len());
        Ok(devices)
    }

    fn open(&self, device: &DeviceHandle) -> Result<Box<dyn ScannerDevice>, ScanError> {
        if device.name.is_empty() {
            return Err(ScanError::Open {
                device: device.to_string(),
                message: "empty device name".to_string(),
            });
        }
        Ok(Box::new(ScanimageDevice {
            program: self.program.clone(),
            extra_args: self.extra_args.clone(),
            device: device.name.clone(),
        }))
    }
}

/// One opened device. `scanimage` opens and closes the device per
/// invocation, so this only carries the invocation parameters.
#[derive(Debug)]
struct ScanimageDevice {
    program: PathBuf,
    extra_args: Vec<String>,
    device: String,
}

impl ScannerDevice for ScanimageDevice {
    fn scan(&mut self) -> Result<DynamicImage, ScanError> {
        log::debug!("Running {} on {}", self.program.display(), self.device);
        let output = Command::new(&self.program)
            .args(["-d", &self.device, "--format=pnm"])
            .args(&self.extra_args)
            .output()?;

        if !output.status.success() {
            return Err(ScanError::Scan {
                device: self.device.clone(),
                message: stderr_message(&output),
            });
        }
        if output.stdout.is_empty() {
            return Err(ScanError::Scan {
                device: self.device.clone(),
                message: "no image data returned".to_string(),
            });
        }

        Ok(image::load_from_memory_with_format(
            &output.stdout,
            ImageFormat::Pnm,
        )?)
    }

    fn close(self: Box<Self>) -> Result<(), ScanError> {
        Ok(())
    }
}
