//! Controller device channels
//!
//! The bridge needs two things from the controller: a blocking source of raw
//! input reports and a sink for output frames. Both can be backed either by a
//! Linux hidraw node or by hidapi discovery.
//!
//! Only a DualShock 4 on Bluetooth speaks the 0x11 input and control report
//! layout. Discovery skips anything else and says why.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use hidapi::{HidApi, HidDevice};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Sony vendor ID
pub const SONY_VENDOR_ID: u16 = 0x054C;
/// DualShock 4 (first revision) product ID
pub const DUALSHOCK4_PRODUCT_ID: u16 = 0x05C4;
/// DualShock 4 v2 product ID
pub const DUALSHOCK4_V2_PRODUCT_ID: u16 = 0x09CC;
/// DualSense product ID
pub const DUALSENSE_PRODUCT_ID: u16 = 0x0CE6;

pub const SUPPORTED_PRODUCT_IDS: [u16; 2] = [DUALSHOCK4_PRODUCT_ID, DUALSHOCK4_V2_PRODUCT_ID];

/// hidapi read poll interval, bounds how long a writer waits for the lock
const HIDAPI_READ_TIMEOUT_MS: i32 = 10;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("HID API error: {0}")]
    HidApi(#[from] hidapi::HidError),

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No supported controller found")]
    NotFound,

    #[error("Found a controller that cannot be bridged: {0}")]
    Unsupported(Compatibility),

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Device closed")]
    Closed,
}

/// Blocking source of raw input reports
pub trait ReportReader: Send {
    /// Read one report into `buf`, returning its length
    fn read_report(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;
}

/// Sink for complete output frames
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DeviceError>;
}

/// Output channel shared by every task that emits frames.
///
/// One frame is written per lock acquisition so frames never interleave.
#[derive(Clone)]
pub struct OutputChannel {
    writer: Arc<Mutex<Box<dyn FrameWriter>>>,
}

impl OutputChannel {
    pub fn new(writer: impl FrameWriter + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn send(&self, frame: &[u8]) -> Result<(), DeviceError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_frame(frame)?;
        trace!("Wrote {}-byte frame (id 0x{:02x})", frame.len(), frame.first().copied().unwrap_or(0));
        Ok(())
    }
}

/// Read half of a hidraw node
pub struct HidrawReader {
    file: File,
}

/// Write half of a hidraw node
pub struct HidrawWriter {
    file: File,
}

/// Open a hidraw node read/write and split it into independent handles
pub fn open_hidraw<P: AsRef<Path>>(path: P) -> Result<(HidrawReader, HidrawWriter), DeviceError> {
    let path = path.as_ref();
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let write_file = file.try_clone()?;
    info!("Opened {}", path.display());
    Ok((HidrawReader { file }, HidrawWriter { file: write_file }))
}

impl ReportReader for HidrawReader {
    fn read_report(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        match self.file.read(buf)? {
            0 => Err(DeviceError::Closed),
            n => Ok(n),
        }
    }
}

impl FrameWriter for HidrawWriter {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        let written = self.file.write(frame)?;
        if written != frame.len() {
            return Err(DeviceError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        self.file.flush()?;
        Ok(())
    }
}

/// Connection type reported by hidapi
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionType {
    Usb,
    Bluetooth,
}

impl ConnectionType {
    /// USB devices have interface_number >= 0, Bluetooth typically has -1
    pub fn from_interface(interface_number: i32) -> Self {
        if interface_number == -1 {
            ConnectionType::Bluetooth
        } else {
            ConnectionType::Usb
        }
    }
}

/// Whether a HID device can be bridged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Supported,
    /// DualShock 4 on USB, whose reports use a different layout
    UsbConnection,
    /// DualSense, whose reports and control frames use a different layout
    DualSense,
    Other,
}

impl std::fmt::Display for Compatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compatibility::Supported => write!(f, "supported"),
            Compatibility::UsbConnection => {
                write!(f, "DualShock 4 on USB; pair it over Bluetooth instead")
            }
            Compatibility::DualSense => write!(f, "DualSense report layout is not handled"),
            Compatibility::Other => write!(f, "not a PlayStation controller"),
        }
    }
}

pub fn compatibility(vendor_id: u16, product_id: u16, interface_number: i32) -> Compatibility {
    if vendor_id != SONY_VENDOR_ID {
        return Compatibility::Other;
    }
    if product_id == DUALSENSE_PRODUCT_ID {
        return Compatibility::DualSense;
    }
    if !is_supported(vendor_id, product_id) {
        return Compatibility::Other;
    }
    match ConnectionType::from_interface(interface_number) {
        ConnectionType::Bluetooth => Compatibility::Supported,
        ConnectionType::Usb => Compatibility::UsbConnection,
    }
}

/// Pick the first bridgeable device, or explain why the closest match is not
fn select_device<T: Copy>(
    devices: impl IntoIterator<Item = (T, Compatibility)>,
) -> Result<T, DeviceError> {
    let mut rejected = None;
    for (device, compat) in devices {
        match compat {
            Compatibility::Supported => return Ok(device),
            Compatibility::Other => {}
            other => {
                rejected.get_or_insert(other);
            }
        }
    }
    Err(rejected.map_or(DeviceError::NotFound, DeviceError::Unsupported))
}

/// hidapi-backed controller handle; clones share the device
#[derive(Clone)]
pub struct HidapiController {
    device: Arc<Mutex<HidDevice>>,
}

impl HidapiController {
    /// Find and connect to the first DualShock 4 paired over Bluetooth
    pub fn find_and_connect() -> Result<Self, DeviceError> {
        let api = HidApi::new()?;

        let device_info = select_device(api.device_list().map(|d| {
            let compat = compatibility(d.vendor_id(), d.product_id(), d.interface_number());
            if compat != Compatibility::Supported && compat != Compatibility::Other {
                debug!("Skipping {:?}: {}", d.path(), compat);
            }
            (d, compat)
        }))?;

        let product_name = device_info.product_string().unwrap_or("controller");
        let serial = device_info.serial_number().unwrap_or("unknown");
        let connection_type = ConnectionType::from_interface(device_info.interface_number());

        info!(
            "Found {} (serial: {}) via {:?}",
            product_name, serial, connection_type
        );

        let device = device_info.open_device(&api)?;

        Ok(Self {
            device: Arc::new(Mutex::new(device)),
        })
    }
}

impl ReportReader for HidapiController {
    fn read_report(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        loop {
            let n = {
                let device = self.device.lock().unwrap_or_else(|e| e.into_inner());
                device.read_timeout(buf, HIDAPI_READ_TIMEOUT_MS)?
            };
            if n > 0 {
                return Ok(n);
            }
        }
    }
}

impl FrameWriter for HidapiController {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        let device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        let written = device.write(frame)?;
        if written != frame.len() {
            return Err(DeviceError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        Ok(())
    }
}

pub fn is_supported(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == SONY_VENDOR_ID && SUPPORTED_PRODUCT_IDS.contains(&product_id)
}

/// Open the configured device: a hidraw path if given, hidapi discovery otherwise
pub fn open(
    path: Option<&Path>,
) -> Result<(Box<dyn ReportReader>, OutputChannel), DeviceError> {
    match path {
        Some(path) => {
            let (reader, writer) = open_hidraw(path)?;
            Ok((Box::new(reader), OutputChannel::new(writer)))
        }
        None => {
            debug!("No device path configured, searching via hidapi");
            let controller = HidapiController::find_and_connect()?;
            Ok((Box::new(controller.clone()), OutputChannel::new(controller)))
        }
    }
}
