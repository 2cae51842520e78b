//! Raw input report decoding
//!
//! Translates the controller's Bluetooth input report (report id 0x11) into
//! a [`LogicalState`]: an XInput-style button bitmask, two trigger values and
//! four deadzone-corrected stick axes.
//!
//! Layout of the fields used here, as offsets into the full report:
//!
//! ```text
//! 0      report id (0x11)
//! 3..=6  LX, LY, RX, RY
//! 7      dpad (low nibble), face buttons (high nibble)
//! 8      shoulders, share/options, stick clicks
//! 9      sequence counter (upper 6 bits)
//! 10, 11 L2, R2 analog
//! 32     battery level (low nibble)
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::axis::AxisCorrector;
use crate::codec::{self, FieldError};

/// Bluetooth input report id
pub const BT_INPUT_REPORT_ID: u8 = 0x11;
/// Bluetooth input report size
pub const BT_REPORT_SIZE: usize = 78;
/// Offset of the decoded block inside the raw report
pub const REPORT_OFFSET: usize = 2;
/// Bytes past `REPORT_OFFSET` the decoder needs
pub const DECODED_LEN: usize = 10;
/// Shortest report that can be decoded
pub const MIN_REPORT_LEN: usize = REPORT_OFFSET + DECODED_LEN;

/// Raw byte holding the sequence counter
pub const SEQUENCE_BYTE: usize = 9;
/// Raw byte holding the battery nibble
pub const BATTERY_BYTE: usize = 32;

// Offsets relative to REPORT_OFFSET
const AXES: usize = 1;
const BUTTONS: usize = 5;
const MISC: usize = 6;
const L2: usize = 8;
const R2: usize = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Report too short: {len} bytes (need at least {min})")]
    TooShort { len: usize, min: usize },

    #[error("Unexpected report id 0x{0:02x}")]
    UnexpectedReportId(u8),

    #[error("Field access failed: {0}")]
    Field(#[from] FieldError),
}

/// Dpad position as reported in the low nibble of the buttons byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DpadDirection {
    Up,
    UpRight,
    Right,
    DownRight,
    Down,
    DownLeft,
    Left,
    UpLeft,
    Neutral,
}

impl DpadDirection {
    const TABLE: [DpadDirection; 8] = [
        DpadDirection::Up,
        DpadDirection::UpRight,
        DpadDirection::Right,
        DpadDirection::DownRight,
        DpadDirection::Down,
        DpadDirection::DownLeft,
        DpadDirection::Left,
        DpadDirection::UpLeft,
    ];

    /// Look up the direction for the low 4 bits of `byte`.
    ///
    /// Values 8-15 are all treated as neutral; 8 is what the controller sends
    /// when the pad is released.
    pub fn from_nibble(byte: u8) -> Self {
        Self::TABLE
            .get((byte & 0x0F) as usize)
            .copied()
            .unwrap_or(DpadDirection::Neutral)
    }

    /// Wire bitmask bits for this direction
    pub fn mask(self) -> u16 {
        match self {
            DpadDirection::Up => DPAD_UP,
            DpadDirection::UpRight => DPAD_UP | DPAD_RIGHT,
            DpadDirection::Right => DPAD_RIGHT,
            DpadDirection::DownRight => DPAD_DOWN | DPAD_RIGHT,
            DpadDirection::Down => DPAD_DOWN,
            DpadDirection::DownLeft => DPAD_DOWN | DPAD_LEFT,
            DpadDirection::Left => DPAD_LEFT,
            DpadDirection::UpLeft => DPAD_UP | DPAD_LEFT,
            DpadDirection::Neutral => 0,
        }
    }
}

/// Outbound bitmask bits
pub const DPAD_UP: u16 = 0x0001;
pub const DPAD_DOWN: u16 = 0x0002;
pub const DPAD_LEFT: u16 = 0x0004;
pub const DPAD_RIGHT: u16 = 0x0008;
pub const START: u16 = 0x0010;
pub const BACK: u16 = 0x0020;
pub const LEFT_THUMB: u16 = 0x0040;
pub const RIGHT_THUMB: u16 = 0x0080;
pub const LEFT_SHOULDER: u16 = 0x0100;
pub const RIGHT_SHOULDER: u16 = 0x0200;
pub const A: u16 = 0x1000;
pub const B: u16 = 0x2000;
pub const X: u16 = 0x4000;
pub const Y: u16 = 0x8000;

/// Source bit in a raw byte mapped to a wire bitmask bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMapping {
    pub bit: u8,
    pub mask: u16,
}

const fn map(bit: u8, mask: u16) -> BitMapping {
    BitMapping { bit, mask }
}

/// Face buttons, high nibble of the buttons byte
pub const BUTTON_BITS: [BitMapping; 4] = [
    map(4, X), // square
    map(5, A), // cross
    map(6, B), // circle
    map(7, Y), // triangle
];

/// Shoulders, share/options and stick clicks
pub const MISC_BITS: [BitMapping; 6] = [
    map(0, LEFT_SHOULDER),
    map(1, RIGHT_SHOULDER),
    map(4, BACK),  // share
    map(5, START), // options
    map(6, LEFT_THUMB),
    map(7, RIGHT_THUMB),
];

/// Decoded controller snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogicalState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    /// LX, LY, RX, RY
    pub axes: [i16; 4],
}

/// Validated view over one raw input report
#[derive(Debug, Clone, Copy)]
pub struct RawReport<'a> {
    data: &'a [u8],
}

impl<'a> RawReport<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_REPORT_LEN {
            return Err(DecodeError::TooShort {
                len: data.len(),
                min: MIN_REPORT_LEN,
            });
        }
        if data[0] != BT_INPUT_REPORT_ID {
            return Err(DecodeError::UnexpectedReportId(data[0]));
        }
        Ok(Self { data })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// 6-bit wrapping report counter
    pub fn sequence(&self) -> u8 {
        self.data[SEQUENCE_BYTE] >> 2
    }

    /// Battery charge in percent, when the report is long enough to carry it
    pub fn battery_percent(&self) -> Option<u8> {
        self.data
            .get(BATTERY_BYTE)
            .map(|b| ((b & 0x0F) * 10).min(100))
    }

    fn body(&self) -> &'a [u8] {
        &self.data[REPORT_OFFSET..]
    }
}

/// Report decoder with its bit tables and axis correction fixed at construction
#[derive(Debug, Clone)]
pub struct ReportDecoder {
    axis: AxisCorrector,
    button_bits: &'static [BitMapping],
    misc_bits: &'static [BitMapping],
}

impl Default for ReportDecoder {
    fn default() -> Self {
        Self::new(AxisCorrector::standard())
    }
}

impl ReportDecoder {
    pub fn new(axis: AxisCorrector) -> Self {
        Self {
            axis,
            button_bits: &BUTTON_BITS,
            misc_bits: &MISC_BITS,
        }
    }

    /// Validate and decode one raw report
    pub fn decode_bytes(&self, data: &[u8]) -> Result<LogicalState, DecodeError> {
        self.decode(&RawReport::parse(data)?)
    }

    pub fn decode(&self, report: &RawReport<'_>) -> Result<LogicalState, DecodeError> {
        let d = report.body();

        let mut buttons = DpadDirection::from_nibble(codec::byte(d, BUTTONS)?).mask();
        for m in self.button_bits {
            buttons = codec::set_if(buttons, m.mask, codec::bit(d, BUTTONS, m.bit)?);
        }
        for m in self.misc_bits {
            buttons = codec::set_if(buttons, m.mask, codec::bit(d, MISC, m.bit)?);
        }

        let mut axes = [0i16; 4];
        for (i, axis) in axes.iter_mut().enumerate() {
            *axis = self.axis.correct(codec::byte(d, AXES + i)?);
        }

        Ok(LogicalState {
            buttons,
            left_trigger: codec::byte(d, L2)?,
            right_trigger: codec::byte(d, R2)?,
            axes,
        })
    }
}
