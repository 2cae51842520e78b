//! Output report framing
//!
//! Bluetooth output reports end with a CRC32 (IEEE) computed over a one-byte
//! transaction header (0xA2, HID "DATA | OUTPUT") followed by the report body.
//! The header itself is not transmitted.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// HID transaction header folded into the checksum
pub const CRC_PREFIX: u8 = 0xA2;
/// CRC trailer size
pub const CRC_LEN: usize = 4;

/// Control report id
pub const CONTROL_REPORT_ID: u8 = 0x11;
pub const CONTROL_BODY_LEN: usize = 74;
pub const CONTROL_FRAME_LEN: usize = CONTROL_BODY_LEN + CRC_LEN;

/// Audio report id
pub const AUDIO_REPORT_ID: u8 = 0x17;
pub const AUDIO_HEADER_LEN: usize = 6;
pub const AUDIO_PAYLOAD_LEN: usize = 448;
pub const AUDIO_PADDING_LEN: usize = 4;
pub const AUDIO_FRAME_LEN: usize = AUDIO_HEADER_LEN + AUDIO_PAYLOAD_LEN + AUDIO_PADDING_LEN + CRC_LEN;
/// Frame counter advance per audio frame
pub const AUDIO_FRAME_STRIDE: u16 = 4;

/// Default polling interval byte
pub const DEFAULT_POLL_RATE: u8 = 4;

pub type ControlFrame = [u8; CONTROL_FRAME_LEN];
pub type AudioFrame = [u8; AUDIO_FRAME_LEN];

/// CRC32 of `CRC_PREFIX` followed by `body`
pub fn checksum(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[CRC_PREFIX]);
    hasher.update(body);
    hasher.finalize()
}

/// Fill the last four bytes of `frame` with the checksum of everything before them
fn seal(frame: &mut [u8]) {
    let body_len = frame.len() - CRC_LEN;
    let crc = checksum(&frame[..body_len]);
    frame[body_len..].copy_from_slice(&crc.to_le_bytes());
}

/// Check the trailer of a sealed frame
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < CRC_LEN {
        return false;
    }
    let body_len = frame.len() - CRC_LEN;
    let mut trailer = [0u8; CRC_LEN];
    trailer.copy_from_slice(&frame[body_len..]);
    checksum(&frame[..body_len]) == u32::from_le_bytes(trailer)
}

/// Lightbar color
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Rumble motor intensities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Haptic {
    pub large: u8,
    pub small: u8,
}

impl Haptic {
    pub const OFF: Haptic = Haptic { large: 0, small: 0 };
}

/// Headphone and speaker volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub left: u8,
    pub right: u8,
    pub speaker: u8,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            left: 40,
            right: 40,
            speaker: 0,
        }
    }
}

/// Lightbar color while the battery reads empty
pub const LOW_BATTERY_COLOR: Color = Color::new(255, 0, 0);

/// Lightbar flash timing (255 = 2.5 seconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub on: u8,
    pub off: u8,
}

/// Everything that goes into one control report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSettings {
    pub poll_rate: u8,
    pub color: Color,
    pub haptic: Haptic,
    pub flash: Flash,
    pub volume: Volume,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            poll_rate: DEFAULT_POLL_RATE,
            color: Color::new(0, 0, 255),
            haptic: Haptic::OFF,
            flash: Flash::default(),
            volume: Volume::default(),
        }
    }
}

impl ControlSettings {
    pub fn with_haptic(mut self, haptic: Haptic) -> Self {
        self.haptic = haptic;
        self
    }

    /// Show an empty battery as a red lightbar
    pub fn with_battery(mut self, percent: u8) -> Self {
        if percent == 0 {
            self.color = LOW_BATTERY_COLOR;
        }
        self
    }

    fn fill_body(&self) -> [u8; CONTROL_BODY_LEN] {
        let mut body = [0u8; CONTROL_BODY_LEN];
        body[0] = CONTROL_REPORT_ID;
        body[1] = 0xC0 | (self.poll_rate & 0x3F);
        body[2] = 0x20;
        // Enable rumble, lightbar, flash and volume
        body[3] = 0xFF;
        body[6] = self.haptic.small;
        body[7] = self.haptic.large;
        body[8] = self.color.r;
        body[9] = self.color.g;
        body[10] = self.color.b;
        body[11] = self.flash.on;
        body[12] = self.flash.off;
        body[21] = self.volume.left;
        body[22] = self.volume.right;
        body[23] = 0x49; // magic
        body[24] = self.volume.speaker;
        body[25] = 0x85; // magic
        body
    }

    pub fn build(&self) -> ControlFrame {
        let mut frame = [0u8; CONTROL_FRAME_LEN];
        frame[..CONTROL_BODY_LEN].copy_from_slice(&self.fill_body());
        seal(&mut frame);
        frame
    }
}

/// Build a control frame with default flash and volume settings
pub fn build_control_frame(poll_rate: u8, color: Color, haptic: Haptic) -> ControlFrame {
    ControlSettings {
        poll_rate,
        color,
        haptic,
        ..ControlSettings::default()
    }
    .build()
}

/// Audio frame builder owning the running frame counter
#[derive(Debug, Default)]
pub struct AudioFramer {
    frame_number: u16,
}

impl AudioFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value the next frame will carry
    pub fn frame_number(&self) -> u16 {
        self.frame_number
    }

    /// Frame `payload`, stamping the current counter and then advancing it
    pub fn build(&mut self, payload: &[u8; AUDIO_PAYLOAD_LEN]) -> AudioFrame {
        let number = self.frame_number;
        self.frame_number = self.frame_number.wrapping_add(AUDIO_FRAME_STRIDE);

        let mut frame = [0u8; AUDIO_FRAME_LEN];
        frame[0] = AUDIO_REPORT_ID;
        frame[1] = 0x40;
        frame[2] = 0xA0;
        frame[3..5].copy_from_slice(&number.to_le_bytes());
        frame[5] = 0x24;
        frame[AUDIO_HEADER_LEN..AUDIO_HEADER_LEN + AUDIO_PAYLOAD_LEN].copy_from_slice(payload);
        // padding stays zero
        seal(&mut frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frame_layout() {
        let frame = build_control_frame(4, Color::new(1, 2, 3), Haptic { large: 9, small: 8 });
        assert_eq!(frame.len(), 78);
        assert_eq!(frame[0], 0x11);
        assert_eq!(frame[1], 0xC4);
        assert_eq!(frame[2], 0x20);
        assert_eq!(frame[3], 0xFF);
        assert_eq!(&frame[4..6], &[0, 0]);
        assert_eq!(frame[6], 8);
        assert_eq!(frame[7], 9);
        assert_eq!(&frame[8..11], &[1, 2, 3]);
        assert_eq!(&frame[21..26], &[40, 40, 0x49, 0, 0x85]);
        assert!(frame[26..74].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_poll_rate_masked_to_six_bits() {
        let frame = build_control_frame(0xFF, Color::default(), Haptic::OFF);
        assert_eq!(frame[1], 0xFF);
        let frame = build_control_frame(0x41, Color::default(), Haptic::OFF);
        assert_eq!(frame[1], 0xC1);
    }

    #[test]
    fn test_control_frame_checksum() {
        let frame = build_control_frame(20, Color::new(0, 0, 255), Haptic { large: 0, small: 255 });
        let mut data = vec![CRC_PREFIX];
        data.extend_from_slice(&frame[..74]);
        let crc = crc32fast::hash(&data);
        assert_eq!(&frame[74..], &crc.to_le_bytes());
        assert!(verify(&frame));
    }

    #[test]
    fn test_checksum_known_value() {
        // CRC32 of the single byte 0xA2
        assert_eq!(checksum(&[]), crc32fast::hash(&[0xA2]));
        // Standard check value for "123456789" with no prefix folded in
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut frame = ControlSettings::default().build();
        assert!(verify(&frame));
        frame[8] ^= 0x01;
        assert!(!verify(&frame));
        assert!(!verify(&[0, 1]));
    }

    #[test]
    fn test_empty_battery_turns_lightbar_red() {
        let settings = ControlSettings {
            color: Color::new(0, 128, 0),
            ..ControlSettings::default()
        };
        let frame = settings.with_battery(0).with_haptic(Haptic { large: 3, small: 4 }).build();
        assert_eq!(&frame[8..11], &[255, 0, 0]);
        assert_eq!(&frame[6..8], &[4, 3]);
        assert!(verify(&frame));

        for level in [10, 100, u8::MAX] {
            assert_eq!(settings.with_battery(level).color, Color::new(0, 128, 0));
        }
    }

    #[test]
    fn test_audio_frame_layout() {
        let mut framer = AudioFramer::new();
        let payload = [0x5Au8; AUDIO_PAYLOAD_LEN];
        let frame = framer.build(&payload);
        assert_eq!(frame.len(), 462);
        assert_eq!(&frame[..6], &[0x17, 0x40, 0xA0, 0, 0, 0x24]);
        assert_eq!(&frame[6..454], &payload[..]);
        assert_eq!(&frame[454..458], &[0, 0, 0, 0]);
        assert!(verify(&frame));
    }

    #[test]
    fn test_audio_counter_advances_after_stamp() {
        let mut framer = AudioFramer::new();
        let payload = [0u8; AUDIO_PAYLOAD_LEN];
        for expected in [0u16, 4, 8, 12] {
            assert_eq!(framer.frame_number(), expected);
            let frame = framer.build(&payload);
            assert_eq!(u16::from_le_bytes([frame[3], frame[4]]), expected);
        }
        assert_eq!(framer.frame_number(), 16);
    }

    #[test]
    fn test_audio_counter_wraps() {
        let mut framer = AudioFramer { frame_number: 0xFFFC };
        let payload = [0u8; AUDIO_PAYLOAD_LEN];
        let frame = framer.build(&payload);
        assert_eq!(&frame[3..5], &[0xFC, 0xFF]);
        assert_eq!(framer.frame_number(), 0);
    }
}
