//! Outbound UDP packet encoding
//!
//! ```text
//! 0      tag (always 1)
//! 1..3   button bitmask, little-endian
//! 3      left trigger
//! 4      right trigger
//! 5..13  LX, LY, RX, RY as little-endian i16
//! ```

use crate::report::LogicalState;

/// Leading byte of every state packet
pub const STATE_PACKET_TAG: u8 = 1;
/// Encoded packet size
pub const STATE_PACKET_LEN: usize = 13;

pub type StatePacket = [u8; STATE_PACKET_LEN];

pub fn encode(state: &LogicalState) -> StatePacket {
    let mut pkt = [0u8; STATE_PACKET_LEN];
    pkt[0] = STATE_PACKET_TAG;
    pkt[1..3].copy_from_slice(&state.buttons.to_le_bytes());
    pkt[3] = state.left_trigger;
    pkt[4] = state.right_trigger;
    for (i, axis) in state.axes.iter().enumerate() {
        let at = 5 + i * 2;
        pkt[at..at + 2].copy_from_slice(&axis.to_le_bytes());
    }
    pkt
}
