//! Bit and byte field primitives
//!
//! Stateless helpers shared by the report decoder and the packet encoder.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    #[error("byte index {index} out of range for {len}-byte buffer")]
    OutOfBounds { index: usize, len: usize },

    #[error("bit index {0} out of range (0-7)")]
    BitOutOfRange(u8),
}

/// Test whether `bit` is set in `data[byte]`
pub fn bit(data: &[u8], byte: usize, bit: u8) -> Result<bool, FieldError> {
    if bit > 7 {
        return Err(FieldError::BitOutOfRange(bit));
    }
    let value = data.get(byte).ok_or(FieldError::OutOfBounds {
        index: byte,
        len: data.len(),
    })?;
    Ok(value & (1 << bit) != 0)
}

/// `value | mask` when `condition` holds, `value` otherwise
#[inline]
pub fn set_if(value: u16, mask: u16, condition: bool) -> u16 {
    if condition {
        value | mask
    } else {
        value
    }
}

/// Read one byte, reporting the buffer length on failure
pub fn byte(data: &[u8], index: usize) -> Result<u8, FieldError> {
    data.get(index).copied().ok_or(FieldError::OutOfBounds {
        index,
        len: data.len(),
    })
}
