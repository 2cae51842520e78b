//! Analog stick deadzone correction
//!
//! Rescales a raw 0-255 stick sample into a signed 16-bit value with a
//! proportional dead zone around the center. The arithmetic is fixed point:
//! a Q14 scale factor is derived once from the configured range so the
//! per-sample path is a subtract, a multiply and a shift.

use crate::config::ConfigError;

/// Largest magnitude a corrected axis can take
pub const AXIS_LIMIT: i32 = 32767;

/// Deadzone applied to all four sticks by default
pub const DEFAULT_DEADZONE: i32 = 5;

/// Saturate to `[-AXIS_LIMIT, AXIS_LIMIT]`
#[inline]
pub fn clamp(v: i64) -> i16 {
    v.clamp(-(AXIS_LIMIT as i64), AXIS_LIMIT as i64) as i16
}

/// Precomputed correction parameters for one axis range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisCorrector {
    low_bound: i64,
    high_bound: i64,
    scale: i64,
}

impl AxisCorrector {
    /// Build a corrector for samples in `[min, max]` with the given deadzone.
    ///
    /// Fails when the usable span outside the dead zone is empty, which would
    /// otherwise divide by zero on every sample.
    pub fn new(min: i32, max: i32, deadzone: i32) -> Result<Self, ConfigError> {
        if deadzone < 0 {
            return Err(ConfigError::NegativeDeadzone(deadzone));
        }
        let (min, max, deadzone) = (min as i64, max as i64, deadzone as i64);
        let center = (max + min) / 2;
        let span = (max - min - 4 * deadzone) / 2;
        if span <= 0 {
            return Err(ConfigError::DegenerateAxis {
                min: min as i32,
                max: max as i32,
                deadzone: deadzone as i32,
            });
        }

        Ok(Self {
            low_bound: center - deadzone,
            high_bound: center + deadzone,
            scale: (1 << 29) / span,
        })
    }

    /// Corrector for the full 8-bit range with the default deadzone
    pub fn standard() -> Self {
        Self {
            low_bound: 127 - DEFAULT_DEADZONE as i64,
            high_bound: 127 + DEFAULT_DEADZONE as i64,
            scale: (1 << 29) / 117,
        }
    }

    /// Correct one raw sample
    pub fn correct(&self, raw: u8) -> i16 {
        let raw = raw as i64;
        if raw < self.low_bound {
            clamp((self.scale * (raw - self.low_bound)) >> 14)
        } else if raw > self.high_bound {
            clamp((self.scale * (raw - self.high_bound)) >> 14)
        } else {
            0
        }
    }
}

impl Default for AxisCorrector {
    fn default() -> Self {
        Self::standard()
    }
}

/// One-shot correction; validates the range on every call.
pub fn correct_axis(raw: u8, min: i32, max: i32, deadzone: i32) -> Result<i16, ConfigError> {
    Ok(AxisCorrector::new(min, max, deadzone)?.correct(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_matches_new() {
        assert_eq!(
            AxisCorrector::standard(),
            AxisCorrector::new(0, 255, DEFAULT_DEADZONE).unwrap()
        );
    }

    #[test]
    fn test_center_and_deadzone_map_to_zero() {
        let axis = AxisCorrector::standard();
        assert_eq!(axis.correct(127), 0);
        for raw in 122..=132u8 {
            assert_eq!(axis.correct(raw), 0, "raw {}", raw);
        }
        assert_ne!(axis.correct(121), 0);
        assert_ne!(axis.correct(133), 0);
    }

    #[test]
    fn test_extremes_saturate() {
        let axis = AxisCorrector::standard();
        assert_eq!(axis.correct(0), -32767);
        assert_eq!(axis.correct(255), 32767);
    }

    #[test]
    fn test_odd_symmetry_about_center() {
        let axis = AxisCorrector::standard();
        for d in 0..=127i32 {
            let below = 127 - d;
            let above = 127 + d;
            if below < 0 || above > 255 {
                continue;
            }
            let lo = axis.correct(below as u8) as i32;
            let hi = axis.correct(above as u8) as i32;
            assert!(lo <= 0 && hi >= 0, "d={} lo={} hi={}", d, lo, hi);
            assert!((lo + hi).abs() <= 1, "d={} lo={} hi={}", d, lo, hi);
        }
    }

    #[test]
    fn test_monotonic() {
        let axis = AxisCorrector::standard();
        let mut prev = axis.correct(0);
        for raw in 1..=255u8 {
            let v = axis.correct(raw);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn test_degenerate_span_rejected() {
        assert!(matches!(
            AxisCorrector::new(100, 100, 0),
            Err(ConfigError::DegenerateAxis { .. })
        ));
        // 255 - 0 - 4*64 < 0
        assert!(AxisCorrector::new(0, 255, 64).is_err());
        assert!(AxisCorrector::new(0, 255, -1).is_err());
    }

    #[test]
    fn test_correct_axis_one_shot() {
        assert_eq!(correct_axis(127, 0, 255, 5).unwrap(), 0);
        assert_eq!(correct_axis(255, 0, 255, 5).unwrap(), 32767);
        assert!(correct_axis(0, 10, 10, 0).is_err());
    }
}
