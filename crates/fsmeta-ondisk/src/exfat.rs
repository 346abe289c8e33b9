#![forbid(unsafe_code)]

use fsmeta_types::sign_extend;
use serde::{Deserialize, Serialize};
use std::fmt;

/// UTC offset byte of an exFAT File directory entry (bytes 0x16..=0x18).
///
/// Bit 7 marks the offset as valid; bits 0-6 are a two's-complement count of
/// 15-minute increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExfatUtcOffset {
    pub raw: u8,
    pub valid: bool,
    /// Signed count of 15-minute increments, in `-64..=63`.
    pub increments: i8,
}

impl ExfatUtcOffset {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_byte(raw: u8) -> Self {
        Self {
            raw,
            valid: raw & 0x80 != 0,
            increments: sign_extend(u64::from(raw & 0x7F), 7) as i8,
        }
    }

    /// Offset from UTC in minutes.
    #[must_use]
    pub fn minutes(self) -> i16 {
        i16::from(self.increments) * 15
    }

    #[must_use]
    pub fn hours(self) -> f64 {
        f64::from(self.minutes()) / 60.0
    }
}

impl fmt::Display for ExfatUtcOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.minutes();
        let sign = if minutes < 0 { '-' } else { '+' };
        let abs = minutes.unsigned_abs();
        write!(f, "UTC{sign}{:02}:{:02}", abs / 60, abs % 60)?;
        if !self.valid {
            f.write_str(" (not marked valid)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_common_offsets() {
        // 0xF0: valid, -16 increments = UTC-04:00
        let west = ExfatUtcOffset::from_byte(0xF0);
        assert!(west.valid);
        assert_eq!(west.increments, -16);
        assert_eq!(west.minutes(), -240);
        assert!((west.hours() + 4.0).abs() < f64::EPSILON);
        assert_eq!(west.to_string(), "UTC-04:00");

        // 0x96: valid, +22 increments = UTC+05:30
        let india = ExfatUtcOffset::from_byte(0x96);
        assert_eq!(india.minutes(), 330);
        assert_eq!(india.to_string(), "UTC+05:30");
    }

    #[test]
    fn zero_byte_is_utc_without_valid_flag() {
        let offset = ExfatUtcOffset::from_byte(0x00);
        assert!(!offset.valid);
        assert_eq!(offset.minutes(), 0);
        assert_eq!(offset.to_string(), "UTC+00:00 (not marked valid)");
    }

    #[test]
    fn extremes() {
        assert_eq!(ExfatUtcOffset::from_byte(0xC0).minutes(), -960);
        assert_eq!(ExfatUtcOffset::from_byte(0xBF).minutes(), 945);
    }

    proptest! {
        #[test]
        fn matches_modular_formula(raw in any::<u8>()) {
            let expected = ((i32::from(raw) + 64) % 128 - 64) * 15;
            prop_assert_eq!(i32::from(ExfatUtcOffset::from_byte(raw).minutes()), expected);
        }
    }
}
