//! HID report layouts shared by the firmware and the host tools.

use std::fmt;

use crate::{is_modifier_code, modifier_bit_of, MODIFIER_FIRST};

/// Length of the boot-protocol keyboard report.
pub const KEYBOARD_REPORT_LEN: usize = 8;
/// Number of keycode slots in a keyboard report.
pub const MAX_KEYS: usize = 6;

/// Standard USB HID keyboard report (8 bytes).
/// Byte 0: modifier keys bitmask
/// Byte 1: reserved (0x00)
/// Bytes 2-7: up to 6 simultaneous keycodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub reserved: u8,
    pub keys: [u8; MAX_KEYS],
}

impl KeyboardReport {
    pub const fn empty() -> Self {
        Self {
            modifiers: 0,
            reserved: 0,
            keys: [0; MAX_KEYS],
        }
    }

    pub fn from_bytes(bytes: [u8; KEYBOARD_REPORT_LEN]) -> Self {
        let mut keys = [0u8; MAX_KEYS];
        keys.copy_from_slice(&bytes[2..]);
        Self {
            modifiers: bytes[0],
            reserved: bytes[1],
            keys,
        }
    }

    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_LEN] {
        let mut bytes = [0u8; KEYBOARD_REPORT_LEN];
        bytes[0] = self.modifiers;
        bytes[1] = self.reserved;
        bytes[2..].copy_from_slice(&self.keys);
        bytes
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers == 0 && self.keys.iter().all(|&k| k == 0)
    }

    /// Every keycode this report holds down, with modifier bits expanded
    /// into their `0xE0..=0xE7` keycodes.
    pub fn keycodes(&self) -> Vec<u8> {
        let mut codes: Vec<u8> = (0..8u8)
            .filter(|bit| self.modifiers & (1 << bit) != 0)
            .map(|bit| MODIFIER_FIRST + bit)
            .collect();
        codes.extend(self.keys.iter().copied().filter(|&k| k != 0));
        codes
    }

    /// Build a report from a modifier byte and a list of keycodes.
    /// Modifier keycodes in the list are folded into the modifier byte and
    /// anything past six regular keys is ignored.
    pub fn from_keycodes(modifiers: u8, codes: &[u8]) -> Self {
        let mut report = Self {
            modifiers,
            ..Self::empty()
        };
        let mut idx = 0;
        for &code in codes {
            if is_modifier_code(code) {
                report.modifiers |= modifier_bit_of(code);
            } else if code != 0 && idx < MAX_KEYS {
                report.keys[idx] = code;
                idx += 1;
            }
        }
        report
    }
}

impl fmt::Display for KeyboardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Relative mouse report: (buttons, dx, dy, wheel).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MouseReport {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel: i8,
}

impl MouseReport {
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.buttons,
            self.dx as u8,
            self.dy as u8,
            self.wheel as u8,
        ]
    }

    /// True when the report carries no motion (buttons may still be held).
    pub fn is_still(&self) -> bool {
        self.dx == 0 && self.dy == 0 && self.wheel == 0
    }
}

impl fmt::Display for MouseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buttons={:02X} dx={} dy={} wheel={}",
            self.buttons, self.dx, self.dy, self.wheel
        )
    }
}

/// Consumer-control usages (USB HID Usage Tables, Consumer Page 0x0C).
pub mod consumer {
    pub const BRIGHTNESS_UP: u16 = 0x006F;
    pub const BRIGHTNESS_DOWN: u16 = 0x0070;
    pub const NEXT_TRACK: u16 = 0x00B5;
    pub const PREV_TRACK: u16 = 0x00B6;
    pub const STOP: u16 = 0x00B7;
    pub const PLAY_PAUSE: u16 = 0x00CD;
    pub const MUTE: u16 = 0x00E2;
    pub const VOLUME_UP: u16 = 0x00E9;
    pub const VOLUME_DOWN: u16 = 0x00EA;

    /// Wire encoding of a consumer report: the usage, little-endian.
    pub fn to_bytes(usage: u16) -> [u8; 2] {
        usage.to_le_bytes()
    }

    /// Short label for well-known usages.
    pub fn label(usage: u16) -> Option<&'static str> {
        Some(match usage {
            BRIGHTNESS_UP => "Bri+",
            BRIGHTNESS_DOWN => "Bri-",
            NEXT_TRACK => "Next",
            PREV_TRACK => "Prev",
            STOP => "Stop",
            PLAY_PAUSE => "Play",
            MUTE => "Mute",
            VOLUME_UP => "Vol+",
            VOLUME_DOWN => "Vol-",
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_report_bytes() {
        let report = KeyboardReport::from_bytes([0x02, 0, 0x04, 0x05, 0, 0, 0, 0]);
        assert_eq!(report.modifiers, 0x02);
        assert_eq!(report.keys[..2], [0x04, 0x05]);
        assert_eq!(report.to_bytes(), [0x02, 0, 0x04, 0x05, 0, 0, 0, 0]);
        assert_eq!(report.to_string(), "02 00 04 05 00 00 00 00");
    }

    #[test]
    fn keycodes_expand_modifiers() {
        let report = KeyboardReport::from_bytes([0x03, 0, 0x1D, 0, 0, 0, 0, 0]);
        assert_eq!(report.keycodes(), vec![0xE0, 0xE1, 0x1D]);
        assert!(KeyboardReport::empty().keycodes().is_empty());
    }

    #[test]
    fn from_keycodes_folds_modifiers_and_caps_at_six() {
        let report = KeyboardReport::from_keycodes(0, &[0xE1, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(report.modifiers, 0x02);
        assert_eq!(report.keys, [4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn consumer_is_little_endian() {
        assert_eq!(consumer::to_bytes(consumer::VOLUME_UP), [0xE9, 0x00]);
        assert_eq!(consumer::to_bytes(0x0223), [0x23, 0x02]);
        assert_eq!(consumer::label(0x00E9), Some("Vol+"));
        assert_eq!(consumer::label(0x1234), None);
    }

    #[test]
    fn mouse_report_bytes() {
        let report = MouseReport {
            buttons: 0x01,
            dx: -1,
            dy: 5,
            wheel: -3,
        };
        assert_eq!(report.to_bytes(), [0x01, 0xFF, 0x05, 0xFD]);
        assert!(!report.is_still());
        assert!(MouseReport::default().is_still());
    }
}
