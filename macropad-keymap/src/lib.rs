//! Shared keymap definitions for the macropad.
//!
//! Everything the firmware core and the host CLI agree on lives here: HID
//! keycodes and report layouts, the tagged binding and macro models, and the
//! loaders that lower the JSON configuration documents into those models.

pub mod binding;
pub mod component;
pub mod config;
pub mod error;
pub mod macros;
pub mod report;

pub use binding::{Binding, ComponentBinding, LayerBindings, Slot, DEFAULT_LAYER};
pub use component::{
    Component, ComponentKind, ComponentSet, Direction, EncoderConfig, EncoderHardware, MatrixCell,
    MatrixPosition,
};
pub use config::{ActionsConfig, Configuration, Warnings};
pub use error::ConfigError;
pub use macros::{Macro, MacroCommand, MacroLibrary, MouseButton};
pub use report::{KeyboardReport, MouseReport};

/// USB HID keycodes.
/// See USB HID Usage Tables, Section 10 (Keyboard/Keypad Page 0x07).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Keycode {
    // Letters
    A = 0x04,
    B = 0x05,
    C = 0x06,
    D = 0x07,
    E = 0x08,
    F = 0x09,
    G = 0x0A,
    H = 0x0B,
    I = 0x0C,
    J = 0x0D,
    K = 0x0E,
    L = 0x0F,
    M = 0x10,
    N = 0x11,
    O = 0x12,
    P = 0x13,
    Q = 0x14,
    R = 0x15,
    S = 0x16,
    T = 0x17,
    U = 0x18,
    V = 0x19,
    W = 0x1A,
    X = 0x1B,
    Y = 0x1C,
    Z = 0x1D,

    // Numbers
    N1 = 0x1E,
    N2 = 0x1F,
    N3 = 0x20,
    N4 = 0x21,
    N5 = 0x22,
    N6 = 0x23,
    N7 = 0x24,
    N8 = 0x25,
    N9 = 0x26,
    N0 = 0x27,

    // Control keys
    Enter = 0x28,
    Escape = 0x29,
    Backspace = 0x2A,
    Tab = 0x2B,
    Space = 0x2C,
    Minus = 0x2D,
    Equal = 0x2E,
    LBracket = 0x2F,
    RBracket = 0x30,
    Backslash = 0x31,
    Semicolon = 0x33,
    Quote = 0x34,
    Grave = 0x35,
    Comma = 0x36,
    Dot = 0x37,
    Slash = 0x38,
    CapsLock = 0x39,

    // Function keys
    F1 = 0x3A,
    F2 = 0x3B,
    F3 = 0x3C,
    F4 = 0x3D,
    F5 = 0x3E,
    F6 = 0x3F,
    F7 = 0x40,
    F8 = 0x41,
    F9 = 0x42,
    F10 = 0x43,
    F11 = 0x44,
    F12 = 0x45,

    // Navigation
    PrintScreen = 0x46,
    ScrollLock = 0x47,
    Pause = 0x48,
    Insert = 0x49,
    Home = 0x4A,
    PageUp = 0x4B,
    Delete = 0x4C,
    End = 0x4D,
    PageDown = 0x4E,
    Right = 0x4F,
    Left = 0x50,
    Down = 0x51,
    Up = 0x52,

    NonUsBackslash = 0x64,
    Application = 0x65,

    // Modifiers (reported through the modifier byte, not the keycode array)
    LCtrl = 0xE0,
    LShift = 0xE1,
    LAlt = 0xE2,
    LGui = 0xE3,
    RCtrl = 0xE4,
    RShift = 0xE5,
    RAlt = 0xE6,
    RGui = 0xE7,
}

/// Every keycode this crate names, in ascending order.
const ALL_KEYCODES: &[Keycode] = &[
    Keycode::A, Keycode::B, Keycode::C, Keycode::D, Keycode::E, Keycode::F, Keycode::G,
    Keycode::H, Keycode::I, Keycode::J, Keycode::K, Keycode::L, Keycode::M, Keycode::N,
    Keycode::O, Keycode::P, Keycode::Q, Keycode::R, Keycode::S, Keycode::T, Keycode::U,
    Keycode::V, Keycode::W, Keycode::X, Keycode::Y, Keycode::Z,
    Keycode::N1, Keycode::N2, Keycode::N3, Keycode::N4, Keycode::N5,
    Keycode::N6, Keycode::N7, Keycode::N8, Keycode::N9, Keycode::N0,
    Keycode::Enter, Keycode::Escape, Keycode::Backspace, Keycode::Tab, Keycode::Space,
    Keycode::Minus, Keycode::Equal, Keycode::LBracket, Keycode::RBracket, Keycode::Backslash,
    Keycode::Semicolon, Keycode::Quote, Keycode::Grave, Keycode::Comma, Keycode::Dot,
    Keycode::Slash, Keycode::CapsLock,
    Keycode::F1, Keycode::F2, Keycode::F3, Keycode::F4, Keycode::F5, Keycode::F6,
    Keycode::F7, Keycode::F8, Keycode::F9, Keycode::F10, Keycode::F11, Keycode::F12,
    Keycode::PrintScreen, Keycode::ScrollLock, Keycode::Pause, Keycode::Insert, Keycode::Home,
    Keycode::PageUp, Keycode::Delete, Keycode::End, Keycode::PageDown,
    Keycode::Right, Keycode::Left, Keycode::Down, Keycode::Up,
    Keycode::NonUsBackslash, Keycode::Application,
    Keycode::LCtrl, Keycode::LShift, Keycode::LAlt, Keycode::LGui,
    Keycode::RCtrl, Keycode::RShift, Keycode::RAlt, Keycode::RGui,
];

/// First keycode of the modifier range (LCtrl).
pub const MODIFIER_FIRST: u8 = 0xE0;
/// Last keycode of the modifier range (RGui).
pub const MODIFIER_LAST: u8 = 0xE7;

/// Left-shift bit in the modifier byte.
pub const MOD_LSHIFT: u8 = 0x02;

/// Check whether a raw keycode byte falls in the modifier range.
pub fn is_modifier_code(code: u8) -> bool {
    (MODIFIER_FIRST..=MODIFIER_LAST).contains(&code)
}

/// Modifier-byte bit for a raw keycode (bit 0 = LCtrl, bit 7 = RGui), 0 otherwise.
pub fn modifier_bit_of(code: u8) -> u8 {
    if is_modifier_code(code) {
        1 << (code - MODIFIER_FIRST)
    } else {
        0
    }
}

impl Keycode {
    /// Look up a named keycode from its raw HID byte.
    pub fn from_code(code: u8) -> Option<Keycode> {
        ALL_KEYCODES
            .binary_search_by_key(&code, |kc| *kc as u8)
            .ok()
            .map(|idx| ALL_KEYCODES[idx])
    }

    /// Check if this keycode is a modifier (LCtrl..RGui).
    pub fn is_modifier(self) -> bool {
        is_modifier_code(self as u8)
    }

    /// Get the modifier bit mask (bit 0 = LCtrl, bit 7 = RGui).
    pub fn modifier_bit(self) -> u8 {
        modifier_bit_of(self as u8)
    }

    /// Short label for layout visualizations.
    pub fn display_name(self) -> &'static str {
        match self {
            Keycode::A => "A",
            Keycode::B => "B",
            Keycode::C => "C",
            Keycode::D => "D",
            Keycode::E => "E",
            Keycode::F => "F",
            Keycode::G => "G",
            Keycode::H => "H",
            Keycode::I => "I",
            Keycode::J => "J",
            Keycode::K => "K",
            Keycode::L => "L",
            Keycode::M => "M",
            Keycode::N => "N",
            Keycode::O => "O",
            Keycode::P => "P",
            Keycode::Q => "Q",
            Keycode::R => "R",
            Keycode::S => "S",
            Keycode::T => "T",
            Keycode::U => "U",
            Keycode::V => "V",
            Keycode::W => "W",
            Keycode::X => "X",
            Keycode::Y => "Y",
            Keycode::Z => "Z",
            Keycode::N1 => "1",
            Keycode::N2 => "2",
            Keycode::N3 => "3",
            Keycode::N4 => "4",
            Keycode::N5 => "5",
            Keycode::N6 => "6",
            Keycode::N7 => "7",
            Keycode::N8 => "8",
            Keycode::N9 => "9",
            Keycode::N0 => "0",
            Keycode::Enter => "Ent",
            Keycode::Escape => "Esc",
            Keycode::Backspace => "Bksp",
            Keycode::Tab => "Tab",
            Keycode::Space => "Spc",
            Keycode::Minus => "-",
            Keycode::Equal => "=",
            Keycode::LBracket => "[",
            Keycode::RBracket => "]",
            Keycode::Backslash => "\\",
            Keycode::Semicolon => ";",
            Keycode::Quote => "'",
            Keycode::Grave => "`",
            Keycode::Comma => ",",
            Keycode::Dot => ".",
            Keycode::Slash => "/",
            Keycode::CapsLock => "Caps",
            Keycode::F1 => "F1",
            Keycode::F2 => "F2",
            Keycode::F3 => "F3",
            Keycode::F4 => "F4",
            Keycode::F5 => "F5",
            Keycode::F6 => "F6",
            Keycode::F7 => "F7",
            Keycode::F8 => "F8",
            Keycode::F9 => "F9",
            Keycode::F10 => "F10",
            Keycode::F11 => "F11",
            Keycode::F12 => "F12",
            Keycode::PrintScreen => "PScr",
            Keycode::ScrollLock => "ScrL",
            Keycode::Pause => "Paus",
            Keycode::Insert => "Ins",
            Keycode::Home => "Home",
            Keycode::PageUp => "PgUp",
            Keycode::Delete => "Del",
            Keycode::End => "End",
            Keycode::PageDown => "PgDn",
            Keycode::Right => "\u{2192}",
            Keycode::Left => "\u{2190}",
            Keycode::Down => "\u{2193}",
            Keycode::Up => "\u{2191}",
            Keycode::NonUsBackslash => "<>",
            Keycode::Application => "Menu",
            Keycode::LCtrl => "Ctrl",
            Keycode::LShift => "Shft",
            Keycode::LAlt => "Alt",
            Keycode::LGui => "Gui",
            Keycode::RCtrl => "RCtl",
            Keycode::RShift => "RSft",
            Keycode::RAlt => "RAlt",
            Keycode::RGui => "RGui",
        }
    }
}

/// Map an ASCII character to `(modifier byte, keycode)` on a US layout.
///
/// Only letters, digits and space are mapped; everything else is `None`
/// and is skipped by the text typer.
pub fn ascii_to_key(c: char) -> Option<(u8, u8)> {
    match c {
        'a'..='z' => Some((0, Keycode::A as u8 + (c as u8 - b'a'))),
        'A'..='Z' => Some((MOD_LSHIFT, Keycode::A as u8 + (c as u8 - b'A'))),
        '1'..='9' => Some((0, Keycode::N1 as u8 + (c as u8 - b'1'))),
        '0' => Some((0, Keycode::N0 as u8)),
        ' ' => Some((0, Keycode::Space as u8)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycode_table_is_sorted_for_lookup() {
        assert!(ALL_KEYCODES.windows(2).all(|w| (w[0] as u8) < (w[1] as u8)));
        assert_eq!(Keycode::from_code(0x1D), Some(Keycode::Z));
        assert_eq!(Keycode::from_code(0xE1), Some(Keycode::LShift));
        assert_eq!(Keycode::from_code(0x00), None);
    }

    #[test]
    fn modifier_bits() {
        assert_eq!(Keycode::LCtrl.modifier_bit(), 0x01);
        assert_eq!(Keycode::LShift.modifier_bit(), MOD_LSHIFT);
        assert_eq!(Keycode::RGui.modifier_bit(), 0x80);
        assert_eq!(Keycode::A.modifier_bit(), 0);
        assert!(!is_modifier_code(0xE8));
    }

    #[test]
    fn us_layout_text_mapping() {
        assert_eq!(ascii_to_key('a'), Some((0, 0x04)));
        assert_eq!(ascii_to_key('z'), Some((0, 0x1D)));
        assert_eq!(ascii_to_key('H'), Some((MOD_LSHIFT, 0x0B)));
        assert_eq!(ascii_to_key('1'), Some((0, 0x1E)));
        assert_eq!(ascii_to_key('9'), Some((0, 0x26)));
        assert_eq!(ascii_to_key('0'), Some((0, 0x27)));
        assert_eq!(ascii_to_key(' '), Some((0, 0x2C)));
        assert_eq!(ascii_to_key('!'), None);
        assert_eq!(ascii_to_key('\u{e5}'), None);
    }
}
