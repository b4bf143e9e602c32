//! Macro model: named command sequences run by the firmware's macro engine.

use std::collections::BTreeMap;

use tracing::warn;

use crate::report::KeyboardReport;

/// Mouse buttons and their report bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl MouseButton {
    pub fn bits(self) -> u8 {
        match self {
            MouseButton::Left => 0x01,
            MouseButton::Right => 0x02,
            MouseButton::Middle => 0x04,
            MouseButton::Back => 0x08,
            MouseButton::Forward => 0x10,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            "back" => Some(MouseButton::Back),
            "forward" => Some(MouseButton::Forward),
            _ => None,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        [
            MouseButton::Left,
            MouseButton::Right,
            MouseButton::Middle,
            MouseButton::Back,
            MouseButton::Forward,
        ]
        .into_iter()
        .find(|b| b.bits() == bits)
    }

    pub fn name(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }
}

/// One step of a macro.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacroCommand {
    /// Press the report's keys, then release them.
    KeyPress { report: KeyboardReport },
    /// Press the report's keys and keep holding them.
    KeyDown { report: KeyboardReport },
    /// Release every key held by `KeyDown`.
    KeyUp,
    ConsumerPress { usage: u16 },
    TypeText { text: String },
    Delay { ms: u32 },
    RandomDelay { min_ms: u32, max_ms: u32 },
    ExecuteMacro { id: String },
    MouseMove { dx: i32, dy: i32, speed: u8 },
    MouseClick { buttons: u8, clicks: u8 },
    MouseScroll { amount: i8 },
    RepeatStart { count: u16 },
    RepeatEnd,
}

pub const MIN_MOUSE_SPEED: u8 = 1;
pub const MAX_MOUSE_SPEED: u8 = 10;
pub const DEFAULT_MOUSE_SPEED: u8 = 5;
pub const MAX_CLICKS: u8 = 3;
pub const MIN_REPEAT: u16 = 2;

impl MacroCommand {
    /// Delay commands schedule their own wait instead of default pacing.
    pub fn is_delay(&self) -> bool {
        matches!(
            self,
            MacroCommand::Delay { .. } | MacroCommand::RandomDelay { .. }
        )
    }

    /// Document tag of this command.
    pub fn type_name(&self) -> &'static str {
        match self {
            MacroCommand::KeyPress { .. } => "key_press",
            MacroCommand::KeyDown { .. } => "key_down",
            MacroCommand::KeyUp => "key_up",
            MacroCommand::ConsumerPress { .. } => "consumer_press",
            MacroCommand::TypeText { .. } => "type_text",
            MacroCommand::Delay { .. } => "delay",
            MacroCommand::RandomDelay { .. } => "random_delay",
            MacroCommand::ExecuteMacro { .. } => "execute_macro",
            MacroCommand::MouseMove { .. } => "mouse_move",
            MacroCommand::MouseClick { .. } => "mouse_click",
            MacroCommand::MouseScroll { .. } => "mouse_scroll",
            MacroCommand::RepeatStart { .. } => "repeat_start",
            MacroCommand::RepeatEnd => "repeat_end",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Macro {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub commands: Vec<MacroCommand>,
}

impl Macro {
    pub fn new(id: impl Into<String>, commands: Vec<MacroCommand>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            commands,
        }
    }

    /// Enforce the load-time invariants: random delay bounds ordered,
    /// repeat blocks balanced and not nested. Offending repeat markers are
    /// dropped. Returns how many commands were removed.
    pub fn normalize(&mut self) -> usize {
        for command in &mut self.commands {
            if let MacroCommand::RandomDelay { min_ms, max_ms } = command {
                if *min_ms > *max_ms {
                    std::mem::swap(min_ms, max_ms);
                }
            }
        }

        let mut keep = vec![true; self.commands.len()];
        let mut open: Option<usize> = None;
        for (idx, command) in self.commands.iter().enumerate() {
            match command {
                MacroCommand::RepeatStart { .. } => {
                    if open.is_some() {
                        warn!(macro_id = %self.id, index = idx, "nested repeat_start dropped");
                        keep[idx] = false;
                    } else {
                        open = Some(idx);
                    }
                }
                MacroCommand::RepeatEnd => {
                    if open.take().is_none() {
                        warn!(macro_id = %self.id, index = idx, "unmatched repeat_end dropped");
                        keep[idx] = false;
                    }
                }
                _ => {}
            }
        }
        if let Some(idx) = open {
            warn!(macro_id = %self.id, index = idx, "unterminated repeat_start dropped");
            keep[idx] = false;
        }

        let before = self.commands.len();
        let mut flags = keep.into_iter();
        self.commands.retain(|_| flags.next().unwrap_or(true));
        before - self.commands.len()
    }
}

/// The set of macros known to the device, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct MacroLibrary {
    macros: BTreeMap<String, Macro>,
}

impl MacroLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Macro> {
        self.macros.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.macros.contains_key(id)
    }

    /// Add or replace a macro. Returns the previous definition, if any.
    pub fn insert(&mut self, mut mac: Macro) -> Option<Macro> {
        mac.normalize();
        self.macros.insert(mac.id.clone(), mac)
    }

    pub fn remove(&mut self, id: &str) -> Option<Macro> {
        self.macros.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.values()
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: u8) -> MacroCommand {
        MacroCommand::KeyPress {
            report: KeyboardReport::from_bytes([0, 0, code, 0, 0, 0, 0, 0]),
        }
    }

    #[test]
    fn mouse_button_names() {
        assert_eq!(MouseButton::from_name("Left").map(MouseButton::bits), Some(0x01));
        assert_eq!(MouseButton::from_name("forward").map(MouseButton::bits), Some(0x10));
        assert_eq!(MouseButton::from_name("side"), None);
        assert_eq!(MouseButton::from_bits(0x04), Some(MouseButton::Middle));
    }

    #[test]
    fn normalize_swaps_random_delay_bounds() {
        let mut mac = Macro::new(
            "r",
            vec![MacroCommand::RandomDelay {
                min_ms: 300,
                max_ms: 100,
            }],
        );
        assert_eq!(mac.normalize(), 0);
        assert_eq!(
            mac.commands[0],
            MacroCommand::RandomDelay {
                min_ms: 100,
                max_ms: 300
            }
        );
    }

    #[test]
    fn normalize_repairs_repeat_markers() {
        let mut mac = Macro::new(
            "rep",
            vec![
                MacroCommand::RepeatEnd,
                MacroCommand::RepeatStart { count: 2 },
                MacroCommand::RepeatStart { count: 3 },
                key(4),
                MacroCommand::RepeatEnd,
                MacroCommand::RepeatEnd,
                MacroCommand::RepeatStart { count: 2 },
            ],
        );
        assert_eq!(mac.normalize(), 4);
        assert_eq!(
            mac.commands,
            vec![MacroCommand::RepeatStart { count: 2 }, key(4), MacroCommand::RepeatEnd]
        );
    }

    #[test]
    fn library_insert_replaces() {
        let mut lib = MacroLibrary::new();
        assert!(lib.insert(Macro::new("a", vec![key(4)])).is_none());
        assert!(lib.insert(Macro::new("a", vec![key(5)])).is_some());
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.get("a").unwrap().commands, vec![key(5)]);
        assert!(lib.remove("a").is_some());
        assert!(lib.is_empty());
    }
}
