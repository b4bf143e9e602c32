//! What a component does in a layer.

use std::collections::BTreeMap;

use crate::report::{consumer, KeyboardReport};
use crate::Keycode;

/// Name of the layer that always exists.
pub const DEFAULT_LAYER: &str = "default";

/// The effect attached to a (layer, component) pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Binding {
    /// Keyboard report whose keys are held while the component is down.
    Hid { report: KeyboardReport },
    /// Consumer usage, auto-released shortly after the press.
    Consumer { usage: u16 },
    /// Start the named macro.
    Macro { id: String },
    /// Switch the active layer.
    Layer { target: String },
    #[default]
    None,
}

impl Binding {
    pub fn is_none(&self) -> bool {
        matches!(self, Binding::None)
    }

    /// Short human label used by layout renderers and logs.
    pub fn label(&self) -> String {
        match self {
            Binding::Hid { report } => {
                let mut parts: Vec<&str> = Vec::new();
                for code in report.keycodes() {
                    match Keycode::from_code(code) {
                        Some(kc) => parts.push(kc.display_name()),
                        None => parts.push("?"),
                    }
                }
                parts.join("+")
            }
            Binding::Consumer { usage } => match consumer::label(*usage) {
                Some(label) => label.to_string(),
                None => format!("CC{:04X}", usage),
            },
            Binding::Macro { id } => format!("M:{}", id),
            Binding::Layer { target } => format!("L:{}", target),
            Binding::None => String::new(),
        }
    }
}

/// Which binding slot of a component an event selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Press,
    Clockwise,
    CounterClockwise,
}

/// All slots of a component in one layer. Buttons only use `press`;
/// encoders use `clockwise`/`counterclockwise` and, when they have a
/// push button, `press`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentBinding {
    pub press: Binding,
    pub clockwise: Binding,
    pub counterclockwise: Binding,
}

impl ComponentBinding {
    /// A button binding with only the press slot set.
    pub fn key(press: Binding) -> Self {
        Self {
            press,
            ..Self::default()
        }
    }

    pub fn slot(&self, slot: Slot) -> &Binding {
        match slot {
            Slot::Press => &self.press,
            Slot::Clockwise => &self.clockwise,
            Slot::CounterClockwise => &self.counterclockwise,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut Binding {
        match slot {
            Slot::Press => &mut self.press,
            Slot::Clockwise => &mut self.clockwise,
            Slot::CounterClockwise => &mut self.counterclockwise,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.press.is_none() && self.clockwise.is_none() && self.counterclockwise.is_none()
    }
}

/// Mapping of component id to bindings for one layer.
pub type LayerBindings = BTreeMap<String, ComponentBinding>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let hid = Binding::Hid {
            report: KeyboardReport::from_bytes([0x01, 0, 0x06, 0, 0, 0, 0, 0]),
        };
        assert_eq!(hid.label(), "Ctrl+C");
        assert_eq!(Binding::Consumer { usage: 0x00E9 }.label(), "Vol+");
        assert_eq!(Binding::Consumer { usage: 0x0192 }.label(), "CC0192");
        assert_eq!(Binding::Macro { id: "hi3".into() }.label(), "M:hi3");
        assert_eq!(Binding::Layer { target: "edit".into() }.label(), "L:edit");
        assert_eq!(Binding::None.label(), "");
    }

    #[test]
    fn slots() {
        let mut binding = ComponentBinding::key(Binding::Consumer { usage: 0xE2 });
        assert!(binding.slot(Slot::Clockwise).is_none());
        *binding.slot_mut(Slot::Clockwise) = Binding::Consumer { usage: 0xE9 };
        assert_eq!(binding.clockwise, Binding::Consumer { usage: 0xE9 });
        assert!(!binding.is_empty());
        assert!(ComponentBinding::default().is_empty());
    }
}
