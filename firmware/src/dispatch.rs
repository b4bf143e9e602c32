//! Action dispatcher: resolves input events to bindings and applies them.
//!
//! The binding fired by a press is remembered per component, and the
//! matching release undoes exactly that binding. A release therefore never
//! consults the layer table, which is what keeps a layer switch from firing
//! the new layer's binding when the switching key comes back up.

use std::collections::{HashMap, HashSet};

use macropad_keymap::{Binding, MacroLibrary, Slot};
use tracing::{debug, trace, warn};

use crate::clock::Millis;
use crate::error::{Error, Result};
use crate::event::{InputAction, InputEvent};
use crate::hid::{HidController, HidTransport};
use crate::keymap::BindingStore;
use crate::macros::MacroEngine;

/// Everything a dispatch may touch.
pub struct Targets<'a, T> {
    pub bindings: &'a mut BindingStore,
    pub hid: &'a mut HidController<T>,
    pub engine: &'a mut MacroEngine,
    pub macros: &'a MacroLibrary,
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    held: HashMap<String, Binding>,
    unknown_logged: HashSet<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a press of `component_id` is waiting for its release.
    pub fn is_held(&self, component_id: &str) -> bool {
        self.held.contains_key(component_id)
    }

    /// Forget every pending release. Used when the HID state is wiped.
    pub fn clear(&mut self) {
        self.held.clear();
    }

    fn unknown(&mut self, component_id: &str) -> Error {
        if self.unknown_logged.insert(component_id.to_string()) {
            warn!(component = component_id, "event for unbound component dropped");
        }
        Error::UnknownComponent(component_id.to_string())
    }

    pub fn dispatch<T: HidTransport>(
        &mut self,
        event: &InputEvent,
        now: Millis,
        to: Targets<'_, T>,
    ) -> Result<()> {
        let id = event.component_id.as_str();
        trace!(component = id, action = event.action.name(), "dispatch");
        match event.action {
            InputAction::Press => self.press(id, now, to),
            InputAction::Release => self.release(id, to),
            InputAction::Clockwise => self.rotate(id, Slot::Clockwise, now, to),
            InputAction::CounterClockwise => self.rotate(id, Slot::CounterClockwise, now, to),
        }
    }

    fn press<T: HidTransport>(&mut self, id: &str, now: Millis, to: Targets<'_, T>) -> Result<()> {
        let Some(binding) = to.bindings.lookup(id).map(|b| b.press.clone()) else {
            return Err(self.unknown(id));
        };
        if let Some(stale) = self.held.remove(id) {
            debug!(component = id, "press without release, releasing first");
            if let Binding::Hid { report } = stale {
                // NotReady leaves the release pending in the assembler.
                if let Err(e) = to.hid.release_report(&report) {
                    debug!(component = id, error = %e, "stale release deferred");
                }
            }
        }
        self.held.insert(id.to_string(), binding.clone());

        match binding {
            Binding::Hid { report } => {
                to.hid.press_report(&report)?;
            }
            Binding::Consumer { usage } => {
                to.hid.tap_consumer(usage, now)?;
            }
            Binding::Macro { id: macro_id } => {
                if let Err(e) = to.engine.start(&macro_id, now, to.macros) {
                    warn!(
                        component = id,
                        macro_id = %macro_id,
                        error = %e,
                        "macro trigger dropped"
                    );
                    return Err(e);
                }
            }
            Binding::Layer { target } => {
                to.bindings.switch_to(&target)?;
            }
            Binding::None => {}
        }
        Ok(())
    }

    fn release<T: HidTransport>(&mut self, id: &str, to: Targets<'_, T>) -> Result<()> {
        let Some(binding) = self.held.remove(id) else {
            trace!(component = id, "release without press ignored");
            return Ok(());
        };
        if let Binding::Hid { report } = binding {
            to.hid.release_report(&report)?;
        }
        Ok(())
    }

    fn rotate<T: HidTransport>(
        &mut self,
        id: &str,
        slot: Slot,
        now: Millis,
        to: Targets<'_, T>,
    ) -> Result<()> {
        let Some(binding) = to.bindings.lookup(id).map(|b| b.slot(slot).clone()) else {
            return Err(self.unknown(id));
        };
        match binding {
            Binding::Hid { report } => {
                to.hid.tap_report(&report, now)?;
            }
            Binding::Consumer { usage } => {
                to.hid.tap_consumer(usage, now)?;
            }
            other => trace!(component = id, binding = ?other, "rotation binding ignored"),
        }
        Ok(())
    }
}
