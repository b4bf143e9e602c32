//! Input-to-HID core of the macropad firmware.
//!
//! [`Macropad`] owns the binding table, the macro library, the macro engine
//! and the HID state, and is driven by input events plus a periodic
//! [`Macropad::tick`]. Hardware sits behind traits: `embedded-hal` pins for
//! the key matrix, [`encoder::QuadratureCounter`] / [`encoder::AngleSensor`]
//! for encoders, [`hid::HidTransport`] for the USB stack and
//! [`storage::LayerStore`] for persistence.

pub mod clock;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod event;
pub mod hid;
pub mod i2c;
pub mod keymap;
pub mod macros;
pub mod matrix;
pub mod orchestrator;
pub mod recorder;
pub mod storage;

use std::sync::Arc;

use macropad_keymap::{Binding, Configuration, MacroLibrary, Slot};
use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, Millis, MonotonicClock};
pub use config::Settings;
pub use error::{Error, Result};
pub use event::{InputAction, InputEvent, InputSource};
pub use hid::{HidController, HidError, HidTransport};
pub use keymap::BindingStore;
pub use macros::{ExecutionStats, MacroEngine};
pub use recorder::{Recorded, RecordingTransport, SentReport};
pub use storage::{FileLayerStore, LayerStore, MemoryLayerStore};

use dispatch::{Dispatcher, Targets};

/// The device core, built once at boot.
pub struct Macropad<T> {
    settings: Settings,
    clock: Arc<dyn Clock>,
    bindings: BindingStore,
    macros: MacroLibrary,
    hid: HidController<T>,
    engine: MacroEngine,
    dispatcher: Dispatcher,
}

impl<T: HidTransport> Macropad<T> {
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        transport: T,
        bindings: BindingStore,
        macros: MacroLibrary,
    ) -> Self {
        Self {
            hid: HidController::new(transport, settings.tap_release_ms),
            engine: MacroEngine::new(settings.macro_pacing_ms, settings.tap_release_ms),
            dispatcher: Dispatcher::new(),
            settings,
            clock,
            bindings,
            macros,
        }
    }

    /// Assemble the core from a loaded configuration directory and restore
    /// the saved layer.
    pub fn boot(
        config: Configuration,
        settings: Settings,
        clock: Arc<dyn Clock>,
        transport: T,
        store: Box<dyn LayerStore>,
    ) -> Self {
        let bindings = BindingStore::restore(config.actions.layers, store);
        for layer in bindings.layers() {
            let Some(layer_bindings) = bindings.bindings(layer) else {
                continue;
            };
            for (component, binding) in layer_bindings {
                for slot in [Slot::Press, Slot::Clockwise, Slot::CounterClockwise] {
                    if let Binding::Macro { id } = binding.slot(slot) {
                        if !config.macros.contains(id) {
                            warn!(
                                layer,
                                component = %component,
                                macro_id = %id,
                                "binding names an unknown macro"
                            );
                        }
                    }
                }
            }
        }
        info!(
            components = config.components.len(),
            macros = config.macros.len(),
            layer = bindings.current_layer(),
            "macropad core booted"
        );
        Self::new(settings, clock, transport, bindings, config.macros)
    }

    /// Replace the macro engine, e.g. with a seeded one.
    pub fn with_engine(mut self, engine: MacroEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Route one input event. Failures are recovered here and only logged.
    pub fn handle_event(&mut self, event: &InputEvent) {
        let now = self.clock.now_ms();
        let targets = Targets {
            bindings: &mut self.bindings,
            hid: &mut self.hid,
            engine: &mut self.engine,
            macros: &self.macros,
        };
        if let Err(e) = self.dispatcher.dispatch(event, now, targets) {
            debug!(
                component = %event.component_id,
                action = event.action.name(),
                error = %e,
                "event not fully applied"
            );
        }
    }

    /// Periodic service: one macro step, then due releases and retries.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        self.engine.tick(now, &self.macros, &mut self.hid);
        self.hid.poll(now);
    }

    pub fn start_macro(&mut self, id: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        self.engine.start(id, now, &self.macros)
    }

    pub fn abort_macro(&mut self) {
        self.engine.abort(&mut self.hid);
    }

    /// Stop any macro and leave the host with nothing pressed.
    pub fn shutdown(&mut self) {
        self.engine.abort(&mut self.hid);
        self.dispatcher.clear();
        if let Err(e) = self.hid.clear_all() {
            warn!(error = %e, "could not send empty reports at shutdown");
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bindings(&self) -> &BindingStore {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut BindingStore {
        &mut self.bindings
    }

    pub fn macros(&self) -> &MacroLibrary {
        &self.macros
    }

    /// Mutable access to the library, refused while a macro is executing.
    pub fn macros_mut(&mut self) -> Option<&mut MacroLibrary> {
        if self.engine.is_running() {
            None
        } else {
            Some(&mut self.macros)
        }
    }

    pub fn engine(&self) -> &MacroEngine {
        &self.engine
    }

    pub fn hid(&self) -> &HidController<T> {
        &self.hid
    }

    pub fn transport(&self) -> &T {
        self.hid.transport()
    }
}
