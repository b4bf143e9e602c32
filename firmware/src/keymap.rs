//! Layered binding table.
//!
//! Each layer maps component ids to their bindings; exactly one layer is
//! current. There is no fall-through between layers: a component missing
//! from the current layer resolves to `Binding::None`. The current layer
//! name is persisted on every switch and restored at boot.

use std::collections::{BTreeMap, BTreeSet};

use macropad_keymap::{Binding, ComponentBinding, LayerBindings, Slot, DEFAULT_LAYER};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::LayerStore;

static UNBOUND: Binding = Binding::None;

pub struct BindingStore {
    layers: BTreeMap<String, LayerBindings>,
    current: String,
    store: Box<dyn LayerStore>,
}

/// Replace every `Layer` binding whose target is not in `known` with
/// `None`, returning what was replaced.
fn sanitize(layer: &str, bindings: &mut LayerBindings, known: &BTreeSet<String>) -> Vec<Error> {
    let mut malformed = Vec::new();
    for (component, binding) in bindings.iter_mut() {
        for slot in [Slot::Press, Slot::Clockwise, Slot::CounterClockwise] {
            let target = match binding.slot(slot) {
                Binding::Layer { target } if !known.contains(target.as_str()) => target.clone(),
                _ => continue,
            };
            let err = Error::MalformedBinding {
                layer: layer.to_string(),
                component: component.clone(),
                target,
            };
            warn!(error = %err, "binding dropped");
            malformed.push(err);
            *binding.slot_mut(slot) = Binding::None;
        }
    }
    malformed
}

impl BindingStore {
    /// An empty table holding only the `default` layer.
    pub fn new(store: Box<dyn LayerStore>) -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(DEFAULT_LAYER.to_string(), LayerBindings::new());
        Self {
            layers,
            current: DEFAULT_LAYER.to_string(),
            store,
        }
    }

    /// Build the table from loaded layers and restore the saved current
    /// layer. A saved name that no longer exists falls back to `default`.
    pub fn restore(
        mut layers: BTreeMap<String, LayerBindings>,
        store: Box<dyn LayerStore>,
    ) -> Self {
        layers.entry(DEFAULT_LAYER.to_string()).or_default();

        let known: BTreeSet<String> = layers.keys().cloned().collect();
        for (name, bindings) in layers.iter_mut() {
            sanitize(name, bindings, &known);
        }

        let current = match store.load() {
            Ok(Some(saved)) if layers.contains_key(&saved) => saved,
            Ok(Some(saved)) => {
                warn!(layer = %saved, "saved layer no longer exists, using default");
                DEFAULT_LAYER.to_string()
            }
            Ok(None) => DEFAULT_LAYER.to_string(),
            Err(e) => {
                warn!(error = %e, "failed to read saved layer, using default");
                DEFAULT_LAYER.to_string()
            }
        };
        info!(layer = %current, layers = layers.len(), "binding table ready");

        Self {
            layers,
            current,
            store,
        }
    }

    pub fn current_layer(&self) -> &str {
        &self.current
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn bindings(&self, layer: &str) -> Option<&LayerBindings> {
        self.layers.get(layer)
    }

    /// All slots of a component in the current layer.
    pub fn lookup(&self, component_id: &str) -> Option<&ComponentBinding> {
        self.layers.get(&self.current)?.get(component_id)
    }

    /// The press binding of a component in the current layer.
    pub fn resolve(&self, component_id: &str) -> &Binding {
        self.resolve_slot(component_id, Slot::Press)
    }

    pub fn resolve_slot(&self, component_id: &str, slot: Slot) -> &Binding {
        match self.lookup(component_id) {
            Some(binding) => binding.slot(slot),
            None => &UNBOUND,
        }
    }

    /// Make `layer` current and persist the choice. An unknown layer leaves
    /// the state untouched. Persistence failures are logged only.
    pub fn switch_to(&mut self, layer: &str) -> Result<()> {
        if !self.layers.contains_key(layer) {
            return Err(Error::UnknownLayer(layer.to_string()));
        }
        if self.current == layer {
            debug!(layer, "already on layer");
            return Ok(());
        }
        info!(from = %self.current, to = layer, "layer switch");
        self.current = layer.to_string();
        if let Err(e) = self.store.save(layer) {
            warn!(layer, error = %e, "failed to persist current layer");
        }
        Ok(())
    }

    /// Replace (or create) a layer's mapping. Returns the bindings that were
    /// dropped for naming an unknown layer.
    pub fn load(&mut self, layer: &str, mut bindings: LayerBindings) -> Vec<Error> {
        let mut known: BTreeSet<String> = self.layers.keys().cloned().collect();
        known.insert(layer.to_string());
        let malformed = sanitize(layer, &mut bindings, &known);
        debug!(layer, components = bindings.len(), "layer loaded");
        self.layers.insert(layer.to_string(), bindings);
        malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLayerStore;
    use macropad_keymap::KeyboardReport;

    fn hid(code: u8) -> Binding {
        Binding::Hid {
            report: KeyboardReport::from_keycodes(0, &[code]),
        }
    }

    fn layer(entries: &[(&str, Binding)]) -> LayerBindings {
        entries
            .iter()
            .map(|(id, b)| (id.to_string(), ComponentBinding::key(b.clone())))
            .collect()
    }

    fn two_layers() -> BTreeMap<String, LayerBindings> {
        let mut layers = BTreeMap::new();
        layers.insert(
            "default".to_string(),
            layer(&[
                ("button-1", hid(0x04)),
                (
                    "button-2",
                    Binding::Layer {
                        target: "edit".into(),
                    },
                ),
            ]),
        );
        layers.insert("edit".to_string(), layer(&[("button-2", hid(0x1D))]));
        layers
    }

    // --- resolution ---

    #[test]
    fn resolves_in_current_layer_only() {
        let store = BindingStore::restore(two_layers(), Box::new(MemoryLayerStore::new()));
        assert_eq!(store.current_layer(), "default");
        assert_eq!(store.resolve("button-1"), &hid(0x04));
        assert_eq!(store.resolve("nope"), &Binding::None);
        assert_eq!(store.resolve_slot("button-1", Slot::Clockwise), &Binding::None);
    }

    #[test]
    fn encoder_slots() {
        let mut store = BindingStore::new(Box::new(MemoryLayerStore::new()));
        let mut enc = ComponentBinding::default();
        enc.clockwise = Binding::Consumer { usage: 0xE9 };
        enc.counterclockwise = Binding::Consumer { usage: 0xEA };
        let bindings: LayerBindings = [("encoder-1".to_string(), enc)].into_iter().collect();
        assert!(store.load("default", bindings).is_empty());
        assert_eq!(
            store.resolve_slot("encoder-1", Slot::Clockwise),
            &Binding::Consumer { usage: 0xE9 }
        );
        assert_eq!(store.resolve("encoder-1"), &Binding::None);
    }

    // --- switching ---

    #[test]
    fn switch_persists_once() {
        let mem = MemoryLayerStore::new();
        let mut store = BindingStore::restore(two_layers(), Box::new(mem.clone()));
        store.switch_to("edit").unwrap();
        assert_eq!(store.resolve("button-2"), &hid(0x1D));
        assert_eq!(store.resolve("button-1"), &Binding::None);
        store.switch_to("edit").unwrap();
        assert_eq!(mem.value().as_deref(), Some("edit"));
        assert_eq!(mem.writes(), 1);
    }

    #[test]
    fn unknown_layer_changes_nothing() {
        let mem = MemoryLayerStore::new();
        let mut store = BindingStore::restore(two_layers(), Box::new(mem.clone()));
        assert!(matches!(store.switch_to("games"), Err(Error::UnknownLayer(l)) if l == "games"));
        assert_eq!(store.current_layer(), "default");
        assert_eq!(mem.writes(), 0);
    }

    #[test]
    fn persistence_failure_keeps_switch() {
        let mem = MemoryLayerStore::new();
        mem.set_failing(true);
        let mut store = BindingStore::restore(two_layers(), Box::new(mem.clone()));
        store.switch_to("edit").unwrap();
        assert_eq!(store.current_layer(), "edit");
        assert_eq!(mem.value(), None);
    }

    // --- boot ---

    #[test]
    fn restores_saved_layer() {
        let saved = Box::new(MemoryLayerStore::with_layer("edit"));
        let store = BindingStore::restore(two_layers(), saved);
        assert_eq!(store.current_layer(), "edit");

        let saved = Box::new(MemoryLayerStore::with_layer("gone"));
        let store = BindingStore::restore(two_layers(), saved);
        assert_eq!(store.current_layer(), "default");
    }

    #[test]
    fn default_layer_always_exists() {
        let store = BindingStore::restore(BTreeMap::new(), Box::new(MemoryLayerStore::new()));
        assert!(store.has_layer("default"));
        assert_eq!(store.layers().collect::<Vec<_>>(), vec!["default"]);
    }

    #[test]
    fn malformed_layer_target_becomes_none() {
        let mut layers = two_layers();
        layers.get_mut("edit").unwrap().insert(
            "button-3".to_string(),
            ComponentBinding::key(Binding::Layer {
                target: "missing".into(),
            }),
        );
        let store = BindingStore::restore(layers, Box::new(MemoryLayerStore::new()));
        let edit = store.bindings("edit").unwrap();
        assert_eq!(edit["button-3"].press, Binding::None);
        assert_eq!(
            store.bindings("default").unwrap()["button-2"].press,
            Binding::Layer {
                target: "edit".into()
            }
        );
    }

    #[test]
    fn load_returns_bindings_verbatim() {
        let mut store = BindingStore::new(Box::new(MemoryLayerStore::new()));
        let input = layer(&[
            ("button-1", hid(0x04)),
            ("button-2", Binding::Consumer { usage: 0xCD }),
            ("button-3", Binding::Macro { id: "hi3".into() }),
            ("button-4", Binding::Layer { target: "fn".into() }),
            ("button-5", Binding::Layer { target: "nowhere".into() }),
        ]);
        let dropped = store.load("fn", input.clone());
        assert_eq!(dropped.len(), 1);

        let loaded = store.bindings("fn").unwrap();
        for (id, binding) in &input {
            if id == "button-5" {
                assert_eq!(loaded[id].press, Binding::None);
            } else {
                assert_eq!(&loaded[id], binding);
            }
        }
    }
}
