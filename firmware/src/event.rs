use crate::clock::Millis;

/// What happened to a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputAction {
    Press,
    Release,
    Clockwise,
    CounterClockwise,
}

impl InputAction {
    pub fn name(self) -> &'static str {
        match self {
            InputAction::Press => "press",
            InputAction::Release => "release",
            InputAction::Clockwise => "cw",
            InputAction::CounterClockwise => "ccw",
        }
    }
}

/// A logical input event tagged with the component that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputEvent {
    pub component_id: String,
    pub action: InputAction,
    pub timestamp: Millis,
}

impl InputEvent {
    pub fn new(component_id: impl Into<String>, action: InputAction, timestamp: Millis) -> Self {
        Self {
            component_id: component_id.into(),
            action,
            timestamp,
        }
    }
}

/// Something the orchestrator polls at a fixed cadence for events.
pub trait InputSource: Send {
    fn poll(&mut self, now: Millis) -> Vec<InputEvent>;
}
