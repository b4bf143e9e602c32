//! Replay an event script through the firmware core on a virtual clock.
//!
//! Script lines are `<ms> <verb> [id]`, where the verb is one of `press`,
//! `release`, `cw`, `ccw`, `macro` or `wait`. Blank lines and `#` comments
//! are skipped. Lines must be in time order.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use macropad_firmware::{
    InputAction, InputEvent, Macropad, ManualClock, MemoryLayerStore, Millis, Recorded,
    RecordingTransport, Settings,
};
use macropad_keymap::Configuration;
use tracing::{debug, warn};

/// Upper bound on how long the replay keeps ticking after the last line.
const DRAIN_LIMIT_MS: Millis = 60_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Input(InputAction, String),
    Macro(String),
    Wait,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub at: Millis,
    pub action: Action,
}

pub fn parse_script(text: &str) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    let mut last = 0;

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let mut words = content.split_whitespace();
        let at: Millis = words
            .next()
            .unwrap_or_default()
            .parse()
            .with_context(|| format!("line {}: bad timestamp", lineno))?;
        if at < last {
            bail!("line {}: timestamp {} goes back in time (previous {})", lineno, at, last);
        }
        last = at;

        let verb = words.next().unwrap_or_default();
        let id = words.next();
        let action = match (verb, id) {
            ("press", Some(id)) => Action::Input(InputAction::Press, id.to_string()),
            ("release", Some(id)) => Action::Input(InputAction::Release, id.to_string()),
            ("cw", Some(id)) => Action::Input(InputAction::Clockwise, id.to_string()),
            ("ccw", Some(id)) => Action::Input(InputAction::CounterClockwise, id.to_string()),
            ("macro", Some(id)) => Action::Macro(id.to_string()),
            ("wait", None) => Action::Wait,
            ("press" | "release" | "cw" | "ccw" | "macro", None) => {
                bail!("line {}: {} needs a component or macro id", lineno, verb)
            }
            _ => bail!("line {}: cannot parse {:?}", lineno, content),
        };
        if words.next().is_some() {
            bail!("line {}: trailing text after {:?}", lineno, verb);
        }
        lines.push(Line { at, action });
    }

    Ok(lines)
}

/// Run the script and return every report the host would have received.
pub fn run(config: Configuration, settings: Settings, script: &[Line]) -> Vec<Recorded> {
    let clock = ManualClock::new();
    let transport = RecordingTransport::new(Arc::new(clock.clone()));
    let scan_ms = settings.scan_ms.max(1);
    let mut pad = Macropad::boot(
        config,
        settings,
        Arc::new(clock.clone()),
        transport.clone(),
        Box::new(MemoryLayerStore::new()),
    );

    let end = script.last().map(|l| l.at).unwrap_or(0);
    let mut pending = script.iter().peekable();
    let mut now = 0;
    loop {
        clock.set(now);
        while let Some(line) = pending.next_if(|l| l.at <= now) {
            match &line.action {
                Action::Input(action, id) => {
                    pad.handle_event(&InputEvent::new(id.clone(), *action, now))
                }
                Action::Macro(id) => match pad.start_macro(id) {
                    Ok(true) => {}
                    Ok(false) => debug!(macro_id = %id, "macro already running"),
                    Err(e) => warn!(macro_id = %id, error = %e, "macro not started"),
                },
                Action::Wait => {}
            }
        }
        pad.tick();

        let busy = pad.engine().is_running() || pad.hid().has_scheduled();
        if now >= end && !busy {
            break;
        }
        if now >= end + DRAIN_LIMIT_MS {
            warn!(at = now, "simulation still busy, giving up");
            break;
        }
        now += scan_ms;
    }

    transport.take()
}
