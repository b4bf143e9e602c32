//! HID report assembly and the transport seam.
//!
//! Keyboard state is a set of pressed keycodes; the composite 8-byte report
//! is derived from it and handed to the transport only when it differs from
//! the last report the host accepted. Consumer and mouse state follow the
//! same rule. A transport that is not ready leaves the state dirty and the
//! main loop retries through [`HidController::poll`].

use std::collections::BTreeSet;

use macropad_keymap::report::MAX_KEYS;
use macropad_keymap::{is_modifier_code, modifier_bit_of, KeyboardReport, MouseReport};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::clock::Millis;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidError {
    #[error("HID endpoint busy")]
    NotReady,
    #[error("USB device not mounted")]
    NotMounted,
}

/// The USB stack as seen by the core.
pub trait HidTransport {
    fn is_mounted(&self) -> bool;
    fn is_ready(&self) -> bool;
    fn send_keyboard(&mut self, report: &KeyboardReport) -> Result<(), HidError>;
    /// Consumer report: the 16-bit usage, little-endian on the wire.
    fn send_consumer(&mut self, usage: u16) -> Result<(), HidError>;
    fn send_mouse(&mut self, report: &MouseReport) -> Result<(), HidError>;
}

fn ensure_ready<T: HidTransport>(transport: &T) -> Result<(), HidError> {
    if !transport.is_mounted() {
        Err(HidError::NotMounted)
    } else if !transport.is_ready() {
        Err(HidError::NotReady)
    } else {
        Ok(())
    }
}

// ============================================================================
// Keyboard report assembler
// ============================================================================

/// Pressed keys plus the last report the host accepted.
#[derive(Debug, Default)]
pub struct KeyboardState {
    pressed: BTreeSet<u8>,
    last_sent: KeyboardReport,
    rollover_logged: bool,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    fn regular_keys(&self) -> usize {
        self.pressed.iter().filter(|&&k| !is_modifier_code(k)).count()
    }

    /// Add a keycode. A seventh regular key is refused and logged once per
    /// rollover episode.
    pub fn press(&mut self, keycode: u8) -> bool {
        if keycode == 0 {
            return false;
        }
        if !is_modifier_code(keycode)
            && !self.pressed.contains(&keycode)
            && self.regular_keys() >= MAX_KEYS
        {
            if !self.rollover_logged {
                warn!("rollover exceeded, key {:#04x} dropped", keycode);
                self.rollover_logged = true;
            }
            return false;
        }
        self.pressed.insert(keycode)
    }

    pub fn release(&mut self, keycode: u8) -> bool {
        let removed = self.pressed.remove(&keycode);
        if removed && self.regular_keys() < MAX_KEYS {
            self.rollover_logged = false;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.pressed.clear();
        self.rollover_logged = false;
    }

    pub fn is_pressed(&self, keycode: u8) -> bool {
        self.pressed.contains(&keycode)
    }

    /// Composite report: modifier bits, then regular keys in ascending order.
    pub fn report(&self) -> KeyboardReport {
        let mut report = KeyboardReport::empty();
        let mut idx = 0;
        for &code in &self.pressed {
            if is_modifier_code(code) {
                report.modifiers |= modifier_bit_of(code);
            } else if idx < MAX_KEYS {
                report.keys[idx] = code;
                idx += 1;
            }
        }
        report
    }

    pub fn last_sent(&self) -> KeyboardReport {
        self.last_sent
    }

    pub fn is_dirty(&self) -> bool {
        self.report() != self.last_sent
    }

    /// Send the composite report if it changed. Returns whether a report
    /// went out.
    pub fn send_if_changed<T: HidTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<bool, HidError> {
        let report = self.report();
        if report == self.last_sent {
            return Ok(false);
        }
        ensure_ready(transport)?;
        transport.send_keyboard(&report)?;
        trace!(%report, "keyboard report");
        self.last_sent = report;
        Ok(true)
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Release {
    Keys(Vec<u8>),
    Consumer,
}

#[derive(Debug, Clone)]
struct Scheduled {
    due: Millis,
    release: Release,
}

/// Owns the transport and all HID state: keyboard, consumer, mouse, and
/// the releases scheduled by taps.
pub struct HidController<T> {
    transport: T,
    keyboard: KeyboardState,
    consumer: u16,
    consumer_sent: u16,
    mouse_buttons: u8,
    mouse_buttons_sent: u8,
    scheduled: Vec<Scheduled>,
    tap_release_ms: Millis,
}

impl<T: HidTransport> HidController<T> {
    pub fn new(transport: T, tap_release_ms: Millis) -> Self {
        Self {
            transport,
            keyboard: KeyboardState::new(),
            consumer: 0,
            consumer_sent: 0,
            mouse_buttons: 0,
            mouse_buttons_sent: 0,
            scheduled: Vec::new(),
            tap_release_ms,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    pub fn consumer_usage(&self) -> u16 {
        self.consumer
    }

    pub fn is_ready(&self) -> bool {
        ensure_ready(&self.transport).is_ok()
    }

    pub fn has_scheduled(&self) -> bool {
        !self.scheduled.is_empty()
    }

    // --- keyboard ---

    pub fn press_key(&mut self, keycode: u8) -> Result<bool, HidError> {
        self.keyboard.press(keycode);
        self.keyboard.send_if_changed(&mut self.transport)
    }

    pub fn release_key(&mut self, keycode: u8) -> Result<bool, HidError> {
        self.keyboard.release(keycode);
        self.keyboard.send_if_changed(&mut self.transport)
    }

    /// Press several keycodes and send a single report for all of them.
    pub fn press_keys(&mut self, codes: &[u8]) -> Result<bool, HidError> {
        for &code in codes {
            self.keyboard.press(code);
        }
        self.keyboard.send_if_changed(&mut self.transport)
    }

    pub fn release_keys(&mut self, codes: &[u8]) -> Result<bool, HidError> {
        for &code in codes {
            self.keyboard.release(code);
        }
        self.keyboard.send_if_changed(&mut self.transport)
    }

    /// OR a report's keys (modifier bits included) into the pressed set.
    pub fn press_report(&mut self, report: &KeyboardReport) -> Result<bool, HidError> {
        self.press_keys(&report.keycodes())
    }

    pub fn release_report(&mut self, report: &KeyboardReport) -> Result<bool, HidError> {
        self.release_keys(&report.keycodes())
    }

    /// Press a report now and release it after the tap delay. Keys still
    /// held by an earlier tap are released first and lose their old
    /// release, so the host sees two distinct presses.
    pub fn tap_report(&mut self, report: &KeyboardReport, now: Millis) -> Result<bool, HidError> {
        let codes = report.keycodes();
        let mut retapped = Vec::new();
        for entry in &mut self.scheduled {
            if let Release::Keys(held) = &mut entry.release {
                held.retain(|code| {
                    let overlaps = codes.contains(code);
                    if overlaps && !retapped.contains(code) {
                        retapped.push(*code);
                    }
                    !overlaps
                });
            }
        }
        self.scheduled
            .retain(|s| !matches!(&s.release, Release::Keys(held) if held.is_empty()));
        self.scheduled.push(Scheduled {
            due: now + self.tap_release_ms,
            release: Release::Keys(codes.clone()),
        });

        retapped.retain(|&code| self.keyboard.is_pressed(code));
        if !retapped.is_empty() {
            self.release_keys(&retapped)?;
        }
        self.press_keys(&codes)
    }

    // --- consumer ---

    pub fn send_consumer(&mut self, usage: u16) -> Result<bool, HidError> {
        self.consumer = usage;
        self.flush_consumer()
    }

    /// Send a usage now and the empty usage after the tap delay. A usage
    /// still held from an earlier tap is released first so the host sees
    /// two distinct presses.
    pub fn tap_consumer(&mut self, usage: u16, now: Millis) -> Result<bool, HidError> {
        self.scheduled.retain(|s| s.release != Release::Consumer);
        self.scheduled.push(Scheduled {
            due: now + self.tap_release_ms,
            release: Release::Consumer,
        });
        if self.consumer_sent != 0 {
            self.send_consumer(0)?;
        }
        self.send_consumer(usage)
    }

    fn flush_consumer(&mut self) -> Result<bool, HidError> {
        if self.consumer == self.consumer_sent {
            return Ok(false);
        }
        ensure_ready(&self.transport)?;
        self.transport.send_consumer(self.consumer)?;
        trace!("consumer report {:#06x}", self.consumer);
        self.consumer_sent = self.consumer;
        Ok(true)
    }

    // --- mouse ---

    pub fn set_mouse_buttons(&mut self, buttons: u8) -> Result<bool, HidError> {
        self.mouse_buttons = buttons;
        self.flush_mouse_buttons()
    }

    /// Relative motion with the current button state.
    pub fn mouse_move(&mut self, dx: i8, dy: i8, wheel: i8) -> Result<(), HidError> {
        let report = MouseReport {
            buttons: self.mouse_buttons,
            dx,
            dy,
            wheel,
        };
        if report.is_still() && self.mouse_buttons == self.mouse_buttons_sent {
            return Ok(());
        }
        ensure_ready(&self.transport)?;
        self.transport.send_mouse(&report)?;
        trace!(%report, "mouse report");
        self.mouse_buttons_sent = self.mouse_buttons;
        Ok(())
    }

    fn flush_mouse_buttons(&mut self) -> Result<bool, HidError> {
        if self.mouse_buttons == self.mouse_buttons_sent {
            return Ok(false);
        }
        self.mouse_move(0, 0, 0)?;
        Ok(true)
    }

    // --- whole device ---

    /// Drop every pressed key, the consumer usage and mouse buttons, and
    /// send the empty reports that differ from what the host last saw.
    pub fn clear_all(&mut self) -> Result<(), HidError> {
        self.keyboard.clear();
        self.consumer = 0;
        self.mouse_buttons = 0;
        self.scheduled.clear();
        self.flush()
    }

    /// Push any state the host has not accepted yet.
    pub fn flush(&mut self) -> Result<(), HidError> {
        let keyboard = self.keyboard.send_if_changed(&mut self.transport);
        let consumer = self.flush_consumer();
        let mouse = self.flush_mouse_buttons();
        keyboard?;
        consumer?;
        mouse?;
        Ok(())
    }

    /// Fire due releases, then retry anything left dirty.
    pub fn poll(&mut self, now: Millis) {
        let mut due = Vec::new();
        self.scheduled.retain(|s| {
            if s.due <= now {
                due.push(s.release.clone());
                false
            } else {
                true
            }
        });
        for release in due {
            match release {
                Release::Keys(codes) => {
                    for code in codes {
                        self.keyboard.release(code);
                    }
                }
                Release::Consumer => self.consumer = 0,
            }
        }
        if let Err(e) = self.flush() {
            debug!(error = %e, "HID flush deferred");
        }
    }
}
