//! Rotary encoder trackers and the encoder dispatcher.
//!
//! A tracker turns whatever the hardware reports (a running pulse count or
//! an absolute 12-bit angle) into a signed absolute position. The bank polls
//! every tracker once per tick and turns position changes into `cw`/`ccw`
//! events, at most one per encoder per tick.

use macropad_keymap::{Component, ComponentSet, Direction, EncoderConfig};
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Millis;
use crate::error::{Error, Result};
use crate::event::{InputAction, InputEvent, InputSource};

/// Number of distinct raw angles of a 12-bit sensor.
pub const ANGLE_RANGE: i64 = 4096;
const HALF_RANGE: i64 = ANGLE_RANGE / 2;

/// Hardware pulse counter behind a quadrature encoder.
pub trait QuadratureCounter: Send {
    /// Running signed count since the counter was started.
    fn count(&mut self) -> i64;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    #[error("magnet not detected")]
    MagnetNotDetected,
    #[error("bus error: {0:?}")]
    Bus(embedded_hal::i2c::ErrorKind),
}

/// Absolute angle sensor such as the AS5600.
pub trait AngleSensor: Send {
    /// Raw angle in `0..4096`.
    fn read_angle(&mut self) -> std::result::Result<u16, SensorFault>;
}

/// Shortest signed distance from `prev` to `now` on the 12-bit circle, in
/// `(-2048, 2048]`.
pub fn wrap_delta(prev: u16, now: u16) -> i64 {
    let mut delta = now as i64 - prev as i64;
    if delta > HALF_RANGE {
        delta -= ANGLE_RANGE;
    } else if delta <= -HALF_RANGE {
        delta += ANGLE_RANGE;
    }
    delta
}

pub trait PositionTracker: Send {
    /// Sample the hardware once and fold the delta into the position.
    /// Returns the new absolute position.
    fn update(&mut self) -> Result<i64>;

    fn position(&self) -> i64;
}

// ============================================================================
// Quadrature
// ============================================================================

pub struct QuadratureTracker<Q> {
    counter: Q,
    direction: Direction,
    last_count: Option<i64>,
    position: i64,
}

impl<Q: QuadratureCounter> QuadratureTracker<Q> {
    pub fn new(counter: Q, direction: Direction) -> Self {
        Self {
            counter,
            direction,
            last_count: None,
            position: 0,
        }
    }
}

impl<Q: QuadratureCounter> PositionTracker for QuadratureTracker<Q> {
    fn update(&mut self) -> Result<i64> {
        let count = self.counter.count();
        if let Some(last) = self.last_count {
            self.position += self.direction.sign() * count.wrapping_sub(last);
        }
        self.last_count = Some(count);
        Ok(self.position)
    }

    fn position(&self) -> i64 {
        self.position
    }
}

// ============================================================================
// Magnetic
// ============================================================================

pub struct MagneticTracker<S> {
    id: String,
    sensor: S,
    direction: Direction,
    zero: u16,
    last_raw: Option<u16>,
    position: i64,
    fault_logged: bool,
}

impl<S: AngleSensor> MagneticTracker<S> {
    pub fn new(id: impl Into<String>, sensor: S, config: &EncoderConfig) -> Self {
        Self {
            id: id.into(),
            sensor,
            direction: config.direction,
            zero: config.zero_position % ANGLE_RANGE as u16,
            last_raw: None,
            position: 0,
            fault_logged: false,
        }
    }

    pub fn last_raw(&self) -> Option<u16> {
        self.last_raw
    }

    fn offset(&self, raw: u16) -> u16 {
        ((raw as i64 - self.zero as i64).rem_euclid(ANGLE_RANGE)) as u16
    }
}

impl<S: AngleSensor> PositionTracker for MagneticTracker<S> {
    fn update(&mut self) -> Result<i64> {
        let raw = match self.sensor.read_angle() {
            Ok(raw) => self.offset(raw & (ANGLE_RANGE as u16 - 1)),
            Err(fault) => {
                if !self.fault_logged {
                    warn!(component = %self.id, %fault, "magnetic encoder unresponsive");
                    self.fault_logged = true;
                }
                return Err(Error::SensorUnresponsive(self.id.clone()));
            }
        };

        // The first good sample only establishes the baseline.
        if let Some(prev) = self.last_raw {
            self.position += self.direction.sign() * wrap_delta(prev, raw);
        }
        self.last_raw = Some(raw);
        Ok(self.position)
    }

    fn position(&self) -> i64 {
        self.position
    }
}

// ============================================================================
// Encoder dispatcher
// ============================================================================

struct Channel {
    id: String,
    tracker: Box<dyn PositionTracker>,
    last_reported: i64,
    faults: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderSnapshot {
    pub id: String,
    pub position: i64,
    pub last_reported: i64,
    pub faults: u64,
}

pub struct EncoderBank {
    channels: Vec<Channel>,
    diagnostics_interval_ms: Millis,
    last_dump: Option<Millis>,
}

impl EncoderBank {
    pub fn new(diagnostics_interval_ms: Millis) -> Self {
        Self {
            channels: Vec::new(),
            diagnostics_interval_ms,
            last_dump: None,
        }
    }

    /// Build one tracker per encoder component. `factory` wires the
    /// hardware; returning `None` leaves that encoder out.
    pub fn from_components<F>(
        components: &ComponentSet,
        diagnostics_interval_ms: Millis,
        mut factory: F,
    ) -> Self
    where
        F: FnMut(&Component, &EncoderConfig) -> Option<Box<dyn PositionTracker>>,
    {
        let mut bank = Self::new(diagnostics_interval_ms);
        for component in components.encoders() {
            let Some(config) = component.encoder.as_ref() else {
                continue;
            };
            match factory(component, config) {
                Some(tracker) => bank.add(component.id.clone(), tracker),
                None => warn!(component = %component.id, "no hardware for encoder, skipped"),
            }
        }
        bank
    }

    pub fn add(&mut self, id: impl Into<String>, tracker: Box<dyn PositionTracker>) {
        self.channels.push(Channel {
            id: id.into(),
            last_reported: tracker.position(),
            tracker,
            faults: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Update every tracker and report direction changes.
    pub fn poll(&mut self, now: Millis) -> Vec<InputEvent> {
        let mut events = Vec::new();
        for channel in &mut self.channels {
            let position = match channel.tracker.update() {
                Ok(position) => position,
                Err(_) => {
                    channel.faults += 1;
                    continue;
                }
            };
            let action = if position > channel.last_reported {
                InputAction::Clockwise
            } else if position < channel.last_reported {
                InputAction::CounterClockwise
            } else {
                continue;
            };
            channel.last_reported = position;
            events.push(InputEvent::new(channel.id.clone(), action, now));
        }
        self.maybe_dump(now);
        events
    }

    pub fn snapshot(&self) -> Vec<EncoderSnapshot> {
        self.channels
            .iter()
            .map(|c| EncoderSnapshot {
                id: c.id.clone(),
                position: c.tracker.position(),
                last_reported: c.last_reported,
                faults: c.faults,
            })
            .collect()
    }

    fn maybe_dump(&mut self, now: Millis) {
        if self.diagnostics_interval_ms == 0 {
            return;
        }
        let due = match self.last_dump {
            Some(last) => now.saturating_sub(last) >= self.diagnostics_interval_ms,
            None => true,
        };
        if !due {
            return;
        }
        self.last_dump = Some(now);
        for snap in self.snapshot() {
            debug!(
                component = %snap.id,
                position = snap.position,
                reported = snap.last_reported,
                faults = snap.faults,
                "encoder state"
            );
        }
    }
}

impl InputSource for EncoderBank {
    fn poll(&mut self, now: Millis) -> Vec<InputEvent> {
        EncoderBank::poll(self, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use macropad_keymap::EncoderHardware;
    use parking_lot::Mutex;

    /// Sensor that plays back a fixed list of readings.
    struct Script(VecDeque<std::result::Result<u16, SensorFault>>);

    impl Script {
        fn angles(angles: &[u16]) -> Self {
            Script(angles.iter().map(|&a| Ok(a)).collect())
        }
    }

    impl AngleSensor for Script {
        fn read_angle(&mut self) -> std::result::Result<u16, SensorFault> {
            self.0.pop_front().unwrap_or(Err(SensorFault::MagnetNotDetected))
        }
    }

    #[derive(Clone, Default)]
    struct Counter(Arc<Mutex<i64>>);

    impl QuadratureCounter for Counter {
        fn count(&mut self) -> i64 {
            *self.0.lock()
        }
    }

    fn magnetic(direction: Direction, zero: u16) -> EncoderConfig {
        EncoderConfig {
            hardware: EncoderHardware::Magnetic,
            direction,
            zero_position: zero,
        }
    }

    // --- wrap arithmetic ---

    #[test]
    fn wrap_delta_takes_shorter_arc() {
        assert_eq!(wrap_delta(4090, 5), 11);
        assert_eq!(wrap_delta(5, 4090), -11);
        assert_eq!(wrap_delta(100, 120), 20);
        assert_eq!(wrap_delta(0, 2048), 2048);
        assert_eq!(wrap_delta(2048, 0), 2048);
        assert_eq!(wrap_delta(0, 2049), -2047);
        for prev in (0..4096).step_by(97) {
            for now in (0..4096).step_by(89) {
                let d = wrap_delta(prev, now);
                assert!(d > -2048 && d <= 2048, "{} -> {} gave {}", prev, now, d);
            }
        }
    }

    // --- trackers ---

    #[test]
    fn magnetic_wrap_sequence() {
        let sensor = Script::angles(&[4090, 4095, 0, 5]);
        let mut t = MagneticTracker::new("encoder-1", sensor, &magnetic(Direction::Forward, 0));
        let positions: Vec<i64> = (0..4).map(|_| t.update().unwrap()).collect();
        assert_eq!(positions, vec![0, 5, 10, 15]);
    }

    #[test]
    fn magnetic_direct_jump_across_zero() {
        let forward = magnetic(Direction::Forward, 0);
        let mut t = MagneticTracker::new("encoder-1", Script::angles(&[4090, 5]), &forward);
        t.update().unwrap();
        assert_eq!(t.update().unwrap(), 11);

        let reverse = magnetic(Direction::Reverse, 0);
        let mut rev = MagneticTracker::new("encoder-1", Script::angles(&[4090, 5]), &reverse);
        rev.update().unwrap();
        assert_eq!(rev.update().unwrap(), -11);
    }

    #[test]
    fn magnetic_zero_offset() {
        let offset = magnetic(Direction::Forward, 200);
        let mut t = MagneticTracker::new("encoder-1", Script::angles(&[100, 110]), &offset);
        t.update().unwrap();
        assert_eq!(t.last_raw(), Some(3996));
        assert_eq!(t.update().unwrap(), 10);
        assert_eq!(t.last_raw(), Some(4006));
    }

    #[test]
    fn magnetic_fault_skips_tick() {
        let readings = VecDeque::from(vec![
            Ok(10),
            Err(SensorFault::MagnetNotDetected),
            Err(SensorFault::MagnetNotDetected),
            Ok(30),
        ]);
        let config = magnetic(Direction::Forward, 0);
        let mut t = MagneticTracker::new("encoder-2", Script(readings), &config);
        assert_eq!(t.update().unwrap(), 0);
        assert!(matches!(t.update(), Err(Error::SensorUnresponsive(id)) if id == "encoder-2"));
        assert!(t.update().is_err());
        assert!(t.fault_logged);
        assert_eq!(t.update().unwrap(), 20);
    }

    #[test]
    fn quadrature_applies_direction() {
        let counter = Counter::default();
        let mut t = QuadratureTracker::new(counter.clone(), Direction::Reverse);
        *counter.0.lock() = 3;
        assert_eq!(t.update().unwrap(), 0, "first read is the baseline");
        *counter.0.lock() = 7;
        assert_eq!(t.update().unwrap(), -4);
        *counter.0.lock() = 1;
        assert_eq!(t.update().unwrap(), 2);
    }

    // --- bank ---

    #[test]
    fn bank_emits_one_event_per_tick() {
        let mut bank = EncoderBank::new(0);
        let sensor = Script::angles(&[4090, 4095, 0, 5, 5, 0]);
        let config = magnetic(Direction::Forward, 0);
        bank.add("encoder-1", Box::new(MagneticTracker::new("encoder-1", sensor, &config)));
        let actions: Vec<Vec<InputAction>> = (0..6)
            .map(|t| bank.poll(t * 10).into_iter().map(|e| e.action).collect())
            .collect();
        assert_eq!(
            actions,
            vec![
                vec![],
                vec![InputAction::Clockwise],
                vec![InputAction::Clockwise],
                vec![InputAction::Clockwise],
                vec![],
                vec![InputAction::CounterClockwise],
            ]
        );
        assert_eq!(bank.snapshot()[0].position, 10);
    }

    #[test]
    fn bank_counts_faults_and_continues() {
        let counter = Counter::default();
        let mut bank = EncoderBank::new(1000);
        let config = magnetic(Direction::Forward, 0);
        let magnet = MagneticTracker::new("encoder-1", Script::angles(&[]), &config);
        bank.add("encoder-1", Box::new(magnet));
        let quadrature = QuadratureTracker::new(counter.clone(), Direction::Forward);
        bank.add("encoder-2", Box::new(quadrature));

        assert!(bank.poll(0).is_empty());
        *counter.0.lock() = 1;
        let events = bank.poll(10);
        assert_eq!(events, vec![InputEvent::new("encoder-2", InputAction::Clockwise, 10)]);
        assert_eq!(bank.snapshot()[0].faults, 2);
    }
}
