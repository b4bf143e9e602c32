//! Key matrix scanning.
//!
//! Each row is driven active in turn, the columns are sampled after a short
//! settle, and the row is released again before moving on. Only cells that
//! carry a component produce events; the rest are read and ignored.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, InputPin, OutputPin};
use macropad_keymap::MatrixCell;
use tracing::{debug, warn};

use crate::clock::Millis;
use crate::config::Settings;
use crate::debounce::{Debouncer, Transition};
use crate::event::{InputAction, InputEvent, InputSource};

pub struct Matrix<R, C, D> {
    rows: Vec<R>,
    cols: Vec<C>,
    delay: D,
    /// Component id per cell, indexed `row * cols + col`.
    cells: Vec<Option<String>>,
    debouncer: Debouncer,
    settle_us: u32,
    active_high: bool,
    pin_error_logged: bool,
}

impl<R, C, D> Matrix<R, C, D>
where
    R: OutputPin,
    C: InputPin,
    D: DelayNs,
{
    pub fn new(
        rows: Vec<R>,
        cols: Vec<C>,
        delay: D,
        cells: &[MatrixCell],
        settings: &Settings,
    ) -> Self {
        let width = cols.len();
        let mut map = vec![None; rows.len() * width];
        for cell in cells {
            let (row, col) = (cell.position.row, cell.position.col);
            if row >= rows.len() || col >= width {
                warn!(
                    component = %cell.component_id,
                    row, col, "matrix cell outside the wired grid, ignored"
                );
                continue;
            }
            map[row * width + col] = Some(cell.component_id.clone());
        }

        let mut matrix = Self {
            debouncer: Debouncer::new(map.len(), settings.debounce_ms),
            rows,
            cols,
            delay,
            cells: map,
            settle_us: settings.settle_us,
            active_high: settings.active_high,
            pin_error_logged: false,
        };
        for row in 0..matrix.rows.len() {
            matrix.drive(row, false);
        }
        debug!(
            rows = matrix.rows.len(),
            cols = width,
            mapped = matrix.cells.iter().filter(|c| c.is_some()).count(),
            "matrix ready"
        );
        matrix
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    fn pin_error(&mut self, what: &str, kind: embedded_hal::digital::ErrorKind) {
        if !self.pin_error_logged {
            warn!(?kind, "matrix {} failed, reading keys as up", what);
            self.pin_error_logged = true;
        }
    }

    fn drive(&mut self, row: usize, active: bool) {
        let level_high = active == self.active_high;
        let result = if level_high {
            self.rows[row].set_high()
        } else {
            self.rows[row].set_low()
        };
        if let Err(e) = result {
            self.pin_error("row drive", e.kind());
        }
    }

    fn read(&mut self, col: usize) -> bool {
        let result = if self.active_high {
            self.cols[col].is_high()
        } else {
            self.cols[col].is_low()
        };
        match result {
            Ok(down) => down,
            Err(e) => {
                self.pin_error("column read", e.kind());
                false
            }
        }
    }

    /// Scan every row once and return the debounced transitions.
    pub fn scan(&mut self, now: Millis) -> Vec<InputEvent> {
        let width = self.cols.len();
        let mut events = Vec::new();

        for row in 0..self.rows.len() {
            self.drive(row, true);
            self.delay.delay_us(self.settle_us);

            for col in 0..width {
                let down = self.read(col);
                let idx = row * width + col;
                let Some(id) = self.cells[idx].as_ref() else {
                    continue;
                };
                if let Some(transition) = self.debouncer.update(idx, down, now) {
                    let action = match transition {
                        Transition::Pressed => InputAction::Press,
                        Transition::Released => InputAction::Release,
                    };
                    events.push(InputEvent::new(id.clone(), action, now));
                }
            }

            self.drive(row, false);
        }

        events
    }
}

impl<R, C, D> InputSource for Matrix<R, C, D>
where
    R: OutputPin + Send,
    C: InputPin + Send,
    D: DelayNs + Send,
{
    fn poll(&mut self, now: Millis) -> Vec<InputEvent> {
        self.scan(now)
    }
}
