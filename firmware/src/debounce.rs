//! Per-cell debounce logic.
//!
//! A cell's debounced state may only change once `window_ms` has passed
//! since its previous accepted transition. Reads inside the window are
//! ignored, which absorbs contact bounce and short electrical glitches.

use crate::clock::Millis;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Pressed,
    Released,
}

#[derive(Clone, Copy, Debug, Default)]
struct CellState {
    down: bool,
    /// `None` until the first accepted transition.
    last_transition: Option<Millis>,
}

pub struct Debouncer {
    cells: Vec<CellState>,
    window_ms: Millis,
}

impl Debouncer {
    pub fn new(cells: usize, window_ms: Millis) -> Self {
        Self {
            cells: vec![CellState::default(); cells],
            window_ms,
        }
    }

    /// Feed one raw reading for `cell`. Returns the transition to emit, if any.
    pub fn update(&mut self, cell: usize, down: bool, now: Millis) -> Option<Transition> {
        let state = self.cells.get_mut(cell)?;
        if down == state.down {
            return None;
        }
        if let Some(last) = state.last_transition {
            if now.saturating_sub(last) < self.window_ms {
                return None;
            }
        }

        state.down = down;
        state.last_transition = Some(now);
        Some(if down {
            Transition::Pressed
        } else {
            Transition::Released
        })
    }

    #[cfg(test)]
    fn is_down(&self, cell: usize) -> bool {
        self.cells.get(cell).is_some_and(|c| c.down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_press_is_immediate() {
        let mut d = Debouncer::new(1, 50);
        assert_eq!(d.update(0, true, 3), Some(Transition::Pressed));
        assert!(d.is_down(0));
    }

    #[test]
    fn bounce_inside_window_is_absorbed() {
        let mut d = Debouncer::new(1, 50);
        assert_eq!(d.update(0, true, 100), Some(Transition::Pressed));
        assert_eq!(d.update(0, false, 110), None);
        assert_eq!(d.update(0, true, 120), None);
        assert_eq!(d.update(0, false, 149), None);
        assert_eq!(d.update(0, false, 150), Some(Transition::Released));
        assert!(!d.is_down(0));
    }

    #[test]
    fn stuck_key_emits_once() {
        let mut d = Debouncer::new(2, 50);
        let emitted: Vec<_> = (0..20)
            .filter_map(|t| d.update(1, true, t * 10))
            .collect();
        assert_eq!(emitted, vec![Transition::Pressed]);
        assert!(!d.is_down(0));
    }

    #[test]
    fn transitions_respect_window() {
        let mut d = Debouncer::new(1, 50);
        let mut last: Option<Millis> = None;
        let mut down = false;
        for t in (0..1000).step_by(7) {
            down = !down;
            if d.update(0, down, t).is_some() {
                if let Some(prev) = last {
                    assert!(t - prev >= 50);
                }
                last = Some(t);
            }
        }
        assert!(last.is_some());
    }

    #[test]
    fn out_of_range_cell_is_ignored() {
        let mut d = Debouncer::new(1, 50);
        assert_eq!(d.update(5, true, 0), None);
        assert!(!d.is_down(5));
    }
}
