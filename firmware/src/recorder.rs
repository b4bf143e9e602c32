//! A transport that records reports instead of sending them. Used by the
//! host simulator and by tests.

use std::fmt;
use std::sync::Arc;

use macropad_keymap::{KeyboardReport, MouseReport};
use parking_lot::Mutex;

use crate::clock::{Clock, Millis};
use crate::hid::{HidError, HidTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentReport {
    Keyboard(KeyboardReport),
    Consumer(u16),
    Mouse(MouseReport),
}

impl fmt::Display for SentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentReport::Keyboard(r) => write!(f, "keyboard {}", r),
            SentReport::Consumer(u) => write!(f, "consumer {:#06x}", u),
            SentReport::Mouse(m) => write!(f, "mouse {}", m),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recorded {
    pub at: Millis,
    pub report: SentReport,
}

struct Inner {
    sent: Vec<Recorded>,
    ready: bool,
    mounted: bool,
}

/// Cloneable handle; every clone sees the same recording.
#[derive(Clone)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl RecordingTransport {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sent: Vec::new(),
                ready: true,
                mounted: true,
            })),
            clock,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.lock().ready = ready;
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.inner.lock().mounted = mounted;
    }

    pub fn sent(&self) -> Vec<Recorded> {
        self.inner.lock().sent.clone()
    }

    /// Drain the recording.
    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    pub fn keyboard_reports(&self) -> Vec<KeyboardReport> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|r| match r.report {
                SentReport::Keyboard(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    pub fn consumer_usages(&self) -> Vec<u16> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|r| match r.report {
                SentReport::Consumer(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    fn record(&self, report: SentReport) -> Result<(), HidError> {
        let mut inner = self.inner.lock();
        if !inner.mounted {
            return Err(HidError::NotMounted);
        }
        if !inner.ready {
            return Err(HidError::NotReady);
        }
        inner.sent.push(Recorded {
            at: self.clock.now_ms(),
            report,
        });
        Ok(())
    }
}

impl HidTransport for RecordingTransport {
    fn is_mounted(&self) -> bool {
        self.inner.lock().mounted
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    fn send_keyboard(&mut self, report: &KeyboardReport) -> Result<(), HidError> {
        self.record(SentReport::Keyboard(*report))
    }

    fn send_consumer(&mut self, usage: u16) -> Result<(), HidError> {
        self.record(SentReport::Consumer(usage))
    }

    fn send_mouse(&mut self, report: &MouseReport) -> Result<(), HidError> {
        self.record(SentReport::Mouse(*report))
    }
}
