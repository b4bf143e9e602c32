//! Error kinds surfaced by the core.
//!
//! Everything on the input path is recovered locally; these values exist so
//! the recovery sites can log and count them consistently.

use std::path::PathBuf;

use thiserror::Error;

use crate::hid::HidError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HID transport not ready")]
    TransientTransportNotReady,

    #[error("rollover exceeded, keycode {0:#04x} dropped")]
    RolloverExceeded(u8),

    #[error("no binding for component {0}")]
    UnknownComponent(String),

    #[error("unknown macro {0}")]
    UnknownMacro(String),

    #[error("macro {0} is already executing")]
    RecursiveMacro(String),

    #[error("macro stack depth would exceed {0}")]
    MacroStackOverflow(usize),

    #[error("sensor {0} unresponsive")]
    SensorUnresponsive(String),

    #[error("layer {layer} component {component} targets unknown layer {target}")]
    MalformedBinding {
        layer: String,
        component: String,
        target: String,
    },

    #[error("unknown layer {0}")]
    UnknownLayer(String),

    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I2C bus error: {0}")]
    I2c(String),

    #[error(transparent)]
    Config(#[from] macropad_keymap::ConfigError),

    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}

impl From<HidError> for Error {
    fn from(_: HidError) -> Self {
        Error::TransientTransportNotReady
    }
}

pub type Result<T> = std::result::Result<T, Error>;
