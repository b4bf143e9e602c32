use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or saving configuration documents.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid hex value {0:?}")]
    InvalidHex(String),

    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error("duplicate component id {0}")]
    DuplicateComponent(String),

    #[error("invalid component {id}: {reason}")]
    InvalidComponent { id: String, reason: String },

    #[error("macro {0} not found")]
    MacroNotFound(String),

    #[error("macro id {0:?} cannot be used as a file name")]
    InvalidMacroId(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the file a parse error came from.
    pub(crate) fn at(self, path: impl Into<PathBuf>) -> Self {
        match self {
            ConfigError::Parse(source) => ConfigError::Json {
                path: path.into(),
                source,
            },
            other => other,
        }
    }
}
