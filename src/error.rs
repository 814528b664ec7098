use std::path::PathBuf;

use crate::sink::OutputKind;

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation requires {expected} output, recorder is configured for {actual}")]
    OutputKindMismatch {
        expected: OutputKind,
        actual: OutputKind,
    },

    #[error("no frames have been cached")]
    EmptyCache,

    #[error("intermediate file {0} does not exist")]
    MissingIntermediate(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl RecorderError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }
}
