use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Processing stages for one raw capture, in strict order. Error markers
/// written next to a failed capture name the stage that broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Captured,
    Rendering,
    Segmenting,
    Identified,
    Written,
    Indexed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Captured => "captured",
            Stage::Rendering => "rendering",
            Stage::Segmenting => "segmenting",
            Stage::Identified => "identified",
            Stage::Written => "written",
            Stage::Indexed => "indexed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified pipeline failures. Decode errors are fatal for the capture
/// that produced them; write and index failures are retryable because the
/// raw capture is retained and reprocessing is idempotent.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("capture does not decode as terminal output: {0}")]
    Decode(String),

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("session index at {path} is corrupt")]
    IndexCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Decode(_) => Stage::Rendering,
            StageError::Write { .. } => Stage::Written,
            StageError::IndexCorrupt { .. } => Stage::Indexed,
        }
    }

    /// Whether retrying the whole capture can succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StageError::Decode(_))
    }
}
