use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::models::MusicianId;

pub type Result<T> = std::result::Result<T, JudgeError>;

#[derive(Debug, Error)]
pub enum JudgeError {
  /// Placement, volumes or taste vectors disagree with the problem's shape.
  #[error("shape mismatch: {0}")]
  ShapeMismatch(String),

  /// A source and a listener (or two same-kind musicians) share coordinates.
  #[error("degenerate geometry: musician {musician:?} coincides with {other}")]
  DegenerateGeometry {
    musician: MusicianId,
    other: String,
  },

  /// A value left the range of the integer type carrying it.
  #[error("numeric overflow while computing {0}")]
  NumericOverflow(String),

  #[error("truncated buffer: {field} needs {needed} bytes, {available} available")]
  TruncatedBuffer {
    field: &'static str,
    needed: usize,
    available: usize,
  },

  #[error("solver did not finish within {0:?}")]
  SolverTimeout(Duration),

  #[error("solver exited unsuccessfully ({0})")]
  SolverProcessFailure(ExitStatus),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}
