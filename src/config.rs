use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::DEFAULT_INLINE_LIMIT;
use crate::scoring::ScoringMode;

/// Problem id above which the contest switched to Full scoring.
pub const DEFAULT_FULL_THRESHOLD: u32 = 55;

/// Decides the scoring mode for a problem. The engine itself never looks at
/// problem ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoringPolicy {
  pub full_threshold: u32,
}

impl Default for ScoringPolicy {
  fn default() -> Self {
    ScoringPolicy { full_threshold: DEFAULT_FULL_THRESHOLD }
  }
}

impl ScoringPolicy {
  pub fn mode_for(&self, problem_id: Option<u32>) -> ScoringMode {
    match problem_id {
      Some(id) if id > self.full_threshold => ScoringMode::Full,
      _ => ScoringMode::Lite,
    }
  }

  /// An explicit mode wins over the id based policy.
  pub fn resolve(&self, explicit: Option<ScoringMode>, problem_id: Option<u32>) -> ScoringMode {
    explicit.unwrap_or_else(|| self.mode_for(problem_id))
  }
}

/// Everything the harness needs to judge a problem. Owned by the caller and
/// passed down, there is no process wide configuration.
#[derive(Clone, Debug)]
pub struct JudgeConfig {
  pub policy: ScoringPolicy,
  pub solver: PathBuf,
  pub solver_args: Vec<String>,
  pub solver_timeout: Duration,
  pub inline_limit: usize,
  pub threads: usize,
}

impl Default for JudgeConfig {
  fn default() -> Self {
    JudgeConfig {
      policy: ScoringPolicy::default(),
      solver: PathBuf::from("./solve"),
      solver_args: Vec::new(),
      solver_timeout: Duration::from_secs(600),
      inline_limit: DEFAULT_INLINE_LIMIT,
      threads: default_threads(),
    }
  }
}

pub fn default_threads() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Extracts the id from names like `problem-42.json` or `42.json`.
pub fn problem_id_from_path(path: &Path) -> Option<u32> {
  let name = path.file_name()?.to_str()?;
  let stem = name.strip_suffix(".json")?;
  let digits_start = stem
    .rfind(|c: char| !c.is_ascii_digit())
    .map_or(0, |idx| idx + 1);
  stem[digits_start..].parse().ok()
}
