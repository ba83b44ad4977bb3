use tracing::{info, instrument, warn};

use crate::codec::{decode_response, encode_request};
use crate::config::JudgeConfig;
use crate::error::Result;
use crate::models::{ProblemSpec, Solution};
use crate::scoring::{score_parallel, ScoringMode};
use crate::solver::SolverProcess;

/// Outcome of running the solver on a problem and rescoring its answer.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
  pub mode: ScoringMode,
  /// What the solver claims.
  pub reported: i64,
  /// What the scoring engine computes for the returned placement.
  pub recomputed: i64,
  pub solution: Solution,
}

impl Verdict {
  pub fn agrees(&self) -> bool {
    self.reported == self.recomputed
  }

  /// Whether the solution should replace a stored one scoring `previous`:
  /// never when negative, otherwise only by at least `min_improvement`.
  pub fn improves_on(&self, previous: Option<i64>, min_improvement: i64) -> bool {
    self.recomputed >= 0
      && previous.map_or(true, |old| self.recomputed.saturating_sub(old) >= min_improvement)
  }
}

#[instrument(skip_all, fields(mode = %mode))]
pub fn judge(
  problem: &ProblemSpec,
  config: &JudgeConfig,
  mode: ScoringMode,
  time_limit: Option<u32>,
) -> Result<Verdict> {
  let request = encode_request(problem, Some(mode), time_limit)?;
  let response = decode_response(&SolverProcess::from_config(config).run(&request)?)?;

  let off_stage = problem.off_stage(&response.placements);
  if !off_stage.is_empty() {
    warn!(count = off_stage.len(), first = ?off_stage[0], "solver placed musicians off stage");
  }

  let recomputed = score_parallel(
    problem,
    &response.placements,
    response.volumes.as_deref(),
    mode,
    config.threads,
  )?;

  let verdict = Verdict {
    mode,
    reported: response.score,
    recomputed,
    solution: response.into_solution(),
  };

  if verdict.agrees() {
    info!(score = verdict.recomputed, "solver score verified");
  } else {
    warn!(reported = verdict.reported, recomputed = verdict.recomputed, "solver reported a different score");
  }

  Ok(verdict)
}

#[cfg(all(test, unix))]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::codec::encode_response;
  use crate::error::JudgeError;
  use crate::models::{Attendee, Instrument, Position};

  fn problem() -> ProblemSpec {
    ProblemSpec {
      room_height: 100.0,
      room_width: 100.0,
      stage_height: 20.0,
      stage_width: 20.0,
      stage_bottom_left: [0.0, 0.0],
      musicians: vec![Instrument(0)],
      attendees: vec![Attendee { position: Position::new(0.0, 10.0), tastes: vec![500.0] }],
      pillars: vec![],
    }
  }

  /// Config for a shell solver that swallows its input and prints `response`.
  fn canned_solver(response: &[u8]) -> JudgeConfig {
    let escaped: String = response.iter().map(|b| format!("\\{b:03o}")).collect();
    JudgeConfig {
      solver: "sh".into(),
      solver_args: vec!["-c".into(), format!("cat > /dev/null; printf '{escaped}'")],
      solver_timeout: Duration::from_secs(10),
      threads: 2,
      ..JudgeConfig::default()
    }
  }

  #[test]
  fn verifies_the_solver_score() {
    let response = encode_response(5_000_000, &[Position::new(0.0, 0.0)], None).unwrap();

    let verdict = judge(&problem(), &canned_solver(&response), ScoringMode::Lite, Some(1)).unwrap();

    assert!(verdict.agrees());
    assert_eq!(verdict.recomputed, 5_000_000);
    assert_eq!(verdict.solution, Solution { placements: vec![Position::new(0.0, 0.0)], volumes: None });
  }

  #[test]
  fn reports_disagreement_without_failing() {
    let response = encode_response(1, &[Position::new(0.0, 0.0)], Some(&[10.0])).unwrap();

    let verdict = judge(&problem(), &canned_solver(&response), ScoringMode::Full, None).unwrap();

    assert!(!verdict.agrees());
    assert_eq!(verdict.reported, 1);
    assert_eq!(verdict.recomputed, 50_000_000);
  }

  #[test]
  fn only_clear_improvements_are_worth_keeping() {
    let verdict = |recomputed| Verdict {
      mode: ScoringMode::Lite,
      reported: recomputed,
      recomputed,
      solution: Solution { placements: vec![], volumes: None },
    };

    assert!(verdict(0).improves_on(None, 1_000_000));
    assert!(!verdict(-1).improves_on(None, 1_000_000));
    assert!(verdict(3_000_000).improves_on(Some(2_000_000), 1_000_000));
    assert!(!verdict(2_999_999).improves_on(Some(2_000_000), 1_000_000));
    assert!(verdict(5).improves_on(Some(i64::MIN), 1_000_000));
  }

  #[test]
  fn short_solver_output_is_rejected() {
    let response = encode_response(5, &[Position::new(0.0, 0.0)], None).unwrap();

    let err = judge(&problem(), &canned_solver(&response[..10]), ScoringMode::Lite, None).unwrap_err();

    assert!(matches!(err, JudgeError::TruncatedBuffer { .. }));
  }

  #[test]
  fn wrong_placement_count_is_a_shape_mismatch() {
    let response = encode_response(0, &[Position::new(0.0, 0.0), Position::new(5.0, 5.0)], None).unwrap();

    let err = judge(&problem(), &canned_solver(&response), ScoringMode::Lite, None).unwrap_err();

    assert!(matches!(err, JudgeError::ShapeMismatch(_)));
  }
}
