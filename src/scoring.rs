//! Score computation for a placement of musicians on the stage.
//!
//! Every attendee hears every musician with an impact of
//! `ceil(1_000_000 * taste / distance²)` unless another musician stands inside
//! the 5 unit sound corridor between them, closer to the attendee than the
//! source is. In [`ScoringMode::Full`] each musician is additionally boosted by
//! the reciprocal distances to musicians of the same kind.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use multimap::MultiMap;
use num::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{JudgeError, Result};
use crate::models::{Dimension, Instrument, MusicianId, Position, ProblemSpec};

pub const AUDIENCE_SCALE: f64 = 1_000_000.0;

/// Perpendicular distance under which a musician blocks the sound line.
pub const BLOCKING_RADIUS: Dimension = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
  Lite,
  Full,
}

impl fmt::Display for ScoringMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ScoringMode::Lite => f.write_str("lite"),
      ScoringMode::Full => f.write_str("full"),
    }
  }
}

impl FromStr for ScoringMode {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "lite" | "1" => Ok(ScoringMode::Lite),
      "full" | "2" => Ok(ScoringMode::Full),
      other => Err(format!("unknown scoring mode '{other}', expected lite or full")),
    }
  }
}

/// Scores `placements` (and optional `volumes`, uniform 1 when absent).
#[instrument(level = "debug", skip_all, fields(mode = %mode))]
pub fn score(
  problem: &ProblemSpec,
  placements: &[Position],
  volumes: Option<&[f64]>,
  mode: ScoringMode,
) -> Result<i64> {
  let scene = Scene::new(problem, placements, volumes, mode)?;
  let total = settle(scene.values(0..placements.len())?)?;
  debug!(total, "placement scored");
  Ok(total)
}

/// Same result as [`score`], musicians split over `threads` scoped threads.
#[instrument(level = "debug", skip_all, fields(mode = %mode, threads = threads))]
pub fn score_parallel(
  problem: &ProblemSpec,
  placements: &[Position],
  volumes: Option<&[f64]>,
  mode: ScoringMode,
  threads: usize,
) -> Result<i64> {
  let scene = Scene::new(problem, placements, volumes, mode)?;
  let count = placements.len();
  let threads = threads.clamp(1, count.max(1));

  if threads == 1 {
    return settle(scene.values(0..count)?);
  }

  let chunk = count.div_ceil(threads);
  let scene = &scene;

  let partials: Vec<Result<Vec<MusicianValue>>> = crossbeam::scope(|s| {
    let handles: Vec<_> = (0..count).step_by(chunk)
      .map(|start| s.spawn(move |_| scene.values(start..(start + chunk).min(count))))
      .collect();

    handles.into_iter()
      .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
      .collect()
  }).unwrap_or_else(|panic| std::panic::resume_unwind(panic));

  // chunks are settled in musician order so the real valued sum matches `score`
  let mut values = Vec::with_capacity(count);
  for part in partials {
    values.extend(part?);
  }
  let total = settle(values)?;
  debug!(total, "placement scored");
  Ok(total)
}

/// A musician's final value. Lite mode with a fractional volume is left
/// unrounded and only the total is truncated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MusicianValue {
  Exact(i64),
  Real(f64),
}

/// Final value of a single musician, including volume and closeness bonus.
pub fn musician_value(
  problem: &ProblemSpec,
  placements: &[Position],
  volumes: Option<&[f64]>,
  mode: ScoringMode,
  musician: MusicianId,
) -> Result<MusicianValue> {
  let scene = Scene::new(problem, placements, volumes, mode)?;
  if musician.0 >= placements.len() {
    return Err(JudgeError::ShapeMismatch(format!(
      "musician {} out of range for {} placements", musician.0, placements.len()
    )));
  }
  scene.musician_value(musician.0)
}

/// `1 + Σ 1/|p - p_z|` over the other musicians sharing `musician`'s kind.
pub fn closeness_factor(
  problem: &ProblemSpec,
  placements: &[Position],
  musician: MusicianId,
) -> Result<f64> {
  let scene = Scene::new(problem, placements, None, ScoringMode::Full)?;
  if musician.0 >= placements.len() {
    return Err(JudgeError::ShapeMismatch(format!(
      "musician {} out of range for {} placements", musician.0, placements.len()
    )));
  }
  scene.closeness(musician.0)
}

/// Whether a musician at offset `e = listener - blocker` cuts the sound line
/// `d = source - listener` (`d2 = |d|²`). Both comparisons are strict.
pub fn blocks(d: Position, d2: Dimension, e: Position) -> bool {
  let t = d.cross(e);
  t * t / d2 < BLOCKING_RADIUS * BLOCKING_RADIUS && e.norm2() < d2
}

struct Scene<'a> {
  problem: &'a ProblemSpec,
  placements: &'a [Position],
  volumes: Option<&'a [f64]>,
  mode: ScoringMode,
  bands: MultiMap<Instrument, MusicianId>,
}

impl<'a> Scene<'a> {
  fn new(
    problem: &'a ProblemSpec,
    placements: &'a [Position],
    volumes: Option<&'a [f64]>,
    mode: ScoringMode,
  ) -> Result<Self> {
    if placements.len() != problem.musicians.len() {
      return Err(JudgeError::ShapeMismatch(format!(
        "{} placements for {} musicians", placements.len(), problem.musicians.len()
      )));
    }
    if let Some(volumes) = volumes {
      if volumes.len() != placements.len() {
        return Err(JudgeError::ShapeMismatch(format!(
          "{} volumes for {} placements", volumes.len(), placements.len()
        )));
      }
    }
    if let Some(widest) = problem.musicians.iter().max() {
      if let Some((idx, attendee)) = problem.attendees.iter()
        .enumerate()
        .find(|(_, a)| a.tastes.len() <= widest.index()) {
        return Err(JudgeError::ShapeMismatch(format!(
          "attendee {idx} has {} tastes but musicians use kind {}", attendee.tastes.len(), widest.0
        )));
      }
    }

    let bands = problem.musicians.iter()
      .copied()
      .enumerate()
      .map(|(idx, inst)| (inst, MusicianId(idx)))
      .collect();

    Ok(Scene { problem, placements, volumes, mode, bands })
  }

  fn values(&self, musicians: Range<usize>) -> Result<Vec<MusicianValue>> {
    musicians.map(|j| self.musician_value(j)).collect()
  }

  fn volume(&self, j: usize) -> f64 {
    self.volumes.map_or(1.0, |v| v[j])
  }

  fn musician_value(&self, j: usize) -> Result<MusicianValue> {
    let instrument = self.problem.musicians[j];
    let p = self.placements[j];
    let mut sub = 0i64;

    for attendee in &self.problem.attendees {
      let q = attendee.position;
      let d = p - q;
      let d2 = d.norm2();
      if d2 == 0.0 {
        return Err(JudgeError::DegenerateGeometry {
          musician: MusicianId(j),
          other: format!("attendee at ({}, {})", q.x, q.y),
        });
      }
      if self.occluded(j, q, d, d2) {
        continue;
      }
      let impact = (AUDIENCE_SCALE * attendee.tastes[instrument.index()] / d2).ceil();
      sub = add(sub, to_i64(impact, "attendee impact")?, "musician impact")?;
    }

    let volume = self.volume(j);
    match self.mode {
      ScoringMode::Full => {
        let qm = self.closeness(j)?;
        to_i64((sub as f64 * qm * volume).ceil(), "musician value").map(MusicianValue::Exact)
      }
      ScoringMode::Lite if volume.fract() == 0.0 => {
        let volume = to_i64(volume, "volume")?;
        sub.checked_mul(volume)
          .map(MusicianValue::Exact)
          .ok_or_else(|| JudgeError::NumericOverflow("musician value".into()))
      }
      ScoringMode::Lite => {
        let value = sub as f64 * volume;
        if !value.is_finite() {
          return Err(JudgeError::NumericOverflow("musician value".into()));
        }
        Ok(MusicianValue::Real(value))
      }
    }
  }

  fn occluded(&self, j: usize, q: Position, d: Position, d2: Dimension) -> bool {
    self.placements.iter()
      .enumerate()
      .any(|(z, &pz)| z != j && blocks(d, d2, q - pz))
  }

  fn closeness(&self, j: usize) -> Result<f64> {
    let p = self.placements[j];
    let peers = self.bands.get_vec(&self.problem.musicians[j]).map_or(&[][..], Vec::as_slice);

    peers.iter()
      .filter(|peer| peer.0 != j)
      .try_fold(1.0, |qm, peer| {
        let dist = (p - self.placements[peer.0]).norm();
        if dist == 0.0 {
          return Err(JudgeError::DegenerateGeometry {
            musician: MusicianId(j),
            other: format!("same-kind musician {}", peer.0),
          });
        }
        Ok(qm + 1.0 / dist)
      })
  }
}

/// Sums musician values in order. Exact values add as integers, real values
/// add as floats, and the combined total is truncated toward zero once.
fn settle(values: impl IntoIterator<Item = MusicianValue>) -> Result<i64> {
  let mut exact = 0i64;
  let mut real = 0.0;

  for value in values {
    match value {
      MusicianValue::Exact(n) => exact = add(exact, n, "total score")?,
      MusicianValue::Real(x) => real += x,
    }
  }

  let whole = real.trunc();
  let fraction = real - whole;
  let total = add(exact, to_i64(whole, "total score")?, "total score")?;
  Ok(match total {
    t if t > 0 && fraction < 0.0 => t - 1,
    t if t < 0 && fraction > 0.0 => t + 1,
    t => t,
  })
}

fn to_i64(value: f64, what: &str) -> Result<i64> {
  value.to_i64().ok_or_else(|| JudgeError::NumericOverflow(what.to_string()))
}

fn add(acc: i64, value: i64, what: &str) -> Result<i64> {
  acc.checked_add(value).ok_or_else(|| JudgeError::NumericOverflow(what.to_string()))
}
