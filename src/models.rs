use serde::{Serialize, Deserialize};

pub type Dimension = f64;

/// Musician kind. Attendee tastes are indexed by it.
#[derive(Clone, Copy, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Instrument(pub u32);

impl Instrument {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct MusicianId(pub usize);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
  #[serde(flatten)]
  pub position: Position,
  pub tastes: Vec<f64>
}

impl Attendee {
  pub fn taste(&self, instrument: Instrument) -> Option<f64> {
    self.tastes.get(instrument.index()).copied()
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pillar {
  pub center: [Dimension; 2],
  pub radius: Dimension
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpec {
  pub room_height: Dimension,
  pub room_width: Dimension,
  pub stage_height: Dimension,
  pub stage_width: Dimension,
  pub stage_bottom_left: [Dimension; 2],
  pub musicians: Vec<Instrument>,
  pub attendees: Vec<Attendee>,
  #[serde(default)]
  pub pillars: Vec<Pillar>
}

impl ProblemSpec {
  /// Number of distinct kinds among the musicians.
  pub fn distinct_instruments(&self) -> usize {
    let mut kinds = self.musicians.clone();
    kinds.sort_unstable();
    kinds.dedup();
    kinds.len()
  }

  pub fn stage_contains(&self, position: Position) -> bool {
    let offset = position - Position::from(self.stage_bottom_left);
    (0.0..=self.stage_width).contains(&offset.x)
      && (0.0..=self.stage_height).contains(&offset.y)
  }

  /// Musicians whose placement lies outside the stage rectangle.
  pub fn off_stage(&self, placements: &[Position]) -> Vec<MusicianId> {
    placements.iter()
      .enumerate()
      .filter(|(_, p)| !self.stage_contains(**p))
      .map(|(idx, _)| MusicianId(idx))
      .collect()
  }
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Position {
  pub x: Dimension,
  pub y: Dimension,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Solution {
  pub placements: Vec<Position>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub volumes: Option<Vec<f64>>
}

#[cfg(test)]
mod tests {
  use super::*;

  const PROBLEM_JSON: &str = include_str!("problems/example.json");

  #[test]
  fn parse_problem() {
    let problem: ProblemSpec = serde_json::from_str(PROBLEM_JSON).unwrap();

    assert_eq!(problem.room_width, 2000.0);
    assert_eq!(problem.room_height, 5000.0);
    assert_eq!(problem.stage_width, 1000.0);
    assert_eq!(problem.attendees.len(), 3);
    assert_eq!(problem.musicians, vec![Instrument(0), Instrument(1), Instrument(0)]);
    assert_eq!(problem.attendees[1].taste(Instrument(1)), Some(-1000.0));
    assert_eq!(problem.pillars.len(), 1);
    assert_eq!(problem.distinct_instruments(), 2);
  }

  #[test]
  fn pillars_default_to_empty() {
    let json = r#"{
      "room_width": 10, "room_height": 10,
      "stage_width": 5, "stage_height": 5, "stage_bottom_left": [0, 0],
      "musicians": [0], "attendees": []
    }"#;
    let problem: ProblemSpec = serde_json::from_str(json).unwrap();
    assert!(problem.pillars.is_empty());
  }

  #[test]
  fn solution_volumes_are_optional() {
    let solution: Solution = serde_json::from_str(r#"{"placements":[{"x":1,"y":2}]}"#).unwrap();
    assert_eq!(solution.volumes, None);
    assert_eq!(serde_json::to_string(&solution).unwrap(), r#"{"placements":[{"x":1.0,"y":2.0}]}"#);

    let solution: Solution = serde_json::from_str(r#"{"placements":[],"volumes":[10.0]}"#).unwrap();
    assert_eq!(solution.volumes, Some(vec![10.0]));
  }

  #[test]
  fn off_stage_reports_musicians_outside_the_rectangle() {
    let problem: ProblemSpec = serde_json::from_str(PROBLEM_JSON).unwrap();
    let placements = vec![
      Position::new(590.0, 210.0),
      Position::new(1600.0, 210.0),
      Position::new(500.0, 0.0),
      Position::new(1500.0, 300.0),
    ];

    assert_eq!(problem.off_stage(&placements), vec![MusicianId(1), MusicianId(2)]);
  }
}
