//! Binary exchange format with the external solver process.
//!
//! Everything is little-endian. A request is a header of twelve `i32`
//! followed by the musician kinds, the attendee coordinates, the taste matrix
//! and the pillars, all as `i32`. A response is the solver's own `i64` score,
//! the placements as a `u32` count of `f32` pairs and the volumes as a `u32`
//! count of `i32` (a count of zero meaning uniform volume).

use num::ToPrimitive;
use tracing::debug;

use crate::error::{JudgeError, Result};
use crate::models::{Attendee, Instrument, Pillar, Position, ProblemSpec, Solution};
use crate::scoring::ScoringMode;

pub const HEADER_LEN: usize = 12 * 4;

/// Requests at or above this size are handed over in a temporary file.
pub const DEFAULT_INLINE_LIMIT: usize = 10_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestHeader {
  pub room_width: i32,
  pub room_height: i32,
  pub stage_width: i32,
  pub stage_height: i32,
  pub stage_x: i32,
  pub stage_y: i32,
  pub instruments: i32,
  pub musicians: i32,
  pub attendees: i32,
  pub pillars: i32,
  pub scoring_mode: i32,
  pub time_limit: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
  pub header: RequestHeader,
  pub musicians: Vec<i32>,
  pub attendees: Vec<[i32; 2]>,
  /// `attendees × instruments`, row-major per attendee.
  pub tastes: Vec<i32>,
  pub pillars: Vec<[i32; 3]>,
}

impl Request {
  pub fn scoring_mode(&self) -> Option<ScoringMode> {
    mode_from_wire(self.header.scoring_mode)
  }

  pub fn time_limit(&self) -> Option<u32> {
    u32::try_from(self.header.time_limit).ok().filter(|&t| t > 0)
  }

  /// Rebuilds the problem as the solver sees it.
  pub fn to_problem(&self) -> Result<ProblemSpec> {
    let h = &self.header;
    let width = h.instruments as u32 as usize;

    let musicians = self.musicians.iter()
      .map(|&kind| u32::try_from(kind)
        .map(Instrument)
        .map_err(|_| JudgeError::ShapeMismatch(format!("negative musician kind {kind}"))))
      .collect::<Result<Vec<_>>>()?;

    let attendees = self.attendees.iter()
      .enumerate()
      .map(|(idx, [x, y])| {
        let row = self.tastes.get(idx * width..(idx + 1) * width)
          .ok_or_else(|| JudgeError::ShapeMismatch(format!("taste row {idx} missing")))?;
        Ok(Attendee {
          position: Position::new(*x as f64, *y as f64),
          tastes: row.iter().map(|&t| t as f64).collect(),
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let pillars = self.pillars.iter()
      .map(|[x, y, r]| Pillar { center: [*x as f64, *y as f64], radius: *r as f64 })
      .collect();

    Ok(ProblemSpec {
      room_height: h.room_height as f64,
      room_width: h.room_width as f64,
      stage_height: h.stage_height as f64,
      stage_width: h.stage_width as f64,
      stage_bottom_left: [h.stage_x as f64, h.stage_y as f64],
      musicians,
      attendees,
      pillars,
    })
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
  pub score: i64,
  pub placements: Vec<Position>,
  pub volumes: Option<Vec<f64>>,
}

impl Response {
  pub fn into_solution(self) -> Solution {
    Solution { placements: self.placements, volumes: self.volumes }
  }
}

pub fn mode_to_wire(mode: Option<ScoringMode>) -> i32 {
  match mode {
    None => 0,
    Some(ScoringMode::Lite) => 1,
    Some(ScoringMode::Full) => 2,
  }
}

pub fn mode_from_wire(code: i32) -> Option<ScoringMode> {
  match code {
    1 => Some(ScoringMode::Lite),
    2 => Some(ScoringMode::Full),
    _ => None,
  }
}

/// Packs `problem` for the solver. Real valued fields are truncated toward
/// zero.
pub fn encode_request(problem: &ProblemSpec, mode: Option<ScoringMode>, time_limit: Option<u32>) -> Result<Vec<u8>> {
  let instruments = problem.distinct_instruments();
  if let Some((idx, attendee)) = problem.attendees.iter()
    .enumerate()
    .find(|(_, a)| a.tastes.len() != instruments) {
    return Err(JudgeError::ShapeMismatch(format!(
      "attendee {idx} has {} tastes for {instruments} distinct kinds", attendee.tastes.len()
    )));
  }

  let body = problem.musicians.len() + problem.attendees.len() * (2 + instruments) + problem.pillars.len() * 3;
  let mut packer = Packer::with_capacity(HEADER_LEN + body * 4);

  packer.real(problem.room_width, "room width")?;
  packer.real(problem.room_height, "room height")?;
  packer.real(problem.stage_width, "stage width")?;
  packer.real(problem.stage_height, "stage height")?;
  packer.real(problem.stage_bottom_left[0], "stage x")?;
  packer.real(problem.stage_bottom_left[1], "stage y")?;
  packer.count(instruments, "instrument count")?;
  packer.count(problem.musicians.len(), "musician count")?;
  packer.count(problem.attendees.len(), "attendee count")?;
  packer.count(problem.pillars.len(), "pillar count")?;
  packer.i32(mode_to_wire(mode));
  packer.count(time_limit.unwrap_or(0) as usize, "time limit")?;

  for kind in &problem.musicians {
    packer.count(kind.index(), "musician kind")?;
  }
  for attendee in &problem.attendees {
    packer.real(attendee.position.x, "attendee x")?;
    packer.real(attendee.position.y, "attendee y")?;
  }
  for attendee in &problem.attendees {
    for &taste in &attendee.tastes {
      packer.real(taste, "taste")?;
    }
  }
  for pillar in &problem.pillars {
    packer.real(pillar.center[0], "pillar x")?;
    packer.real(pillar.center[1], "pillar y")?;
    packer.real(pillar.radius, "pillar radius")?;
  }

  debug!(bytes = packer.buf.len(), instruments, "request encoded");
  Ok(packer.buf)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request> {
  let mut unpacker = Unpacker::new(bytes);

  let header = RequestHeader {
    room_width: unpacker.i32("room width")?,
    room_height: unpacker.i32("room height")?,
    stage_width: unpacker.i32("stage width")?,
    stage_height: unpacker.i32("stage height")?,
    stage_x: unpacker.i32("stage x")?,
    stage_y: unpacker.i32("stage y")?,
    instruments: unpacker.i32("instrument count")?,
    musicians: unpacker.i32("musician count")?,
    attendees: unpacker.i32("attendee count")?,
    pillars: unpacker.i32("pillar count")?,
    scoring_mode: unpacker.i32("scoring mode")?,
    time_limit: unpacker.i32("time limit")?,
  };

  // counts are unsigned on the solver side
  let musicians = header.musicians as u32 as usize;
  let attendees = header.attendees as u32 as usize;
  let instruments = header.instruments as u32 as usize;
  let pillars = header.pillars as u32 as usize;

  let musicians = unpacker.i32s(musicians, 1, "musicians")?;
  let attendees = unpacker.i32s(attendees, 2, "attendees")?
    .chunks_exact(2)
    .map(|c| [c[0], c[1]])
    .collect();
  let tastes = unpacker.i32s(header.attendees as u32 as usize, instruments, "tastes")?;
  let pillars = unpacker.i32s(pillars, 3, "pillars")?
    .chunks_exact(3)
    .map(|c| [c[0], c[1], c[2]])
    .collect();

  unpacker.finish("request");
  Ok(Request { header, musicians, attendees, tastes, pillars })
}

pub fn encode_response(score: i64, placements: &[Position], volumes: Option<&[f64]>) -> Result<Vec<u8>> {
  let volumes = volumes.unwrap_or(&[]);
  let mut packer = Packer::with_capacity(8 + 4 + placements.len() * 8 + 4 + volumes.len() * 4);

  packer.buf.extend_from_slice(&score.to_le_bytes());
  packer.u32(placements.len(), "placement count")?;
  for p in placements {
    packer.buf.extend_from_slice(&(p.x as f32).to_le_bytes());
    packer.buf.extend_from_slice(&(p.y as f32).to_le_bytes());
  }
  packer.u32(volumes.len(), "volume count")?;
  for &volume in volumes {
    packer.real(volume, "volume")?;
  }

  Ok(packer.buf)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
  let mut unpacker = Unpacker::new(bytes);

  let score = i64::from_le_bytes(unpacker.array("score")?);

  let count = unpacker.u32("placement count")? as usize;
  let placements = unpacker.f32s(count, 2, "placements")?
    .chunks_exact(2)
    .map(|c| Position::new(c[0] as f64, c[1] as f64))
    .collect::<Vec<_>>();

  let count = unpacker.u32("volume count")? as usize;
  let volumes = unpacker.i32s(count, 1, "volumes")?;
  let volumes = (!volumes.is_empty()).then(|| volumes.into_iter().map(f64::from).collect());

  unpacker.finish("response");
  debug!(score, musicians = placements.len(), "response decoded");
  Ok(Response { score, placements, volumes })
}

/// Length-prefixed in-band frame: `u32` payload length, then the payload.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
  let len = u32::try_from(payload.len())
    .map_err(|_| JudgeError::NumericOverflow("frame length".into()))?;
  let mut framed = Vec::with_capacity(4 + payload.len());
  framed.extend_from_slice(&len.to_le_bytes());
  framed.extend_from_slice(payload);
  Ok(framed)
}

pub fn unframe(bytes: &[u8]) -> Result<&[u8]> {
  let mut unpacker = Unpacker::new(bytes);
  let len = unpacker.u32("frame length")? as usize;
  unpacker.take(len, "frame payload")
}

/// How a request reaches the solver process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
  /// Framed on standard input.
  InBand,
  /// Written to a temporary file whose path is passed as an argument.
  TempFile,
}

impl Dispatch {
  pub fn choose(request_len: usize, inline_limit: usize) -> Dispatch {
    if request_len < inline_limit {
      Dispatch::InBand
    } else {
      Dispatch::TempFile
    }
  }
}

struct Packer {
  buf: Vec<u8>,
}

impl Packer {
  fn with_capacity(capacity: usize) -> Self {
    Packer { buf: Vec::with_capacity(capacity) }
  }

  fn i32(&mut self, value: i32) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  fn real(&mut self, value: f64, field: &str) -> Result<()> {
    let value = value.to_i32()
      .ok_or_else(|| JudgeError::NumericOverflow(format!("{field} ({value}) as i32")))?;
    self.i32(value);
    Ok(())
  }

  fn count(&mut self, value: usize, field: &str) -> Result<()> {
    let value = i32::try_from(value)
      .map_err(|_| JudgeError::NumericOverflow(format!("{field} ({value}) as i32")))?;
    self.i32(value);
    Ok(())
  }

  fn u32(&mut self, value: usize, field: &str) -> Result<()> {
    let value = u32::try_from(value)
      .map_err(|_| JudgeError::NumericOverflow(format!("{field} ({value}) as u32")))?;
    self.buf.extend_from_slice(&value.to_le_bytes());
    Ok(())
  }
}

struct Unpacker<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Unpacker<'a> {
  fn new(buf: &'a [u8]) -> Self {
    Unpacker { buf, pos: 0 }
  }

  fn remaining(&self) -> usize {
    self.buf.len() - self.pos
  }

  fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
    if len > self.remaining() {
      return Err(JudgeError::TruncatedBuffer { field, needed: len, available: self.remaining() });
    }
    let slice = &self.buf[self.pos..self.pos + len];
    self.pos += len;
    Ok(slice)
  }

  fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(self.take(N, field)?);
    Ok(out)
  }

  fn i32(&mut self, field: &'static str) -> Result<i32> {
    Ok(i32::from_le_bytes(self.array(field)?))
  }

  fn u32(&mut self, field: &'static str) -> Result<u32> {
    Ok(u32::from_le_bytes(self.array(field)?))
  }

  /// Byte length of `rows × width` four byte values, checked before any
  /// allocation happens.
  fn span(&self, rows: usize, width: usize, field: &'static str) -> Result<usize> {
    rows.checked_mul(width)
      .and_then(|n| n.checked_mul(4))
      .ok_or(JudgeError::TruncatedBuffer { field, needed: usize::MAX, available: self.remaining() })
  }

  fn i32s(&mut self, rows: usize, width: usize, field: &'static str) -> Result<Vec<i32>> {
    let len = self.span(rows, width, field)?;
    Ok(self.take(len, field)?
      .chunks_exact(4)
      .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect())
  }

  fn f32s(&mut self, rows: usize, width: usize, field: &'static str) -> Result<Vec<f32>> {
    let len = self.span(rows, width, field)?;
    Ok(self.take(len, field)?
      .chunks_exact(4)
      .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect())
  }

  fn finish(&self, what: &str) {
    if self.remaining() > 0 {
      debug!(trailing = self.remaining(), "ignoring trailing bytes after {what}");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PROBLEM_JSON: &str = include_str!("problems/example.json");

  fn example() -> ProblemSpec {
    serde_json::from_str(PROBLEM_JSON).unwrap()
  }

  fn le_i32s(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
  }

  #[test]
  fn request_layout_is_byte_exact() {
    let bytes = encode_request(&example(), Some(ScoringMode::Full), Some(30)).unwrap();

    let expected = le_i32s(&[
      2000, 5000, 1000, 200, 500, 100, 2, 3, 3, 1, 2, 30,
      0, 1, 0,
      100, 500, 200, 1000, 1100, 800,
      1000, -1000, 200, -1000, 800, 1500,
      345, 255, 4,
    ]);
    assert_eq!(bytes, expected);
  }

  #[test]
  fn decoding_a_request_recovers_every_field() {
    let problem = example();
    let bytes = encode_request(&problem, None, None).unwrap();

    let request = decode_request(&bytes).unwrap();

    assert_eq!(request.header, RequestHeader {
      room_width: 2000,
      room_height: 5000,
      stage_width: 1000,
      stage_height: 200,
      stage_x: 500,
      stage_y: 100,
      instruments: 2,
      musicians: 3,
      attendees: 3,
      pillars: 1,
      scoring_mode: 0,
      time_limit: 0,
    });
    assert_eq!(request.scoring_mode(), None);
    assert_eq!(request.time_limit(), None);
    assert_eq!(request.musicians, vec![0, 1, 0]);
    assert_eq!(request.attendees, vec![[100, 500], [200, 1000], [1100, 800]]);
    assert_eq!(request.pillars, vec![[345, 255, 4]]);
    assert_eq!(request.to_problem().unwrap(), problem);
  }

  #[test]
  fn reals_truncate_toward_zero() {
    let mut problem = example();
    problem.attendees[0].position = Position::new(12.9, -3.7);

    let request = decode_request(&encode_request(&problem, Some(ScoringMode::Lite), Some(5)).unwrap()).unwrap();

    assert_eq!(request.attendees[0], [12, -3]);
    assert_eq!(request.scoring_mode(), Some(ScoringMode::Lite));
    assert_eq!(request.time_limit(), Some(5));
  }

  #[test]
  fn taste_rows_must_match_distinct_kinds() {
    let mut problem = example();
    problem.attendees[2].tastes.push(1.0);

    assert!(matches!(encode_request(&problem, None, None), Err(JudgeError::ShapeMismatch(_))));
  }

  #[test]
  fn out_of_range_reals_are_rejected() {
    let mut problem = example();
    problem.room_width = 3.0e9;

    assert!(matches!(encode_request(&problem, None, None), Err(JudgeError::NumericOverflow(_))));
  }

  #[test]
  fn truncated_request_is_rejected() {
    let bytes = encode_request(&example(), None, None).unwrap();

    let err = decode_request(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(matches!(err, JudgeError::TruncatedBuffer { field: "pillars", needed: 12, available: 11 }));

    let err = decode_request(&bytes[..HEADER_LEN - 2]).unwrap_err();
    assert!(matches!(err, JudgeError::TruncatedBuffer { field: "time limit", .. }));
  }

  #[test]
  fn negative_counts_never_allocate() {
    let mut header = le_i32s(&[10, 10, 5, 5, 0, 0, 1, -1, 0, 0, 0, 0]);
    header.extend(le_i32s(&[0, 0, 0]));

    assert!(matches!(
      decode_request(&header),
      Err(JudgeError::TruncatedBuffer { field: "musicians", .. })
    ));
  }

  #[test]
  fn decodes_solver_output() {
    let mut bytes = 42i64.to_le_bytes().to_vec();
    bytes.extend(2u32.to_le_bytes());
    for v in [1.5f32, 2.5, -3.0, 4.25] {
      bytes.extend(v.to_le_bytes());
    }
    bytes.extend(2u32.to_le_bytes());
    bytes.extend(le_i32s(&[10, 1]));

    let response = decode_response(&bytes).unwrap();

    assert_eq!(response, Response {
      score: 42,
      placements: vec![Position::new(1.5, 2.5), Position::new(-3.0, 4.25)],
      volumes: Some(vec![10.0, 1.0]),
    });
    assert_eq!(encode_response(42, &response.placements, response.volumes.as_deref()).unwrap(), bytes);
  }

  #[test]
  fn zero_volume_count_means_uniform() {
    let bytes = encode_response(-5, &[Position::new(1.0, 1.0)], None).unwrap();
    assert_eq!(bytes.len(), 8 + 4 + 8 + 4);

    let solution = decode_response(&bytes).unwrap().into_solution();

    assert_eq!(solution.volumes, None);
    assert_eq!(solution.placements, vec![Position::new(1.0, 1.0)]);
  }

  #[test]
  fn truncated_response_is_rejected() {
    let bytes = encode_response(7, &[Position::new(1.0, 2.0)], Some(&[3.0])).unwrap();

    assert!(matches!(
      decode_response(&bytes[..4]),
      Err(JudgeError::TruncatedBuffer { field: "score", .. })
    ));
    assert!(matches!(
      decode_response(&bytes[..16]),
      Err(JudgeError::TruncatedBuffer { field: "placements", needed: 8, available: 4 })
    ));
    assert!(matches!(
      decode_response(&bytes[..20]),
      Err(JudgeError::TruncatedBuffer { field: "volume count", .. })
    ));
    assert!(matches!(
      decode_response(&bytes[..bytes.len() - 1]),
      Err(JudgeError::TruncatedBuffer { field: "volumes", .. })
    ));
  }

  #[test]
  fn oversized_placement_count_is_rejected() {
    let mut bytes = 0i64.to_le_bytes().to_vec();
    bytes.extend(u32::MAX.to_le_bytes());

    assert!(matches!(
      decode_response(&bytes),
      Err(JudgeError::TruncatedBuffer { field: "placements", available: 0, .. })
    ));
  }

  #[test]
  fn frames_carry_their_length() {
    let framed = frame(b"payload").unwrap();

    assert_eq!(&framed[..4], &7u32.to_le_bytes());
    assert_eq!(unframe(&framed).unwrap(), b"payload");
    assert!(matches!(
      unframe(&framed[..6]),
      Err(JudgeError::TruncatedBuffer { field: "frame payload", needed: 7, available: 2 })
    ));
  }

  #[test]
  fn large_requests_go_through_a_file() {
    assert_eq!(Dispatch::choose(9_999, DEFAULT_INLINE_LIMIT), Dispatch::InBand);
    assert_eq!(Dispatch::choose(10_000, DEFAULT_INLINE_LIMIT), Dispatch::TempFile);
  }
}
