//! Judge for the concert placement problem: scores musician placements and
//! exchanges problems and answers with an external solver process.

pub mod codec;
pub mod config;
pub mod error;
pub mod geometry;
pub mod judge;
pub mod logging;
pub mod models;
pub mod scoring;
pub mod solver;

pub use error::{JudgeError, Result};
pub use models::{Position, ProblemSpec, Solution};
pub use scoring::{score, ScoringMode};
