use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use concert_judge::codec::{self, DEFAULT_INLINE_LIMIT};
use concert_judge::config::{default_threads, problem_id_from_path, JudgeConfig, ScoringPolicy, DEFAULT_FULL_THRESHOLD};
use concert_judge::judge::judge;
use concert_judge::logging::setup_logging;
use concert_judge::models::{Position, ProblemSpec, Solution};
use concert_judge::scoring::{self, ScoringMode};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
  /// More log output (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,
  /// No log output at all
  #[arg(short, long, global = true)]
  quiet: bool,
  /// Problems with a larger id are scored in full mode
  #[arg(long, env = "JUDGE_FULL_THRESHOLD", default_value_t = DEFAULT_FULL_THRESHOLD, global = true)]
  full_threshold: u32,
  /// Scoring threads, defaults to the available parallelism
  #[arg(long, env = "JUDGE_THREADS", global = true)]
  threads: Option<usize>,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct ModeArgs {
  /// Scoring mode (lite or full), overrides the id based policy
  #[arg(short, long)]
  mode: Option<ScoringMode>,
  /// Problem id, taken from the file name when omitted
  #[arg(short = 'i', long)]
  problem_id: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
  /// Scores a solution against its problem
  Score {
    problem: PathBuf,
    solution: PathBuf,
    #[command(flatten)]
    mode: ModeArgs,
  },
  /// Writes the solver request for a problem
  Pack {
    problem: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
    /// Solver time limit in seconds
    #[arg(short, long)]
    time_limit: Option<u32>,
    /// Prefix the request with its length, as sent on stdin
    #[arg(long)]
    framed: bool,
    #[command(flatten)]
    mode: ModeArgs,
  },
  /// Runs the external solver on a problem and verifies its answer
  Solve {
    problem: PathBuf,
    /// Solver executable
    #[arg(short = 'a', long, env = "JUDGE_SOLVER", default_value = "./solve")]
    solver: PathBuf,
    /// Seconds before the solver is killed
    #[arg(long, env = "JUDGE_SOLVER_TIMEOUT", default_value_t = 600)]
    timeout: u64,
    /// Requests of at least this many bytes go through a temporary file
    #[arg(long, env = "JUDGE_INLINE_LIMIT", default_value_t = DEFAULT_INLINE_LIMIT)]
    inline_limit: usize,
    /// Solver time limit in seconds, passed inside the request
    #[arg(short, long)]
    time_limit: Option<u32>,
    /// Where to write the verified solution
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Score gain over an existing output file needed to overwrite it
    #[arg(long, env = "JUDGE_MIN_IMPROVEMENT", default_value_t = 1_000_000)]
    min_improvement: i64,
    #[command(flatten)]
    mode: ModeArgs,
    /// Extra arguments passed to the solver
    #[arg(last = true)]
    solver_args: Vec<String>,
  },
}

impl Cli {
  fn config(&self) -> JudgeConfig {
    JudgeConfig {
      policy: ScoringPolicy { full_threshold: self.full_threshold },
      threads: self.threads.unwrap_or_else(default_threads),
      ..JudgeConfig::default()
    }
  }
}

impl ModeArgs {
  fn resolve(&self, policy: &ScoringPolicy, problem: &Path) -> ScoringMode {
    policy.resolve(self.mode, self.problem_id.or_else(|| problem_id_from_path(problem)))
  }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let json = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&json)
    .with_context(|| format!("parsing {}", path.display()))
}

fn warn_off_stage(problem: &ProblemSpec, placements: &[Position]) {
  for musician in problem.off_stage(placements) {
    warn!(?musician, position = ?placements[musician.0], "placement outside the stage");
  }
}

/// Score of the solution already stored at `path`, if any can be read.
fn stored_score(path: &Path, problem: &ProblemSpec, mode: ScoringMode, threads: usize) -> Option<i64> {
  if !path.is_file() {
    return None;
  }
  let scored = read_json::<Solution>(path).and_then(|solution| {
    Ok(scoring::score_parallel(problem, &solution.placements, solution.volumes.as_deref(), mode, threads)?)
  });
  match scored {
    Ok(score) => Some(score),
    Err(err) => {
      warn!("ignoring stored solution {}: {err:#}", path.display());
      None
    }
  }
}

fn main() -> Result<(), anyhow::Error> {
  dotenvy::dotenv().ok();
  let cli: Cli = Cli::parse();
  setup_logging(cli.verbose, cli.quiet)?;
  let mut config = cli.config();

  match cli.command {
    Commands::Score { problem, solution, mode } => {
      let problem_spec: ProblemSpec = read_json(&problem)?;
      let solution: Solution = read_json(&solution)?;
      let mode = mode.resolve(&config.policy, &problem);

      warn_off_stage(&problem_spec, &solution.placements);
      let score = scoring::score_parallel(
        &problem_spec,
        &solution.placements,
        solution.volumes.as_deref(),
        mode,
        config.threads,
      )?;

      info!(%mode, "scored");
      println!("{score}");
    }
    Commands::Pack { problem, output, time_limit, framed, mode } => {
      let problem_spec: ProblemSpec = read_json(&problem)?;
      let mode = mode.resolve(&config.policy, &problem);

      let mut request = codec::encode_request(&problem_spec, Some(mode), time_limit)?;
      if framed {
        request = codec::frame(&request)?;
      }

      std::fs::write(&output, &request)
        .with_context(|| format!("writing {}", output.display()))?;
      info!(bytes = request.len(), %mode, "request written to {}", output.display());
    }
    Commands::Solve { problem, solver, timeout, inline_limit, time_limit, output, min_improvement, mode, solver_args } => {
      let problem_spec: ProblemSpec = read_json(&problem)?;
      let mode = mode.resolve(&config.policy, &problem);
      config.solver = solver;
      config.solver_args = solver_args;
      config.solver_timeout = Duration::from_secs(timeout);
      config.inline_limit = inline_limit;

      let verdict = judge(&problem_spec, &config, mode, time_limit)?;
      println!("{}: reported {} recomputed {}", problem.display(), verdict.reported, verdict.recomputed);

      if let Some(output) = output {
        let previous = stored_score(&output, &problem_spec, mode, config.threads);
        if verdict.improves_on(previous, min_improvement) {
          std::fs::write(&output, serde_json::to_vec(&verdict.solution)?)
            .with_context(|| format!("writing {}", output.display()))?;
          info!(?previous, score = verdict.recomputed, "solution written to {}", output.display());
        } else {
          info!(?previous, score = verdict.recomputed, "keeping {}", output.display());
        }
      }
    }
  }

  Ok(())
}
