use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::codec::{frame, Dispatch, DEFAULT_INLINE_LIMIT};
use crate::config::JudgeConfig;
use crate::error::{JudgeError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An external placement solver. It reads a request either framed on stdin
/// or from the file named by its last argument, and answers on stdout.
#[derive(Clone, Debug)]
pub struct SolverProcess {
  program: PathBuf,
  args: Vec<String>,
  timeout: Duration,
  inline_limit: usize,
}

impl SolverProcess {
  pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
    SolverProcess {
      program: program.into(),
      args: Vec::new(),
      timeout,
      inline_limit: DEFAULT_INLINE_LIMIT,
    }
  }

  pub fn from_config(config: &JudgeConfig) -> Self {
    SolverProcess {
      program: config.solver.clone(),
      args: config.solver_args.clone(),
      timeout: config.solver_timeout,
      inline_limit: config.inline_limit,
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_inline_limit(mut self, inline_limit: usize) -> Self {
    self.inline_limit = inline_limit;
    self
  }

  /// Hands `request` to the solver and returns its raw stdout. Output of a
  /// solver that timed out or failed is dropped.
  #[instrument(level = "debug", skip_all, fields(program = %self.program.display(), bytes = request.len()))]
  pub fn run(&self, request: &[u8]) -> Result<Vec<u8>> {
    let dispatch = Dispatch::choose(request.len(), self.inline_limit);
    let mut command = Command::new(&self.program);
    command.args(&self.args)
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit());

    let mut framed = None;
    let request_file = match dispatch {
      Dispatch::InBand => {
        framed = Some(frame(request)?);
        command.stdin(Stdio::piped());
        None
      }
      Dispatch::TempFile => {
        let mut file = NamedTempFile::new()?;
        file.write_all(request)?;
        file.flush()?;
        command.arg(file.path()).stdin(Stdio::null());
        Some(file)
      }
    };

    debug!(?dispatch, "starting solver");
    let started = Instant::now();
    let deadline = started + self.timeout;
    let mut child = command.spawn()?;

    let feeder = match (framed, child.stdin.take()) {
      (Some(framed), Some(stdin)) => Some(thread::spawn(move || feed(stdin, &framed))),
      _ => None,
    };

    let Some(mut stdout) = child.stdout.take() else {
      abandon(&mut child);
      return Err(io::Error::new(io::ErrorKind::Other, "solver stdout was not captured").into());
    };
    let (tx, rx) = channel::bounded(1);
    thread::spawn(move || {
      let mut output = Vec::new();
      let _ = tx.send(stdout.read_to_end(&mut output).map(|_| output));
    });

    let output = match rx.recv_timeout(self.timeout) {
      Ok(Ok(output)) => output,
      Ok(Err(err)) => {
        abandon(&mut child);
        return Err(err.into());
      }
      Err(RecvTimeoutError::Timeout) => {
        abandon(&mut child);
        warn!(timeout = ?self.timeout, "solver timed out");
        return Err(JudgeError::SolverTimeout(self.timeout));
      }
      Err(RecvTimeoutError::Disconnected) => {
        abandon(&mut child);
        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "solver output reader vanished").into());
      }
    };

    let status = wait_until(&mut child, deadline)
      .ok_or(JudgeError::SolverTimeout(self.timeout))??;
    drop(request_file);

    if let Some(feeder) = feeder {
      feeder.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;
    }

    if !status.success() {
      warn!(%status, "solver failed");
      return Err(JudgeError::SolverProcessFailure(status));
    }

    debug!(bytes = output.len(), elapsed = ?started.elapsed(), "solver finished");
    Ok(output)
  }
}

fn feed(mut stdin: ChildStdin, bytes: &[u8]) -> io::Result<()> {
  match stdin.write_all(bytes).and_then(|_| stdin.flush()) {
    // the solver is free to exit without reading everything
    Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
    other => other,
  }
}

/// `None` when the deadline passed, the child is killed in that case.
fn wait_until(child: &mut Child, deadline: Instant) -> Option<io::Result<ExitStatus>> {
  loop {
    match child.try_wait() {
      Ok(Some(status)) => return Some(Ok(status)),
      Ok(None) if Instant::now() >= deadline => {
        abandon(child);
        return None;
      }
      Ok(None) => thread::sleep(POLL_INTERVAL),
      Err(err) => return Some(Err(err)),
    }
  }
}

fn abandon(child: &mut Child) {
  let _ = child.kill();
  let _ = child.wait();
}
