use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Installs the stderr subscriber. `RUST_LOG` directives win over the
/// verbosity count.
pub fn setup_logging(verbosity: u8, quiet: bool) -> anyhow::Result<()> {
  let level = if quiet {
    LevelFilter::OFF
  } else {
    match verbosity {
      0 => LevelFilter::WARN,
      1 => LevelFilter::INFO,
      2 => LevelFilter::DEBUG,
      _ => LevelFilter::TRACE,
    }
  };

  let filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .compact();

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .try_init()?;

  Ok(())
}
