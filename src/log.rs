use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Output goes to stderr so that
/// `--print-tags` and friends keep stdout clean.
///
/// `RUST_LOG` wins over the verbosity flag when it is set.
pub fn init(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
