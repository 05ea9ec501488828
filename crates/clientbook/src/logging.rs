//! Tracing setup for the `cbook` binary and the crate's tests.
//!
//! Records are logged under the `clientbook` target: writes and removals at
//! `info`, partition traffic at `debug`, corrupt partitions at `warn`. Other
//! crates stay at `error` unless the user asks for trace output.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the CLI logs to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Warnings, so corrupt partitions are always reported.
    #[default]
    Normal,
    /// Record and partition activity (`-v`).
    Verbose,
    /// Everything, dependencies included (`-vv`).
    Trace,
}

impl Verbosity {
    /// Map the `-q` and `-v` flags; `-q` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The `EnvFilter` directive used when `RUST_LOG` is not set.
    #[must_use]
    pub fn filter_directive(self) -> String {
        let (others, ours) = match self {
            Self::Quiet => ("error", "error"),
            Self::Normal => ("error", "warn"),
            Self::Verbose => ("error", "debug"),
            Self::Trace => ("debug", "trace"),
        };
        format!("{others},clientbook={ours}")
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`. Calling this twice is
/// harmless; the second call does nothing.
///
/// ```no_run
/// use clientbook::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true));

    let _ = subscriber.try_init();
}

/// Route crate warnings to the test harness output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(Verbosity::Normal.filter_directive())
        .with_test_writer()
        .try_init();
}
