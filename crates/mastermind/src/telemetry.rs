//! Tracing subscriber setup for binaries embedding the engine

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Without `RUST_LOG` the engine logs at `info`, or `debug` when `verbose`
/// is set. Returns false when a global subscriber was already installed.
pub fn init_tracing(verbose: bool) -> bool {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

fn default_directives(level: &str) -> String {
    format!("warn,mastermind={level},mastermind_cli={level}", level = level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert_eq!(directives, "warn,mastermind=debug,mastermind_cli=debug");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing(false);
        assert!(!init_tracing(true));
    }
}
