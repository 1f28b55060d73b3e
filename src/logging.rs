use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Logs go to stderr so `map` output on
/// stdout stays machine-readable.
///
/// RUST_LOG wins when set; otherwise `-v` raises this crate's level while
/// dependencies stay at `warn`.
pub fn init(verbose: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(default_directives(verbose))
            .context("Failed to build log filter")?,
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}

fn default_directives(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("warn,osmtier={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_only_raises_our_own_level() {
        assert_eq!(default_directives(0), "warn,osmtier=info");
        assert_eq!(default_directives(1), "warn,osmtier=debug");
        assert_eq!(default_directives(7), "warn,osmtier=trace");
        assert!(EnvFilter::try_new(default_directives(2)).is_ok());
    }
}
