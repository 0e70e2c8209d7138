//! Tracing setup for the CLI.
//!
//! `GITPILOT_LOG` takes an `EnvFilter` directive (default `warn`).
//! `GITPILOT_LOG_FORMAT=json` switches to one JSON object per line.
//! Logs always go to stderr so stdout stays clean for command output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const FILTER_ENV: &str = "GITPILOT_LOG";
const FORMAT_ENV: &str = "GITPILOT_LOG_FORMAT";

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let filter = build_env_filter(std::env::var(FILTER_ENV).ok().as_deref());
    let json = std::env::var(FORMAT_ENV).is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn build_env_filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(d) if !d.trim().is_empty() => {
            EnvFilter::try_new(d).unwrap_or_else(|_| EnvFilter::new("warn"))
        }
        _ => EnvFilter::new("warn"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directive_falls_back_to_warn() {
        assert_eq!(build_env_filter(None).to_string(), "warn");
        assert_eq!(build_env_filter(Some("  ")).to_string(), "warn");
    }

    #[test]
    fn directive_is_used() {
        assert_eq!(build_env_filter(Some("gitpilot=debug")).to_string(), "gitpilot=debug");
    }
}
