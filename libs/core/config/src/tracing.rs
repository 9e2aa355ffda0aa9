//! Log output setup for collector processes and tests.

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::Environment;

/// Baseline level directives when `RUST_LOG` is not set.
///
/// Production keeps backend HTTP chatter down to warnings; development runs
/// at debug so scrape flows can be followed end to end.
fn default_directives(environment: &Environment) -> &'static str {
    if environment.is_production() {
        "info,reqwest=warn,hyper=warn"
    } else {
        "debug,reqwest=info"
    }
}

/// Installs the global tracing subscriber.
///
/// Production emits JSON without module targets, for log shipping; anything
/// else gets human-readable output with targets. A `RUST_LOG` value
/// overrides [`default_directives`]. Calling this more than once keeps the
/// first subscriber, which is what tests running in one process need.
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(environment)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(!environment.is_production());
    let installed = if environment.is_production() {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    };

    if installed.is_err() {
        debug!("tracing subscriber already installed, keeping it");
    }
}

/// Install color-eyre panic and error report handlers.
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_color_eyre() {
    if color_eyre::install().is_err() {
        debug!("color-eyre already installed, skipping re-initialization");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_differ_per_environment() {
        assert!(default_directives(&Environment::Production).starts_with("info"));
        assert!(default_directives(&Environment::Development).starts_with("debug"));
    }

    #[test]
    fn init_tracing_is_idempotent() {
        let env = Environment::Development;
        init_tracing(&env);
        init_tracing(&env);
    }
}
