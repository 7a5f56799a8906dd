use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when neither `--log` nor `RUST_LOG` says otherwise.
pub const DEFAULT_DIRECTIVE: &str = "native_host=info,script=info";

/// Install the global subscriber. Output goes to stderr so that stdout stays
/// free for the script's `console.log`.
///
/// `filter` (from `--log`) wins over `RUST_LOG`, which wins over the default.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(filter: Option<&str>) {
    let filter = build_filter(filter, std::env::var("RUST_LOG").ok().as_deref());

    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(filter)
        .try_init();
    if installed.is_err() {
        tracing::debug!("logging already initialised");
    }
}

fn build_filter(explicit: Option<&str>, from_env: Option<&str>) -> EnvFilter {
    let requested = explicit
        .or(from_env)
        .map(str::trim)
        .filter(|directive| !directive.is_empty());
    if let Some(directive) = requested {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("Ignoring invalid log filter '{directive}': {e}"),
        }
    }
    EnvFilter::new(DEFAULT_DIRECTIVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_beats_environment() {
        let filter = build_filter(Some("native_host=trace"), Some("warn"));
        assert_eq!(filter.to_string(), "native_host=trace");
    }

    #[test]
    fn environment_filter_is_used_when_no_flag_is_given() {
        let filter = build_filter(None, Some("debug"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn blank_or_invalid_filters_fall_back_to_the_default() {
        for candidate in ["  ", "native_host=notalevel"] {
            let filter = build_filter(Some(candidate), None).to_string();
            assert!(filter.contains("native_host=info"), "{candidate}: {filter}");
            assert!(filter.contains("script=info"), "{candidate}: {filter}");
        }
    }
}
