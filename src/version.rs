//! Relay identity helpers.

use std::sync::OnceLock;

const DEFAULT_NAME: &str = "randao-relay";

static RELAY_VERSION: OnceLock<String> = OnceLock::new();

/// Returns the version string logged at startup and printed by `--version`.
pub fn relay_version_string() -> &'static str {
    RELAY_VERSION.get_or_init(|| {
        let sha = option_env!("VERGEN_GIT_SHA_SHORT").unwrap_or("unknown");
        format!("{DEFAULT_NAME}/v{}-{sha}", env!("CARGO_PKG_VERSION"))
    })
}
