// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the caller supplies one.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_tracing(default_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("tracing initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(Some("debug"));
        init_tracing(None);
    }

    #[test]
    fn bad_filter_falls_back() {
        // Garbage directives must not panic; the default filter takes over.
        init_tracing(Some("=[=]"));
    }
}
