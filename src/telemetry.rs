//! Optional `tracing` output for the build log (cargo feature `otel`).
//!
//! `DOCKER_BUILD_ENV_LOG` takes env-filter directives, e.g. `docker_build_env=debug`.
//! Without the feature, [`telemetry_init`] is a no-op.

#[cfg(feature = "otel")]
use once_cell::sync::OnceCell;

pub const LOG_ENV: &str = "DOCKER_BUILD_ENV_LOG";

#[cfg(feature = "otel")]
static INIT: OnceCell<()> = OnceCell::new();

/// Install the stderr subscriber once. Returns true when this call installed it.
#[cfg(feature = "otel")]
pub fn telemetry_init() -> bool {
    if INIT.get().is_some() {
        return false;
    }
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".to_string());
    let installed = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok();
    if !installed {
        eprintln!("docker-build-env: telemetry init skipped (global subscriber already set)");
        return false;
    }
    let _ = INIT.set(());
    true
}

#[cfg(not(feature = "otel"))]
pub fn telemetry_init() -> bool {
    false
}
