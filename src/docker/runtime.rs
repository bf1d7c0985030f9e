#![allow(clippy::module_name_repetitions)]
//! Container runtime discovery.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use which::which;

use crate::errors::ContainerError;

/// Default runtime executable name.
pub const DEFAULT_RUNTIME: &str = "docker";

/// Locate the container runtime binary.
///
/// An executable given as a path is used as-is when it exists; a bare name is searched on PATH.
/// `DOCKER_BUILD_ENV_SKIP_DOCKER=1` disables detection entirely.
pub fn container_runtime_path(executable: &str) -> Result<PathBuf, ContainerError> {
    if env::var("DOCKER_BUILD_ENV_SKIP_DOCKER").ok().as_deref() == Some("1") {
        return Err(ContainerError::RuntimeNotFound(io::Error::new(
            io::ErrorKind::NotFound,
            "container runtime disabled by environment override",
        )));
    }

    let exe = if executable.trim().is_empty() {
        DEFAULT_RUNTIME
    } else {
        executable.trim()
    };

    if exe.contains(std::path::MAIN_SEPARATOR) {
        let p = Path::new(exe);
        if p.is_file() {
            return Ok(p.to_path_buf());
        }
    } else if let Ok(p) = which(exe) {
        return Ok(p);
    }
    Err(ContainerError::RuntimeNotFound(io::Error::new(
        io::ErrorKind::NotFound,
        format!("container runtime '{exe}' is required but was not found"),
    )))
}
