//! Error mapping guide:
//! - Map a missing runtime binary to exit code 127 and interruption to 130; all others to 1.
//! - Every message names the image reference or container identifier involved.
//! - Best-effort kinds (`ImageNotFound`, `TeardownRemoveFailed`) are logged by callers, never raised
//!   out of teardown.
use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("docker image {image} not found")]
    ImageNotFound { image: String },

    #[error("failed to pull docker image {image}")]
    ImagePullFailed { image: String },

    #[error("failed to build docker image from {context}: {reason}")]
    BuildFailed { context: String, reason: String },

    #[error("failed to run docker image {image} (exit: {status:?})")]
    RunFailed { image: String, status: Option<i32> },

    #[error("failed to dispatch command into container {container}: {source}")]
    ExecFailed {
        container: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to stop docker container {container}")]
    TeardownKillFailed { container: String },

    #[error("failed to remove docker container {container}")]
    TeardownRemoveFailed { container: String },

    #[error("failed to retrieve docker daemon bridge ip for image {image}: {reason}")]
    BridgeResolutionFailed { image: String, reason: String },

    #[error("interrupted while waiting for {what}")]
    InterruptedDuringSubprocess { what: String },

    #[error("container session is not enabled; cannot provision a container for image {image}")]
    NotEnabled { image: String },

    #[error("{0}")]
    RuntimeNotFound(#[source] io::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ContainerError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        ContainerError::Io {
            context: context.into(),
            source,
        }
    }

    /// Non-fatal kinds drive decisions or get logged; everything else aborts the build step.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ContainerError::ImageNotFound { .. } | ContainerError::TeardownRemoveFailed { .. }
        )
    }
}

/// Write the error to the build log and hand it back for propagation.
pub(crate) fn logged(e: ContainerError) -> ContainerError {
    let use_err = crate::color::color_enabled_stderr();
    if e.is_fatal() {
        crate::color::log_error_stderr(use_err, &format!("docker-build-env: {e}"));
    } else {
        crate::color::log_warn_stderr(use_err, &format!("docker-build-env: {e}"));
    }
    e
}

/// Map a container-layer error to a process exit code.
pub fn exit_code_for_error(e: &ContainerError) -> u8 {
    match e {
        ContainerError::RuntimeNotFound(_) => 127,
        ContainerError::InterruptedDuringSubprocess { .. } => 130,
        ContainerError::Io { source, .. } => exit_code_for_io_error(source),
        _ => 1,
    }
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_container_or_image() {
        let e = ContainerError::TeardownKillFailed {
            container: "abc123".to_string(),
        };
        assert!(e.to_string().contains("abc123"));

        let e = ContainerError::ImagePullFailed {
            image: "alpine:3.6".to_string(),
        };
        assert!(e.to_string().contains("alpine:3.6"));
    }

    #[test]
    fn test_exit_codes() {
        let missing = ContainerError::RuntimeNotFound(io::Error::new(
            io::ErrorKind::NotFound,
            "docker not found",
        ));
        assert_eq!(exit_code_for_error(&missing), 127);

        let interrupted = ContainerError::InterruptedDuringSubprocess {
            what: "docker pull alpine".to_string(),
        };
        assert_eq!(exit_code_for_error(&interrupted), 130);

        let run = ContainerError::RunFailed {
            image: "alpine".to_string(),
            status: Some(125),
        };
        assert_eq!(exit_code_for_error(&run), 1);
    }

    #[test]
    fn test_remove_failure_is_not_fatal() {
        assert!(!ContainerError::TeardownRemoveFailed {
            container: "c".to_string()
        }
        .is_fatal());
        assert!(ContainerError::TeardownKillFailed {
            container: "c".to_string()
        }
        .is_fatal());
    }
}
