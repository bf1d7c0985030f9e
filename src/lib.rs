//! docker-build-env: run every step of a build inside one ephemeral container.
//!
//! Architecture
//! - docker::*: runtime discovery, masked command construction, the runtime client and
//!   `dockerhost` bridge resolution.
//! - image: pull or Dockerfile strategies behind `ImageProvider`.
//! - session: the per-build state machine (`Disabled -> Enabled -> Provisioned -> TornDown`).
//! - redirect: a `Launcher` that rewrites launches into `docker exec` while the session is enabled.
//! - store/config: persisted session state and the YAML build configuration.
//! - Binary glue (src/main.rs) drives setup/exec/teardown/run from the command line.
//!
//! Environment invariants
//! - HOSTNAME is never forwarded into the container.
//! - Sensitive values are rendered as `********` in every logged command line.
//! - DOCKER_BUILD_ENV_CONFIG: config file override; DOCKER_BUILD_ENV_COLOR / NO_COLOR: color.
//! - BUILD_CONTAINER_ID / BUILD_DOCKER_HOST / BUILD_DOCKER_IMAGE: injected once a container runs.

pub mod color;
pub mod config;
pub mod docker;
pub mod env;
pub mod errors;
pub mod image;
pub mod launcher;
pub mod redirect;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod util;

pub use color::{
    color_enabled_stderr, log_error_stderr, log_info_stderr, log_warn_stderr, paint,
    set_color_mode, ColorMode,
};
pub use config::{config_path, BuildConfig};
pub use docker::{
    container_runtime_path, BuildIdentity, ClientOptions, DockerClient, ExecEnvStyle, RunSpec,
};
pub use env::{EnvContributor, EnvSnapshot, StaticEnv};
pub use errors::{exit_code_for_error, exit_code_for_io_error, ContainerError};
pub use image::{DockerfileImage, ImageProvider, ImageSelector, JobRef, PullImage};
pub use launcher::{Launcher, LocalLauncher, Proc, ProcStarter};
pub use redirect::DockerRedirector;
pub use session::{
    BuildContext, ContainerSession, ContainerSettings, Phase, SessionState, Volume,
};
pub use store::StateStore;
pub use telemetry::telemetry_init;
