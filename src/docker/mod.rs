//! Container runtime access: discovery, command construction, the runtime client and bridge
//! resolution.

pub mod bridge;
pub mod client;
pub mod command;
pub mod runtime;

pub use bridge::{parse_default_gateway, resolve_bridge_ip};
pub use client::{
    validate_host, BuildIdentity, ClientOptions, DockerClient, ExecEnvStyle, RunSpec,
    HOST_NETWORK,
};
pub use command::DockerCommand;
pub use runtime::container_runtime_path;
