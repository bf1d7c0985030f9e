#![allow(clippy::module_name_repetitions)]
//! Runtime Client: every container-runtime invocation goes through here.
//!
//! Command shapes (global `-H <endpoint>` first when configured):
//! - `inspect <image>`, `pull <image>`
//! - `build [--pull] [--no-cache] --iidfile <tmp> --file <dockerfile> --label ... <context>`
//! - `run --tty --detach ... <image> <command...>`
//! - `exec --tty --user <uid:gid> <container> ...`
//! - `kill <container>`, `rm --force <container>`

use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
#[cfg(feature = "otel")]
use tracing::instrument;

use super::command::DockerCommand;
use crate::env::{EnvSnapshot, HOSTNAME};
use crate::errors::{logged, ContainerError};
use crate::launcher::ProcStarter;

const HOST_SCHEMES: &[&str] = &["tcp", "unix", "npipe", "ssh", "fd"];

/// Network mode for which no `dockerhost` alias is added.
pub const HOST_NETWORK: &str = "host";

/// Runtime connection and verbosity settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    /// Runtime executable (name on PATH or a path).
    pub executable: Option<String>,
    /// Daemon endpoint passed as `-H`.
    pub host: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub tls_verify: bool,
    /// Registry credential directory (`DOCKER_CONFIG`).
    pub config_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// How the effective environment reaches a redirected command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecEnvStyle {
    /// `exec ... <container> env K=V... <cmd...>`
    #[default]
    EnvCommand,
    /// `exec ... --env K=V... <container> <cmd...>`
    Flags,
}

/// Owning build, used for container naming and image labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentity {
    pub project: String,
    pub number: u64,
}

/// Everything `run --detach` needs.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub workdir: Option<String>,
    /// host path -> container path
    pub mounts: BTreeMap<String, String>,
    /// host port -> container port
    pub ports: BTreeMap<u16, u16>,
    /// container name -> alias
    pub links: BTreeMap<String, String>,
    pub env: EnvSnapshot,
    pub network: Option<String>,
    pub memory: Option<String>,
    pub cpu_shares: Option<String>,
    pub privileged: bool,
    pub command: Vec<String>,
}

impl RunSpec {
    pub fn needs_dockerhost_alias(&self) -> bool {
        self.network.as_deref().map(str::trim) != Some(HOST_NETWORK)
    }
}

/// Validate a daemon endpoint such as `tcp://10.0.0.5:2376` or `unix:///var/run/docker.sock`.
pub fn validate_host(host: &str) -> Result<(), ContainerError> {
    let parsed = url::Url::parse(host)
        .map_err(|e| ContainerError::Config(format!("invalid docker host '{host}': {e}")))?;
    if HOST_SCHEMES.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(ContainerError::Config(format!(
            "invalid docker host '{host}': unsupported scheme '{}' (expected one of {})",
            parsed.scheme(),
            HOST_SCHEMES.join(", ")
        )))
    }
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    runtime: PathBuf,
    host: Option<String>,
    runtime_env: Vec<(String, String)>,
    verbose: bool,
    identity: BuildIdentity,
}

impl DockerClient {
    pub fn new(
        runtime: PathBuf,
        opts: &ClientOptions,
        identity: BuildIdentity,
    ) -> Result<Self, ContainerError> {
        let host = opts
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        if let Some(h) = host.as_deref() {
            validate_host(h)?;
        }
        let mut runtime_env = Vec::new();
        if let Some(p) = opts.cert_path.as_ref() {
            runtime_env.push(("DOCKER_CERT_PATH".to_string(), p.display().to_string()));
        }
        if opts.tls_verify {
            runtime_env.push(("DOCKER_TLS_VERIFY".to_string(), "1".to_string()));
        }
        if let Some(p) = opts.config_dir.as_ref() {
            runtime_env.push(("DOCKER_CONFIG".to_string(), p.display().to_string()));
        }
        Ok(Self {
            runtime,
            host,
            runtime_env,
            verbose: opts.verbose,
            identity,
        })
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn identity(&self) -> &BuildIdentity {
        &self.identity
    }

    /// A runtime command with endpoint flag and runtime environment applied.
    pub fn command(&self) -> DockerCommand {
        let mut c = DockerCommand::new(&self.runtime);
        if let Some(h) = self.host.as_deref() {
            c.arg("-H").arg(h);
        }
        for (k, v) in &self.runtime_env {
            c.env(k, v);
        }
        c
    }

    /// True when the image is present locally. Absence (non-zero exit) is not an error.
    #[cfg_attr(feature = "otel", instrument(level = "debug", skip(self), err))]
    pub fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        let mut c = self.command();
        c.arg("inspect").arg(image);
        Ok(c.status_quiet(self.verbose)?.success())
    }

    /// Pull an image; the caller decides what a failed pull means.
    #[cfg_attr(feature = "otel", instrument(level = "info", skip(self), err))]
    pub fn pull_image(&self, image: &str) -> Result<bool, ContainerError> {
        let mut c = self.command();
        c.arg("pull").arg(image);
        Ok(c.status()?.success())
    }

    /// Build an image and return the runtime-assigned id read from an `--iidfile`.
    #[cfg_attr(
        feature = "otel",
        instrument(level = "info", skip(self), fields(context = %context.display()), err)
    )]
    pub fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        force_pull: bool,
        no_cache: bool,
    ) -> Result<String, ContainerError> {
        let ctx = context.display().to_string();
        let iid = tempfile::Builder::new()
            .prefix("docker-build-env-")
            .suffix(".iid")
            .tempfile()
            .map_err(|e| ContainerError::io("failed to create image id file", e))?;

        let mut c = self.command();
        c.arg("build");
        if force_pull {
            c.arg("--pull");
        }
        if no_cache {
            c.arg("--no-cache");
        }
        c.arg("--iidfile").arg(iid.path().display().to_string());
        c.arg("--file").arg(dockerfile.display().to_string());
        c.arg("--label")
            .arg(format!("jenkins-project={}", self.identity.project));
        c.arg("--label")
            .arg(format!("jenkins-build-number={}", self.identity.number));
        c.arg(ctx.clone());

        let status = c.status()?;
        if !status.success() {
            return Err(logged(ContainerError::BuildFailed {
                context: ctx,
                reason: format!("docker build exited with {status}"),
            }));
        }
        let id = fs::read_to_string(iid.path())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if id.is_empty() {
            return Err(logged(ContainerError::BuildFailed {
                context: ctx,
                reason: "no image id was written to the iidfile".to_string(),
            }));
        }
        Ok(id)
    }

    /// Start a detached container and return its id.
    ///
    /// `bridge_ip` is only consulted when the network mode needs a `dockerhost` alias.
    #[cfg_attr(
        feature = "otel",
        instrument(level = "info", skip(self, spec, bridge_ip), fields(image = %spec.image, name = %spec.name), err)
    )]
    pub fn run_detached(
        &self,
        spec: &RunSpec,
        bridge_ip: Option<Ipv4Addr>,
    ) -> Result<String, ContainerError> {
        let mut c = self.command();
        c.arg("run").arg("--tty").arg("--detach");
        if spec.privileged {
            c.arg("--privileged");
        }
        c.arg("--name").arg(spec.name.clone());
        if let Some(w) = spec.workdir.as_deref() {
            c.arg("--workdir").arg(w);
        }
        for (host, container) in &spec.mounts {
            c.arg("--volume").arg(format!("{host}:{container}:rw"));
        }
        for (host, container) in &spec.ports {
            c.arg("--publish").arg(format!("{host}:{container}"));
        }
        for (name, alias) in &spec.links {
            c.arg("--link").arg(format!("{name}:{alias}"));
        }
        if let Some(net) = non_empty(spec.network.as_deref()) {
            c.arg("--net").arg(net);
        }
        if let Some(m) = non_empty(spec.memory.as_deref()) {
            c.arg("--memory").arg(m);
        }
        if let Some(cpu) = non_empty(spec.cpu_shares.as_deref()) {
            c.arg("--cpu-shares").arg(cpu);
        }
        if spec.needs_dockerhost_alias() {
            if let Some(ip) = bridge_ip {
                c.arg("--add-host").arg(format!("dockerhost:{ip}"));
            }
        }
        for (k, v) in spec.env.iter() {
            if k == HOSTNAME {
                continue;
            }
            c.arg("--env")
                .masked_arg(format!("{k}={v}"), spec.env.is_sensitive(k));
        }
        c.arg(spec.image.clone());
        c.args(spec.command.iter().cloned());

        let out = c.output(true)?;
        if !out.status.success() {
            return Err(logged(ContainerError::RunFailed {
                image: spec.image.clone(),
                status: out.status.code(),
            }));
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if id.is_empty() {
            return Err(logged(ContainerError::RunFailed {
                image: spec.image.clone(),
                status: out.status.code(),
            }));
        }
        Ok(id)
    }

    /// Kill then force-remove a container. Kill failure is fatal; remove failure is only logged.
    #[cfg_attr(feature = "otel", instrument(level = "info", skip(self), err))]
    pub fn kill_and_remove(&self, container: &str) -> Result<(), ContainerError> {
        let mut kill = self.command();
        kill.arg("kill").arg(container);
        if !kill.status_quiet(self.verbose)?.success() {
            return Err(logged(ContainerError::TeardownKillFailed {
                container: container.to_string(),
            }));
        }

        let mut rm = self.command();
        rm.arg("rm").arg("--force").arg(container);
        if !rm.status_quiet(self.verbose)?.success() {
            let _ = logged(ContainerError::TeardownRemoveFailed {
                container: container.to_string(),
            });
        }
        Ok(())
    }

    /// Rewrite `starter` in place so it runs inside `container` as `user` with `env` applied.
    ///
    /// Existing per-argument masks are kept for the original command tail; prepended runtime
    /// arguments are unmasked except sensitive environment values.
    pub fn exec_in(
        &self,
        container: &str,
        user: &str,
        starter: &mut ProcStarter,
        env: &EnvSnapshot,
        style: ExecEnvStyle,
    ) {
        let mut c = self.command();
        c.arg("exec").arg("--tty").arg("--user").arg(user);

        let forwarded: Vec<(&str, &str)> = env.iter().filter(|(k, _)| *k != HOSTNAME).collect();
        match style {
            ExecEnvStyle::Flags => {
                for (k, v) in &forwarded {
                    c.arg("--env").masked_arg(format!("{k}={v}"), env.is_sensitive(k));
                }
                c.arg(container);
            }
            ExecEnvStyle::EnvCommand => {
                c.arg(container);
                if !forwarded.is_empty() {
                    c.arg("env");
                    for (k, v) in &forwarded {
                        c.masked_arg(format!("{k}={v}"), env.is_sensitive(k));
                    }
                }
            }
        }

        let tail_masks = starter
            .masks
            .take()
            .unwrap_or_else(|| vec![false; starter.cmds.len()]);
        let mut cmds = c.argv();
        let mut masks = c.argv_masks();
        cmds.extend(starter.cmds.drain(..));
        masks.extend(tail_masks);
        masks.resize(cmds.len(), false);

        starter.cmds = cmds;
        starter.masks = Some(masks);
        starter.envs = EnvSnapshot::from_pairs(self.runtime_env.iter().cloned());
    }

    /// Capture the container's own environment via `exec ... env`.
    #[cfg_attr(feature = "otel", instrument(level = "debug", skip(self), err))]
    pub fn get_env(&self, container: &str, user: &str) -> Result<EnvSnapshot, ContainerError> {
        let mut c = self.command();
        c.arg("exec")
            .arg("--tty")
            .arg("--user")
            .arg(user)
            .arg(container)
            .arg("env");
        let out = c.output(self.verbose)?;
        if !out.status.success() {
            return Err(logged(ContainerError::ExecFailed {
                container: container.to_string(),
                source: std::io::Error::other(format!("env exited with {}", out.status)),
            }));
        }
        Ok(EnvSnapshot::parse_env_output(&String::from_utf8_lossy(
            &out.stdout,
        )))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
